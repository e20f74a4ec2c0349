//! Host collaborators: commands, processes, privileges and device nodes

pub mod command;
pub mod devfs;
pub mod janitor;
pub mod privilege;
pub mod process;
