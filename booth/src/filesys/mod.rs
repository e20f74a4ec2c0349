//! File and directory helpers

pub mod dir;
pub mod file;
