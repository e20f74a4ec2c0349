//! Camera facade and its guards

pub mod restart;
pub mod service;
pub mod setup;
