//! Video-loopback kernel module

pub mod manager;
