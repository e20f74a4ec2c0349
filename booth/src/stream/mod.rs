//! Live MJPEG preview

pub mod admission;
pub mod encoder;
pub mod supervisor;
pub mod viewer;
pub mod watchdog;
