//! boothd library
//!
//! Camera core of the photobooth daemon: device discovery, the loopback
//! kernel module, the live preview, still capture and photo processing.

pub mod app;
pub mod camera;
pub mod capture;
pub mod devices;
pub mod errors;
pub mod filesys;
pub mod kmod;
pub mod logs;
pub mod pipeline;
pub mod server;
pub mod storage;
pub mod stream;
pub mod system;
pub mod utils;
pub mod workers;
