//! Video device discovery, identification and per-model profiles

pub mod catalog;
pub mod formats;
pub mod model;
pub mod profiles;
pub mod registry;
