//! Background workers

pub mod reconnect;
