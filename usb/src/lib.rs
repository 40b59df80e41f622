pub use respeaker_types;
pub use rusb;

pub mod client;
pub mod commands;
pub mod device;
pub mod dfu;
pub mod discovery;
pub mod error;
pub mod field;
pub mod parameters;
pub mod pixel_ring;
pub mod service;
pub mod worker;

#[cfg(any(test, feature = "mock"))]
pub mod mock;
