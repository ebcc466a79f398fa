// src/io/mod.rs
//
// Device I/O for the console: the serial driver, the events it reports and
// the errors it raises.

mod error;
pub mod serial;
mod types;

pub use error::DeviceError;
pub use types::{DeviceEvent, TransmitRequest};
