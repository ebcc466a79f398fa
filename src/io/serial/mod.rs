// src/io/serial/mod.rs
//
// Serial port driver for the console.
//
// Features:
// - Line reassembly of the inbound byte stream (framer)
// - Duplex device channel: read thread + writer thread (reader)
// - Line parameter conversion for the serialport crate (utils)

pub mod framer;
pub mod reader;
pub mod utils;

pub use framer::LineFramer;
pub use reader::{open_serial, DeviceChannel, DeviceHalves, Transmitter};
pub use utils::{LineSettings, Parity};
