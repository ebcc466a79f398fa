// src/io/error.rs
//
// Error type for the device I/O channel.

use thiserror::Error;

/// Errors raised by the serial device channel.
///
/// Every variant is fatal to the session: the coordinator records it as the
/// last error and drains. Nothing here is retried.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The path does not name a live serial device
    #[error("{0} isn't a serial port")]
    NotSerialDevice(String),

    /// Enumerating the serial devices failed
    #[error("Failed to enumerate ports: {0}")]
    Enumerate(String),

    /// Opening (or cloning) the device handle failed
    #[error("Failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// A read from the device failed mid-session
    #[error("Read error: {0}")]
    Read(#[source] std::io::Error),

    /// A write to the device failed mid-session
    #[error("Write error: {0}")]
    Write(#[source] std::io::Error),

    /// The device reported end of stream
    #[error("Device {0} disconnected")]
    Disconnected(String),

    /// The writer side of the channel is gone
    #[error("Device channel closed")]
    ChannelClosed,
}

impl DeviceError {
    pub fn open(port: &str, reason: impl ToString) -> Self {
        DeviceError::Open {
            port: port.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DeviceError::NotSerialDevice("/dev/null".into()).to_string(),
            "/dev/null isn't a serial port"
        );
        assert_eq!(
            DeviceError::open("/dev/ttyUSB0", "busy").to_string(),
            "Failed to open /dev/ttyUSB0: busy"
        );
        let read = DeviceError::Read(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
        assert_eq!(read.to_string(), "Read error: gone");
    }
}
