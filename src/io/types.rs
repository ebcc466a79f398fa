// src/io/types.rs
//
// Messages exchanged between the device threads and the console coordinator.

use tokio::sync::oneshot;

use super::error::DeviceError;

// ============================================================================
// Device Events
// ============================================================================

/// Event sent from the read thread to the coordinator
#[derive(Debug)]
pub enum DeviceEvent {
    /// Decoded logical lines, in arrival order
    Lines(Vec<String>),
    /// The read thread has stopped. `None` means it was asked to stop.
    /// Always the last event of a session; any residual partial line has
    /// already been flushed in a preceding `Lines` event.
    Closed(Option<DeviceError>),
}

// ============================================================================
// Transmit Types
// ============================================================================

/// Transmit request sent to the writer thread
pub struct TransmitRequest {
    /// Wire bytes, already encoded for the EOL convention
    pub data: Vec<u8>,
    /// Oneshot channel to send the result back
    pub result_tx: oneshot::Sender<Result<(), DeviceError>>,
}
