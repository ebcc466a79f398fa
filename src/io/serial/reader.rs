// src/io/serial/reader.rs
//
// Device I/O channel for the console.
// Owns the open serial device: a blocking read thread feeds the line framer
// and reports decoded lines, while a single writer thread carries encoded
// outbound lines. Each thread owns one half of the duplex handle.

use std::io::{Read, Write};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::framer::LineFramer;
use super::utils::{
    to_serialport_data_bits, to_serialport_parity, to_serialport_stop_bits, LineSettings,
};
use crate::console::transform::Eol;
use crate::device_scan;
use crate::io::error::DeviceError;
use crate::io::types::{DeviceEvent, TransmitRequest};

/// Read buffer size for one blocking read
const READ_CHUNK: usize = 256;

/// Depth of the outbound queue; writes are issued strictly in submit order
const TRANSMIT_QUEUE: usize = 32;

// ============================================================================
// Device Halves
// ============================================================================

/// The two directions of an open device.
/// Readers must return `TimedOut` (or data) periodically so a stop request
/// is noticed; `Ok(0)` means the device went away.
pub struct DeviceHalves {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

/// Open a serial device and split it into read and write halves.
///
/// When `check` is set the path must resolve (directly or through its
/// canonical form) to a device in the live port listing.
pub fn open_serial(
    port: &str,
    baud_rate: u32,
    line: &LineSettings,
    check: bool,
) -> Result<DeviceHalves, DeviceError> {
    if check {
        let ports = device_scan::scan_ports()?;
        device_scan::check_device(port, &ports)?;
    }

    let serial = serialport::new(port, baud_rate)
        .data_bits(to_serialport_data_bits(line.data_bits))
        .stop_bits(to_serialport_stop_bits(line.stop_bits))
        .parity(to_serialport_parity(line.parity))
        .timeout(line.read_timeout)
        .open()
        .map_err(|e| DeviceError::open(port, e))?;

    let writer = serial
        .try_clone()
        .map_err(|e| DeviceError::open(port, format!("cannot clone handle: {}", e)))?;

    tlog!(
        "[serial] Opened {} at {} baud ({}, read timeout {:?})",
        port,
        baud_rate,
        line.summary(),
        line.read_timeout
    );

    Ok(DeviceHalves {
        reader: Box::new(serial),
        writer: Box::new(writer),
    })
}

// ============================================================================
// Transmitter
// ============================================================================

/// Cloneable handle for queueing outbound writes
#[derive(Clone)]
pub struct Transmitter {
    tx: mpsc::Sender<TransmitRequest>,
}

impl Transmitter {
    /// Queue wire bytes and wait until they have been written and flushed.
    pub async fn write(&self, data: Vec<u8>) -> Result<(), DeviceError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.tx
            .send(TransmitRequest { data, result_tx })
            .await
            .map_err(|_| DeviceError::ChannelClosed)?;
        result_rx.await.map_err(|_| DeviceError::ChannelClosed)?
    }
}

// ============================================================================
// Device Channel
// ============================================================================

/// A running device channel: read thread, writer thread and the stop flag
/// shared with them.
pub struct DeviceChannel {
    port: String,
    stop_flag: Arc<AtomicBool>,
    transmit_tx: Option<mpsc::Sender<TransmitRequest>>,
    read_handle: Option<JoinHandle<()>>,
    write_handle: Option<JoinHandle<()>>,
}

impl DeviceChannel {
    /// Start both threads. Decoded lines and the final `Closed` event are
    /// sent on `events_tx`.
    pub fn start(
        port: &str,
        halves: DeviceHalves,
        eol: Eol,
        events_tx: mpsc::Sender<DeviceEvent>,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (transmit_tx, transmit_rx) = mpsc::channel::<TransmitRequest>(TRANSMIT_QUEUE);

        let DeviceHalves { reader, writer } = halves;

        let read_port = port.to_string();
        let read_stop = stop_flag.clone();
        let read_handle = tokio::task::spawn_blocking(move || {
            run_read_loop(read_port, reader, LineFramer::new(eol), read_stop, events_tx)
        });

        let write_port = port.to_string();
        let write_handle =
            tokio::task::spawn_blocking(move || run_write_loop(write_port, writer, transmit_rx));

        DeviceChannel {
            port: port.to_string(),
            stop_flag,
            transmit_tx: Some(transmit_tx),
            read_handle: Some(read_handle),
            write_handle: Some(write_handle),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Handle for the write activity. `None` once the channel is closed.
    pub fn transmitter(&self) -> Option<Transmitter> {
        self.transmit_tx.clone().map(|tx| Transmitter { tx })
    }

    /// Ask the read thread to stop. It flushes the framer and sends
    /// `Closed(None)` within one read timeout.
    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Stop both threads and release the device handle.
    /// The writer thread ends once every `Transmitter` clone is dropped.
    pub async fn close(&mut self) {
        self.request_stop();
        self.transmit_tx = None;

        if let Some(handle) = self.read_handle.take() {
            if let Err(e) = handle.await {
                tlog!("[serial] Read thread for {} panicked: {:?}", self.port, e);
            }
        }
        if let Some(handle) = self.write_handle.take() {
            if let Err(e) = handle.await {
                tlog!("[serial] Write thread for {} panicked: {:?}", self.port, e);
            }
        }
        tlog!("[serial] Channel for {} closed", self.port);
    }
}

/// Blocking read loop. Runs until stopped, disconnected or failed, then
/// flushes the framer exactly once and reports `Closed`.
fn run_read_loop(
    port: String,
    mut reader: Box<dyn Read + Send>,
    mut framer: LineFramer,
    stop_flag: Arc<AtomicBool>,
    events_tx: mpsc::Sender<DeviceEvent>,
) {
    let mut buf = [0u8; READ_CHUNK];
    let mut total_bytes: u64 = 0;

    let outcome = loop {
        if stop_flag.load(Ordering::SeqCst) {
            break None;
        }

        match reader.read(&mut buf) {
            Ok(0) => {
                // EOF - port closed/disconnected
                break Some(DeviceError::Disconnected(port.clone()));
            }
            Ok(n) => {
                total_bytes += n as u64;
                let lines = framer.feed(&buf[..n]);
                if !lines.is_empty() && events_tx.blocking_send(DeviceEvent::Lines(lines)).is_err()
                {
                    // Coordinator is gone, nobody to report to
                    break None;
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::Interrupted
                ) => {}
            Err(e) => break Some(DeviceError::Read(e)),
        }
    };

    if let Some(line) = framer.flush() {
        let _ = events_tx.blocking_send(DeviceEvent::Lines(vec![line]));
    }

    tlog!(
        "[serial] Read loop for {} ended after {} bytes ({})",
        port,
        total_bytes,
        match &outcome {
            Some(e) => e.to_string(),
            None => "stopped".to_string(),
        }
    );

    let _ = events_tx.blocking_send(DeviceEvent::Closed(outcome));
}

/// Blocking write loop. Requests are served strictly in queue order.
fn run_write_loop(
    port: String,
    mut writer: Box<dyn Write + Send>,
    mut transmit_rx: mpsc::Receiver<TransmitRequest>,
) {
    while let Some(req) = transmit_rx.blocking_recv() {
        let result = writer
            .write_all(&req.data)
            .and_then(|_| writer.flush())
            .map_err(DeviceError::Write);
        let failed = result.is_err();
        let _ = req.result_tx.send(result);
        if failed {
            tlog!("[serial] Write to {} failed, writer stopping", port);
            break;
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! In-memory device halves for exercising the channel and the console.

    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// What the mock reader does once its scripted chunks run out
    #[derive(Clone, Copy, Debug)]
    pub enum AfterScript {
        /// Report end of stream (device unplugged)
        Eof,
        /// Fail with an I/O error
        Fail,
        /// Keep timing out until the channel is stopped
        Idle,
        /// Block inside one read for the given time, then fail. Lets a test
        /// land a device error after a stop has been requested.
        StallThenFail(Duration),
    }

    pub struct MockReader {
        chunks: VecDeque<Vec<u8>>,
        after: AfterScript,
    }

    impl MockReader {
        pub fn new(chunks: &[&[u8]], after: AfterScript) -> Self {
            MockReader {
                chunks: chunks.iter().map(|c| c.to_vec()).collect(),
                after,
            }
        }
    }

    impl Read for MockReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(mut chunk) = self.chunks.pop_front() {
                if chunk.len() > buf.len() {
                    let rest = chunk.split_off(buf.len());
                    self.chunks.push_front(rest);
                }
                buf[..chunk.len()].copy_from_slice(&chunk);
                return Ok(chunk.len());
            }
            match self.after {
                AfterScript::Eof => Ok(0),
                AfterScript::Fail => Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged")),
                AfterScript::Idle => {
                    std::thread::sleep(Duration::from_millis(5));
                    Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"))
                }
                AfterScript::StallThenFail(stall) => {
                    std::thread::sleep(stall);
                    Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"))
                }
            }
        }
    }

    /// Writer that records everything written to it
    #[derive(Clone, Default)]
    pub struct MockWriter {
        pub written: Arc<Mutex<Vec<u8>>>,
        pub fail: bool,
    }

    impl Write for MockWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failed"));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{AfterScript, MockReader, MockWriter};
    use super::*;

    fn halves(reader: MockReader, writer: MockWriter) -> DeviceHalves {
        DeviceHalves {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    async fn collect_until_closed(
        rx: &mut mpsc::Receiver<DeviceEvent>,
    ) -> (Vec<String>, Option<DeviceError>) {
        let mut lines = Vec::new();
        while let Some(event) = rx.recv().await {
            match event {
                DeviceEvent::Lines(batch) => lines.extend(batch),
                DeviceEvent::Closed(outcome) => return (lines, outcome),
            }
        }
        panic!("channel ended without Closed event");
    }

    #[tokio::test]
    async fn test_disconnect_flushes_trailing_line() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let reader = MockReader::new(&[b"one\ntw", b"o\nthree"], AfterScript::Eof);
        let mut channel =
            DeviceChannel::start("mock0", halves(reader, MockWriter::default()), Eol::Lf, events_tx);

        let (lines, outcome) = collect_until_closed(&mut events_rx).await;
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert!(matches!(outcome, Some(DeviceError::Disconnected(ref p)) if p == "mock0"));

        channel.close().await;
    }

    #[tokio::test]
    async fn test_read_error_is_reported() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let reader = MockReader::new(&[b"partial"], AfterScript::Fail);
        let mut channel =
            DeviceChannel::start("mock0", halves(reader, MockWriter::default()), Eol::Lf, events_tx);

        let (lines, outcome) = collect_until_closed(&mut events_rx).await;
        assert_eq!(lines, vec!["partial"]);
        assert!(matches!(outcome, Some(DeviceError::Read(_))));

        channel.close().await;
    }

    #[tokio::test]
    async fn test_stop_request_reports_clean_close() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let reader = MockReader::new(&[b"left over"], AfterScript::Idle);
        let channel =
            DeviceChannel::start("mock0", halves(reader, MockWriter::default()), Eol::Lf, events_tx);

        channel.request_stop();
        let (lines, outcome) = collect_until_closed(&mut events_rx).await;
        // Whether or not the chunk was read before the stop, nothing is duplicated
        assert!(lines.len() <= 1);
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_writes_keep_submit_order() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let writer = MockWriter::default();
        let written = writer.written.clone();
        let mut channel = DeviceChannel::start(
            "mock0",
            halves(MockReader::new(&[], AfterScript::Idle), writer),
            Eol::Crlf,
            events_tx,
        );

        let transmitter = channel.transmitter().unwrap();
        transmitter.write(Eol::Crlf.encode_line("ping")).await.unwrap();
        transmitter.write(Eol::Crlf.encode_line("pong")).await.unwrap();
        assert_eq!(written.lock().unwrap().as_slice(), b"ping\r\npong\r\n");

        drop(transmitter);
        channel.close().await;
        assert!(channel.transmitter().is_none());
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let (events_tx, _events_rx) = mpsc::channel(16);
        let writer = MockWriter {
            fail: true,
            ..MockWriter::default()
        };
        let mut channel = DeviceChannel::start(
            "mock0",
            halves(MockReader::new(&[], AfterScript::Idle), writer),
            Eol::Lf,
            events_tx,
        );

        let transmitter = channel.transmitter().unwrap();
        let result = transmitter.write(b"x\n".to_vec()).await;
        assert!(matches!(result, Err(DeviceError::Write(_))));

        // The writer thread has stopped, later writes see a closed channel
        let result = transmitter.write(b"y\n".to_vec()).await;
        assert!(matches!(result, Err(DeviceError::ChannelClosed)));

        drop(transmitter);
        channel.close().await;
    }
}
