// src/console/session.rs
//
// Console session coordinator.
// Connecting -> Active -> Draining -> Terminated. While Active, device
// events are consumed here (read activity) and a spawned task forwards
// prompt input to the device (write activity). Whatever ends the session,
// draining runs exactly once.

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use super::display::DisplaySink;
use super::log_sink::{LogSinkError, SessionLog, DEFAULT_FLUSH_INTERVAL};
use super::prompt::{InputEvent, LineInput};
use super::restore::TerminalRestore;
use super::transform::Eol;
use crate::io::serial::{DeviceChannel, DeviceHalves, Transmitter};
use crate::io::{DeviceError, DeviceEvent};

/// Depth of the device event queue between the read thread and the coordinator
const EVENT_QUEUE: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// Everything needed to run one session. Immutable once built.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionDescriptor {
    pub device: String,
    pub baud_rate: u32,
    pub eol: Eol,
    pub output_file: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Draining,
    Terminated,
}

/// The condition that ended a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Interrupted by user")]
    Interrupted,
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    LogSink(#[from] LogSinkError),
    #[error("Input error: {0}")]
    Input(#[source] std::io::Error),
}

impl SessionError {
    pub fn is_interrupt(&self) -> bool {
        matches!(self, SessionError::Interrupted)
    }
}

/// Single slot for the error that ended the session. The first error
/// recorded wins; later ones are logged and dropped.
#[derive(Debug, Default)]
pub struct LastError {
    slot: Mutex<Option<SessionError>>,
}

impl LastError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an earlier error already holds the slot.
    pub fn record(&self, error: SessionError) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = slot.as_ref() {
            tlog!("[session] Ignoring '{}', session already ending: {}", error, existing);
            return false;
        }
        tlog!("[session] Last error: {}", error);
        *slot = Some(error);
        true
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(true)
    }

    pub fn is_interrupt(&self) -> bool {
        self.slot
            .lock()
            .map(|s| s.as_ref().is_some_and(SessionError::is_interrupt))
            .unwrap_or(false)
    }

    /// 1 for a recorded non-interrupt error, else 0
    pub fn exit_code(&self) -> i32 {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(e) if !e.is_interrupt() => 1,
            _ => 0,
        }
    }

    fn take(&self) -> Option<SessionError> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub exit_code: i32,
    pub last_error: Option<SessionError>,
    pub lines_received: u64,
    pub lines_sent: u64,
}

impl SessionOutcome {
    /// The error to show the user, if any. Interrupts are not reported.
    pub fn reportable_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref().filter(|e| !e.is_interrupt())
    }

    /// Print `ERROR: <cause>` for a failed session. Call after the terminal
    /// has been restored.
    pub fn report(&self, out: &mut impl Write) -> std::io::Result<()> {
        if let Some(e) = self.reportable_error() {
            writeln!(out, "ERROR: {}", e)?;
        }
        Ok(())
    }
}

/// Startup banner shown before connecting
pub fn connect_banner(descriptor: &SessionDescriptor, device_description: &str) -> String {
    let mut banner = String::from("Connect to serial port.\n");
    banner.push_str(&format!(
        "- device: {} ({})\n",
        descriptor.device, device_description
    ));
    banner.push_str(&format!("- baudrate: {}\n", descriptor.baud_rate));
    banner.push_str(&format!("- eol: {}\n", descriptor.eol));
    if let Some(path) = &descriptor.output_file {
        banner.push_str(&format!("- output file: {}\n", path.display()));
    }
    banner.push_str("Use Ctrl+R to reset screen\n");
    banner.push_str("Use Ctrl+C to exit\n");
    banner
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct ConsoleSession {
    descriptor: SessionDescriptor,
    display: Arc<dyn DisplaySink>,
    restorer: Arc<dyn TerminalRestore>,
    log_flush_interval: Duration,
    state: SessionState,
    transitions: Vec<SessionState>,
    last_error: Arc<LastError>,
    lines_received: u64,
    lines_sent: Arc<AtomicU64>,
}

impl ConsoleSession {
    pub fn new(
        descriptor: SessionDescriptor,
        display: Arc<dyn DisplaySink>,
        restorer: Arc<dyn TerminalRestore>,
    ) -> Self {
        ConsoleSession {
            descriptor,
            display,
            restorer,
            log_flush_interval: DEFAULT_FLUSH_INTERVAL,
            state: SessionState::Connecting,
            transitions: Vec::new(),
            last_error: Arc::new(LastError::new()),
            lines_received: 0,
            lines_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_log_flush_interval(mut self, interval: Duration) -> Self {
        self.log_flush_interval = interval;
        self
    }

    pub fn descriptor(&self) -> &SessionDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn transitions(&self) -> &[SessionState] {
        &self.transitions
    }

    fn enter(&mut self, state: SessionState) {
        tlog!("[session] {:?} -> {:?}", self.state, state);
        self.state = state;
        self.transitions.push(state);
    }

    /// Run the session to completion.
    ///
    /// `open` runs on the blocking pool and yields the device halves.
    /// `input` supplies prompt lines for the write activity. `interrupt`
    /// completes when an external stop signal arrives; it is only watched
    /// while the session is active.
    pub async fn run<O, I, S>(&mut self, open: O, input: I, interrupt: S) -> SessionOutcome
    where
        O: FnOnce() -> Result<DeviceHalves, DeviceError> + Send + 'static,
        I: LineInput + 'static,
        S: Future<Output = ()>,
    {
        self.enter(SessionState::Connecting);

        let halves = match tokio::task::spawn_blocking(open).await {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                self.last_error.record(SessionError::Device(e));
                return self.terminate();
            }
            Err(e) => {
                let error = DeviceError::open(&self.descriptor.device, format!("open task failed: {}", e));
                self.last_error.record(SessionError::Device(error));
                return self.terminate();
            }
        };

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE);
        let mut channel =
            DeviceChannel::start(&self.descriptor.device, halves, self.descriptor.eol, events_tx);

        // The log opens only once the device is connected
        let mut log = None;
        if let Some(path) = &self.descriptor.output_file {
            let mut sink = SessionLog::new(path, self.log_flush_interval);
            match sink.open() {
                Ok(()) => log = Some(sink),
                Err(e) => {
                    self.last_error.record(SessionError::LogSink(e));
                }
            }
        }

        let mut device_closed = false;
        let mut write_task = None;

        if let (false, Some(transmitter)) = (self.last_error.is_set(), channel.transmitter()) {
            self.enter(SessionState::Active);

            let mut task = tokio::spawn(write_activity(
                input,
                transmitter,
                self.descriptor.eol,
                self.last_error.clone(),
                self.lines_sent.clone(),
            ));
            let mut write_done = false;
            tokio::pin!(interrupt);

            loop {
                tokio::select! {
                    event = events_rx.recv() => match event {
                        Some(DeviceEvent::Lines(lines)) => self.emit(lines, log.as_ref()),
                        Some(DeviceEvent::Closed(outcome)) => {
                            device_closed = true;
                            if let Some(e) = outcome {
                                self.last_error.record(SessionError::Device(e));
                            }
                            break;
                        }
                        None => {
                            device_closed = true;
                            break;
                        }
                    },
                    result = &mut task => {
                        write_done = true;
                        if let Err(e) = result {
                            tlog!("[session] Write activity failed: {}", e);
                        }
                        break;
                    }
                    _ = &mut interrupt => {
                        self.last_error.record(SessionError::Interrupted);
                        break;
                    }
                }
            }

            if !write_done {
                write_task = Some(task);
            }
        }

        // ---- Draining ----
        self.enter(SessionState::Draining);
        self.display.finish();

        if let Some(task) = write_task {
            task.abort();
            let _ = task.await;
        }

        if !device_closed {
            channel.request_stop();
            while let Some(event) = events_rx.recv().await {
                match event {
                    DeviceEvent::Lines(lines) => self.emit(lines, log.as_ref()),
                    DeviceEvent::Closed(outcome) => {
                        if let Some(e) = outcome {
                            self.last_error.record(SessionError::Device(e));
                        }
                        break;
                    }
                }
            }
        }
        channel.close().await;

        if let Some(mut log) = log {
            log.close();
        }

        self.terminate()
    }

    /// Final step of every path: stop notice, terminal restore, outcome.
    fn terminate(&mut self) -> SessionOutcome {
        if self.last_error.is_interrupt() {
            self.display.write_sync("Stop ...\n");
        }
        self.restorer.restore();
        self.enter(SessionState::Terminated);

        let exit_code = self.last_error.exit_code();
        SessionOutcome {
            exit_code,
            last_error: self.last_error.take(),
            lines_received: self.lines_received,
            lines_sent: self.lines_sent.load(Ordering::SeqCst),
        }
    }

    fn emit(&mut self, lines: Vec<String>, log: Option<&SessionLog>) {
        for line in lines {
            if let Some(log) = log {
                log.write_line(&line);
            }
            self.display.write_line_async(&line);
            self.lines_received += 1;
        }
    }
}

/// Forward prompt lines to the device until input ends or a write fails.
async fn write_activity<I: LineInput>(
    mut input: I,
    transmitter: Transmitter,
    eol: Eol,
    last_error: Arc<LastError>,
    lines_sent: Arc<AtomicU64>,
) {
    loop {
        let line = match input.read_line().await {
            Ok(InputEvent::Line(line)) => line,
            Ok(InputEvent::Interrupt) | Ok(InputEvent::Eof) => {
                last_error.record(SessionError::Interrupted);
                return;
            }
            Err(e) => {
                last_error.record(SessionError::Input(e));
                return;
            }
        };

        if let Err(e) = transmitter.write(eol.encode_line(&line)).await {
            last_error.record(SessionError::Device(e));
            return;
        }
        lines_sent.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================
