// src/console/log_sink.rs
//
// Optional session log: decoded inbound lines appended to a text file,
// flushed periodically by a background task.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Default period of the background flush
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(2);

/// The requested output file could not be created
#[derive(Debug, Error)]
#[error("Failed to open output file {}: {source}", .path.display())]
pub struct LogSinkError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Open log file and the number of records written to it
struct LogFile {
    out: BufWriter<File>,
    records: u64,
}

type SharedWriter = Arc<Mutex<Option<LogFile>>>;

/// Append-only session log. Decoded lines joined by `\n`, UTF-8, no
/// trailing separator after the last record.
pub struct SessionLog {
    path: PathBuf,
    flush_interval: Duration,
    writer: SharedWriter,
    flush_task: Option<JoinHandle<()>>,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>, flush_interval: Duration) -> Self {
        SessionLog {
            path: path.into(),
            flush_interval,
            writer: Arc::new(Mutex::new(None)),
            flush_task: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.writer.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    /// Create (or truncate) the file and start the periodic flush.
    /// Must be called from within a tokio runtime. Opening twice is a no-op.
    pub fn open(&mut self) -> Result<(), LogSinkError> {
        if self.is_open() {
            return Ok(());
        }

        let file = File::create(&self.path).map_err(|source| LogSinkError {
            path: self.path.clone(),
            source,
        })?;

        if let Ok(mut guard) = self.writer.lock() {
            *guard = Some(LogFile {
                out: BufWriter::new(file),
                records: 0,
            });
        }

        self.flush_task = Some(spawn_flush_task(
            self.writer.clone(),
            self.flush_interval,
            self.path.clone(),
        ));

        tlog!("[log_sink] Writing session output to {}", self.path.display());
        Ok(())
    }

    /// Append one decoded line. Failures are logged and otherwise ignored so
    /// the console keeps running.
    pub fn write_line(&self, line: &str) {
        let Ok(mut guard) = self.writer.lock() else {
            return;
        };
        if let Some(log) = guard.as_mut() {
            let separator: &[u8] = if log.records > 0 { b"\n" } else { b"" };
            match log
                .out
                .write_all(separator)
                .and_then(|_| log.out.write_all(line.as_bytes()))
            {
                Ok(()) => log.records += 1,
                Err(e) => tlog!("[log_sink] Write to {} failed: {}", self.path.display(), e),
            }
        }
    }

    /// Flush and release the file. Safe to call when not open, and more
    /// than once.
    pub fn close(&mut self) {
        if let Some(task) = self.flush_task.take() {
            task.abort();
        }

        let writer = match self.writer.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(mut log) = writer {
            if let Err(e) = log.out.flush() {
                tlog!("[log_sink] Final flush of {} failed: {}", self.path.display(), e);
            }
            tlog!("[log_sink] Closed {}", self.path.display());
        }
    }
}

impl Drop for SessionLog {
    fn drop(&mut self) {
        self.close();
    }
}

/// Flush the writer every `period` until it is taken by `close`.
fn spawn_flush_task(writer: SharedWriter, period: Duration, path: PathBuf) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Ok(mut guard) = writer.lock() else {
                break;
            };
            match guard.as_mut() {
                Some(log) => {
                    if let Err(e) = log.out.flush() {
                        tlog!("[log_sink] Periodic flush of {} failed: {}", path.display(), e);
                    }
                }
                None => break,
            }
        }
    })
}
