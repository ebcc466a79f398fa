use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Global diagnostics file handle. When `Some`, `tlog!` mirrors every message into it.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// stderr is shared with the interactive prompt, so diagnostics only go there on request.
pub(crate) static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Enable or disable diagnostics on stderr.
pub fn set_verbose(enabled: bool) {
    VERBOSE.store(enabled, Ordering::Relaxed);
}

pub(crate) fn verbose() -> bool {
    VERBOSE.load(Ordering::Relaxed)
}

/// Initialise diagnostics file logging in the given directory.
/// Creates a timestamped log file and a `miniterm.log` symlink (Unix only).
pub fn init_file_logging(diag_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(diag_dir)
        .map_err(|e| format!("Failed to create diagnostics dir: {}", e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-miniterm.log")
        .to_string();
    let log_path = diag_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    // Windows symlinks require elevated privileges
    #[cfg(unix)]
    {
        let symlink_path = diag_dir.join("miniterm.log");
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            if verbose() {
                eprintln!(
                    "{} [logging] Failed to create miniterm.log symlink: {}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    e
                );
            }
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // tlog! would try to lock LOG_FILE again, write the first line by hand
    if verbose() {
        eprintln!(
            "{} [logging] File logging started: {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            log_path.display()
        );
    }

    Ok(log_path)
}

/// Stop file logging and close the diagnostics file.
pub fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.take().is_some() && verbose() {
            eprintln!(
                "{} [logging] File logging stopped",
                chrono::Local::now().format("%H:%M:%S%.3f")
            );
        }
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message. Written to stderr in
/// verbose mode and to the diagnostics file when file logging is enabled.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        if $crate::logging::verbose() {
            eprintln!("{}", msg);
        }
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_writes_messages() {
        let dir = std::env::temp_dir().join(format!("miniterm-diag-{}", uuid::Uuid::new_v4()));
        let path = init_file_logging(&dir).unwrap();

        tlog!("[test] hello {}", 42);
        stop_file_logging();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("[test] hello 42"));

        // Messages after stop are not written
        tlog!("[test] after stop");
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("after stop"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
