// src/console/restore.rs
//
// Terminal state restoration, run once when the session ends.

use std::sync::atomic::{AtomicBool, Ordering};

/// Restore a sane terminal state. Implementations must be idempotent.
pub trait TerminalRestore: Send + Sync {
    fn restore(&self);
}

/// Runs its restore action at most once, however often it is asked to.
pub struct RestoreOnce {
    done: AtomicBool,
    action: Box<dyn Fn() + Send + Sync>,
}

impl RestoreOnce {
    pub fn new(action: impl Fn() + Send + Sync + 'static) -> Self {
        RestoreOnce {
            done: AtomicBool::new(false),
            action: Box::new(action),
        }
    }

    /// Leave raw mode, reset colours, show the cursor and run `stty sane`.
    pub fn terminal() -> Self {
        RestoreOnce::new(restore_terminal)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

impl TerminalRestore for RestoreOnce {
    fn restore(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        (self.action)();
    }
}

fn restore_terminal() {
    use crossterm::{cursor::Show, execute, style::ResetColor};

    if let Err(e) = crossterm::terminal::disable_raw_mode() {
        tlog!("[restore] Failed to leave raw mode: {}", e);
    }
    let _ = execute!(std::io::stdout(), ResetColor, Show);
    stty_sane();
}

/// Reset tty line settings the way a shell user would after a crash.
#[cfg(unix)]
fn stty_sane() {
    use std::io::IsTerminal;

    if !std::io::stdin().is_terminal() {
        return;
    }
    match std::process::Command::new("stty").arg("sane").status() {
        Ok(status) if !status.success() => tlog!("[restore] stty sane exited with {}", status),
        Ok(_) => {}
        // No stty on this system
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tlog!("[restore] Failed to run stty: {}", e),
    }
}

#[cfg(not(unix))]
fn stty_sane() {}
