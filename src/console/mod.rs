// src/console/mod.rs
//
// Interactive console: line transforms, display, prompt input, session log,
// terminal restore and the session coordinator that ties them together.

pub mod display;
pub mod log_sink;
pub mod prompt;
pub mod restore;
pub mod session;
pub mod transform;

pub use display::{DisplaySink, Palette, TerminalConsole};
pub use log_sink::{LogSinkError, SessionLog};
pub use prompt::{InputEvent, LineInput, TerminalPrompt};
pub use restore::{RestoreOnce, TerminalRestore};
pub use session::{
    connect_banner, ConsoleSession, SessionDescriptor, SessionError, SessionOutcome, SessionState,
};
pub use transform::Eol;
