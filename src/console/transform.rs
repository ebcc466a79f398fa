// src/console/transform.rs
//
// End-of-line conventions and the pure rx/tx text transforms they define.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// End-of-line convention used on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eol {
    /// ENTER sends CR
    Cr,
    /// ENTER sends LF, text is forwarded unchanged
    Lf,
    /// ENTER sends CR+LF
    Crlf,
}

impl Default for Eol {
    fn default() -> Self {
        Eol::Lf
    }
}

impl Eol {
    /// Normalise text received from the device into logical lines.
    pub fn rx(&self, text: &str) -> String {
        match self {
            Eol::Crlf => text.replace('\r', ""),
            Eol::Cr => text.replace('\r', "\n"),
            Eol::Lf => text.to_string(),
        }
    }

    /// Expand logical newlines into the wire sequence.
    pub fn tx(&self, text: &str) -> String {
        match self {
            Eol::Crlf => text.replace('\n', "\r\n"),
            Eol::Cr => text.replace('\n', "\r"),
            Eol::Lf => text.to_string(),
        }
    }

    /// Wire bytes for one logical newline.
    pub fn newline(&self) -> &'static str {
        match self {
            Eol::Cr => "\r",
            Eol::Lf => "\n",
            Eol::Crlf => "\r\n",
        }
    }

    /// The byte that terminates a line on the wire: first byte of `tx("\n")`.
    pub fn separator(&self) -> u8 {
        self.newline().as_bytes()[0]
    }

    /// Encode one submitted input line for the device, newline included.
    pub fn encode_line(&self, line: &str) -> Vec<u8> {
        let mut wire = self.tx(line);
        wire.push_str(self.newline());
        wire.into_bytes()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Eol::Cr => "cr",
            Eol::Lf => "lf",
            Eol::Crlf => "crlf",
        }
    }
}

impl fmt::Display for Eol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Eol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cr" => Ok(Eol::Cr),
            "lf" => Ok(Eol::Lf),
            "crlf" => Ok(Eol::Crlf),
            other => Err(format!("Invalid EOL transformation: {}", other)),
        }
    }
}
