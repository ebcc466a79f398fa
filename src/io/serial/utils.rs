// src/io/serial/utils.rs
//
// Serial line parameters and their conversion to serialport crate types.

use serde::{Deserialize, Serialize};
use serialport::{DataBits, Parity as SpParity, StopBits};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Types
// ============================================================================

/// Parity setting for the serial line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl Default for Parity {
    fn default() -> Self {
        Parity::None
    }
}

impl FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            other => Err(format!("Invalid parity: {}", other)),
        }
    }
}

/// Line parameters other than the baud rate
#[derive(Clone, Debug, PartialEq)]
pub struct LineSettings {
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    /// Upper bound on one blocking read; lets the read thread notice a stop request
    pub read_timeout: Duration,
}

impl Default for LineSettings {
    fn default() -> Self {
        LineSettings {
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            read_timeout: Duration::from_millis(50),
        }
    }
}

impl LineSettings {
    /// Short `8N1`-style summary for diagnostics
    pub fn summary(&self) -> String {
        format!(
            "{}{}{}",
            self.data_bits,
            match self.parity {
                Parity::None => 'N',
                Parity::Odd => 'O',
                Parity::Even => 'E',
            },
            self.stop_bits
        )
    }
}

// ============================================================================
// Conversion Functions
// ============================================================================

pub fn to_serialport_parity(p: Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Unsupported counts fall back to eight data bits
pub fn to_serialport_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

pub fn to_serialport_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}

// ============================================================================
// Tests
// ============================================================================
