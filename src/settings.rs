// src/settings.rs
//
// Persisted user configuration (TOML). Every field has a default so a
// partial or missing file still yields a complete configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::console::display::Palette;
use crate::console::transform::Eol;
use crate::io::serial::{LineSettings, Parity};

const SETTINGS_DIR: &str = "miniterm";
const SETTINGS_FILE: &str = "config.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppSettings {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub eol: Eol,

    // Serial line
    #[serde(default = "default_data_bits")]
    pub data_bits: u8, // 5..=8
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8, // 1 | 2
    #[serde(default)]
    pub parity: Parity,
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    // Session log
    #[serde(default = "default_log_flush_interval_ms")]
    pub log_flush_interval_ms: u64,

    // Console appearance
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_prompt_colour")]
    pub prompt_colour: String,
    #[serde(default = "default_input_colour")]
    pub input_colour: String,
    #[serde(default = "default_async_output_colour")]
    pub async_output_colour: String,
    #[serde(default = "default_sync_output_colour")]
    pub sync_output_colour: String,

    // Diagnostics
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub diag_dir: Option<String>,
}

fn default_baud_rate() -> u32 {
    9600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_read_timeout_ms() -> u64 {
    50
}
fn default_log_flush_interval_ms() -> u64 {
    2000
}
fn default_prompt() -> String {
    "> ".to_string()
}
fn default_prompt_colour() -> String {
    "#00ff66".to_string() // green
}
fn default_input_colour() -> String {
    "#1642C7".to_string() // blue
}
fn default_async_output_colour() -> String {
    "#ED7621".to_string() // orange
}
fn default_sync_output_colour() -> String {
    "#7542f5".to_string() // violet
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            eol: Eol::default(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            read_timeout_ms: default_read_timeout_ms(),
            log_flush_interval_ms: default_log_flush_interval_ms(),
            prompt: default_prompt(),
            prompt_colour: default_prompt_colour(),
            input_colour: default_input_colour(),
            async_output_colour: default_async_output_colour(),
            sync_output_colour: default_sync_output_colour(),
            verbose: false,
            diag_dir: None,
        }
    }
}

impl AppSettings {
    pub fn line_settings(&self) -> LineSettings {
        LineSettings {
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
            read_timeout: Duration::from_millis(self.read_timeout_ms.max(1)),
        }
    }

    pub fn log_flush_interval(&self) -> Duration {
        Duration::from_millis(self.log_flush_interval_ms.max(1))
    }

    pub fn palette(&self) -> Palette {
        Palette::from_hex(
            &self.prompt_colour,
            &self.input_colour,
            &self.async_output_colour,
            &self.sync_output_colour,
        )
    }

    /// Reject values the serial layer cannot represent.
    pub fn validate(&self) -> Result<(), String> {
        if self.baud_rate == 0 {
            return Err("baud_rate must be positive".to_string());
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(format!("data_bits must be 5-8, got {}", self.data_bits));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(format!("stop_bits must be 1 or 2, got {}", self.stop_bits));
        }
        Ok(())
    }
}

/// `<config dir>/miniterm/config.toml`
pub fn default_settings_path() -> Result<PathBuf, String> {
    let config_dir =
        dirs::config_dir().ok_or_else(|| "Failed to get user config dir".to_string())?;
    Ok(config_dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
}

/// Load settings from `path`, or from the default location when `None`.
/// A missing file yields defaults; a malformed one is an error.
pub fn load_settings(path: Option<&Path>) -> Result<AppSettings, String> {
    let settings_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_settings_path()?,
    };

    if !settings_path.exists() {
        if path.is_some() {
            return Err(format!("Settings file {} not found", settings_path.display()));
        }
        return Ok(AppSettings::default());
    }

    let content = std::fs::read_to_string(&settings_path)
        .map_err(|e| format!("Failed to read settings: {}", e))?;

    let settings: AppSettings = toml::from_str(&content)
        .map_err(|e| format!("Failed to parse settings {}: {}", settings_path.display(), e))?;
    settings.validate()?;

    tlog!("[settings] Loaded {}", settings_path.display());
    Ok(settings)
}

/// Write settings as TOML, creating the parent directory when needed.
pub fn save_settings(settings: &AppSettings, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }
    }

    let content = toml::to_string_pretty(settings)
        .map_err(|e| format!("Failed to serialize settings: {}", e))?;

    std::fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))?;
    tlog!("[settings] Saved {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("miniterm-settings-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: AppSettings = toml::from_str("baud_rate = 115200\neol = \"crlf\"\n").unwrap();
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.eol, Eol::Crlf);
        assert_eq!(settings.data_bits, 8);
        assert_eq!(settings.parity, Parity::None);
        assert_eq!(settings.prompt, "> ");
        assert_eq!(settings.log_flush_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_empty_file_equals_default() {
        let settings: AppSettings = toml::from_str("").unwrap();
        assert_eq!(settings, AppSettings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = temp_dir();
        let path = dir.join("nested").join("config.toml");

        let settings = AppSettings {
            baud_rate: 57600,
            eol: Eol::Cr,
            parity: Parity::Even,
            data_bits: 7,
            verbose: true,
            diag_dir: Some("/tmp/diag".to_string()),
            ..AppSettings::default()
        };
        save_settings(&settings, &path).unwrap();

        let loaded = load_settings(Some(&path)).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.line_settings().summary(), "7E1");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let path = temp_dir().join("absent.toml");
        let err = load_settings(Some(&path)).unwrap_err();
        assert!(err.contains("not found"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "eol = \"sideways\"\n").unwrap();

        let err = load_settings(Some(&path)).unwrap_err();
        assert!(err.starts_with("Failed to parse settings"));

        std::fs::write(&path, "data_bits = 9\n").unwrap();
        let err = load_settings(Some(&path)).unwrap_err();
        assert!(err.contains("data_bits"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
