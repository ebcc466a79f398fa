// src/cli.rs
//
// Command line front end.

use clap::Parser;
use std::path::PathBuf;

use crate::console::session::SessionDescriptor;
use crate::console::transform::Eol;
use crate::device_scan::filter_help;
use crate::settings::AppSettings;

/// Simple interactive line-buffered serial terminal.
#[derive(Parser, Debug)]
#[command(name = "miniterm", version, after_help = filter_help())]
pub struct Cli {
    /// Serial port. Resolved from --filter when omitted
    pub port: Option<String>,

    /// Serial port baud rate [default: 9600]
    #[arg(short, long)]
    pub baudrate: Option<u32>,

    /// End of line transformation (cr, lf, crlf) [default: lf]
    #[arg(short, long)]
    pub eol: Option<Eol>,

    /// Serial port filter expression (see below). Repeat to match any of several
    #[arg(short, long = "filter", value_name = "EXPR")]
    pub filters: Vec<String>,

    /// Don't ask interactively when several ports match
    #[arg(long)]
    pub no_input: bool,

    /// List ports instead of running the terminal
    #[arg(short, long)]
    pub list_ports: bool,

    /// Save received lines to this file
    #[arg(short, long, value_name = "PATH")]
    pub output_file: Option<PathBuf>,

    /// Settings file [default: <config dir>/miniterm/config.toml]
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write the effective settings to the settings file and exit
    #[arg(long)]
    pub write_config: bool,

    /// Print diagnostics to stderr
    #[arg(short, long)]
    pub verbose: bool,

    /// Also write diagnostics to a timestamped file in this directory
    #[arg(long, value_name = "DIR")]
    pub diag_dir: Option<PathBuf>,

    /// Open the port even if it is missing from the port listing
    #[arg(long)]
    pub skip_check: bool,
}

impl Cli {
    /// Command line values take precedence over the settings file.
    pub fn apply_overrides(&self, settings: &mut AppSettings) {
        if let Some(baud_rate) = self.baudrate {
            settings.baud_rate = baud_rate;
        }
        if let Some(eol) = self.eol {
            settings.eol = eol;
        }
        if self.verbose {
            settings.verbose = true;
        }
        if let Some(dir) = &self.diag_dir {
            settings.diag_dir = Some(dir.to_string_lossy().to_string());
        }
    }

    pub fn descriptor(&self, device: String, settings: &AppSettings) -> SessionDescriptor {
        SessionDescriptor {
            device,
            baud_rate: settings.baud_rate,
            eol: settings.eol,
            output_file: self.output_file.clone(),
        }
    }
}
