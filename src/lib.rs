// src/lib.rs
//
// Entry point for the miniterm binary: settings, port resolution and the
// interactive console session.

#[macro_use]
mod logging;

pub mod cli;
pub mod console;
pub mod device_scan;
pub mod io;
pub mod settings;

use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use cli::Cli;
use console::{
    connect_banner, ConsoleSession, DisplaySink, RestoreOnce, TerminalConsole, TerminalPrompt,
    TerminalRestore,
};
use device_scan::PortSearcher;
use settings::AppSettings;

/// How long runtime shutdown waits for stray blocking tasks
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(500);

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let code = match run_cli(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            ExitCode::FAILURE
        }
    };

    logging::stop_file_logging();
    code
}

fn run_cli(cli: Cli) -> Result<ExitCode, String> {
    let mut settings = match cli.config.as_deref() {
        // --write-config may create a new file at an explicit path
        Some(path) if cli.write_config && !path.exists() => AppSettings::default(),
        path => settings::load_settings(path)?,
    };
    cli.apply_overrides(&mut settings);
    settings.validate()?;

    logging::set_verbose(settings.verbose);
    if let Some(dir) = &settings.diag_dir {
        logging::init_file_logging(Path::new(dir))?;
    }

    if cli.write_config {
        let path = match &cli.config {
            Some(path) => path.clone(),
            None => settings::default_settings_path()?,
        };
        settings::save_settings(&settings, &path)?;
        println!("Settings written to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let searcher =
        PortSearcher::from_expressions(&cli.filters, cli.no_input).map_err(|e| e.to_string())?;

    if cli.list_ports {
        let ports = searcher.list_filtered_ports().map_err(|e| e.to_string())?;
        for (i, port) in ports.iter().enumerate() {
            println!("{} - {}", i + 1, port.description_line());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let device = match &cli.port {
        Some(port) => port.clone(),
        None => searcher.resolve().map_err(|e| e.to_string())?,
    };

    let description = match searcher.list_comports() {
        Ok(ports) => device_scan::describe_device(&device, &ports),
        Err(e) => {
            tlog!("[miniterm] Port listing failed: {}", e);
            "n/a".to_string()
        }
    };

    let descriptor = cli.descriptor(device, &settings);
    run_session(descriptor, &settings, !cli.skip_check, &description)
}

/// Run one console session on a fresh runtime and report how it ended.
fn run_session(
    descriptor: console::SessionDescriptor,
    settings: &AppSettings,
    check_device: bool,
    device_description: &str,
) -> Result<ExitCode, String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Failed to start runtime: {}", e))?;

    let terminal = Arc::new(TerminalConsole::new(settings.prompt.clone(), settings.palette()));
    let restorer = Arc::new(RestoreOnce::terminal());

    terminal.write_sync(&connect_banner(&descriptor, device_description));

    let device = descriptor.device.clone();
    let baud_rate = descriptor.baud_rate;
    let line = settings.line_settings();
    let open = move || io::serial::open_serial(&device, baud_rate, &line, check_device);

    let result = runtime.block_on(async {
        let input = TerminalPrompt::new(terminal.clone())
            .map_err(|e| format!("Failed to set up terminal input: {}", e))?;

        let mut session = ConsoleSession::new(descriptor, terminal.clone(), restorer.clone())
            .with_log_flush_interval(settings.log_flush_interval());

        let interrupt = async {
            // Without a signal handler only the prompt's Ctrl+C stops the session
            if let Err(e) = tokio::signal::ctrl_c().await {
                tlog!("[miniterm] Cannot listen for interrupt signal: {}", e);
                std::future::pending::<()>().await;
            }
        };

        Ok::<_, String>(session.run(open, input, interrupt).await)
    });

    // Also covers the paths where the session never ran
    restorer.restore();
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);

    let outcome = result?;
    if let Err(e) = outcome.report(&mut std::io::stderr()) {
        tlog!("[miniterm] Failed to report session error: {}", e);
    }
    tlog!(
        "[miniterm] Session ended: exit code {}, {} lines received, {} lines sent",
        outcome.exit_code,
        outcome.lines_received,
        outcome.lines_sent
    );

    Ok(ExitCode::from(outcome.exit_code.clamp(0, 255) as u8))
}
