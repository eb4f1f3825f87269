//! Structured logging initialization for the backup CLI.
//!
//! Supports both human-friendly and machine-readable (JSON) output
//! formats, with TTY detection and verbosity control, plus an optional
//! per-run log file written into the backup destination so the record of
//! a run travels with the data it produced.

use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Compute the per-run log file path inside `dest_dir`.
#[must_use]
pub fn run_log_path(dest_dir: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    dest_dir.join(format!("backup_log_{stamp}.txt"))
}

/// Initialize the tracing subscriber based on CLI flags and environment.
///
/// # Arguments
///
/// * `robot_mode` - If true, output structured JSON logs for machine consumption
/// * `verbose` - Verbosity level: 0 = info, 1 = debug, 2+ = trace
/// * `quiet` - If true, suppress non-essential output (only errors)
/// * `log_file` - Optional per-run log file receiving plain, full-detail output
///
/// # Environment Variables
///
/// * `RUST_LOG` - Override default console filter (e.g., "sbk=debug")
pub fn init_logging(robot_mode: bool, verbose: u8, quiet: bool, log_file: Option<&Path>) {
    // Build the console filter directive based on verbosity
    let default_directive = if quiet {
        "sbk=error"
    } else {
        match verbose {
            0 => "sbk=info",
            1 => "sbk=debug",
            _ => "sbk=trace",
        }
    };

    // Allow RUST_LOG to override, but use our default otherwise
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // The run log keeps full detail regardless of console verbosity, so
    // each layer carries its own filter instead of one global one.
    let file_layer = log_file.and_then(|path| match File::create(path) {
        Ok(file) => Some(
            fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Arc::new(file))
                .with_filter(EnvFilter::new("sbk=debug")),
        ),
        Err(e) => {
            eprintln!("warning: cannot create log file {}: {e}", path.display());
            None
        }
    });

    if robot_mode {
        // JSON output for agents and scripts
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(false)
            .with_span_events(FmtSpan::NONE)
            .with_writer(io::stderr)
            .with_filter(console_filter);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(fmt_layer)
            .init();
    } else if io::stderr().is_terminal() {
        // Pretty output for interactive terminals
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(false)
            .with_span_events(FmtSpan::NONE)
            .with_writer(io::stderr)
            .with_filter(console_filter);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(fmt_layer)
            .init();
    } else {
        // Compact output for non-TTY (piped, redirected)
        let fmt_layer = fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(false)
            .with_span_events(FmtSpan::NONE)
            .compact()
            .with_writer(io::stderr)
            .with_filter(console_filter);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(fmt_layer)
            .init();
    }
}
