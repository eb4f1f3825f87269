//! Shadowbak CLI - point-in-time system backup via a volume snapshot
//! service.
//!
//! Provides both human-friendly and agent-friendly (robot mode) interfaces.
#![forbid(unsafe_code)]

use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use console::style;
use indicatif::ProgressBar;
use serde::Serialize;

use sbk::cli::{self, Backend, Cli, Commands};
use sbk::copy::MirrorOptions;
use sbk::error::{Result, SbError};
use sbk::job::{self, BackupRequest, JobReport};
use sbk::logging;
use sbk::metadata::{self, MetadataArtifact};
use sbk::service::direct::DirectService;
use sbk::service::lvm::LvmService;
use sbk::service::BackupIntent;

/// Build information embedded at compile time.
mod build_info {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    pub fn git_sha() -> &'static str {
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    }

    pub fn git_dirty() -> &'static str {
        option_env!("VERGEN_GIT_DIRTY").unwrap_or("false")
    }

    pub fn build_timestamp() -> &'static str {
        option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown")
    }

    pub fn rustc_semver() -> &'static str {
        option_env!("VERGEN_RUSTC_SEMVER").unwrap_or("unknown")
    }

    pub fn target() -> &'static str {
        option_env!("VERGEN_CARGO_TARGET_TRIPLE").unwrap_or("unknown")
    }
}

fn main() {
    let cli = Cli::parse();

    // Handle no-color flag or non-TTY
    if cli.no_color || !io::stdout().is_terminal() {
        console::set_colors_enabled(false);
    }

    // The backup run log lives in the destination, next to the data it
    // describes.
    let log_path = match &cli.command {
        Some(Commands::Backup(args)) if !args.no_log_file => {
            let _ = std::fs::create_dir_all(&args.dest);
            Some(logging::run_log_path(&args.dest))
        }
        _ => None,
    };
    logging::init_logging(cli.use_json(), cli.verbose, cli.quiet, log_path.as_deref());

    // Run the command
    let result = run(&cli);

    // Handle errors
    if let Err(e) = result {
        output_error(&cli, &e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        None => print_quick_start(cli),
        Some(Commands::Backup(args)) => cmd_backup(cli, args),
        Some(Commands::Capture(args)) => cmd_capture(cli, args),
        Some(Commands::Version) => cmd_version(cli),
        Some(Commands::Completions(args)) => cmd_completions(cli, args),
    }
}

// === Quick Start ===

/// Prints quick-start help for both humans and agents.
#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn print_quick_start(cli: &Cli) -> Result<()> {
    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({
                "tool": "sbk",
                "version": build_info::VERSION,
                "description": "Point-in-time system backup via a volume snapshot service",
                "commands": {
                    "backup_file_level": "sbk backup /dev/vg0/root /backup",
                    "backup_block_level": "sbk backup /dev/vg0/root /backup --mode block",
                    "backup_without_snapshots": "sbk backup /data /backup --backend direct",
                    "capture_disk_metadata": "sbk capture /backup --drive 0",
                },
                "output_modes": {
                    "human": "--format=text (default)",
                    "robot": "--robot or --format=json",
                    "compact": "--format=json-compact",
                },
            }),
        );
        return Ok(());
    }

    println!(
        "{} {} - system backup CLI\n",
        style("sbk").bold().cyan(),
        build_info::VERSION
    );

    println!("{}", style("QUICK START").bold().underlined());
    println!();
    println!(
        "  {}  Mirror a volume through a snapshot",
        style("sbk backup /dev/vg0/root /backup").green()
    );
    println!(
        "  {}  Raw image of the frozen device",
        style("sbk backup /dev/vg0/root /backup --mode block").green()
    );
    println!(
        "  {}  Copy live data without a snapshot service",
        style("sbk backup /data /backup --backend direct").green()
    );
    println!(
        "  {}  Boot record + partition layout artifacts",
        style("sbk capture /backup --drive 0").green()
    );
    println!();
    println!("Run {} for full help", style("sbk --help").yellow());
    Ok(())
}

// === Command Implementations ===

fn cmd_backup(cli: &Cli, args: &cli::BackupArgs) -> Result<()> {
    let mut request = BackupRequest::new(&args.volume, &args.dest);
    request.mode = args.mode;
    request.mirror_options = MirrorOptions {
        mirror_deletions: !args.no_mirror_deletions,
        threads: args.threads.max(1),
        exclude_hidden: !args.include_hidden,
        retry_count: args.retry,
        retry_wait: Duration::from_secs(args.retry_wait),
    };
    request.intent = BackupIntent {
        persistent_snapshot: args.persistent,
        ..BackupIntent::default()
    };
    request.alias_base = args.alias_dir.clone();

    let spinner = (!cli.quiet && !cli.use_json() && io::stderr().is_terminal()).then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_message("running backup job...");
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    });

    let report = match args.backend {
        Backend::Lvm => job::run_backup(
            LvmService::new().with_cow_size(args.cow_size.clone()),
            &request,
        ),
        Backend::Direct => job::run_backup(DirectService::new(), &request),
    };

    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    // Metadata captures are independent of the snapshot pipeline: their
    // outcomes are reported per artifact and never change the job status.
    let captures = args.capture_drive.map(|index| {
        let device = metadata::physical_device_path(index);
        let (boot, layout) = metadata::capture_all(&device, &args.dest);
        MetadataOutput {
            boot_record: ArtifactOutcome::from(boot),
            drive_layout: ArtifactOutcome::from(layout),
        }
    });

    if cli.use_json() {
        output_json(
            cli,
            &BackupOutput {
                report: &report,
                metadata: captures.as_ref(),
            },
        );
    } else {
        print_report(cli, &report);
        if let Some(captures) = &captures {
            captures.print_human();
        }
    }

    if report.status.is_fatal() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_capture(cli: &Cli, args: &cli::CaptureArgs) -> Result<()> {
    let device = match (&args.device, args.drive) {
        (Some(path), _) => path.clone(),
        (None, Some(index)) => metadata::physical_device_path(index),
        (None, None) => {
            return Err(SbError::Other(
                "specify --drive <index> or --device <path>".to_string(),
            ))
        }
    };

    let boot = (!args.layout_only).then(|| metadata::capture_boot_record(&device, &args.dest));
    let layout = (!args.boot_only).then(|| metadata::capture_layout(&device, &args.dest));

    let output = CaptureOutput {
        device: device.clone(),
        boot_record: boot.map(ArtifactOutcome::from),
        drive_layout: layout.map(ArtifactOutcome::from),
    };

    if cli.use_json() {
        output_json(cli, &output);
    } else {
        println!("{}: {}", style("Device").bold(), device.display());
        if let Some(outcome) = &output.boot_record {
            outcome.print_human("Boot record");
        }
        if let Some(outcome) = &output.drive_layout {
            outcome.print_human("Drive layout");
        }
    }

    // Independent best-effort captures, but the standalone command's exit
    // code still reflects whether everything requested was produced.
    if let Some(reason) = output.first_failure() {
        return Err(SbError::Other(reason));
    }
    Ok(())
}

#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn cmd_version(cli: &Cli) -> Result<()> {
    if cli.use_json() {
        output_json(
            cli,
            &serde_json::json!({
                "version": build_info::VERSION,
                "git_sha": build_info::git_sha(),
                "git_dirty": build_info::git_dirty() == "true",
                "build_timestamp": build_info::build_timestamp(),
                "rustc_version": build_info::rustc_semver(),
                "target": build_info::target(),
            }),
        );
    } else {
        println!("sbk {}", build_info::VERSION);
        println!(
            "git: {}{}",
            build_info::git_sha(),
            if build_info::git_dirty() == "true" {
                " (dirty)"
            } else {
                ""
            }
        );
        println!("built: {}", build_info::build_timestamp());
        println!("rustc: {}", build_info::rustc_semver());
        println!("target: {}", build_info::target());
    }
    Ok(())
}

#[allow(clippy::unnecessary_wraps)] // Consistent return type with other commands
fn cmd_completions(_cli: &Cli, args: &cli::CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    clap_complete::generate(args.shell, &mut Cli::command(), "sbk", &mut io::stdout());
    Ok(())
}

// === Output Structures ===

#[derive(Serialize)]
struct BackupOutput<'a> {
    #[serde(flatten)]
    report: &'a JobReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a MetadataOutput>,
}

#[derive(Serialize)]
struct CaptureOutput {
    device: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    boot_record: Option<ArtifactOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    drive_layout: Option<ArtifactOutcome>,
}

impl CaptureOutput {
    fn first_failure(&self) -> Option<String> {
        [&self.boot_record, &self.drive_layout]
            .into_iter()
            .flatten()
            .find_map(|outcome| outcome.error.clone())
    }
}

#[derive(Serialize)]
struct MetadataOutput {
    boot_record: ArtifactOutcome,
    drive_layout: ArtifactOutcome,
}

impl MetadataOutput {
    fn print_human(&self) {
        self.boot_record.print_human("Boot record");
        self.drive_layout.print_human("Drive layout");
    }
}

#[derive(Serialize)]
struct ArtifactOutcome {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<Result<MetadataArtifact>> for ArtifactOutcome {
    fn from(result: Result<MetadataArtifact>) -> Self {
        match result {
            Ok(artifact) => Self {
                ok: true,
                path: Some(artifact.path),
                bytes: Some(artifact.bytes),
                error: None,
            },
            Err(e) => Self {
                ok: false,
                path: None,
                bytes: None,
                error: Some(e.to_string()),
            },
        }
    }
}

impl ArtifactOutcome {
    fn print_human(&self, label: &str) {
        if self.ok {
            println!(
                "{}: {} ({} bytes)",
                style(label).bold(),
                self.path.as_deref().unwrap_or_else(|| Path::new("?")).display(),
                self.bytes.unwrap_or(0)
            );
        } else {
            println!(
                "{}: {} - {}",
                style(label).bold(),
                style("failed").red(),
                self.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

fn print_report(cli: &Cli, report: &JobReport) {
    let status = match report.status {
        job::JobStatus::Success => style("success").green().bold(),
        job::JobStatus::Partial => style("partial").yellow().bold(),
        job::JobStatus::Failed => style("failed").red().bold(),
    };
    println!("{}: {status}", style("Status").bold());

    if let Some(id) = report.snapshot_id {
        println!("{}: {id}", style("Snapshot").bold());
    }
    if let Some(alias) = report.alias {
        println!("{}: {alias}", style("Alias").bold());
    }
    if let Some(mirror) = &report.mirror {
        println!(
            "{}: {} copied, {} unchanged, {} removed, {} skipped ({} bytes)",
            style("Mirror").bold(),
            mirror.files_copied,
            mirror.files_unchanged,
            mirror.entries_removed,
            mirror.skipped.len(),
            mirror.bytes_copied
        );
    }
    if let Some(image) = &report.image {
        println!(
            "{}: {} ({} bytes, sha256 {})",
            style("Image").bold(),
            image.image_path.display(),
            image.bytes_copied,
            image.sha256
        );
    }
    if let Some(error) = &report.error {
        println!("{}: {error}", style("Error").bold());
    }
    for warning in &report.cleanup_warnings {
        println!("{}: {warning}", style("Warning").yellow());
    }

    if !cli.quiet {
        let elapsed = report.finished_at - report.started_at;
        println!(
            "Finished in {}.{:03}s",
            elapsed.num_seconds(),
            elapsed.num_milliseconds().rem_euclid(1000)
        );
    }
}

// === Utility Functions ===

fn output_json<T: Serialize>(cli: &Cli, data: &T) {
    let json = if cli.use_compact_json() {
        serde_json::to_string(data).unwrap()
    } else {
        serde_json::to_string_pretty(data).unwrap()
    };
    println!("{json}");
}

fn output_error(cli: &Cli, error: &SbError) {
    if cli.use_json() {
        let json = serde_json::json!({
            "error": true,
            "message": error.to_string(),
            "suggestion": error.suggestion(),
            "recoverable": error.is_user_recoverable(),
        });
        eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
    } else {
        eprintln!("{}: {}", style("Error").red().bold(), error);
        if let Some(suggestion) = error.suggestion() {
            eprintln!("{}: {}", style("Hint").yellow(), suggestion);
        }
    }
}
