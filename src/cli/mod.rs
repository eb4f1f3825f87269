//! CLI argument definitions and command dispatch.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::copy::TransferMode;

/// Shadowbak - point-in-time system backup via a volume snapshot service.
///
/// Robot Mode: Use --robot or --format=json for machine-parseable output.
#[derive(Parser, Debug)]
#[command(name = "sbk", version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)] // CLI flags naturally use multiple bools
pub struct Cli {
    /// Output format (text for humans, json for agents/scripts)
    #[arg(
        long,
        short = 'f',
        default_value = "text",
        global = true,
        env = "SBK_FORMAT"
    )]
    pub format: OutputFormat,

    /// Robot mode: equivalent to --format=json
    #[arg(long, global = true)]
    pub robot: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text with optional color
    #[default]
    Text,
    /// JSON output for scripts and agents
    Json,
    /// Compact JSON (single line)
    JsonCompact,
}

impl Cli {
    /// Returns true if output should be JSON (robot mode or explicit --format=json).
    pub const fn use_json(&self) -> bool {
        self.robot || matches!(self.format, OutputFormat::Json | OutputFormat::JsonCompact)
    }

    /// Returns true if output should be compact JSON.
    pub const fn use_compact_json(&self) -> bool {
        matches!(self.format, OutputFormat::JsonCompact)
    }
}

/// Snapshot service backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Volume-manager snapshots (point-in-time consistent)
    #[default]
    Lvm,
    /// No snapshot facility: copy the live volume directly
    Direct,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a backup job: snapshot, expose, transfer, release
    Backup(BackupArgs),

    /// Capture boot-record and partition-layout artifacts from a physical
    /// drive
    Capture(CaptureArgs),

    /// Show version and build information
    Version,

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// === Argument Structs ===

#[derive(Parser, Debug)]
#[allow(clippy::struct_excessive_bools)] // CLI flags naturally use multiple bools
pub struct BackupArgs {
    /// Source volume to snapshot (e.g., /dev/vg0/root)
    pub volume: PathBuf,

    /// Destination directory (created if absent)
    pub dest: PathBuf,

    /// Transfer strategy
    #[arg(long, default_value = "file")]
    pub mode: TransferMode,

    /// Snapshot service backend
    #[arg(long, default_value = "lvm", env = "SBK_BACKEND")]
    pub backend: Backend,

    /// Copy-on-write allocation for the snapshot volume
    #[arg(long, default_value = "4G")]
    pub cow_size: String,

    /// Keep the snapshot after the session completes
    #[arg(long)]
    pub persistent: bool,

    /// Worker threads for the file-level mirror
    #[arg(long, default_value = "8")]
    pub threads: usize,

    /// Keep destination entries that no longer exist in the source
    #[arg(long)]
    pub no_mirror_deletions: bool,

    /// Mirror hidden (dot-prefixed) entries too
    #[arg(long)]
    pub include_hidden: bool,

    /// Per-file retry attempts for the mirror
    #[arg(long, default_value = "1")]
    pub retry: u32,

    /// Seconds to wait between per-file retries
    #[arg(long, default_value = "1")]
    pub retry_wait: u64,

    /// Directory holding shadow alias links (defaults to a system
    /// temporary directory)
    #[arg(long)]
    pub alias_dir: Option<PathBuf>,

    /// Also capture disk metadata from this physical drive index
    #[arg(long)]
    pub capture_drive: Option<u8>,

    /// Skip the per-run log file in the destination directory
    #[arg(long)]
    pub no_log_file: bool,
}

#[derive(Parser, Debug)]
pub struct CaptureArgs {
    /// Destination directory (created if absent)
    pub dest: PathBuf,

    /// Physical drive index (e.g., 0 for the first disk)
    #[arg(long, short = 'd', conflicts_with = "device")]
    pub drive: Option<u8>,

    /// Explicit device path (overrides --drive)
    #[arg(long)]
    pub device: Option<PathBuf>,

    /// Capture only the boot record
    #[arg(long, conflicts_with = "layout_only")]
    pub boot_only: bool,

    /// Capture only the partition layout
    #[arg(long)]
    pub layout_only: bool,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
