//! Backup job orchestration.
//!
//! Wires the coordinator, the alias mapper, and one transfer strategy into
//! a single job with the resource discipline the pipeline demands: the
//! alias is unmapped exactly once per successful map, the session is
//! completed exactly once on every exit path, and the first failure
//! encountered is the one surfaced — later cleanup failures are appended
//! as secondary diagnostics, never substituted.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::coordinator::SnapshotCoordinator;
use crate::copy::{self, BlockCopyReport, MirrorOptions, MirrorReport, TransferMode};
use crate::error::{Result, SbError};
use crate::mapper::AliasMapper;
use crate::service::{BackupIntent, Phase, SnapshotId, SnapshotService};

/// Subdirectory of the destination receiving the file-level mirror.
pub const MIRROR_SUBDIR: &str = "system_backup";

/// Image artifact name for block-level transfers.
pub const IMAGE_FILE: &str = "system_image.bin";

/// Everything a backup job needs to run.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub source_volume: PathBuf,
    pub dest_dir: PathBuf,
    pub mode: TransferMode,
    pub mirror_options: MirrorOptions,
    pub intent: BackupIntent,
    /// Directory holding alias links; `None` uses the system default.
    pub alias_base: Option<PathBuf>,
}

impl BackupRequest {
    pub fn new(source_volume: impl Into<PathBuf>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_volume: source_volume.into(),
            dest_dir: dest_dir.into(),
            mode: TransferMode::default(),
            mirror_options: MirrorOptions::default(),
            intent: BackupIntent::default(),
            alias_base: None,
        }
    }
}

/// Terminal status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Every phase and every file succeeded.
    Success,
    /// Data was transferred but something was degraded: files skipped, or
    /// session cleanup failed after a good copy.
    Partial,
    /// The job aborted before the transfer finished.
    Failed,
}

impl JobStatus {
    /// Whether the job outcome maps to a non-zero process exit.
    ///
    /// Mirrors the informational-vs-fatal split of classic mirror-copy
    /// exit codes: a partial copy is reported but not fatal.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Full account of one backup attempt.
#[derive(Debug, Serialize)]
pub struct JobReport {
    pub status: JobStatus,
    pub mode: TransferMode,
    pub source_volume: PathBuf,
    pub dest_dir: PathBuf,
    pub snapshot_id: Option<SnapshotId>,
    pub alias: Option<char>,
    /// First failure encountered, rendered.
    pub error: Option<String>,
    /// Set when the first failure was a protocol phase failure.
    pub failed_phase: Option<Phase>,
    /// Cleanup failures that must not mask the primary error.
    pub cleanup_warnings: Vec<String>,
    pub mirror: Option<MirrorReport>,
    pub image: Option<BlockCopyReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Default)]
struct PipelineOutcome {
    snapshot_id: Option<SnapshotId>,
    alias: Option<char>,
    mirror: Option<MirrorReport>,
    image: Option<BlockCopyReport>,
}

/// Run one backup job to completion.
///
/// Never panics on job failure; the report carries the outcome. The
/// session is finalized exactly once whether or not the transfer ran.
pub fn run_backup<S: SnapshotService>(service: S, request: &BackupRequest) -> JobReport {
    let started_at = Utc::now();
    info!(
        source = %request.source_volume.display(),
        dest = %request.dest_dir.display(),
        mode = ?request.mode,
        "backup job started"
    );

    let mut coordinator = SnapshotCoordinator::new(service);
    let mut outcome = PipelineOutcome::default();
    let mut cleanup_warnings = Vec::new();

    let pipeline = run_pipeline(&mut coordinator, request, &mut outcome, &mut cleanup_warnings);

    // Session finalization happens on every exit path, exactly once.
    let completion = coordinator.complete();

    let (status, primary) = match (pipeline, completion) {
        (Err(e), completion) => {
            if let Err(ce) = completion {
                cleanup_warnings.push(format!("session completion failed: {ce}"));
            }
            (JobStatus::Failed, Some(e))
        }
        (Ok(()), Err(ce)) => {
            // Copied data is intact; the release failure is the first and
            // only failure, so it is the one surfaced.
            (JobStatus::Partial, Some(ce))
        }
        (Ok(()), Ok(())) => {
            if outcome.mirror.as_ref().is_some_and(MirrorReport::is_partial) {
                let skipped = outcome
                    .mirror
                    .as_ref()
                    .map_or(0, |m| m.skipped.len());
                (JobStatus::Partial, Some(SbError::PartialCopy { skipped }))
            } else {
                (JobStatus::Success, None)
            }
        }
    };

    match (&status, &primary) {
        (JobStatus::Success, _) => info!("backup job succeeded"),
        (JobStatus::Partial, Some(e)) => warn!(error = %e, "backup job degraded"),
        (_, Some(e)) => error!(error = %e, "backup job failed"),
        _ => {}
    }

    JobReport {
        status,
        mode: request.mode,
        source_volume: request.source_volume.clone(),
        dest_dir: request.dest_dir.clone(),
        snapshot_id: outcome.snapshot_id,
        alias: outcome.alias,
        failed_phase: primary.as_ref().and_then(|e| match e {
            SbError::PhaseFailed { phase, .. } => Some(*phase),
            _ => None,
        }),
        error: primary.map(|e| e.to_string()),
        cleanup_warnings,
        mirror: outcome.mirror,
        image: outcome.image,
        started_at,
        finished_at: Utc::now(),
    }
}

fn run_pipeline<S: SnapshotService>(
    coordinator: &mut SnapshotCoordinator<S>,
    request: &BackupRequest,
    outcome: &mut PipelineOutcome,
    cleanup_warnings: &mut Vec<String>,
) -> Result<()> {
    fs::create_dir_all(&request.dest_dir)?;

    coordinator.initialize(&request.intent)?;
    let snapshot_id = coordinator.create_snapshot(&request.source_volume)?;
    outcome.snapshot_id = Some(snapshot_id);
    let device = coordinator.snapshot_device(snapshot_id)?;

    let mapper = request
        .alias_base
        .clone()
        .map_or_else(AliasMapper::system_default, AliasMapper::new);
    let alias = mapper.allocate_alias()?;
    let mapped = mapper.map(alias, &device)?;
    outcome.alias = Some(alias);

    let transfer = match request.mode {
        TransferMode::File => {
            mapped.sanity_check();
            copy::mirror(
                mapped.path(),
                &request.dest_dir.join(MIRROR_SUBDIR),
                &request.mirror_options,
            )
            .map(|report| outcome.mirror = Some(report))
        }
        TransferMode::Block => copy::copy_raw(mapped.path(), &request.dest_dir.join(IMAGE_FILE))
            .map(|report| outcome.image = Some(report)),
    };

    // Unmap exactly once per successful map, success or failure; a failed
    // unmap degrades the host but never masks the transfer result.
    if let Err(e) = mapped.unmap() {
        warn!(alias = %alias, error = %e, "alias unmap failed");
        cleanup_warnings.push(format!("alias '{alias}' unmap failed: {e}"));
    }

    transfer
}
