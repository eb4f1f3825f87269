//! LVM-backed snapshot service.
//!
//! Drives the platform volume manager through external processes: `lvs` to
//! resolve the source volume, `sync` to flush writers on prepare,
//! `lvcreate --snapshot` to commit the point-in-time image, and `lvremove`
//! to release it when the session completes. Each asynchronous phase runs
//! on a worker thread observed through a [`WaitHandle`].

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use tracing::{debug, info, trace, warn};

use super::{
    BackupIntent, Phase, SnapshotId, SnapshotProperties, SnapshotService, SnapshotSetId,
    WaitHandle,
};
use crate::error::{Result, SbError};

/// Default copy-on-write allocation for the snapshot volume.
const DEFAULT_COW_SIZE: &str = "4G";

/// A volume-group/logical-volume pair resolved from the source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalVolume {
    pub vg: String,
    pub lv: String,
}

impl LogicalVolume {
    /// Parse one line of `lvs --noheadings --separator , -o vg_name,lv_name`.
    fn parse_report(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        let (vg, lv) = trimmed.split_once(',')?;
        if vg.is_empty() || lv.is_empty() {
            return None;
        }
        Some(Self {
            vg: vg.to_string(),
            lv: lv.to_string(),
        })
    }

    fn qualified(&self) -> String {
        format!("{}/{}", self.vg, self.lv)
    }
}

/// Snapshot service backed by the local volume manager.
pub struct LvmService {
    cow_size: String,
    persistent: bool,
    source: Option<LogicalVolume>,
    set_id: Option<SnapshotSetId>,
    snapshot_id: Option<SnapshotId>,
    snapshot_name: Option<String>,
}

impl Default for LvmService {
    fn default() -> Self {
        Self::new()
    }
}

impl LvmService {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cow_size: DEFAULT_COW_SIZE.to_string(),
            persistent: false,
            source: None,
            set_id: None,
            snapshot_id: None,
            snapshot_name: None,
        }
    }

    /// Override the copy-on-write allocation passed to `lvcreate --size`.
    #[must_use]
    pub fn with_cow_size(mut self, size: impl Into<String>) -> Self {
        self.cow_size = size.into();
        self
    }

    fn snapshot_device(&self) -> Option<PathBuf> {
        let source = self.source.as_ref()?;
        let name = self.snapshot_name.as_ref()?;
        Some(PathBuf::from(format!("/dev/{}/{}", source.vg, name)))
    }
}

/// Build the `lvcreate` argument list for a snapshot commit.
fn lvcreate_args(source: &LogicalVolume, snapshot_name: &str, cow_size: &str) -> Vec<String> {
    vec![
        "--snapshot".to_string(),
        "--permission".to_string(),
        "r".to_string(),
        "--size".to_string(),
        cow_size.to_string(),
        "--name".to_string(),
        snapshot_name.to_string(),
        source.qualified(),
    ]
}

/// Run a command and capture stdout, folding a failure into one line.
fn run_capture(program: &str, args: &[String]) -> std::result::Result<String, String> {
    trace!(program, ?args, "spawning");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| format!("{program}: {e}"))?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(format!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

/// Classify an `lvm version` probe failure.
fn classify_probe_failure(detail: &str) -> SbError {
    if detail.contains("ermission denied") || detail.contains("root") {
        SbError::PermissionDenied {
            reason: detail.to_string(),
        }
    } else {
        SbError::ServiceUnavailable {
            reason: detail.to_string(),
        }
    }
}

impl SnapshotService for LvmService {
    fn initialize(&mut self, intent: &BackupIntent) -> Result<()> {
        let version = run_capture("lvm", &["version".to_string()])
            .map_err(|detail| classify_probe_failure(&detail))?;
        self.persistent = intent.persistent_snapshot;
        debug!(
            version = version.lines().next().unwrap_or_default().trim(),
            full = intent.full,
            bootable = intent.bootable,
            persistent = intent.persistent_snapshot,
            "volume manager session opened"
        );
        Ok(())
    }

    fn start_snapshot_set(&mut self) -> Result<SnapshotSetId> {
        let id = SnapshotSetId::generate();
        self.set_id = Some(id);
        info!(set = %id, "snapshot set started");
        Ok(id)
    }

    fn add_volume(&mut self, set: SnapshotSetId, volume: &Path) -> Result<SnapshotId> {
        if self.set_id != Some(set) {
            return Err(SbError::Other(format!("unknown snapshot set {set}")));
        }
        let report = run_capture(
            "lvs",
            &[
                "--noheadings".to_string(),
                "--separator".to_string(),
                ",".to_string(),
                "-o".to_string(),
                "vg_name,lv_name".to_string(),
                volume.display().to_string(),
            ],
        )
        .map_err(|detail| {
            SbError::Other(format!(
                "source {} is not a managed logical volume: {detail}",
                volume.display()
            ))
        })?;
        let source = LogicalVolume::parse_report(&report).ok_or_else(|| {
            SbError::Other(format!(
                "could not resolve {} from lvs report {report:?}",
                volume.display()
            ))
        })?;

        let id = SnapshotId::generate();
        let short = id.to_string();
        let short = short.split('-').next().unwrap_or("0").to_string();
        self.snapshot_name = Some(format!("sbk-snap-{short}"));
        info!(source = %source.qualified(), snapshot = %id, "source volume registered");
        self.source = Some(source);
        self.snapshot_id = Some(id);
        Ok(id)
    }

    fn prepare_for_backup(&mut self) -> Result<WaitHandle> {
        // Writer quiesce: flush dirty pages so the freeze captures a
        // filesystem-consistent image.
        Ok(WaitHandle::spawn(Phase::Prepare, || {
            run_capture("sync", &[]).map(|_| ())
        }))
    }

    fn do_snapshot_set(&mut self) -> Result<WaitHandle> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| SbError::Other("no source volume registered".to_string()))?;
        let name = self
            .snapshot_name
            .clone()
            .ok_or_else(|| SbError::Other("no snapshot name allocated".to_string()))?;
        let cow = self.cow_size.clone();
        Ok(WaitHandle::spawn(Phase::Commit, move || {
            run_capture("lvcreate", &lvcreate_args(&source, &name, &cow)).map(|_| ())
        }))
    }

    fn snapshot_properties(&mut self, id: SnapshotId) -> Result<SnapshotProperties> {
        if self.snapshot_id != Some(id) {
            return Err(SbError::SnapshotNotFound { id: id.to_string() });
        }
        let device_path = self
            .snapshot_device()
            .filter(|p| p.exists())
            .ok_or(SbError::SnapshotNotFound { id: id.to_string() })?;
        Ok(SnapshotProperties {
            snapshot_id: id,
            device_path,
            created_at: Utc::now(),
        })
    }

    fn release_properties(&mut self, props: SnapshotProperties) {
        trace!(snapshot = %props.snapshot_id, "properties released");
    }

    fn backup_complete(&mut self) -> Result<WaitHandle> {
        // Non-persistent snapshots are released with the session; a missing
        // volume means there is nothing to release.
        let target = self
            .source
            .as_ref()
            .zip(self.snapshot_name.as_ref())
            .map(|(source, name)| format!("{}/{}", source.vg, name));
        let device = self.snapshot_device();
        let persistent = self.persistent;
        Ok(WaitHandle::spawn(Phase::Complete, move || {
            let Some(target) = target else {
                return Ok(());
            };
            if persistent {
                info!(%target, "persistent snapshot retained");
                return Ok(());
            }
            if !device.is_some_and(|d| d.exists()) {
                return Ok(());
            }
            run_capture("lvremove", &["--force".to_string(), target.clone()])
                .map(|_| ())
                .map_err(|detail| {
                    warn!(%target, detail, "snapshot release failed");
                    detail
                })
        }))
    }
}
