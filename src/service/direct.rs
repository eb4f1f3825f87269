//! Passthrough service for hosts without a snapshot facility.
//!
//! Exposes the live volume path itself as the "shadow device". The rest of
//! the pipeline (mapping, mirroring, imaging, cleanup) behaves exactly as
//! with a real snapshot, but the image is crash-consistent at best: files
//! modified during the transfer are copied as found.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use super::{
    BackupIntent, Phase, SnapshotId, SnapshotProperties, SnapshotService, SnapshotSetId,
    WaitHandle,
};
use crate::error::{Result, SbError};

/// Degraded snapshot service that passes the live volume through.
#[derive(Debug, Default)]
pub struct DirectService {
    set_id: Option<SnapshotSetId>,
    snapshot_id: Option<SnapshotId>,
    source: Option<PathBuf>,
}

impl DirectService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotService for DirectService {
    fn initialize(&mut self, intent: &BackupIntent) -> Result<()> {
        warn!("no snapshot facility in use: the backup will not be point-in-time consistent");
        if intent.persistent_snapshot {
            warn!("persistent snapshots are meaningless in direct mode");
        }
        Ok(())
    }

    fn start_snapshot_set(&mut self) -> Result<SnapshotSetId> {
        let id = SnapshotSetId::generate();
        self.set_id = Some(id);
        Ok(id)
    }

    fn add_volume(&mut self, set: SnapshotSetId, volume: &Path) -> Result<SnapshotId> {
        if self.set_id != Some(set) {
            return Err(SbError::Other(format!("unknown snapshot set {set}")));
        }
        if !volume.exists() {
            return Err(SbError::Other(format!(
                "source volume {} does not exist",
                volume.display()
            )));
        }
        let id = SnapshotId::generate();
        self.snapshot_id = Some(id);
        self.source = Some(volume.to_path_buf());
        info!(source = %volume.display(), "live volume registered for direct transfer");
        Ok(id)
    }

    fn prepare_for_backup(&mut self) -> Result<WaitHandle> {
        Ok(WaitHandle::ready(Phase::Prepare, Ok(())))
    }

    fn do_snapshot_set(&mut self) -> Result<WaitHandle> {
        Ok(WaitHandle::ready(Phase::Commit, Ok(())))
    }

    fn snapshot_properties(&mut self, id: SnapshotId) -> Result<SnapshotProperties> {
        if self.snapshot_id != Some(id) {
            return Err(SbError::SnapshotNotFound { id: id.to_string() });
        }
        let device_path = self
            .source
            .clone()
            .ok_or(SbError::SnapshotNotFound { id: id.to_string() })?;
        Ok(SnapshotProperties {
            snapshot_id: id,
            device_path,
            created_at: Utc::now(),
        })
    }

    fn release_properties(&mut self, _props: SnapshotProperties) {}

    fn backup_complete(&mut self) -> Result<WaitHandle> {
        Ok(WaitHandle::ready(Phase::Complete, Ok(())))
    }
}
