//! Snapshot lifecycle state machine.
//!
//! Drives the snapshot service through its strictly ordered phases and
//! owns the session for one backup attempt:
//!
//! ```text
//! Uninitialized → Initialized → SetStarted → SourceAdded → Prepared
//!               → SnapshotTaken → Completed
//! ```
//!
//! `Failed` is terminal and reachable from any non-terminal state. Phases
//! are never reordered, skipped, or retried: a failed phase leaves the
//! service session in an undefined state for correctness purposes, so the
//! first failure aborts the job. [`SnapshotCoordinator::complete`] must
//! still run exactly once afterwards to release session resources.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::error::{Result, SbError};
use crate::service::{
    BackupIntent, Phase, SnapshotId, SnapshotService, SnapshotSetId, WaitHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Initialized,
    SetStarted,
    SourceAdded,
    Prepared,
    SnapshotTaken,
    Completed,
    Failed,
}

impl State {
    const fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initialized => "initialized",
            Self::SetStarted => "set-started",
            Self::SourceAdded => "source-added",
            Self::Prepared => "prepared",
            Self::SnapshotTaken => "snapshot-taken",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Owns the service session and the snapshot handle for one backup attempt.
pub struct SnapshotCoordinator<S: SnapshotService> {
    service: S,
    state: State,
    initialized: bool,
    completed: bool,
    set_id: Option<SnapshotSetId>,
    snapshot_id: Option<SnapshotId>,
}

impl<S: SnapshotService> SnapshotCoordinator<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            state: State::Uninitialized,
            initialized: false,
            completed: false,
            set_id: None,
            snapshot_id: None,
        }
    }

    /// Open the service session and declare backup intent.
    pub fn initialize(&mut self, intent: &BackupIntent) -> Result<()> {
        self.ensure(State::Uninitialized, "initialize")?;
        match self.service.initialize(intent) {
            Ok(()) => {
                self.initialized = true;
                self.state = State::Initialized;
                debug!("snapshot service session opened");
                Ok(())
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    /// Run the snapshot phases in order: start set, register the source
    /// volume, prepare (await), commit (await).
    ///
    /// Any step's failure aborts the whole attempt; no partial snapshot is
    /// considered usable.
    pub fn create_snapshot(&mut self, source_volume: &Path) -> Result<SnapshotId> {
        self.ensure(State::Initialized, "create a snapshot")?;
        match self.run_snapshot_phases(source_volume) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    fn run_snapshot_phases(&mut self, source_volume: &Path) -> Result<SnapshotId> {
        let set_id = self.service.start_snapshot_set()?;
        self.set_id = Some(set_id);
        self.state = State::SetStarted;

        let snapshot_id = self.service.add_volume(set_id, source_volume)?;
        self.snapshot_id = Some(snapshot_id);
        self.state = State::SourceAdded;
        info!(set = %set_id, snapshot = %snapshot_id, source = %source_volume.display(),
              "source volume registered");

        self.issue_and_await(Phase::Prepare, SnapshotService::prepare_for_backup)?;
        self.state = State::Prepared;

        self.issue_and_await(Phase::Commit, SnapshotService::do_snapshot_set)?;
        self.state = State::SnapshotTaken;
        info!(snapshot = %snapshot_id, "snapshot committed");

        Ok(snapshot_id)
    }

    /// Resolve the snapshot's shadow device path.
    ///
    /// Retrieves the properties buffer, extracts the device path, and hands
    /// the buffer straight back to the service. An empty device path marks
    /// the snapshot unusable and is treated as failure, not retried.
    pub fn snapshot_device(&mut self, id: SnapshotId) -> Result<PathBuf> {
        self.ensure(State::SnapshotTaken, "resolve the shadow device")?;
        let props = match self.service.snapshot_properties(id) {
            Ok(props) => props,
            Err(e) => {
                self.state = State::Failed;
                return Err(e);
            }
        };
        let device = props.device_path.clone();
        self.service.release_properties(props);

        if device.as_os_str().is_empty() {
            self.state = State::Failed;
            return Err(SbError::SnapshotNotFound { id: id.to_string() });
        }
        debug!(device = %device.display(), "shadow device resolved");
        Ok(device)
    }

    /// Notify the service that the backup is finished and release the
    /// session.
    ///
    /// Safe to call exactly once per job from any state, including after a
    /// failure or when no snapshot was ever taken; repeated calls are
    /// no-ops. Its own failure is reported but does not undo data already
    /// copied.
    pub fn complete(&mut self) -> Result<()> {
        if self.completed {
            debug!("session already completed; skipping");
            return Ok(());
        }
        self.completed = true;
        if !self.initialized {
            debug!("session was never opened; nothing to complete");
            return Ok(());
        }
        let result = self.issue_and_await(Phase::Complete, SnapshotService::backup_complete);
        match &result {
            Ok(()) => {
                if self.state != State::Failed {
                    self.state = State::Completed;
                }
                info!("snapshot session completed");
            }
            Err(e) => warn!(error = %e, "session completion failed"),
        }
        result
    }

    /// Identifier of the active snapshot set, once started.
    #[must_use]
    pub const fn set_id(&self) -> Option<SnapshotSetId> {
        self.set_id
    }

    /// Identifier of the taken snapshot, once the source was registered.
    #[must_use]
    pub const fn snapshot_id(&self) -> Option<SnapshotId> {
        self.snapshot_id
    }

    /// Issue one asynchronous phase and block until its completion signal
    /// fires.
    ///
    /// Note there is no timeout on the wait: a hung service call hangs the
    /// job (see `WaitHandle::wait`).
    fn issue_and_await<F>(&mut self, phase: Phase, issue: F) -> Result<()>
    where
        F: FnOnce(&mut S) -> Result<WaitHandle>,
    {
        debug!(%phase, "issuing phase");
        let handle = issue(&mut self.service)?;
        let result = handle.wait();
        match &result {
            Ok(()) => debug!(%phase, "phase signaled success"),
            Err(e) => error!(%phase, error = %e, "phase signaled failure"),
        }
        result
    }

    fn ensure(&self, expected: State, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SbError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }
}
