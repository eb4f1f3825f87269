//! Mock snapshot service for unit testing.
//!
//! Records every protocol operation and supports failure injection per
//! phase, so coordinator and job tests can exercise ordering and cleanup
//! guarantees without a live snapshot facility.
//!
//! # Example
//!
//! ```rust,ignore
//! use sbk::service::mock::{MockService, Operation};
//! use sbk::service::Phase;
//!
//! let mock = MockService::new();
//! let probe = mock.clone();
//! probe.fail_wait(Phase::Prepare);
//!
//! // ... run the coordinator against `mock` ...
//!
//! probe.assert_contains(&Operation::PrepareForBackup);
//! assert_eq!(probe.complete_count(), 1);
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::trace;

use super::{
    BackupIntent, Phase, SnapshotId, SnapshotProperties, SnapshotService, SnapshotSetId,
    WaitHandle,
};
use crate::error::{Result, SbError};

/// Recorded protocol operation for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Initialize {
        persistent: bool,
    },
    StartSnapshotSet,
    AddVolume {
        volume: String,
    },
    PrepareForBackup,
    DoSnapshotSet,
    GetProperties,
    ReleaseProperties,
    BackupComplete,
}

#[derive(Default)]
struct MockState {
    operations: Mutex<Vec<Operation>>,
    set_id: Mutex<Option<SnapshotSetId>>,
    snapshot_id: Mutex<Option<SnapshotId>>,
    device_path: Mutex<Option<PathBuf>>,
    fail_wait: Mutex<Option<Phase>>,
    unavailable: AtomicBool,
    deny: AtomicBool,
    props_retrieved: AtomicUsize,
    props_released: AtomicUsize,
    complete_issued: AtomicUsize,
}

/// Mock service for testing without a snapshot facility.
///
/// Cloning yields a probe onto the same shared state, so tests can hand
/// the service to a coordinator by value and still assert afterwards.
#[derive(Clone, Default)]
pub struct MockService {
    state: Arc<MockState>,
}

impl MockService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `path` as the shadow device path reported for the snapshot.
    #[must_use]
    pub fn with_device_path(self, path: impl Into<PathBuf>) -> Self {
        *self.state.device_path.lock().unwrap() = Some(path.into());
        self
    }

    // === Failure injection ===

    /// Make the given phase's completion signal report failure.
    pub fn fail_wait(&self, phase: Phase) {
        *self.state.fail_wait.lock().unwrap() = Some(phase);
    }

    /// Make `initialize` fail with `ServiceUnavailable`.
    pub fn set_unavailable(&self) {
        self.state.unavailable.store(true, Ordering::SeqCst);
    }

    /// Make `initialize` fail with `PermissionDenied`.
    pub fn deny_permission(&self) {
        self.state.deny.store(true, Ordering::SeqCst);
    }

    /// Report an empty device path, signaling an unusable snapshot.
    pub fn set_empty_device_path(&self) {
        *self.state.device_path.lock().unwrap() = Some(PathBuf::new());
    }

    // === Assertions ===

    /// Get all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.state.operations.lock().unwrap().clone()
    }

    /// Assert the exact operation sequence.
    ///
    /// # Panics
    ///
    /// Panics if the operations don't match.
    pub fn assert_operations(&self, expected: &[Operation]) {
        let actual = self.operations();
        assert_eq!(
            actual, expected,
            "Operation mismatch.\nExpected: {expected:#?}\nActual: {actual:#?}",
        );
    }

    /// Assert a specific operation was performed at least once.
    ///
    /// # Panics
    ///
    /// Panics if the operation was not found.
    pub fn assert_contains(&self, expected: &Operation) {
        let ops = self.operations();
        assert!(
            ops.contains(expected),
            "Expected operation {expected:?} not found in: {ops:#?}",
        );
    }

    /// Assert a specific operation never happened.
    ///
    /// # Panics
    ///
    /// Panics if the operation was recorded.
    pub fn assert_not_performed(&self, unexpected: &Operation) {
        let ops = self.operations();
        assert!(
            !ops.contains(unexpected),
            "Operation {unexpected:?} should not have happened: {ops:#?}",
        );
    }

    /// Number of times `backup_complete` was issued.
    #[must_use]
    pub fn complete_count(&self) -> usize {
        self.state.complete_issued.load(Ordering::SeqCst)
    }

    /// Properties buffers retrieved but not yet released.
    #[must_use]
    pub fn properties_outstanding(&self) -> usize {
        self.state.props_retrieved.load(Ordering::SeqCst)
            - self.state.props_released.load(Ordering::SeqCst)
    }

    /// Assert every retrieved properties buffer was handed back.
    ///
    /// # Panics
    ///
    /// Panics if a properties buffer is still outstanding.
    pub fn assert_properties_released(&self) {
        let outstanding = self.properties_outstanding();
        assert_eq!(outstanding, 0, "{outstanding} properties buffer(s) leaked");
    }

    // === Internal helpers ===

    fn record(&self, op: Operation) {
        trace!(?op, "mock service operation");
        self.state.operations.lock().unwrap().push(op);
    }

    fn wait_result(&self, phase: Phase) -> super::PhaseResult {
        if *self.state.fail_wait.lock().unwrap() == Some(phase) {
            Err(format!("injected {phase} failure"))
        } else {
            Ok(())
        }
    }
}

impl SnapshotService for MockService {
    fn initialize(&mut self, intent: &BackupIntent) -> Result<()> {
        if self.state.unavailable.load(Ordering::SeqCst) {
            return Err(SbError::ServiceUnavailable {
                reason: "mock service marked unavailable".to_string(),
            });
        }
        if self.state.deny.load(Ordering::SeqCst) {
            return Err(SbError::PermissionDenied {
                reason: "mock service denies access".to_string(),
            });
        }
        self.record(Operation::Initialize {
            persistent: intent.persistent_snapshot,
        });
        Ok(())
    }

    fn start_snapshot_set(&mut self) -> Result<SnapshotSetId> {
        self.record(Operation::StartSnapshotSet);
        let id = SnapshotSetId::generate();
        *self.state.set_id.lock().unwrap() = Some(id);
        Ok(id)
    }

    fn add_volume(&mut self, set: SnapshotSetId, volume: &Path) -> Result<SnapshotId> {
        if *self.state.set_id.lock().unwrap() != Some(set) {
            return Err(SbError::Other(format!("unknown snapshot set {set}")));
        }
        self.record(Operation::AddVolume {
            volume: volume.display().to_string(),
        });
        let id = SnapshotId::generate();
        *self.state.snapshot_id.lock().unwrap() = Some(id);
        Ok(id)
    }

    fn prepare_for_backup(&mut self) -> Result<WaitHandle> {
        self.record(Operation::PrepareForBackup);
        Ok(WaitHandle::ready(
            Phase::Prepare,
            self.wait_result(Phase::Prepare),
        ))
    }

    fn do_snapshot_set(&mut self) -> Result<WaitHandle> {
        self.record(Operation::DoSnapshotSet);
        Ok(WaitHandle::ready(
            Phase::Commit,
            self.wait_result(Phase::Commit),
        ))
    }

    fn snapshot_properties(&mut self, id: SnapshotId) -> Result<SnapshotProperties> {
        if *self.state.snapshot_id.lock().unwrap() != Some(id) {
            return Err(SbError::SnapshotNotFound { id: id.to_string() });
        }
        self.record(Operation::GetProperties);
        self.state.props_retrieved.fetch_add(1, Ordering::SeqCst);
        let device_path = self
            .state
            .device_path
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| PathBuf::from("/dev/shadow/mock-0"));
        Ok(SnapshotProperties {
            snapshot_id: id,
            device_path,
            created_at: Utc::now(),
        })
    }

    fn release_properties(&mut self, _props: SnapshotProperties) {
        self.record(Operation::ReleaseProperties);
        self.state.props_released.fetch_add(1, Ordering::SeqCst);
    }

    fn backup_complete(&mut self) -> Result<WaitHandle> {
        self.record(Operation::BackupComplete);
        self.state.complete_issued.fetch_add(1, Ordering::SeqCst);
        Ok(WaitHandle::ready(
            Phase::Complete,
            self.wait_result(Phase::Complete),
        ))
    }
}
