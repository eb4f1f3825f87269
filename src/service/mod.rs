//! Snapshot service protocol driver.
//!
//! This module provides a trait-based abstraction over the external volume
//! snapshot service, enabling testability without a live snapshot facility.
//!
//! The protocol is strictly ordered: session init → declare backup intent →
//! start snapshot set → add source volume → prepare (async) → commit
//! (async) → use the shadow device → backup complete (async). Every async
//! step yields a [`WaitHandle`] whose result must be checked before the
//! next step begins.

pub mod direct;
pub mod lvm;
pub mod mock;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Result, SbError};

/// A snapshot protocol phase with an asynchronous completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Writers flush and quiesce ahead of the freeze.
    Prepare,
    /// The point-in-time image is committed.
    Commit,
    /// Session resources are released after the transfer.
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prepare => f.write_str("prepare"),
            Self::Commit => f.write_str("commit"),
            Self::Complete => f.write_str("complete"),
        }
    }
}

/// Identifier of one snapshot set (one backup attempt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SnapshotSetId(Uuid);

impl SnapshotSetId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SnapshotSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of one snapshot within a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SnapshotId(Uuid);

impl SnapshotId {
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the session declares to the service at initialization.
#[derive(Debug, Clone)]
pub struct BackupIntent {
    /// Full (not incremental) backup.
    pub full: bool,
    /// The source may hold a bootable system root.
    pub bootable: bool,
    /// Whether the snapshot should outlive the session. Non-persistent
    /// snapshots are released when the session completes.
    pub persistent_snapshot: bool,
}

impl Default for BackupIntent {
    fn default() -> Self {
        Self {
            full: true,
            bootable: true,
            persistent_snapshot: false,
        }
    }
}

/// Read-only properties of a taken snapshot.
///
/// Owned by the retriever for the duration of its use, then handed back via
/// [`SnapshotService::release_properties`]. Failing to release leaks
/// service-side resources.
#[derive(Debug, Clone)]
pub struct SnapshotProperties {
    pub snapshot_id: SnapshotId,
    /// Opaque path naming the frozen block device. Empty signals an
    /// unusable snapshot.
    pub device_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

/// Result type used on the service side of a phase, before the coordinator
/// maps it into the crate taxonomy.
pub type PhaseResult = std::result::Result<(), String>;

/// Completion signal for one issued asynchronous phase.
///
/// One primitive serves prepare, commit, and complete: issue the request,
/// hold the handle, block on [`WaitHandle::wait`], inspect the result.
pub struct WaitHandle {
    phase: Phase,
    rx: mpsc::Receiver<PhaseResult>,
}

impl WaitHandle {
    /// Run `work` on a worker thread; the handle signals when it finishes.
    pub fn spawn<F>(phase: Phase, work: F) -> Self
    where
        F: FnOnce() -> PhaseResult + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(work());
        });
        Self { phase, rx }
    }

    /// A handle that is already signaled with `result`.
    #[must_use]
    pub fn ready(phase: Phase, result: PhaseResult) -> Self {
        let (tx, rx) = mpsc::channel();
        let _ = tx.send(result);
        Self { phase, rx }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Block until the phase signals completion and surface its result.
    ///
    /// There is deliberately no timeout here: a hung service call hangs the
    /// job. The protocol offers no safe way to abandon an issued phase, so
    /// a bounded wait would leave the session in an undefined state.
    pub fn wait(self) -> Result<()> {
        match self.rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(SbError::PhaseFailed {
                phase: self.phase,
                reason,
            }),
            Err(_) => Err(SbError::PhaseFailed {
                phase: self.phase,
                reason: "completion signal lost (worker died)".to_string(),
            }),
        }
    }
}

impl fmt::Debug for WaitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitHandle")
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// Core snapshot service operations.
///
/// Implementations drive a real snapshot facility ([`lvm::LvmService`]),
/// pass the live volume through where none exists ([`direct::DirectService`]),
/// or record operations for tests ([`mock::MockService`]).
///
/// # Implementation Notes
///
/// - Phases must be issued in protocol order; implementations may assume
///   the coordinator enforces ordering and need not re-check it.
/// - `add_volume` is called exactly once per set: one source volume per
///   backup attempt.
pub trait SnapshotService {
    /// Open the session and declare backup intent and persistence
    /// semantics.
    ///
    /// # Errors
    ///
    /// `ServiceUnavailable` if the service cannot be reached,
    /// `PermissionDenied` if the caller lacks the rights it requires.
    fn initialize(&mut self, intent: &BackupIntent) -> Result<()>;

    /// Begin a new snapshot set.
    fn start_snapshot_set(&mut self) -> Result<SnapshotSetId>;

    /// Register the source volume against the set.
    fn add_volume(&mut self, set: SnapshotSetId, volume: &Path) -> Result<SnapshotId>;

    /// Ask writers to flush and quiesce. Async: wait on the handle.
    fn prepare_for_backup(&mut self) -> Result<WaitHandle>;

    /// Commit the point-in-time snapshot. Async: wait on the handle.
    fn do_snapshot_set(&mut self) -> Result<WaitHandle>;

    /// Retrieve the properties of a taken snapshot.
    ///
    /// # Errors
    ///
    /// `SnapshotNotFound` if the identifier is stale.
    fn snapshot_properties(&mut self, id: SnapshotId) -> Result<SnapshotProperties>;

    /// Hand a properties buffer back to the service.
    fn release_properties(&mut self, props: SnapshotProperties);

    /// Notify the service that the backup is complete and release
    /// session-side resources. Async: wait on the handle.
    fn backup_complete(&mut self) -> Result<WaitHandle>;
}
