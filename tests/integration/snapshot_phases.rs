//! Phase ordering and session lifecycle tests using MockService.
//!
//! The snapshot phase sequence must execute strictly in order; forcing any
//! phase to report failure must prevent all subsequent phases from
//! starting and must still complete the session exactly once.

use std::path::Path;

use sbk::coordinator::SnapshotCoordinator;
use sbk::error::SbError;
use sbk::service::mock::{MockService, Operation};
use sbk::service::{BackupIntent, Phase};

fn source() -> &'static Path {
    Path::new("/dev/vg0/root")
}

/// Drive a full successful session and verify the exact protocol order.
#[test]
fn phases_execute_strictly_in_order() {
    let mock = MockService::new();
    let probe = mock.clone();
    let mut coordinator = SnapshotCoordinator::new(mock);

    coordinator.initialize(&BackupIntent::default()).unwrap();
    let id = coordinator.create_snapshot(source()).unwrap();
    coordinator.snapshot_device(id).unwrap();
    coordinator.complete().unwrap();

    probe.assert_operations(&[
        Operation::Initialize { persistent: false },
        Operation::StartSnapshotSet,
        Operation::AddVolume {
            volume: source().display().to_string(),
        },
        Operation::PrepareForBackup,
        Operation::DoSnapshotSet,
        Operation::GetProperties,
        Operation::ReleaseProperties,
        Operation::BackupComplete,
    ]);
}

/// A failed prepare must stop the commit from ever being issued, while the
/// session is still completed exactly once.
#[test]
fn prepare_failure_stops_commit_and_still_completes_once() {
    let mock = MockService::new();
    let probe = mock.clone();
    probe.fail_wait(Phase::Prepare);
    let mut coordinator = SnapshotCoordinator::new(mock);

    coordinator.initialize(&BackupIntent::default()).unwrap();
    let err = coordinator.create_snapshot(source());
    match err {
        Err(SbError::PhaseFailed { phase, .. }) => assert_eq!(phase, Phase::Prepare),
        other => panic!("unexpected: {other:?}"),
    }

    probe.assert_not_performed(&Operation::DoSnapshotSet);
    probe.assert_not_performed(&Operation::GetProperties);

    coordinator.complete().unwrap();
    coordinator.complete().unwrap();
    assert_eq!(probe.complete_count(), 1);
}

/// A failed commit leaves no usable snapshot and never touches properties.
#[test]
fn commit_failure_leaves_no_usable_snapshot() {
    let mock = MockService::new();
    let probe = mock.clone();
    probe.fail_wait(Phase::Commit);
    let mut coordinator = SnapshotCoordinator::new(mock);

    coordinator.initialize(&BackupIntent::default()).unwrap();
    let err = coordinator.create_snapshot(source());
    match err {
        Err(SbError::PhaseFailed { phase, .. }) => assert_eq!(phase, Phase::Commit),
        other => panic!("unexpected: {other:?}"),
    }

    probe.assert_contains(&Operation::PrepareForBackup);
    probe.assert_not_performed(&Operation::GetProperties);

    coordinator.complete().unwrap();
    assert_eq!(probe.complete_count(), 1);
}

/// Phases cannot be reordered: committing before the source volume is
/// registered is a programming error surfaced fail-fast.
#[test]
fn out_of_order_operations_fail_fast() {
    let mock = MockService::new();
    let probe = mock.clone();
    let mut coordinator = SnapshotCoordinator::new(mock);

    // Snapshot before initialize.
    assert!(matches!(
        coordinator.create_snapshot(source()),
        Err(SbError::InvalidState { .. })
    ));
    probe.assert_not_performed(&Operation::StartSnapshotSet);

    // Double initialize.
    coordinator.initialize(&BackupIntent::default()).unwrap();
    assert!(matches!(
        coordinator.initialize(&BackupIntent::default()),
        Err(SbError::InvalidState { .. })
    ));
}

/// Unreachable service and denied access map to their own error kinds.
#[test]
fn initialize_failure_kinds_are_distinguished() {
    let mock = MockService::new();
    mock.set_unavailable();
    let mut coordinator = SnapshotCoordinator::new(mock);
    assert!(matches!(
        coordinator.initialize(&BackupIntent::default()),
        Err(SbError::ServiceUnavailable { .. })
    ));

    let mock = MockService::new();
    mock.deny_permission();
    let mut coordinator = SnapshotCoordinator::new(mock);
    assert!(matches!(
        coordinator.initialize(&BackupIntent::default()),
        Err(SbError::PermissionDenied { .. })
    ));
}

/// An empty device path signals an unusable snapshot: surfaced as
/// not-found, never retried, and the properties buffer is still released.
#[test]
fn empty_device_path_is_failure_not_retry() {
    let mock = MockService::new();
    let probe = mock.clone();
    probe.set_empty_device_path();
    let mut coordinator = SnapshotCoordinator::new(mock);

    coordinator.initialize(&BackupIntent::default()).unwrap();
    let id = coordinator.create_snapshot(source()).unwrap();
    assert!(matches!(
        coordinator.snapshot_device(id),
        Err(SbError::SnapshotNotFound { .. })
    ));

    // Exactly one retrieval happened; no retry loop.
    let retrievals = probe
        .operations()
        .iter()
        .filter(|op| **op == Operation::GetProperties)
        .count();
    assert_eq!(retrievals, 1);
    probe.assert_properties_released();
}
