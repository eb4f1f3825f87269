//! End-to-end job tests over the mock service.

use std::fs;
use std::path::Path;
use std::time::Duration;

use sbk::copy::TransferMode;
use sbk::job::{self, BackupRequest, JobStatus, IMAGE_FILE, MIRROR_SUBDIR};
use sbk::service::mock::{MockService, Operation};
use sbk::service::Phase;

fn request(root: &Path, source: &Path) -> BackupRequest {
    let mut request = BackupRequest::new(source, root.join("dest"));
    request.alias_base = Some(root.join("aliases"));
    request.mirror_options.retry_wait = Duration::from_millis(1);
    request
}

/// Source volume with 3 files (10 B, 0 B, 1 MiB): the mirror yields a
/// destination tree with exactly those files, byte-identical, and the job
/// reports `Success`.
#[test]
fn file_level_job_mirrors_three_files_byte_identically() {
    let tmp = tempfile::tempdir().unwrap();
    let volume = tmp.path().join("volume");
    fs::create_dir(&volume).unwrap();

    let small = vec![0x42u8; 10];
    let empty: Vec<u8> = Vec::new();
    let large: Vec<u8> = (0..1024 * 1024).map(|i| (i % 254) as u8).collect();
    fs::write(volume.join("small.dat"), &small).unwrap();
    fs::write(volume.join("empty.dat"), &empty).unwrap();
    fs::write(volume.join("large.dat"), &large).unwrap();

    let mock = MockService::new().with_device_path(&volume);
    let probe = mock.clone();
    let report = job::run_backup(mock, &request(tmp.path(), &volume));

    assert_eq!(report.status, JobStatus::Success);
    assert!(report.error.is_none());
    assert!(report.cleanup_warnings.is_empty());

    let mirror_root = tmp.path().join("dest").join(MIRROR_SUBDIR);
    let entries = fs::read_dir(&mirror_root).unwrap().count();
    assert_eq!(entries, 3, "exactly the three source files");
    assert_eq!(fs::read(mirror_root.join("small.dat")).unwrap(), small);
    assert_eq!(fs::read(mirror_root.join("empty.dat")).unwrap(), empty);
    assert_eq!(fs::read(mirror_root.join("large.dat")).unwrap(), large);

    assert_eq!(probe.complete_count(), 1);
    probe.assert_properties_released();
}

/// Snapshot prepare fails: the job is `Failed` at phase prepare, no device
/// alias was ever allocated, and the session was completed exactly once.
#[test]
fn prepare_failure_yields_failed_job_without_alias() {
    let tmp = tempfile::tempdir().unwrap();
    let volume = tmp.path().join("volume");
    fs::create_dir(&volume).unwrap();

    let mock = MockService::new().with_device_path(&volume);
    let probe = mock.clone();
    probe.fail_wait(Phase::Prepare);
    let report = job::run_backup(mock, &request(tmp.path(), &volume));

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.failed_phase, Some(Phase::Prepare));
    assert!(report.alias.is_none(), "no alias may be allocated");
    assert!(
        !tmp.path().join("aliases").exists(),
        "the alias directory must never have been touched"
    );
    assert_eq!(probe.complete_count(), 1);
    probe.assert_not_performed(&Operation::DoSnapshotSet);
}

/// Block-level job: the image artifact equals the device contents and the
/// checksum sidecar is present.
#[test]
fn block_level_job_images_the_device() {
    let tmp = tempfile::tempdir().unwrap();
    let volume = tmp.path().join("volume-device");
    let payload: Vec<u8> = (0..300_000).map(|i| (i % 241) as u8).collect();
    fs::write(&volume, &payload).unwrap();

    let mock = MockService::new().with_device_path(&volume);
    let mut request = request(tmp.path(), &volume);
    request.mode = TransferMode::Block;
    let report = job::run_backup(mock, &request);

    assert_eq!(report.status, JobStatus::Success);
    let image = tmp.path().join("dest").join(IMAGE_FILE);
    assert_eq!(fs::read(&image).unwrap(), payload);
    let sidecar = report.image.as_ref().and_then(|i| i.checksum_path.clone());
    assert!(sidecar.is_some_and(|p| p.exists()));
}

/// A transfer failure still unmaps the alias and completes the session;
/// the copy error is the one surfaced, cleanup runs quietly.
#[test]
fn copy_failure_still_releases_alias_and_session() {
    let tmp = tempfile::tempdir().unwrap();
    // Device path that cannot be opened for raw copy.
    let missing_device = tmp.path().join("not-a-device");

    let mock = MockService::new().with_device_path(&missing_device);
    let probe = mock.clone();
    let mut request = request(tmp.path(), &missing_device);
    request.mode = TransferMode::Block;
    let report = job::run_backup(mock, &request);

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.alias, Some('C'), "mapping did happen");
    let leftover = fs::read_dir(tmp.path().join("aliases"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftover, 0, "alias must be unmapped on the failure path");
    assert_eq!(probe.complete_count(), 1);
}

/// Mirror jobs with skipped files degrade to `Partial`, not `Failed`.
#[cfg(unix)]
#[test]
fn skipped_files_degrade_to_partial() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    let volume = tmp.path().join("volume");
    fs::create_dir(&volume).unwrap();
    fs::write(volume.join("readable.txt"), b"fine").unwrap();
    fs::write(volume.join("locked.txt"), b"no access").unwrap();
    fs::set_permissions(
        volume.join("locked.txt"),
        fs::Permissions::from_mode(0o000),
    )
    .unwrap();

    let mock = MockService::new().with_device_path(&volume);
    let probe = mock.clone();
    let mut request = request(tmp.path(), &volume);
    request.mirror_options.retry_count = 0;
    let report = job::run_backup(mock, &request);

    assert_eq!(report.status, JobStatus::Partial);
    let mirror = report.mirror.as_ref().unwrap();
    assert_eq!(mirror.files_copied, 1);
    assert_eq!(mirror.skipped.len(), 1);
    assert_eq!(probe.complete_count(), 1);

    fs::set_permissions(
        volume.join("locked.txt"),
        fs::Permissions::from_mode(0o644),
    )
    .unwrap();
}

/// The job report serializes for robot-mode output.
#[test]
fn job_report_serializes_to_json() {
    let tmp = tempfile::tempdir().unwrap();
    let volume = tmp.path().join("volume");
    fs::create_dir(&volume).unwrap();
    fs::write(volume.join("f.txt"), b"x").unwrap();

    let mock = MockService::new().with_device_path(&volume);
    let report = job::run_backup(mock, &request(tmp.path(), &volume));

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["status"], "success");
    assert_eq!(value["mode"], "file");
    assert!(value["snapshot_id"].is_string());
    assert!(value["mirror"]["files_copied"].is_u64());
}
