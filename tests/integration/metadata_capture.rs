//! Disk metadata capture tests.

use std::fs;

use sbk::error::SbError;
use sbk::metadata::{self, MetadataKind, BOOT_RECORD_LEN, LAYOUT_QUERY_LEN};

/// A device that returns fewer than 4096 bytes persists exactly the bytes
/// actually read, not a zero-padded buffer.
#[test]
fn short_boot_record_is_not_padded() {
    let tmp = tempfile::tempdir().unwrap();
    let device = tmp.path().join("device");
    let out = tmp.path().join("out");
    fs::write(&device, vec![0xEEu8; 1234]).unwrap();

    let artifact = metadata::capture_boot_record(&device, &out).unwrap();
    assert_eq!(artifact.bytes, 1234);

    let persisted = fs::read(&artifact.path).unwrap();
    assert_eq!(persisted.len(), 1234, "must not be padded to {BOOT_RECORD_LEN}");
    assert!(persisted.iter().all(|&b| b == 0xEE));
}

/// Boot-record capture reads at most the fixed boot-record window.
#[test]
fn boot_record_capture_is_bounded() {
    let tmp = tempfile::tempdir().unwrap();
    let device = tmp.path().join("device");
    fs::write(&device, vec![1u8; BOOT_RECORD_LEN + 9000]).unwrap();

    let artifact = metadata::capture_boot_record(&device, &tmp.path().join("out")).unwrap();
    assert_eq!(artifact.bytes, BOOT_RECORD_LEN as u64);
}

/// The layout artifact holds exactly the returned byte count, capped at
/// the header-plus-128-entries query capacity.
#[test]
fn layout_capture_persists_returned_bytes() {
    let tmp = tempfile::tempdir().unwrap();
    let device = tmp.path().join("device");
    fs::write(&device, vec![7u8; 2000]).unwrap();

    let artifact = metadata::capture_layout(&device, &tmp.path().join("out")).unwrap();
    assert_eq!(artifact.bytes, 2000);
    assert!(artifact.bytes < LAYOUT_QUERY_LEN as u64);
}

/// One artifact can succeed while the other fails; the pair is not atomic.
#[cfg(unix)]
#[test]
fn captures_are_independent_outcomes() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    let device = tmp.path().join("device");
    let out = tmp.path().join("out");
    fs::write(&device, vec![5u8; 512]).unwrap();

    // First capture succeeds and creates the destination.
    let boot = metadata::capture_boot_record(&device, &out).unwrap();
    assert_eq!(boot.kind, MetadataKind::BootRecord);

    // Make the destination read-only so the second artifact cannot be
    // written, then verify the failure names the layout capture.
    fs::set_permissions(&out, fs::Permissions::from_mode(0o555)).unwrap();
    let layout = metadata::capture_layout(&device, &out);
    match layout {
        Err(SbError::MetadataCaptureFailed { which, .. }) => {
            assert_eq!(which, MetadataKind::Layout);
        }
        other => panic!("unexpected: {other:?}"),
    }
    fs::set_permissions(&out, fs::Permissions::from_mode(0o755)).unwrap();

    // The earlier artifact is untouched.
    assert!(boot.path.exists());
}

/// Both artifacts land in the destination with their canonical names.
#[test]
fn artifacts_use_canonical_names() {
    let tmp = tempfile::tempdir().unwrap();
    let device = tmp.path().join("device");
    let out = tmp.path().join("out");
    fs::write(&device, vec![3u8; 600]).unwrap();

    let (boot, layout) = metadata::capture_all(&device, &out);
    assert_eq!(
        boot.unwrap().path.file_name().unwrap(),
        metadata::BOOT_RECORD_FILE
    );
    assert_eq!(
        layout.unwrap().path.file_name().unwrap(),
        metadata::DRIVE_LAYOUT_FILE
    );
}
