//! Transfer-strategy tests: mirror idempotence and raw-copy length
//! accounting.

use std::fs;
use std::path::Path;
use std::time::Duration;

use sbk::copy::{block, file, MirrorOptions};

fn options() -> MirrorOptions {
    MirrorOptions {
        retry_wait: Duration::from_millis(1),
        ..MirrorOptions::default()
    }
}

fn write(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Running the mirror twice against an unchanged source produces a
/// byte-identical destination and zero changes on the second pass.
#[test]
fn mirror_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    write(&src, "a.txt", b"alpha");
    write(&src, "nested/b.bin", &[0u8; 4096]);
    write(&src, "nested/deep/c.txt", b"gamma");

    let first = file::mirror(&src, &dst, &options()).unwrap();
    assert_eq!(first.files_copied, 3);
    assert!(first.changes() > 0);

    let snapshot: Vec<(String, Vec<u8>)> = ["a.txt", "nested/b.bin", "nested/deep/c.txt"]
        .iter()
        .map(|rel| ((*rel).to_string(), fs::read(dst.join(rel)).unwrap()))
        .collect();

    let second = file::mirror(&src, &dst, &options()).unwrap();
    assert_eq!(second.changes(), 0, "second pass must be a no-op");
    assert_eq!(second.files_unchanged, 3);

    for (rel, before) in snapshot {
        assert_eq!(fs::read(dst.join(&rel)).unwrap(), before, "{rel} changed");
    }
}

/// The mirror replaces destination state: overwritten files take the
/// source contents and extraneous entries disappear.
#[test]
fn mirror_is_superset_replacing() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    write(&src, "shared.txt", b"new contents");
    write(&dst, "shared.txt", b"old contents that are longer");
    write(&dst, "extraneous.txt", b"stale");

    let report = file::mirror(&src, &dst, &options()).unwrap();
    assert_eq!(fs::read(dst.join("shared.txt")).unwrap(), b"new contents");
    assert!(!dst.join("extraneous.txt").exists());
    assert_eq!(report.entries_removed, 1);
}

/// For a simulated device of length L, the destination image is exactly L
/// bytes after a successful run.
#[test]
fn raw_copy_length_equals_device_length_exactly() {
    let tmp = tempfile::tempdir().unwrap();
    let device = tmp.path().join("device");
    let image = tmp.path().join("system_image.bin");

    // Deliberately not chunk-aligned.
    let device_len = block::CHUNK_SIZE * 5 + 77;
    let payload: Vec<u8> = (0..device_len).map(|i| (i % 251) as u8).collect();
    fs::write(&device, &payload).unwrap();

    let report = block::copy_raw(&device, &image).unwrap();
    assert_eq!(report.device_len, device_len as u64);
    assert_eq!(report.bytes_copied, device_len as u64);
    assert_eq!(
        fs::metadata(&image).unwrap().len(),
        device_len as u64,
        "image length must equal the queried device length exactly"
    );
    assert_eq!(fs::read(&image).unwrap(), payload);
}

/// A zero-length device yields a zero-length image, not an error.
#[test]
fn raw_copy_of_empty_device_is_empty_image() {
    let tmp = tempfile::tempdir().unwrap();
    let device = tmp.path().join("device");
    let image = tmp.path().join("image.bin");
    fs::write(&device, b"").unwrap();

    let report = block::copy_raw(&device, &image).unwrap();
    assert_eq!(report.bytes_copied, 0);
    assert_eq!(fs::metadata(&image).unwrap().len(), 0);
}
