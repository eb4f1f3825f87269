//! Disk-identity metadata capture.
//!
//! Reads a physical device's boot record and partition-layout region and
//! persists them as independent artifacts, so a disk can later be
//! reconstructed with its original identity. These captures bypass the
//! snapshot entirely: they address the physical device directly and may
//! run before or after the volume backup.
//!
//! Each capture is best-effort on its own; one artifact can succeed while
//! the other fails, and callers receive both outcomes.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, SbError};

/// Boot-record capture size: the first 4 KiB of the device, covering the
/// MBR and the start of any GPT structures.
pub const BOOT_RECORD_LEN: usize = 4096;

/// Layout query capacity: one protective-MBR sector, one layout-header
/// sector, and up to 128 partition entries of 128 bytes each. The bytes
/// actually returned are persisted, never the capacity.
pub const LAYOUT_QUERY_LEN: usize = 512 + 512 + 128 * 128;

/// Artifact file names, written into the destination directory.
pub const BOOT_RECORD_FILE: &str = "boot_record.bin";
pub const DRIVE_LAYOUT_FILE: &str = "drive_layout.bin";

/// Which metadata artifact an operation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    BootRecord,
    Layout,
}

impl fmt::Display for MetadataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BootRecord => f.write_str("boot record"),
            Self::Layout => f.write_str("drive layout"),
        }
    }
}

/// A persisted metadata blob.
#[derive(Debug, Clone, Serialize)]
pub struct MetadataArtifact {
    pub kind: MetadataKind,
    pub path: PathBuf,
    /// Bytes actually read from the device and written to the artifact.
    pub bytes: u64,
}

/// Resolve a physical drive index to its platform device path.
///
/// Index-based addressing covers the common case; callers with unusual
/// device naming pass an explicit path instead.
#[must_use]
pub fn physical_device_path(index: u8) -> PathBuf {
    #[cfg(windows)]
    {
        PathBuf::from(format!(r"\\.\PhysicalDrive{index}"))
    }
    #[cfg(not(windows))]
    {
        let letter = char::from(b'a' + index % 26);
        PathBuf::from(format!("/dev/sd{letter}"))
    }
}

/// Capture the device's boot record into `dest_dir`.
///
/// A device that returns fewer than [`BOOT_RECORD_LEN`] bytes yields an
/// artifact holding exactly the bytes read, never zero-padding.
pub fn capture_boot_record(device: &Path, dest_dir: &Path) -> Result<MetadataArtifact> {
    capture_region(
        device,
        dest_dir,
        MetadataKind::BootRecord,
        BOOT_RECORD_LEN,
        BOOT_RECORD_FILE,
    )
}

/// Capture the device's partition-layout region into `dest_dir`.
pub fn capture_layout(device: &Path, dest_dir: &Path) -> Result<MetadataArtifact> {
    capture_region(
        device,
        dest_dir,
        MetadataKind::Layout,
        LAYOUT_QUERY_LEN,
        DRIVE_LAYOUT_FILE,
    )
}

/// Run both captures against one device; the outcomes are independent.
pub fn capture_all(
    device: &Path,
    dest_dir: &Path,
) -> (Result<MetadataArtifact>, Result<MetadataArtifact>) {
    (
        capture_boot_record(device, dest_dir),
        capture_layout(device, dest_dir),
    )
}

fn capture_region(
    device: &Path,
    dest_dir: &Path,
    kind: MetadataKind,
    capacity: usize,
    file_name: &str,
) -> Result<MetadataArtifact> {
    let mut handle = File::open(device).map_err(|source| SbError::DeviceOpenFailed {
        path: device.to_path_buf(),
        source,
    })?;

    let mut buf = vec![0u8; capacity];
    let returned = read_up_to(&mut handle, &mut buf).map_err(|e| SbError::MetadataCaptureFailed {
        which: kind,
        reason: format!("read from {}: {e}", device.display()),
    })?;
    debug!(%kind, capacity, returned, "device region read");

    fs::create_dir_all(dest_dir).map_err(|e| SbError::MetadataCaptureFailed {
        which: kind,
        reason: format!("create {}: {e}", dest_dir.display()),
    })?;
    let path = dest_dir.join(file_name);
    fs::write(&path, &buf[..returned]).map_err(|e| SbError::MetadataCaptureFailed {
        which: kind,
        reason: format!("write {}: {e}", path.display()),
    })?;

    info!(%kind, path = %path.display(), bytes = returned, "metadata artifact written");
    Ok(MetadataArtifact {
        kind,
        path,
        bytes: returned as u64,
    })
}

/// Read until `buf` is full or the device signals end-of-data, returning
/// the byte count actually read.
fn read_up_to(src: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
