//! Block-level raw copy.
//!
//! Serializes the shadow device byte-for-byte into a single image
//! artifact: query the exact device length, then loop fixed-size chunked
//! reads, writing each chunk immediately in the order read. Bytes written
//! always equal bytes read, and the finished image length equals the
//! queried device length exactly.
//!
//! A read error aborts the copy at the failing offset; the partially
//! written image is left in place so operators can see how far it got.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{Result, SbError};

/// Chunk size: large enough to amortize call overhead, small enough to
/// bound memory.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Coarse progress granularity.
const PROGRESS_EVERY: u64 = 64 * 1024 * 1024;

/// Outcome of a completed raw copy.
#[derive(Debug, Clone, Serialize)]
pub struct BlockCopyReport {
    pub device_len: u64,
    pub bytes_copied: u64,
    pub sha256: String,
    pub image_path: PathBuf,
    pub checksum_path: Option<PathBuf>,
}

/// Copy the shadow device into `dest_image`, logging coarse progress.
pub fn copy_raw(shadow_device: &Path, dest_image: &Path) -> Result<BlockCopyReport> {
    let mut last_logged = 0u64;
    copy_raw_with_progress(shadow_device, dest_image, &mut |copied, total| {
        if copied - last_logged >= PROGRESS_EVERY || copied == total {
            debug!(copied, total, "raw copy progress");
            last_logged = copied;
        }
    })
}

/// Copy the shadow device into `dest_image`, reporting `(copied, total)`
/// after every chunk.
pub fn copy_raw_with_progress(
    shadow_device: &Path,
    dest_image: &Path,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<BlockCopyReport> {
    let mut device = File::open(shadow_device).map_err(|source| SbError::DeviceOpenFailed {
        path: shadow_device.to_path_buf(),
        source,
    })?;
    let device_len = query_length(&mut device).map_err(|source| SbError::DeviceOpenFailed {
        path: shadow_device.to_path_buf(),
        source,
    })?;
    info!(device = %shadow_device.display(), device_len, "raw copy started");

    let mut image = File::create(dest_image).map_err(|source| SbError::WriteFailed {
        path: dest_image.to_path_buf(),
        source,
    })?;

    let (bytes_copied, sha256) =
        copy_stream(&mut device, device_len, &mut image, dest_image, progress)?;
    image.sync_all().map_err(|source| SbError::WriteFailed {
        path: dest_image.to_path_buf(),
        source,
    })?;

    let checksum_path = write_checksum_sidecar(dest_image, &sha256);
    info!(bytes_copied, sha256 = %sha256, "raw copy finished");
    Ok(BlockCopyReport {
        device_len,
        bytes_copied,
        sha256,
        image_path: dest_image.to_path_buf(),
        checksum_path,
    })
}

/// Query the device's exact byte length.
///
/// `metadata().len()` reports zero for block special files, so the length
/// comes from seeking to the end and back.
fn query_length(device: &mut File) -> std::io::Result<u64> {
    let len = device.seek(SeekFrom::End(0))?;
    device.seek(SeekFrom::Start(0))?;
    Ok(len)
}

/// Chunked copy core, factored over plain readers/writers so failure
/// injection is testable.
fn copy_stream<R: Read, W: Write>(
    src: &mut R,
    device_len: u64,
    dest: &mut W,
    dest_path: &Path,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<(u64, String)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;

    while copied < device_len {
        let want = usize::try_from((device_len - copied).min(CHUNK_SIZE as u64))
            .unwrap_or(CHUNK_SIZE);
        let n = src
            .read(&mut buf[..want])
            .map_err(|source| SbError::ReadFailed {
                offset: copied,
                source,
            })?;
        if n == 0 {
            return Err(SbError::ShortRead {
                offset: copied,
                expected: device_len,
            });
        }
        dest.write_all(&buf[..n])
            .map_err(|source| SbError::WriteFailed {
                path: dest_path.to_path_buf(),
                source,
            })?;
        hasher.update(&buf[..n]);
        copied += n as u64;
        progress(copied, device_len);
    }

    let digest = hasher.finalize();
    let sha256: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok((copied, sha256))
}

/// Persist the image digest next to the artifact, `sha256sum` style.
/// Best-effort: a failed sidecar write degrades the report, not the job.
fn write_checksum_sidecar(image: &Path, sha256: &str) -> Option<PathBuf> {
    let mut path = image.as_os_str().to_owned();
    path.push(".sha256");
    let path = PathBuf::from(path);
    let name = image
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    match std::fs::write(&path, format!("{sha256}  {name}\n")) {
        Ok(()) => Some(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "checksum sidecar write failed");
            None
        }
    }
}
