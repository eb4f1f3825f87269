//! Error types for backup operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::metadata::MetadataKind;
use crate::service::Phase;

/// Primary error type for backup operations.
#[derive(Error, Debug)]
pub enum SbError {
    // Snapshot service errors
    #[error("Snapshot service unavailable: {reason}")]
    ServiceUnavailable { reason: String },

    #[error("Snapshot service denied access: {reason}")]
    PermissionDenied { reason: String },

    #[error("Snapshot phase '{phase}' failed: {reason}")]
    PhaseFailed { phase: Phase, reason: String },

    #[error("Snapshot {id} not found or unusable")]
    SnapshotNotFound { id: String },

    #[error("Coordinator cannot {operation} while in state '{state}'")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    // Device mapping errors
    #[error("No free alias letter remains in the mapping space")]
    NoAliasAvailable,

    #[error("Failed to map alias '{alias}' to {target}: {source}")]
    MappingFailed {
        alias: char,
        target: PathBuf,
        source: std::io::Error,
    },

    // Raw device / block copy errors
    #[error("Failed to open device {path}: {source}")]
    DeviceOpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Device ended early at offset {offset}: expected {expected} bytes")]
    ShortRead { offset: u64, expected: u64 },

    #[error("Read failed at offset {offset}: {source}")]
    ReadFailed { offset: u64, source: std::io::Error },

    #[error("Write to {path} failed: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    // File copy errors
    #[error("Mirror copy completed with {skipped} file(s) skipped")]
    PartialCopy { skipped: usize },

    #[error("Mirror copy failed: {reason}")]
    MirrorFailed { reason: String },

    // Metadata capture errors
    #[error("Failed to capture {which}: {reason}")]
    MetadataCaptureFailed { which: MetadataKind, reason: String },

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SbError {
    /// Returns true if the error is recoverable by the user.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ServiceUnavailable { .. }
                | Self::PermissionDenied { .. }
                | Self::NoAliasAvailable
                | Self::DeviceOpenFailed { .. }
        )
    }

    /// Returns a suggestion for how to fix the error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ServiceUnavailable { .. } => {
                Some("Ensure the volume snapshot service is installed and running")
            }
            Self::PermissionDenied { .. } => Some("Re-run with elevated privileges"),
            Self::NoAliasAvailable => {
                Some("Unmap stale shadow aliases or choose another alias directory")
            }
            Self::DeviceOpenFailed { .. } => {
                Some("Check the device path and that no other process holds it exclusively")
            }
            Self::PartialCopy { .. } => {
                Some("Inspect the log for skipped files; locked system files are expected")
            }
            _ => None,
        }
    }
}

/// Convenience type alias for Results using SbError.
pub type Result<T> = std::result::Result<T, SbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_failure_message_names_the_phase() {
        let err = SbError::PhaseFailed {
            phase: Phase::Prepare,
            reason: "writer flush rejected".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("prepare"), "message was: {msg}");
        assert!(msg.contains("writer flush rejected"));
    }

    #[test]
    fn recoverable_classification() {
        assert!(SbError::NoAliasAvailable.is_user_recoverable());
        assert!(!SbError::ShortRead {
            offset: 10,
            expected: 20
        }
        .is_user_recoverable());
    }

    #[test]
    fn suggestions_exist_for_service_errors() {
        let err = SbError::ServiceUnavailable {
            reason: "lvm not found".to_string(),
        };
        assert!(err.suggestion().is_some());
    }
}
