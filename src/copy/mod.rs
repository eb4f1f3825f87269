//! Data transfer strategies over the exposed shadow device.
//!
//! Two strategies layer on the same snapshot: a file-tree mirror
//! ([`file::mirror`]) and a sequential raw block copy ([`block::copy_raw`]).
//! A job runs exactly one of them.

pub mod block;
pub mod file;

pub use block::{copy_raw, BlockCopyReport};
pub use file::{mirror, MirrorOptions, MirrorReport};

use clap::ValueEnum;
use serde::Serialize;

/// Transfer strategy selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Mirror the file tree from the mapped shadow path.
    #[default]
    File,
    /// Serialize the shadow device byte-for-byte into one image artifact.
    Block,
}
