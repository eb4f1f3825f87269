//! Shadowbak library - point-in-time system backup via a volume snapshot
//! service.
//!
//! This library exposes the core functionality of the `sbk` CLI for use in
//! tests and potentially other applications.
//!
//! # Modules
//!
//! - `service`: Snapshot service protocol driver and backends
//! - `coordinator`: Snapshot lifecycle state machine
//! - `mapper`: Shadow device alias mapping
//! - `copy`: File-level mirror and block-level raw copy
//! - `metadata`: Boot-record and partition-layout capture
//! - `job`: Backup job orchestration and reporting
//! - `error`: Error types with user-recoverable hints
#![forbid(unsafe_code)]

pub mod cli;
pub mod coordinator;
pub mod copy;
pub mod error;
pub mod job;
pub mod logging;
pub mod mapper;
pub mod metadata;
pub mod service;
