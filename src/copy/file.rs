//! File-level mirror copy.
//!
//! Makes the destination tree a superset-replacing mirror of the source:
//! extraneous destination entries are removed, changed files overwritten,
//! directories created as needed. Copying is best-effort at single-file
//! granularity: a file that cannot be read after the configured retries is
//! skipped and counted, not fatal. Total failure is reserved for an
//! unenumerable source root or an uncreatable destination root.
//!
//! Worker threads are an internal throughput detail; callers issue one
//! `mirror` call and receive one report.

use std::collections::{HashSet, VecDeque};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SbError};

/// Typed mirror-copy configuration.
///
/// Defaults mirror the classic robocopy invocation for system backups:
/// mirror deletions on, 8 copy threads, hidden entries excluded, one retry
/// with a one-second wait.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    /// Remove destination entries that no longer exist in the source.
    pub mirror_deletions: bool,
    /// Worker threads used for file copies.
    pub threads: usize,
    /// Skip dot-prefixed (hidden) entries.
    pub exclude_hidden: bool,
    /// Per-file retry attempts after the first failure.
    pub retry_count: u32,
    /// Wait between per-file retries.
    pub retry_wait: Duration,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            mirror_deletions: true,
            threads: 8,
            exclude_hidden: true,
            retry_count: 1,
            retry_wait: Duration::from_secs(1),
        }
    }
}

/// One file passed over after retries were exhausted.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of one mirror run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MirrorReport {
    pub files_copied: u64,
    pub files_unchanged: u64,
    pub bytes_copied: u64,
    pub dirs_created: u64,
    pub entries_removed: u64,
    /// Entries excluded by policy (hidden attributes, symbolic links).
    pub entries_excluded: u64,
    pub skipped: Vec<SkippedFile>,
}

impl MirrorReport {
    /// True when any file had to be skipped; distinct from clean success.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }

    /// Number of modifications this run performed on the destination.
    #[must_use]
    pub const fn changes(&self) -> u64 {
        self.files_copied + self.dirs_created + self.entries_removed
    }
}

struct FileEntry {
    rel: PathBuf,
    len: u64,
    mtime: Option<std::time::SystemTime>,
}

/// Mirror `source` into `dest`.
pub fn mirror(source: &Path, dest: &Path, options: &MirrorOptions) -> Result<MirrorReport> {
    // An unenumerable source root means no files could be copied at all;
    // that is the fatal case, unlike individual unreadable files below.
    fs::read_dir(source).map_err(|e| SbError::MirrorFailed {
        reason: format!("cannot enumerate source root {}: {e}", source.display()),
    })?;
    fs::create_dir_all(dest).map_err(|e| SbError::MirrorFailed {
        reason: format!("cannot create destination root {}: {e}", dest.display()),
    })?;

    let mut report = MirrorReport::default();
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    walk_source(source, Path::new(""), options, &mut dirs, &mut files, &mut report);

    if options.mirror_deletions {
        let dir_set: HashSet<PathBuf> = dirs.iter().cloned().collect();
        let file_set: HashSet<PathBuf> = files.iter().map(|f| f.rel.clone()).collect();
        prune_dest(dest, Path::new(""), &dir_set, &file_set, &mut report);
    }

    for rel in &dirs {
        let target = dest.join(rel);
        if !target.is_dir() {
            match fs::create_dir_all(&target) {
                Ok(()) => report.dirs_created += 1,
                Err(e) => report.skipped.push(SkippedFile {
                    path: rel.clone(),
                    reason: format!("mkdir: {e}"),
                }),
            }
        }
    }

    copy_files(source, dest, files, options, &mut report);

    info!(
        copied = report.files_copied,
        unchanged = report.files_unchanged,
        removed = report.entries_removed,
        skipped = report.skipped.len(),
        bytes = report.bytes_copied,
        "mirror pass finished"
    );
    Ok(report)
}

fn is_hidden(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn walk_source(
    root: &Path,
    rel: &Path,
    options: &MirrorOptions,
    dirs: &mut Vec<PathBuf>,
    files: &mut Vec<FileEntry>,
    report: &mut MirrorReport,
) {
    let abs = root.join(rel);
    let entries = match fs::read_dir(&abs) {
        Ok(entries) => entries,
        Err(e) => {
            report.skipped.push(SkippedFile {
                path: rel.to_path_buf(),
                reason: format!("enumerate: {e}"),
            });
            return;
        }
    };
    for entry in entries {
        let Ok(entry) = entry else {
            report.skipped.push(SkippedFile {
                path: rel.to_path_buf(),
                reason: "unreadable directory entry".to_string(),
            });
            continue;
        };
        let name = entry.file_name();
        if options.exclude_hidden && is_hidden(&name) {
            report.entries_excluded += 1;
            continue;
        }
        let entry_rel = rel.join(&name);
        let Ok(file_type) = entry.file_type() else {
            report.skipped.push(SkippedFile {
                path: entry_rel,
                reason: "unreadable file type".to_string(),
            });
            continue;
        };
        if file_type.is_symlink() {
            // Raw-target links are not followed into the mirror.
            report.entries_excluded += 1;
        } else if file_type.is_dir() {
            dirs.push(entry_rel.clone());
            walk_source(root, &entry_rel, options, dirs, files, report);
        } else {
            match entry.metadata() {
                Ok(meta) => files.push(FileEntry {
                    rel: entry_rel,
                    len: meta.len(),
                    mtime: meta.modified().ok(),
                }),
                Err(e) => report.skipped.push(SkippedFile {
                    path: entry_rel,
                    reason: format!("stat: {e}"),
                }),
            }
        }
    }
}

fn prune_dest(
    dest: &Path,
    rel: &Path,
    source_dirs: &HashSet<PathBuf>,
    source_files: &HashSet<PathBuf>,
    report: &mut MirrorReport,
) {
    let abs = dest.join(rel);
    let Ok(entries) = fs::read_dir(&abs) else {
        return;
    };
    for entry in entries.flatten() {
        let entry_rel = rel.join(entry.file_name());
        let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
        if is_dir {
            if source_dirs.contains(&entry_rel) {
                prune_dest(dest, &entry_rel, source_dirs, source_files, report);
            } else {
                match fs::remove_dir_all(entry.path()) {
                    Ok(()) => {
                        debug!(path = %entry_rel.display(), "removed extraneous directory");
                        report.entries_removed += 1;
                    }
                    Err(e) => report.skipped.push(SkippedFile {
                        path: entry_rel,
                        reason: format!("remove dir: {e}"),
                    }),
                }
            }
        } else if !source_files.contains(&entry_rel) {
            match fs::remove_file(entry.path()) {
                Ok(()) => {
                    debug!(path = %entry_rel.display(), "removed extraneous file");
                    report.entries_removed += 1;
                }
                Err(e) => report.skipped.push(SkippedFile {
                    path: entry_rel,
                    reason: format!("remove file: {e}"),
                }),
            }
        }
    }
}

enum CopyOutcome {
    Copied(u64),
    Unchanged,
    Skipped(String),
}

fn copy_files(
    source: &Path,
    dest: &Path,
    files: Vec<FileEntry>,
    options: &MirrorOptions,
    report: &mut MirrorReport,
) {
    if files.is_empty() {
        return;
    }
    let workers = options.threads.clamp(1, files.len());
    let queue = Arc::new(Mutex::new(files.into_iter().collect::<VecDeque<_>>()));
    let (tx, rx) = mpsc::channel::<(PathBuf, CopyOutcome)>();

    thread::scope(|scope| {
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let source = source.to_path_buf();
            let dest = dest.to_path_buf();
            let retry_count = options.retry_count;
            let retry_wait = options.retry_wait;
            scope.spawn(move || {
                loop {
                    let Some(entry) = queue.lock().unwrap().pop_front() else {
                        break;
                    };
                    let outcome =
                        copy_one(&source, &dest, &entry, retry_count, retry_wait);
                    if tx.send((entry.rel, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        for (rel, outcome) in rx {
            match outcome {
                CopyOutcome::Copied(bytes) => {
                    report.files_copied += 1;
                    report.bytes_copied += bytes;
                }
                CopyOutcome::Unchanged => report.files_unchanged += 1,
                CopyOutcome::Skipped(reason) => {
                    warn!(path = %rel.display(), reason = %reason, "file skipped");
                    report.skipped.push(SkippedFile { path: rel, reason });
                }
            }
        }
    });
}

fn copy_one(
    source_root: &Path,
    dest_root: &Path,
    entry: &FileEntry,
    retry_count: u32,
    retry_wait: Duration,
) -> CopyOutcome {
    let src = source_root.join(&entry.rel);
    let dst = dest_root.join(&entry.rel);

    // Quick check, robocopy-style: same length and a destination no older
    // than the source means the file is already mirrored.
    if let Ok(meta) = fs::metadata(&dst) {
        let newer_or_equal = match (meta.modified().ok(), entry.mtime) {
            (Some(dst_time), Some(src_time)) => dst_time >= src_time,
            _ => false,
        };
        if meta.len() == entry.len && newer_or_equal {
            return CopyOutcome::Unchanged;
        }
    }

    let mut attempt = 0;
    loop {
        match fs::copy(&src, &dst) {
            Ok(bytes) => return CopyOutcome::Copied(bytes),
            Err(e) if attempt < retry_count => {
                attempt += 1;
                debug!(path = %entry.rel.display(), attempt, error = %e, "copy retry");
                thread::sleep(retry_wait);
            }
            Err(e) => return CopyOutcome::Skipped(e.to_string()),
        }
    }
}
