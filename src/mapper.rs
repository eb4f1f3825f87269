//! Shadow device alias mapping.
//!
//! Turns an opaque shadow-device path into something a generic copy
//! routine can address, and guarantees it is un-addressed afterward. The
//! strategy is a symbolic raw-target link in a managed directory: alias
//! letters C–Z (24 usable) name link files `shadow_<letter>` pointing at
//! the frozen device. One mapping per alias at a time; removal is
//! idempotent and runs on every exit path via [`MappedAlias`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, SbError};

/// First and last usable alias letters. A and B are reserved, as in the
/// classic drive-letter space.
pub const FIRST_ALIAS: char = 'C';
pub const LAST_ALIAS: char = 'Z';

/// Allocates alias letters and maps them to shadow devices.
#[derive(Debug, Clone)]
pub struct AliasMapper {
    base: PathBuf,
}

impl AliasMapper {
    /// A mapper over `base`; the directory is created on first map.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Mapper over the system-default alias directory.
    #[must_use]
    pub fn system_default() -> Self {
        Self::new(std::env::temp_dir().join("sbk-shadow"))
    }

    fn link_path(&self, alias: char) -> PathBuf {
        self.base.join(format!("shadow_{alias}"))
    }

    /// Scan the alias space and return the first free letter.
    ///
    /// The space is small and enumerable, so exhaustion is a real failure
    /// mode: `NoAliasAvailable` when every letter is taken.
    pub fn allocate_alias(&self) -> Result<char> {
        for alias in FIRST_ALIAS..=LAST_ALIAS {
            if fs::symlink_metadata(self.link_path(alias)).is_err() {
                debug!(alias = %alias, "alias allocated");
                return Ok(alias);
            }
        }
        Err(SbError::NoAliasAvailable)
    }

    /// Create the raw-target mapping from `alias` to `shadow_device`.
    ///
    /// The alias must be unused; a link that appears between allocation and
    /// mapping (alias race) surfaces as `MappingFailed` with the underlying
    /// OS error.
    pub fn map(&self, alias: char, shadow_device: &Path) -> Result<MappedAlias> {
        fs::create_dir_all(&self.base).map_err(|source| SbError::MappingFailed {
            alias,
            target: shadow_device.to_path_buf(),
            source,
        })?;
        let link = self.link_path(alias);
        if fs::symlink_metadata(&link).is_ok() {
            return Err(SbError::MappingFailed {
                alias,
                target: shadow_device.to_path_buf(),
                source: io::Error::new(io::ErrorKind::AlreadyExists, "alias already mapped"),
            });
        }
        symlink_raw_target(shadow_device, &link).map_err(|source| SbError::MappingFailed {
            alias,
            target: shadow_device.to_path_buf(),
            source,
        })?;
        debug!(alias = %alias, device = %shadow_device.display(), link = %link.display(),
               "shadow device mapped");
        Ok(MappedAlias {
            mapper: self.clone(),
            alias,
            link,
            released: false,
        })
    }

    /// Remove the mapping for `alias`. Idempotent: unmapping a free alias
    /// succeeds.
    pub fn unmap(&self, alias: char) -> Result<()> {
        let link = self.link_path(alias);
        match remove_link(&link) {
            Ok(()) => {
                debug!(alias = %alias, "alias unmapped");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SbError::Io(e)),
        }
    }
}

/// A live mapping that must be removed after use.
///
/// Call [`MappedAlias::unmap`] on the success and failure paths to observe
/// the result; if the guard is dropped while still armed, removal is
/// attempted anyway and a failure is logged rather than raised, so a
/// mapping leak degrades the host but never masks the error that caused
/// the unwind.
#[derive(Debug)]
pub struct MappedAlias {
    mapper: AliasMapper,
    alias: char,
    link: PathBuf,
    released: bool,
}

impl MappedAlias {
    /// The addressable path standing in for the shadow device.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.link
    }

    #[must_use]
    pub const fn alias(&self) -> char {
        self.alias
    }

    /// Enumerate the mapped root's immediate entries.
    ///
    /// Zero entries is not auto-failure (an empty volume root can be
    /// legitimate) but is almost always meaningful, so it is logged as a
    /// warning. Returns the entry count when the root is enumerable.
    pub fn sanity_check(&self) -> Option<usize> {
        let entries = fs::read_dir(&self.link).ok()?.count();
        if entries == 0 {
            warn!(alias = %self.alias, "mapped volume root is empty");
        } else {
            debug!(alias = %self.alias, entries, "mapped volume root enumerated");
        }
        Some(entries)
    }

    /// Remove the mapping, consuming the guard.
    pub fn unmap(mut self) -> Result<()> {
        self.released = true;
        self.mapper.unmap(self.alias)
    }
}

impl Drop for MappedAlias {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Last-resort removal when the owner never reached its unmap call.
        if let Err(e) = self.mapper.unmap(self.alias) {
            warn!(alias = %self.alias, error = %e, "alias unmap failed during drop");
        }
    }
}

#[cfg(unix)]
fn symlink_raw_target(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_raw_target(target: &Path, link: &Path) -> io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

#[cfg(unix)]
fn remove_link(link: &Path) -> io::Result<()> {
    fs::remove_file(link)
}

#[cfg(windows)]
fn remove_link(link: &Path) -> io::Result<()> {
    fs::remove_file(link).or_else(|_| fs::remove_dir(link))
}
