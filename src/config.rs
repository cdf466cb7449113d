// src/config.rs

//! Persisted upgrade configuration
//!
//! State that must survive the reboot into the one-shot upgrade lives in a
//! small TOML file inside the staging directory:
//!
//! ```toml
//! [cleanup]
//! dirs = ["/var/cache/system-upgrade", "/var/lib/system-upgrade"]
//!
//! [boot]
//! kernel = "/boot/vmlinuz-system-upgrade"
//! initrd = "/boot/initramfs-system-upgrade.img"
//! ```
//!
//! Changes go through [`UpgradeConfig::edit`], which commits only when the
//! closure succeeds.

use crate::Result;
use crate::filesystem::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directories to delete once the upgrade cycle is over (`cleanup.dirs`)
///
/// Paths are stored as seen from the upgraded system, without a root prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupRegistry {
    #[serde(default)]
    dirs: Vec<PathBuf>,
}

impl CleanupRegistry {
    /// Registered directories, in removal order
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Add a directory unless it is already registered
    pub fn register(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.dirs.contains(&dir) {
            self.dirs.push(dir);
        }
    }

    /// Guarantee the cache and staging directories are registered
    ///
    /// The staging directory holds this configuration file, so it always
    /// moves to the end of the list.
    pub fn ensure_required(&mut self, cache_dir: &Path, package_dir: &Path) {
        self.dirs.retain(|d| d != cache_dir && d != package_dir);
        let mut seen = Vec::with_capacity(self.dirs.len() + 2);
        for dir in self.dirs.drain(..) {
            if !seen.contains(&dir) {
                seen.push(dir);
            }
        }
        seen.push(cache_dir.to_path_buf());
        seen.push(package_dir.to_path_buf());
        self.dirs = seen;
    }
}

/// The one-shot boot entry's images (`boot.kernel`, `boot.initrd`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootEntryRecord {
    pub kernel: Option<PathBuf>,
    pub initrd: Option<PathBuf>,
}

impl BootEntryRecord {
    pub fn is_empty(&self) -> bool {
        self.kernel.is_none() && self.initrd.is_none()
    }
}

/// Everything persisted across the reboot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeConfig {
    #[serde(default)]
    pub cleanup: CleanupRegistry,
    #[serde(default)]
    pub boot: BootEntryRecord,
}

impl UpgradeConfig {
    /// Load the configuration, treating a missing file as empty
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No upgrade config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the configuration atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        write_atomic(path, content.as_bytes())?;
        Ok(())
    }

    /// Load, mutate and commit the configuration in one scope
    ///
    /// If `f` returns an error nothing is written and the on-disk state is
    /// left as it was.
    pub fn edit<T, F>(path: &Path, f: F) -> Result<T>
    where
        F: FnOnce(&mut UpgradeConfig) -> Result<T>,
    {
        let mut conf = Self::load(path)?;
        let value = f(&mut conf)?;
        conf.save(path)?;
        Ok(value)
    }
}
