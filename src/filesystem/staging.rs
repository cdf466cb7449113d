// src/filesystem/staging.rs

//! Package staging manager
//!
//! Links the resolved package files into the staging directory so the
//! post-reboot installer finds them in one stable place. Hardlinks are used
//! whenever possible (no extra disk space, instant). A copy is made only when
//! the download cache and the staging directory live on different
//! filesystems.
//!
//! Staging is idempotent: files already linked are skipped, packages left
//! over from an earlier run are removed, and the manifest is rewritten each
//! pass. Re-running after an interruption is the recovery path.

use crate::Result;
use crate::config::UpgradeConfig;
use crate::filesystem::ops::{self, LinkFn};
use crate::filesystem::Manifest;
use crate::paths::UpgradePaths;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the installer will read a package from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageOrigin {
    /// A downloaded file that gets linked into the staging directory
    LocalFile,
    /// A package on removable media, read from the media mount at install time
    RemovableMedia,
}

/// A package descriptor handed over by the download/resolve step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    /// Path of the downloaded file (unused for media packages)
    pub local_path: PathBuf,
    /// Path relative to the repository or media root
    pub relative_path: String,
    pub origin: PackageOrigin,
}

impl ResolvedPackage {
    /// A downloaded package file
    pub fn local(path: impl Into<PathBuf>) -> Self {
        let local_path = path.into();
        let relative_path = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            local_path,
            relative_path,
            origin: PackageOrigin::LocalFile,
        }
    }

    /// A package that stays on removable media
    pub fn media(relative_path: impl Into<String>) -> Self {
        Self {
            local_path: PathBuf::new(),
            relative_path: relative_path.into(),
            origin: PackageOrigin::RemovableMedia,
        }
    }

    /// Classify a package by the URL of the repository it came from
    ///
    /// `file://` repositories are mounted media; anything else was downloaded.
    pub fn from_remote(local_path: impl Into<PathBuf>, relative_path: impl Into<String>, remote_url: &str) -> Self {
        let origin = if remote_url.starts_with("file://") {
            PackageOrigin::RemovableMedia
        } else {
            PackageOrigin::LocalFile
        };
        Self {
            local_path: local_path.into(),
            relative_path: relative_path.into(),
            origin,
        }
    }

    /// Identity of the package in the manifest
    ///
    /// Local files are known by their basename, media packages by their path
    /// under the `media/` mount.
    pub fn identity(&self) -> Option<String> {
        match self.origin {
            PackageOrigin::RemovableMedia => Some(format!(
                "media/{}",
                self.relative_path.trim_start_matches('/')
            )),
            PackageOrigin::LocalFile => self
                .local_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        }
    }
}

/// True for directory entries that look like package files
pub fn is_package_name(name: &str) -> bool {
    name.ends_with(".rpm")
}

/// Stages resolved packages into the upgrade layout
pub struct StagingManager {
    paths: UpgradePaths,
    link: LinkFn,
}

impl StagingManager {
    pub fn new(paths: UpgradePaths) -> Self {
        Self {
            paths,
            link: ops::hard_link,
        }
    }

    /// Replace the hard-link primitive
    pub fn with_linker(mut self, link: LinkFn) -> Self {
        self.link = link;
        self
    }

    pub fn paths(&self) -> &UpgradePaths {
        &self.paths
    }

    /// Stage `packages` and write the manifest
    ///
    /// Missing local files are skipped with a warning. Every other
    /// filesystem failure is fatal.
    pub fn stage(&self, packages: &[ResolvedPackage]) -> Result<Manifest> {
        let package_dir = self.paths.package_dir();
        info!("Linking required packages into {}", package_dir.display());
        ops::mkdir_p(&package_dir)?;

        let mut manifest = Manifest::new();
        for pkg in packages {
            let Some(identity) = pkg.identity() else {
                warn!("Skipping package with no usable name: {:?}", pkg.local_path);
                continue;
            };

            if pkg.origin == PackageOrigin::RemovableMedia {
                debug!("{} will be read from media", identity);
                manifest.insert(identity);
                continue;
            }

            if !pkg.local_path.exists() {
                warn!("{} missing", pkg.local_path.display());
                continue;
            }

            self.sync_package(&pkg.local_path, &package_dir.join(&identity))?;
            manifest.insert(identity);
        }

        let removed = self.remove_stale(&manifest)?;
        if removed > 0 {
            info!("Removed {} leftover package(s) from {}", removed, package_dir.display());
        }

        manifest.write(&self.paths.package_list())?;
        info!("Wrote package list with {} entries", manifest.len());

        self.register_cleanup()?;
        Ok(manifest)
    }

    /// Make `target` the same file as `source`
    fn sync_package(&self, source: &Path, target: &Path) -> Result<()> {
        let name = target.file_name().unwrap_or_default().to_string_lossy();

        if ops::same_file(source, target)? {
            debug!("{} already in package dir", name);
            return Ok(());
        }

        match fs::symlink_metadata(target) {
            Ok(meta) if meta.is_dir() => {
                info!("Deleting directory named {}", name);
                ops::rm_rf(target)?;
            }
            Ok(_) => ops::rm_f(target)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let method = ops::link_or_copy(source, target, self.link).map_err(|e| {
            crate::Error::IoError(format!(
                "Failed to stage {} into {}: {}",
                source.display(),
                target.display(),
                e
            ))
        })?;
        debug!("Staged {} ({})", name, method);
        Ok(())
    }

    /// Delete package entries that are not part of `manifest`
    fn remove_stale(&self, manifest: &Manifest) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(self.paths.package_dir())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_package_name(&name) && !manifest.contains(&name) {
                debug!("Removing stale package {}", name);
                ops::rm_rf(&entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Record the cache and staging directories for final cleanup
    fn register_cleanup(&self) -> Result<()> {
        let cache_dir = self.paths.unroot(self.paths.cache_dir());
        let package_dir = self.paths.unroot(self.paths.package_dir());
        UpgradeConfig::edit(&self.paths.upgrade_conf(), |conf| {
            conf.cleanup.ensure_required(&cache_dir, &package_dir);
            Ok(())
        })
    }
}
