// src/paths.rs
//! Centralized path derivation for the upgrade layout
//!
//! The pre-reboot tool and the post-reboot installer agree on these paths,
//! so they must stay stable. Every path is resolved under a root prefix,
//! which is "/" on a live system.

use std::path::{Path, PathBuf};

/// Package cache used by the download step
pub const CACHE_DIR: &str = "var/cache/system-upgrade";
/// Staging directory holding the packages to install
pub const PACKAGE_DIR: &str = "var/lib/system-upgrade";
/// Manifest file name inside the staging directory
pub const PACKAGE_LIST: &str = "package.list";
/// Persisted configuration file name inside the staging directory
pub const UPGRADE_CONF: &str = "upgrade.conf";
/// Well-known symlink pointing at the staging directory
pub const UPGRADE_LINK: &str = "system-upgrade";
/// Empty root used by the one-shot boot for its overlay
pub const UPGRADE_ROOT: &str = "system-upgrade-root";
/// Driver/installer update images appended to the initrd
pub const UPDATE_IMG_DIR: &str = "etc/system-upgrade/update.img.d";
/// Units pulled in by the one-shot upgrade target
pub const TARGET_REQUIRES: &str = "lib/systemd/system/system-upgrade.target.requires";
/// Systemd target the one-shot boot enters
pub const UPGRADE_TARGET: &str = "system-upgrade.target";
/// Fallback init used when the system does not boot with systemd
pub const UPGRADE_INIT: &str = "/usr/libexec/upgrade-init";

/// Resolved upgrade layout under a root prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePaths {
    root: PathBuf,
}

impl Default for UpgradePaths {
    fn default() -> Self {
        Self::with_root("/")
    }
}

impl UpgradePaths {
    /// Layout rooted at `root`
    pub fn with_root(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// The root prefix
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an absolute system path under the root prefix
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }

    /// The inverse of [`UpgradePaths::resolve`]
    ///
    /// Paths recorded for the next boot must not carry the root prefix.
    /// Paths outside the root are returned unchanged.
    pub fn unroot(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        match path.strip_prefix(&self.root) {
            Ok(rest) => Path::new("/").join(rest),
            Err(_) => path.to_path_buf(),
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    pub fn package_dir(&self) -> PathBuf {
        self.root.join(PACKAGE_DIR)
    }

    /// The manifest of staged package identities
    pub fn package_list(&self) -> PathBuf {
        self.package_dir().join(PACKAGE_LIST)
    }

    /// The persisted configuration (cleanup registry, boot entry record)
    pub fn upgrade_conf(&self) -> PathBuf {
        self.package_dir().join(UPGRADE_CONF)
    }

    pub fn upgrade_link(&self) -> PathBuf {
        self.root.join(UPGRADE_LINK)
    }

    /// Where the upgrade link points, as seen from "/"
    pub fn link_target(&self) -> PathBuf {
        Path::new("/").join(PACKAGE_DIR)
    }

    /// Mount point for removable media inside the staging directory
    pub fn media_dir(&self) -> PathBuf {
        self.package_dir().join("media")
    }

    /// Where the one-shot boot mounts removable media, as seen from "/"
    pub fn media_mount_point(&self) -> PathBuf {
        Path::new("/").join(UPGRADE_LINK).join("media")
    }

    pub fn upgrade_root(&self) -> PathBuf {
        self.root.join(UPGRADE_ROOT)
    }

    pub fn update_img_dir(&self) -> PathBuf {
        self.root.join(UPDATE_IMG_DIR)
    }

    pub fn target_requires(&self) -> PathBuf {
        self.root.join(TARGET_REQUIRES)
    }

    /// Module directory for a kernel version
    pub fn modules_dir(&self, kernel_version: &str) -> PathBuf {
        self.root.join("lib/modules").join(kernel_version)
    }
}
