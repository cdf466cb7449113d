// src/boot/mod.rs

//! Boot environment controller
//!
//! Arms the next boot to enter the one-shot upgrade and tears everything
//! down afterwards. The sequence across the reboot is:
//!
//! ```text
//! stage packages -> arm() -> prep_boot() -> reboot -> install -> cleanup_all()
//!                                                        \-> (failure) reset_boot()
//! ```
//!
//! The boot entry record lives in the persisted upgrade config, so every
//! teardown step works from a fresh process and is a no-op when there is
//! nothing to undo.

mod cpio;
pub mod initramfs;
mod loader;
mod mount;
pub mod probe;

pub use initramfs::InitrdFile;
pub use loader::{BootLoader, Grubby};
pub use mount::{MountEntry, escape_path};

use crate::Result;
use crate::config::{BootEntryRecord, UpgradeConfig};
use crate::filesystem::{Manifest, ResolvedPackage, StagingManager, mkdir_p, rm_f, rm_rf};
use crate::paths::{UPGRADE_INIT, UPGRADE_TARGET, UpgradePaths};
use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Title of the one-shot boot entry
pub const BOOT_BANNER: &str = "System Upgrade";

/// Prepares, arms and disarms the one-shot upgrade boot
pub struct BootController<L: BootLoader> {
    paths: UpgradePaths,
    loader: L,
}

impl<L: BootLoader> BootController<L> {
    pub fn new(paths: UpgradePaths, loader: L) -> Self {
        Self { paths, loader }
    }

    pub fn paths(&self) -> &UpgradePaths {
        &self.paths
    }

    pub fn loader(&self) -> &L {
        &self.loader
    }

    /// Point the upgrade link at the staging dir and lay out the boot scaffolding
    ///
    /// With `mount`, a mount unit is written so the one-shot boot mounts the
    /// media under the upgrade link before the upgrade target starts.
    pub fn arm(&self, mount: Option<&MountEntry>) -> Result<()> {
        self.setup_upgrade_link()?;

        let media_dir = self.paths.media_dir();
        info!("Creating media mount dir {}", media_dir.display());
        mkdir_p(&media_dir)?;
        mkdir_p(&self.paths.target_requires())?;

        if let Some(mount) = mount {
            let mountpath = self.paths.media_mount_point();
            info!("Setting up mount for {} at {}", mount.device, mountpath.display());
            let media_mount = mount.with_mount_path(mountpath);
            let unit = media_mount.write_systemd_unit(&self.paths.target_requires(), UPGRADE_TARGET)?;
            info!("Wrote {}", unit.display());
        }

        self.setup_upgrade_root()
    }

    fn setup_upgrade_link(&self) -> Result<()> {
        let link = self.paths.upgrade_link();
        let target = self.paths.link_target();
        info!("Setting up upgrade symlink: {} -> {}", link.display(), target.display());

        // The link is followed after the reboot, when the root prefix is gone
        mkdir_p(&self.paths.package_dir())?;
        rm_f(&link)?;
        std::os::unix::fs::symlink(&target, &link)?;
        Ok(())
    }

    /// Create the empty upgrade root, keeping an existing one
    fn setup_upgrade_root(&self) -> Result<()> {
        let upgrade_root = self.paths.upgrade_root();
        if upgrade_root.is_dir() {
            info!("Upgrade root dir {} already exists", upgrade_root.display());
            return Ok(());
        }

        info!("Creating upgrade root dir: {}", upgrade_root.display());
        match DirBuilder::new().recursive(true).mode(0o755).create(&upgrade_root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Kernel arguments selecting the one-shot upgrade
    pub fn kernel_args(&self) -> Vec<String> {
        let mut args = vec!["upgrade".to_string()];
        if probe::init_is_systemd(&self.paths) {
            args.push(format!("systemd.unit={}", UPGRADE_TARGET));
        } else {
            args.push(format!("init={}", UPGRADE_INIT));
        }

        // Policy from the new release may deny what the upgrade itself needs,
        // so never boot the one-shot environment enforcing.
        if probe::selinux_enabled(&self.paths) {
            args.push("enforcing=0".to_string());
        } else {
            args.push("selinux=0".to_string());
        }
        args
    }

    /// Add the one-shot boot entry and record it
    pub fn add_boot_entry(&self, kernel: &Path, initrd: &Path) -> Result<String> {
        info!("Adding new boot entry");
        let args = self.kernel_args();
        let entry = self.loader.add_entry(kernel, initrd, BOOT_BANNER, &args)?;

        UpgradeConfig::edit(&self.paths.upgrade_conf(), |conf| {
            conf.boot = BootEntryRecord {
                kernel: Some(self.paths.unroot(kernel)),
                initrd: Some(self.paths.unroot(initrd)),
            };
            Ok(())
        })?;
        Ok(entry)
    }

    /// Finish the upgrade initrd and add the boot entry
    pub fn prep_boot(&self, kernel: &Path, initrd: &Path) -> Result<()> {
        if probe::need_mdadmconf(&self.paths) {
            info!("Appending /etc/mdadm.conf to initrd");
            let conf = InitrdFile::new(self.paths.resolve("/etc/mdadm.conf"), "etc/mdadm.conf");
            initramfs::append_files(initrd, &[conf])?;
        }

        let update_dir = self.paths.update_img_dir();
        let updates = match list_dir(&update_dir) {
            Ok(updates) => updates,
            Err(e) => {
                info!("Can't list update img dir {}: {}", update_dir.display(), e);
                Vec::new()
            }
        };
        if !updates.is_empty() {
            info!("Found updates in {}, appending to initrd", update_dir.display());
            initramfs::append_images(initrd, &updates)?;
        }

        // The initramfs copies the new kernel's modules here on boot
        match probe::kernel_version(kernel) {
            Ok(Some(version)) => {
                let moddir = self.paths.modules_dir(&version);
                info!("Creating module dir {}", moddir.display());
                mkdir_p(&moddir)?;
            }
            Ok(None) => warn!("Can't determine version of kernel image '{}'", kernel.display()),
            Err(e) => warn!("Can't read kernel image '{}': {}", kernel.display(), e),
        }

        self.add_boot_entry(kernel, initrd)?;
        Ok(())
    }

    /// The recorded boot entry, resolved under the root prefix
    fn boot_record(&self) -> Result<BootEntryRecord> {
        let record = UpgradeConfig::load(&self.paths.upgrade_conf())?.boot;
        Ok(BootEntryRecord {
            kernel: record.kernel.map(|k| self.paths.resolve(k)),
            initrd: record.initrd.map(|i| self.paths.resolve(i)),
        })
    }

    fn clear_boot_record(&self) -> Result<()> {
        UpgradeConfig::edit(&self.paths.upgrade_conf(), |conf| {
            conf.boot = BootEntryRecord::default();
            Ok(())
        })
    }

    /// Remove the boot entry, restoring the previous default
    pub fn reset_boot(&self) -> Result<()> {
        let record = self.boot_record()?;
        if record.is_empty() {
            return Ok(());
        }
        if let Some(kernel) = &record.kernel {
            self.loader.remove_entry(kernel)?;
        }
        self.clear_boot_record()
    }

    /// Remove the boot entry and delete its kernel and initrd images
    pub fn remove_boot(&self) -> Result<()> {
        let record = self.boot_record()?;
        if record.is_empty() {
            return Ok(());
        }
        if let Some(kernel) = &record.kernel {
            self.loader.remove_entry(kernel)?;
            info!("Removing {}", kernel.display());
            rm_f(kernel)?;
        }
        if let Some(initrd) = &record.initrd {
            info!("Removing {}", initrd.display());
            rm_f(initrd)?;
        }
        self.clear_boot_record()
    }

    /// Remove every registered cleanup directory
    pub fn remove_cache(&self) -> Result<()> {
        let mut cleanup = UpgradeConfig::load(&self.paths.upgrade_conf())?.cleanup;
        cleanup.ensure_required(
            &self.paths.unroot(self.paths.cache_dir()),
            &self.paths.unroot(self.paths.package_dir()),
        );
        for dir in cleanup.dirs() {
            let dir = self.paths.resolve(dir);
            info!("Removing {}", dir.display());
            rm_rf(&dir)?;
        }
        Ok(())
    }

    /// Remove the upgrade link and the one-shot scaffolding
    pub fn misc_cleanup(&self) -> Result<()> {
        let link = self.paths.upgrade_link();
        info!("Removing symlink {}", link.display());
        rm_f(&link)?;
        for dir in [self.paths.upgrade_root(), self.paths.target_requires()] {
            info!("Removing {}", dir.display());
            rm_rf(&dir)?;
        }
        Ok(())
    }

    /// Undo everything the upgrade left behind
    ///
    /// The boot record lives in the staging directory, so the boot entry is
    /// removed before the directories are. Every step runs even when an
    /// earlier one fails; the first error is returned.
    pub fn cleanup_all(&self) -> Result<()> {
        let mut first_err = None;
        let steps: [(&str, fn(&Self) -> Result<()>); 3] = [
            ("remove boot entry", Self::remove_boot),
            ("remove upgrade scaffolding", Self::misc_cleanup),
            ("remove cache", Self::remove_cache),
        ];
        for (step, run) in steps {
            if let Err(e) = run(self) {
                warn!("Failed to {}: {}", step, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Stage packages and arm the boot environment in one step
pub fn prepare_upgrade<L: BootLoader>(
    staging: &StagingManager,
    boot: &BootController<L>,
    packages: &[ResolvedPackage],
    mount: Option<&MountEntry>,
) -> Result<Manifest> {
    let manifest = staging.stage(packages)?;
    boot.arm(mount)?;
    Ok(manifest)
}

/// Sorted regular entries of a directory
fn list_dir(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            entries.push(entry.path());
        }
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingLoader {
        added: RefCell<Vec<(PathBuf, PathBuf, String, Vec<String>)>>,
        removed: RefCell<Vec<PathBuf>>,
    }

    impl BootLoader for RecordingLoader {
        fn add_entry(&self, kernel: &Path, initrd: &Path, banner: &str, kernel_args: &[String]) -> Result<String> {
            self.added.borrow_mut().push((
                kernel.to_path_buf(),
                initrd.to_path_buf(),
                banner.to_string(),
                kernel_args.to_vec(),
            ));
            Ok("0".to_string())
        }

        fn remove_entry(&self, kernel: &Path) -> Result<()> {
            self.removed.borrow_mut().push(kernel.to_path_buf());
            Ok(())
        }
    }

    fn controller(temp_dir: &TempDir) -> BootController<RecordingLoader> {
        BootController::new(UpgradePaths::with_root(temp_dir.path()), RecordingLoader::default())
    }

    #[test]
    fn test_kernel_args_sysvinit_without_selinux() {
        let temp_dir = TempDir::new().unwrap();
        let boot = controller(&temp_dir);
        assert_eq!(
            boot.kernel_args(),
            vec!["upgrade", "init=/usr/libexec/upgrade-init", "selinux=0"]
        );
    }

    #[test]
    fn test_kernel_args_systemd_with_selinux() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("sbin")).unwrap();
        std::os::unix::fs::symlink("../usr/lib/systemd/systemd", root.join("sbin/init")).unwrap();
        fs::create_dir_all(root.join("sys/fs/selinux")).unwrap();
        fs::write(root.join("sys/fs/selinux/enforce"), "1").unwrap();

        let boot = controller(&temp_dir);
        assert_eq!(
            boot.kernel_args(),
            vec!["upgrade", "systemd.unit=system-upgrade.target", "enforcing=0"]
        );
    }

    #[test]
    fn test_arm_keeps_existing_upgrade_root() {
        let temp_dir = TempDir::new().unwrap();
        let boot = controller(&temp_dir);
        let upgrade_root = boot.paths().upgrade_root();
        fs::create_dir_all(upgrade_root.join("usr")).unwrap();
        fs::write(upgrade_root.join("usr/partial"), b"work").unwrap();

        boot.arm(None).unwrap();
        boot.arm(None).unwrap();

        assert!(upgrade_root.join("usr/partial").exists());
        assert_eq!(
            fs::read_link(boot.paths().upgrade_link()).unwrap(),
            PathBuf::from("/var/lib/system-upgrade")
        );
        assert!(boot.paths().package_dir().join("media").is_dir());
        assert!(boot.paths().target_requires().is_dir());
    }

    #[test]
    fn test_arm_with_media_writes_mount_unit() {
        let temp_dir = TempDir::new().unwrap();
        let boot = controller(&temp_dir);
        let dvd = MountEntry::new("/dev/sr0", "/run/media/dvd").with_fstype("iso9660");

        boot.arm(Some(&dvd)).unwrap();

        let unit = boot.paths().target_requires().join("system\\x2dupgrade-media.mount");
        let content = fs::read_to_string(unit).unwrap();
        assert!(content.contains("What=/dev/sr0\n"));
        assert!(content.contains("Where=/system-upgrade/media\n"));
    }

    #[test]
    fn test_prep_boot_creates_module_dir_and_entry() {
        let temp_dir = TempDir::new().unwrap();
        let boot = controller(&temp_dir);
        let kernel = temp_dir.path().join("vmlinuz-system-upgrade");
        let initrd = temp_dir.path().join("initramfs-system-upgrade.img");
        fs::write(&kernel, probe::fake_kernel_image("6.8.5-301.fc40.x86_64")).unwrap();
        fs::write(&initrd, b"initrd").unwrap();

        let update_dir = boot.paths().update_img_dir();
        fs::create_dir_all(&update_dir).unwrap();
        fs::write(update_dir.join("driver.img"), b"+driver").unwrap();

        boot.prep_boot(&kernel, &initrd).unwrap();

        assert!(boot.paths().modules_dir("6.8.5-301.fc40.x86_64").is_dir());
        assert_eq!(fs::read(&initrd).unwrap(), b"initrd+driver");
        let added = boot.loader().added.borrow();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].2, BOOT_BANNER);

        // Recorded as seen from the upgraded system, without the root prefix
        let record = UpgradeConfig::load(&boot.paths().upgrade_conf()).unwrap().boot;
        assert_eq!(record.kernel, Some(PathBuf::from("/vmlinuz-system-upgrade")));
        assert_eq!(record.initrd, Some(PathBuf::from("/initramfs-system-upgrade.img")));
    }

    #[test]
    fn test_prep_boot_tolerates_unknown_kernel_and_missing_updates() {
        let temp_dir = TempDir::new().unwrap();
        let boot = controller(&temp_dir);
        let kernel = temp_dir.path().join("vmlinuz");
        let initrd = temp_dir.path().join("initrd.img");
        fs::write(&kernel, b"garbage").unwrap();
        fs::write(&initrd, b"initrd").unwrap();

        boot.prep_boot(&kernel, &initrd).unwrap();

        assert!(!temp_dir.path().join("lib/modules").exists());
        assert_eq!(fs::read(&initrd).unwrap(), b"initrd");
        assert_eq!(boot.loader().added.borrow().len(), 1);
    }

    #[test]
    fn test_add_then_reset_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let boot = controller(&temp_dir);
        let kernel = temp_dir.path().join("boot/vmlinuz-system-upgrade");
        let initrd = temp_dir.path().join("boot/initramfs-system-upgrade.img");

        boot.add_boot_entry(&kernel, &initrd).unwrap();
        boot.reset_boot().unwrap();
        boot.reset_boot().unwrap();

        assert_eq!(*boot.loader().removed.borrow(), vec![kernel]);
        let conf = UpgradeConfig::load(&boot.paths().upgrade_conf()).unwrap();
        assert!(conf.boot.is_empty());
    }

    #[test]
    fn test_reset_and_remove_without_record_are_noops() {
        let temp_dir = TempDir::new().unwrap();
        let boot = controller(&temp_dir);

        boot.reset_boot().unwrap();
        boot.remove_boot().unwrap();

        assert!(boot.loader().removed.borrow().is_empty());
        assert!(!boot.paths().upgrade_conf().exists());
    }

    #[test]
    fn test_remove_boot_deletes_images() {
        let temp_dir = TempDir::new().unwrap();
        let boot = controller(&temp_dir);
        let kernel = temp_dir.path().join("vmlinuz-system-upgrade");
        let initrd = temp_dir.path().join("initramfs-system-upgrade.img");
        fs::write(&kernel, b"k").unwrap();
        fs::write(&initrd, b"i").unwrap();

        boot.add_boot_entry(&kernel, &initrd).unwrap();
        boot.remove_boot().unwrap();

        assert!(!kernel.exists());
        assert!(!initrd.exists());
        assert_eq!(boot.loader().removed.borrow().len(), 1);
    }

    struct FailingLoader;

    impl BootLoader for FailingLoader {
        fn add_entry(&self, _kernel: &Path, _initrd: &Path, _banner: &str, _kernel_args: &[String]) -> Result<String> {
            Ok("0".to_string())
        }

        fn remove_entry(&self, _kernel: &Path) -> Result<()> {
            Err(crate::Error::CommandError("Failed to run grubby: not found".to_string()))
        }
    }

    #[test]
    fn test_cleanup_all_continues_past_loader_failure() {
        let temp_dir = TempDir::new().unwrap();
        let paths = UpgradePaths::with_root(temp_dir.path());
        let boot = BootController::new(paths.clone(), FailingLoader);
        let kernel = temp_dir.path().join("vmlinuz-system-upgrade");
        let initrd = temp_dir.path().join("initramfs-system-upgrade.img");
        fs::write(&kernel, b"k").unwrap();
        fs::write(&initrd, b"i").unwrap();
        boot.arm(None).unwrap();
        boot.add_boot_entry(&kernel, &initrd).unwrap();

        let err = boot.cleanup_all().unwrap_err();

        assert!(matches!(err, crate::Error::CommandError(_)));
        assert!(fs::symlink_metadata(paths.upgrade_link()).is_err());
        assert!(!paths.upgrade_root().exists());
        assert!(!paths.target_requires().exists());
        assert!(!paths.package_dir().exists());
    }

    #[test]
    fn test_misc_cleanup_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let boot = controller(&temp_dir);
        boot.arm(None).unwrap();

        boot.misc_cleanup().unwrap();
        boot.misc_cleanup().unwrap();

        assert!(fs::symlink_metadata(boot.paths().upgrade_link()).is_err());
        assert!(!boot.paths().upgrade_root().exists());
        assert!(!boot.paths().target_requires().exists());
        assert!(boot.paths().package_dir().exists());
    }
}
