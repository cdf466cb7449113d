// tests/common/mod.rs

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use system_upgrade::{BootLoader, Result, UpgradePaths};
use tempfile::TempDir;

/// A scratch system root with its upgrade layout.
///
/// Returns (TempDir, paths) - keep the TempDir alive to prevent cleanup.
pub fn sysroot() -> (TempDir, UpgradePaths) {
    let temp_dir = TempDir::new().unwrap();
    let paths = UpgradePaths::with_root(temp_dir.path());
    (temp_dir, paths)
}

/// Write a fake package into the download cache and return its path.
pub fn cached_package(paths: &UpgradePaths, name: &str) -> PathBuf {
    let dir = paths.cache_dir().join("packages");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, format!("payload of {}", name)).unwrap();
    path
}

/// Sorted names of the package files in the staging directory.
pub fn staged_files(paths: &UpgradePaths) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(paths.package_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".rpm"))
        .collect();
    names.sort();
    names
}

/// Boot loader that records what it was asked to do.
#[derive(Default)]
pub struct RecordingLoader {
    pub added: RefCell<Vec<(PathBuf, Vec<String>)>>,
    pub removed: RefCell<Vec<PathBuf>>,
}

impl BootLoader for RecordingLoader {
    fn add_entry(&self, kernel: &Path, _initrd: &Path, _banner: &str, kernel_args: &[String]) -> Result<String> {
        self.added
            .borrow_mut()
            .push((kernel.to_path_buf(), kernel_args.to_vec()));
        Ok(self.added.borrow().len().to_string())
    }

    fn remove_entry(&self, kernel: &Path) -> Result<()> {
        self.removed.borrow_mut().push(kernel.to_path_buf());
        Ok(())
    }
}
