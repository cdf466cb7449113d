// src/boot/mount.rs

//! Removable-media mount descriptors and their systemd mount units

use crate::Result;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// A mount table entry for the upgrade media
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_path: PathBuf,
    pub fstype: Option<String>,
    pub options: Option<String>,
}

impl MountEntry {
    pub fn new(device: impl Into<String>, mount_path: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            mount_path: mount_path.into(),
            fstype: None,
            options: None,
        }
    }

    pub fn with_fstype(mut self, fstype: impl Into<String>) -> Self {
        self.fstype = Some(fstype.into());
        self
    }

    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Copy of this entry mounted somewhere else
    pub fn with_mount_path(&self, mount_path: impl Into<PathBuf>) -> Self {
        Self {
            mount_path: mount_path.into(),
            ..self.clone()
        }
    }

    /// Name of the systemd mount unit for this entry
    pub fn unit_name(&self) -> String {
        format!("{}.mount", escape_path(&self.mount_path))
    }

    /// Render the mount unit, ordered before `target`
    pub fn to_unit(&self, target: &str) -> String {
        let mut unit = String::new();
        let _ = writeln!(unit, "[Unit]");
        let _ = writeln!(unit, "Description=Upgrade media ({})", self.device);
        let _ = writeln!(unit, "DefaultDependencies=no");
        let _ = writeln!(unit, "Before={}", target);
        let _ = writeln!(unit);
        let _ = writeln!(unit, "[Mount]");
        let _ = writeln!(unit, "What={}", self.device);
        let _ = writeln!(unit, "Where={}", self.mount_path.display());
        if let Some(fstype) = &self.fstype {
            let _ = writeln!(unit, "Type={}", fstype);
        }
        if let Some(options) = &self.options {
            let _ = writeln!(unit, "Options={}", options);
        }
        unit
    }

    /// Write the mount unit into `dir`, returning its path
    pub fn write_systemd_unit(&self, dir: &Path, target: &str) -> Result<PathBuf> {
        let path = dir.join(self.unit_name());
        fs::write(&path, self.to_unit(target))?;
        Ok(path)
    }
}

/// Escape a path the way `systemd-escape --path` does
pub fn escape_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        return "-".to_string();
    }

    let mut out = String::with_capacity(trimmed.len());
    for (i, b) in trimmed.bytes().enumerate() {
        match b {
            b'/' => out.push('-'),
            b'.' if i == 0 => {
                let _ = write!(out, "\\x{:02x}", b);
            }
            b if b.is_ascii_alphanumeric() || b == b':' || b == b'_' || b == b'.' => out.push(b as char),
            _ => {
                let _ = write!(out, "\\x{:02x}", b);
            }
        }
    }
    out
}
