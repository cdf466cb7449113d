// src/filesystem/manifest.rs

//! The staged package manifest
//!
//! A flat list of package identities, one per line, relative to the staging
//! directory. Entries are kept sorted so that staging the same package set
//! twice produces a byte-identical file.

use crate::Result;
use crate::filesystem::write_atomic;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Identities of the packages that were staged and must be installed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeSet<String>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity; duplicates collapse
    pub fn insert(&mut self, identity: impl Into<String>) -> bool {
        self.entries.insert(identity.into())
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identities in manifest order
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Full paths of the staged packages below `base`
    ///
    /// At install time `base` is the upgrade symlink, which also reaches the
    /// removable media mounted at `media/`.
    pub fn package_paths(&self, base: &Path) -> Vec<PathBuf> {
        self.entries.iter().map(|e| base.join(e)).collect()
    }

    /// Render as one identity per line
    pub fn to_list(&self) -> String {
        self.entries.iter().map(|e| format!("{}\n", e)).collect()
    }

    /// Parse a manifest, ignoring blank lines
    pub fn parse(content: &str) -> Self {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            crate::Error::IoError(format!(
                "Failed to read package list {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::parse(&content))
    }

    /// Replace the manifest file atomically
    pub fn write(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_list().as_bytes())?;
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for Manifest {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_is_sorted_and_deduplicated() {
        let manifest: Manifest = ["zsh-5.9-1.x86_64.rpm", "bash-5.2-2.x86_64.rpm", "zsh-5.9-1.x86_64.rpm"]
            .into_iter()
            .collect();

        assert_eq!(manifest.len(), 2);
        assert_eq!(
            manifest.to_list(),
            "bash-5.2-2.x86_64.rpm\nzsh-5.9-1.x86_64.rpm\n"
        );
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let manifest = Manifest::parse("a.rpm\n\n  media/Packages/b.rpm  \n");
        assert!(manifest.contains("a.rpm"));
        assert!(manifest.contains("media/Packages/b.rpm"));
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("package.list");
        let manifest: Manifest = ["a.rpm", "media/Packages/b.rpm"].into_iter().collect();

        manifest.write(&path).unwrap();

        assert_eq!(Manifest::read(&path).unwrap(), manifest);
        assert_eq!(
            manifest.package_paths(Path::new("/system-upgrade")),
            vec![
                PathBuf::from("/system-upgrade/a.rpm"),
                PathBuf::from("/system-upgrade/media/Packages/b.rpm"),
            ]
        );
    }

    #[test]
    fn test_read_missing_is_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Manifest::read(&temp_dir.path().join("nope")).is_err());
    }
}
