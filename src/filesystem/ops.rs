// src/filesystem/ops.rs

//! Small filesystem helpers shared by staging and boot setup
//!
//! Removal helpers treat a missing target as success so every cleanup path
//! can be re-run after an interrupted upgrade.

use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tracing::debug;

/// Signature of the hard-link primitive used when staging packages
pub type LinkFn = fn(&Path, &Path) -> io::Result<()>;

/// Default linker: a plain hard link
pub fn hard_link(source: &Path, target: &Path) -> io::Result<()> {
    fs::hard_link(source, target)
}

/// How a file ended up at its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMethod {
    Hardlink,
    Copy,
}

impl std::fmt::Display for LinkMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hardlink => write!(f, "hardlink"),
            Self::Copy => write!(f, "copy"),
        }
    }
}

/// Create a directory and all of its parents
pub fn mkdir_p(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// Remove a file or symlink, ignoring a missing target
pub fn rm_f(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Remove a path recursively, ignoring a missing target
///
/// Symlinks are removed, never followed.
pub fn rm_rf(path: &Path) -> io::Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        rm_f(path)
    }
}

/// True if both paths exist and share device and inode (lstat semantics)
pub fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    let meta_a = fs::symlink_metadata(a)?;
    let meta_b = match fs::symlink_metadata(b) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    Ok(meta_a.dev() == meta_b.dev() && meta_a.ino() == meta_b.ino())
}

/// Link `source` to `target`, copying only when the link crosses devices
///
/// The target must not exist. Any link failure other than EXDEV is returned.
pub fn link_or_copy(source: &Path, target: &Path, link: LinkFn) -> io::Result<LinkMethod> {
    match link(source, target) {
        Ok(()) => Ok(LinkMethod::Hardlink),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            debug!(
                "Cross-filesystem link detected ({} -> {}), using copy fallback",
                source.display(),
                target.display()
            );
            copy_preserving(source, target)?;
            Ok(LinkMethod::Copy)
        }
        Err(e) => Err(e),
    }
}

/// Copy a file keeping its permissions and timestamps
pub fn copy_preserving(source: &Path, target: &Path) -> io::Result<()> {
    fs::copy(source, target)?;

    let meta = fs::metadata(source)?;
    let atime = filetime::FileTime::from_last_access_time(&meta);
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(target, atime, mtime)?;

    File::open(target)?.sync_all()
}

/// Replace `path` with `contents` atomically
///
/// Writes a temporary file in the same directory, fsyncs it and renames it
/// over the destination, so readers see either the old or the new content.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    // Not every filesystem supports fsync on a directory
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}
