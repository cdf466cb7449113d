// src/boot/initramfs.rs

//! Appending content to the upgrade initrd

use super::cpio::CpioWriter;
use crate::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};

/// A file to place in the initrd
#[derive(Debug, Clone)]
pub struct InitrdFile {
    /// Where to read the content from
    pub source: PathBuf,
    /// Path inside the initramfs
    pub archive_path: String,
}

impl InitrdFile {
    pub fn new(source: impl Into<PathBuf>, archive_path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            archive_path: archive_path.into(),
        }
    }
}

/// Pack `files` into a gzip-compressed cpio segment and append it to `initrd`
pub fn append_files(initrd: &Path, files: &[InitrdFile]) -> Result<()> {
    let mut archive = CpioWriter::new(GzEncoder::new(Vec::new(), Compression::default()));
    for file in files {
        let data = fs::read(&file.source)?;
        let meta = fs::metadata(&file.source)?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        debug!("Adding {} to initrd as {}", file.source.display(), file.archive_path);
        archive.add_file(&file.archive_path, meta.permissions().mode(), mtime, &data)?;
    }
    let segment = archive.finish()?.finish()?;

    let mut out = open_for_append(initrd)?;
    out.write_all(&segment)?;
    out.sync_all()?;
    info!("Appended {} file(s) to {}", files.len(), initrd.display());
    Ok(())
}

/// Concatenate prebuilt initramfs images onto `initrd`
pub fn append_images(initrd: &Path, images: &[PathBuf]) -> Result<()> {
    let mut out = open_for_append(initrd)?;
    for image in images {
        debug!("Appending image {} to {}", image.display(), initrd.display());
        let mut input = File::open(image)?;
        io::copy(&mut input, &mut out)?;
    }
    out.sync_all()?;
    Ok(())
}

fn open_for_append(initrd: &Path) -> Result<File> {
    OpenOptions::new().append(true).open(initrd).map_err(|e| {
        crate::Error::BootError(format!("Cannot open initrd {}: {}", initrd.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_append_files_adds_gzip_segment() {
        let temp_dir = TempDir::new().unwrap();
        let initrd = temp_dir.path().join("initramfs.img");
        let conf = temp_dir.path().join("mdadm.conf");
        fs::write(&initrd, b"ORIGINAL").unwrap();
        fs::write(&conf, b"ARRAY /dev/md0 UUID=1234\n").unwrap();

        append_files(&initrd, &[InitrdFile::new(&conf, "etc/mdadm.conf")]).unwrap();

        let content = fs::read(&initrd).unwrap();
        assert!(content.starts_with(b"ORIGINAL"));

        let mut unpacked = Vec::new();
        GzDecoder::new(&content[8..]).read_to_end(&mut unpacked).unwrap();
        let text = String::from_utf8_lossy(&unpacked);
        assert!(text.starts_with("070701"));
        assert!(text.contains("etc/mdadm.conf"));
        assert!(text.contains("ARRAY /dev/md0 UUID=1234"));
        assert!(text.contains("TRAILER!!!"));
    }

    #[test]
    fn test_append_images_concatenates() {
        let temp_dir = TempDir::new().unwrap();
        let initrd = temp_dir.path().join("initramfs.img");
        let a = temp_dir.path().join("a.img");
        let b = temp_dir.path().join("b.img");
        fs::write(&initrd, b"base|").unwrap();
        fs::write(&a, b"a|").unwrap();
        fs::write(&b, b"b").unwrap();

        append_images(&initrd, &[a, b]).unwrap();

        assert_eq!(fs::read(&initrd).unwrap(), b"base|a|b");
    }

    #[test]
    fn test_missing_initrd_is_boot_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = append_images(&temp_dir.path().join("nope.img"), &[]).unwrap_err();
        assert!(matches!(err, crate::Error::BootError(_)));
    }
}
