// src/boot/cpio.rs

//! Minimal CPIO (New ASCII) archive writer
//!
//! The kernel unpacks every concatenated cpio segment of an initramfs, so
//! extra files are added to an initrd by appending a new archive to it.

use std::io::{self, Write};

/// CPIO New ASCII Format (newc) header size
const HEADER_SIZE: usize = 110;
/// Magic string for newc format
const MAGIC_NEWC: &[u8] = b"070701";
/// Name of the end-of-archive marker entry
const TRAILER: &str = "TRAILER!!!";

const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;

/// A writer for CPIO (New ASCII) archives
pub struct CpioWriter<W: Write> {
    writer: W,
    next_ino: u32,
    dirs: Vec<String>,
}

impl<W: Write> CpioWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            next_ino: 1,
            dirs: Vec::new(),
        }
    }

    /// Add a regular file, creating entries for its parent directories
    pub fn add_file(&mut self, name: &str, mode: u32, mtime: u32, data: &[u8]) -> io::Result<()> {
        let name = name.trim_start_matches('/');
        let mut parent = String::new();
        let components: Vec<&str> = name.split('/').collect();
        for dir in &components[..components.len().saturating_sub(1)] {
            if !parent.is_empty() {
                parent.push('/');
            }
            parent.push_str(dir);
            if !self.dirs.contains(&parent) {
                self.write_entry(&parent, S_IFDIR | 0o755, 2, mtime, &[])?;
                self.dirs.push(parent.clone());
            }
        }
        self.write_entry(name, S_IFREG | (mode & 0o7777), 1, mtime, data)
    }

    /// Write the trailer and return the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        self.write_entry(TRAILER, 0, 1, 0, &[])?;
        Ok(self.writer)
    }

    fn write_entry(&mut self, name: &str, mode: u32, nlink: u32, mtime: u32, data: &[u8]) -> io::Result<()> {
        let ino = if name == TRAILER { 0 } else { self.next_ino };
        self.next_ino += 1;

        let namesize = name.len() + 1;
        let filesize = u32::try_from(data.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file too large for cpio"))?;

        self.writer.write_all(MAGIC_NEWC)?;
        // ino, mode, uid, gid, nlink, mtime, filesize,
        // devmajor, devminor, rdevmajor, rdevminor, namesize, check
        let fields = [
            ino,
            mode,
            0,
            0,
            nlink,
            mtime,
            filesize,
            0,
            0,
            0,
            0,
            namesize as u32,
            0,
        ];
        for field in fields {
            write!(self.writer, "{:08X}", field)?;
        }

        self.writer.write_all(name.as_bytes())?;
        self.writer.write_all(&[0])?;
        self.pad(HEADER_SIZE + namesize)?;

        self.writer.write_all(data)?;
        self.pad(data.len())
    }

    /// Pad to the next 4-byte boundary
    fn pad(&mut self, written: usize) -> io::Result<()> {
        let padding = (4 - written % 4) % 4;
        self.writer.write_all(&[0u8; 3][..padding])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(archive: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        let mut pos = 0;
        while pos + HEADER_SIZE <= archive.len() {
            assert_eq!(&archive[pos..pos + 6], MAGIC_NEWC);
            let field = |i: usize| {
                let start = pos + 6 + i * 8;
                let s = std::str::from_utf8(&archive[start..start + 8]).unwrap();
                usize::from_str_radix(s, 16).unwrap()
            };
            let filesize = field(6);
            let namesize = field(11);
            let name_start = pos + HEADER_SIZE;
            let name = String::from_utf8_lossy(&archive[name_start..name_start + namesize - 1]).to_string();
            let data_start = (name_start + namesize).div_ceil(4) * 4;
            pos = (data_start + filesize).div_ceil(4) * 4;
            let done = name == TRAILER;
            names.push(name);
            if done {
                break;
            }
        }
        names
    }

    #[test]
    fn test_archive_layout() {
        let mut writer = CpioWriter::new(Vec::new());
        writer.add_file("/etc/mdadm.conf", 0o644, 0, b"ARRAY /dev/md0\n").unwrap();
        let archive = writer.finish().unwrap();

        assert_eq!(archive.len() % 4, 0);
        assert_eq!(names(&archive), vec!["etc", "etc/mdadm.conf", TRAILER]);
    }

    #[test]
    fn test_parent_dirs_written_once() {
        let mut writer = CpioWriter::new(Vec::new());
        writer.add_file("etc/a.conf", 0o644, 0, b"a").unwrap();
        writer.add_file("etc/b.conf", 0o644, 0, b"bb").unwrap();
        let archive = writer.finish().unwrap();

        assert_eq!(
            names(&archive),
            vec!["etc", "etc/a.conf", "etc/b.conf", TRAILER]
        );
    }
}
