// src/boot/probe.rs

//! Inspection of the running system for boot setup decisions

use crate::paths::UpgradePaths;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Offset of the "HdrS" magic in an x86 boot sector
const SETUP_HEADER_MAGIC_OFFSET: usize = 0x202;
/// Offset of the kernel_version pointer in the setup header
const KERNEL_VERSION_PTR_OFFSET: usize = 0x20E;
/// The version pointer is relative to this base
const KERNEL_VERSION_BASE: usize = 0x200;
/// How much of the image to scan for the version string
const KERNEL_SCAN_LIMIT: u64 = 0x10200;

/// True when the system's init is systemd
pub fn init_is_systemd(paths: &UpgradePaths) -> bool {
    match fs::read_link(paths.resolve("/sbin/init")) {
        Ok(target) => target.to_string_lossy().contains("systemd"),
        Err(_) => false,
    }
}

/// True when SELinux is enabled on the running system
pub fn selinux_enabled(paths: &UpgradePaths) -> bool {
    paths.resolve("/sys/fs/selinux/enforce").exists() || paths.resolve("/selinux/enforce").exists()
}

/// True when the initrd needs /etc/mdadm.conf to assemble software RAID
pub fn need_mdadmconf(paths: &UpgradePaths) -> bool {
    if !paths.resolve("/etc/mdadm.conf").exists() {
        return false;
    }
    match fs::read_to_string(paths.resolve("/proc/mdstat")) {
        Ok(mdstat) => mdstat.lines().any(|line| line.starts_with("md")),
        Err(e) => {
            debug!("Can't read mdstat: {}", e);
            false
        }
    }
}

/// Read the release string embedded in a kernel image
///
/// Returns `Ok(None)` when the image has no recognizable x86 setup header.
pub fn kernel_version(kernel: &Path) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    File::open(kernel)?
        .take(KERNEL_SCAN_LIMIT)
        .read_to_end(&mut buf)?;
    Ok(parse_kernel_version(&buf))
}

fn parse_kernel_version(image: &[u8]) -> Option<String> {
    if image.len() < KERNEL_VERSION_PTR_OFFSET + 2 {
        return None;
    }
    if &image[SETUP_HEADER_MAGIC_OFFSET..SETUP_HEADER_MAGIC_OFFSET + 4] != b"HdrS" {
        return None;
    }

    let ptr = u16::from_le_bytes([
        image[KERNEL_VERSION_PTR_OFFSET],
        image[KERNEL_VERSION_PTR_OFFSET + 1],
    ]) as usize;
    if ptr == 0 {
        return None;
    }

    let start = ptr + KERNEL_VERSION_BASE;
    let tail = image.get(start..)?;
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    let version = String::from_utf8_lossy(&tail[..end]);
    version
        .split_whitespace()
        .next()
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) fn fake_kernel_image(version: &str) -> Vec<u8> {
    let mut image = vec![0u8; 0x1000];
    image[SETUP_HEADER_MAGIC_OFFSET..SETUP_HEADER_MAGIC_OFFSET + 4].copy_from_slice(b"HdrS");
    let ptr: u16 = 0x300;
    image[KERNEL_VERSION_PTR_OFFSET..KERNEL_VERSION_PTR_OFFSET + 2].copy_from_slice(&ptr.to_le_bytes());
    let banner = format!("{} (mockbuild@builder) #1 SMP", version);
    let start = ptr as usize + KERNEL_VERSION_BASE;
    image[start..start + banner.len()].copy_from_slice(banner.as_bytes());
    image
}
