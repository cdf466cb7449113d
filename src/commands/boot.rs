// src/commands/boot.rs
//! Boot entry commands

use super::boot_controller;
use anyhow::{Context, Result};
use std::path::Path;
use system_upgrade::{BOOT_BANNER, UpgradePaths};

pub fn cmd_prep_boot(paths: &UpgradePaths, kernel: &Path, initrd: &Path) -> Result<()> {
    let boot = boot_controller(paths);
    boot.prep_boot(kernel, initrd)
        .with_context(|| format!("Failed to prepare boot for {}", kernel.display()))?;
    println!("Added \"{}\" boot entry for {}", BOOT_BANNER, kernel.display());
    Ok(())
}

pub fn cmd_reset_boot(paths: &UpgradePaths) -> Result<()> {
    boot_controller(paths)
        .reset_boot()
        .context("Failed to remove upgrade boot entry")?;
    println!("Upgrade boot entry removed");
    Ok(())
}

pub fn cmd_remove_boot(paths: &UpgradePaths) -> Result<()> {
    boot_controller(paths)
        .remove_boot()
        .context("Failed to remove upgrade boot entry")?;
    println!("Upgrade boot entry and images removed");
    Ok(())
}
