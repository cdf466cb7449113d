// src/commands/cleanup.rs
//! Post-upgrade cleanup

use super::boot_controller;
use anyhow::{Context, Result};
use system_upgrade::UpgradePaths;
use tracing::info;

/// Remove the boot entry, the boot scaffolding and every cached directory
pub fn cmd_cleanup(paths: &UpgradePaths) -> Result<()> {
    info!("Cleaning up upgrade files under {}", paths.root().display());
    boot_controller(paths)
        .cleanup_all()
        .context("Failed to clean up upgrade files")?;
    println!("Upgrade files removed");
    Ok(())
}
