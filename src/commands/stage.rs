// src/commands/stage.rs
//! Staging command

use super::boot_controller;
use anyhow::{Context, Result};
use std::path::PathBuf;
use system_upgrade::{MountEntry, ResolvedPackage, StagingManager, UpgradePaths, prepare_upgrade};
use tracing::{info, warn};

/// Stage packages and arm the upgrade boot
pub fn cmd_stage(
    paths: &UpgradePaths,
    packages: &[PathBuf],
    media_packages: &[String],
    media: Option<MountEntry>,
) -> Result<()> {
    if !media_packages.is_empty() && media.is_none() {
        warn!("Packages on upgrade media given without --media-device; they will not be mounted at boot");
    }

    let resolved: Vec<ResolvedPackage> = packages
        .iter()
        .map(|p| ResolvedPackage::local(p.clone()))
        .chain(media_packages.iter().map(|p| ResolvedPackage::media(p.clone())))
        .collect();
    info!("Staging {} package(s) under {}", resolved.len(), paths.root().display());

    let staging = StagingManager::new(paths.clone());
    let boot = boot_controller(paths);
    let manifest = prepare_upgrade(&staging, &boot, &resolved, media.as_ref())
        .context("Failed to stage upgrade packages")?;

    println!(
        "Staged {} package(s) in {}",
        manifest.len(),
        paths.package_dir().display()
    );
    Ok(())
}
