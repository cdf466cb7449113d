// src/filesystem/mod.rs

//! Filesystem side of the upgrade
//!
//! This module provides:
//! - Package staging into the well-known staging directory
//! - The manifest of staged package identities
//! - Idempotent removal, hardlink-or-copy and atomic write helpers

mod manifest;
pub mod ops;
mod staging;

pub use manifest::Manifest;
pub use ops::{LinkMethod, mkdir_p, rm_f, rm_rf, write_atomic};
pub use staging::{PackageOrigin, ResolvedPackage, StagingManager, is_package_name};
