// src/lib.rs

//! Offline major-version system upgrade
//!
//! Stages a full set of replacement packages, arms a one-shot boot that
//! installs them, and drives the package transaction from inside that boot.
//!
//! # Architecture
//!
//! - Staging: packages are hard-linked into one directory and listed in a manifest
//! - Boot: a dedicated boot entry enters the upgrade target exactly once
//! - Transaction: the native package engine runs behind a narrow adapter trait
//! - Persisted state: cleanup targets and the boot entry survive the reboot in a TOML file

pub mod boot;
pub mod config;
mod error;
pub mod filesystem;
pub mod paths;
pub mod progress;
pub mod transaction;

pub use boot::{BOOT_BANNER, BootController, BootLoader, Grubby, MountEntry, prepare_upgrade};
pub use config::{BootEntryRecord, CleanupRegistry, UpgradeConfig};
pub use error::{Error, Result};
pub use filesystem::{Manifest, PackageOrigin, ResolvedPackage, StagingManager};
pub use paths::UpgradePaths;
pub use progress::{LogProgress, ProgressTracker, SilentProgress};
pub use transaction::{
    LogPipe, Problem, ProblemKind, ProblemSummary, RpmLogLevel, TransactionError, TransactionEvent,
    TransactionProgress, TransactionSet, TransactionState, UpgradeTransaction, rpm_opener, summarize_problems,
};
