// src/transaction/set.rs

//! The slice of the native transaction API the upgrade engine uses

use super::problem::{Problem, ProblemKind};
use crate::Result;
use std::fs::File;
use std::path::Path;
use tracing::Level;

/// Transaction run flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransFlags {
    /// Go through the whole run without touching the target root
    pub test: bool,
}

impl TransFlags {
    pub fn test() -> Self {
        Self { test: true }
    }
}

/// Verbosity of the native engine's own logging
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum RpmLogLevel {
    Debug,
    Info,
    /// The engine's default
    #[default]
    Warning,
    Error,
    Critical,
}

impl RpmLogLevel {
    /// Engine verbosity matching a host log level
    pub fn from_level(level: Level) -> Self {
        if level == Level::TRACE || level == Level::DEBUG {
            RpmLogLevel::Debug
        } else if level == Level::INFO {
            RpmLogLevel::Info
        } else if level == Level::WARN {
            RpmLogLevel::Warning
        } else {
            RpmLogLevel::Error
        }
    }

    /// Command-line switches selecting this verbosity
    pub fn args(self) -> &'static [&'static str] {
        match self {
            RpmLogLevel::Debug => &["-vv"],
            RpmLogLevel::Info => &["-v"],
            RpmLogLevel::Warning => &[],
            RpmLogLevel::Error | RpmLogLevel::Critical => &["--quiet"],
        }
    }
}

/// Progress reported while a transaction runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    /// The run is starting with `total` elements
    Start { total: u64 },
    /// Progress within the current element
    Progress { amount: u64, total: u64 },
    /// Element `index` of `total` (1-based) is being installed
    InstallStart { key: String, index: usize, total: usize },
    InstallDone { key: String },
    Stop,
}

/// A native package transaction
///
/// Implementations wrap whatever transaction library is available. The
/// engine only drives it through these operations.
pub trait TransactionSet {
    /// Add a package file as an install (`upgrade` replaces older versions)
    fn add_install(&mut self, path: &Path, upgrade: bool) -> Result<()>;

    /// Verify dependencies and conflicts of the added packages
    fn check(&mut self) -> Result<Vec<Problem>>;

    /// Sort the elements into installation order
    fn order(&mut self) -> Result<()>;

    /// Drop actions that are already satisfied
    fn clean(&mut self) -> Result<()>;

    /// Run the transaction, ignoring problems of the `ignore` kinds
    ///
    /// Returns the engine's result code; non-zero when problems occurred.
    fn run(&mut self, callback: &mut dyn FnMut(TransactionEvent), ignore: &[ProblemKind]) -> Result<i32>;

    /// Problems reported by the last run
    fn problems(&self) -> Vec<Problem>;

    /// Replace the run flags, returning the previous ones
    fn set_flags(&mut self, flags: TransFlags) -> TransFlags;

    fn set_verbosity(&mut self, level: RpmLogLevel);

    /// Where scriptlet and engine output goes, `None` for the default
    fn set_script_log(&mut self, log: Option<File>);

    /// Close the package database
    fn close_db(&mut self) -> Result<()>;
}
