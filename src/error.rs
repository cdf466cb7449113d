// src/error.rs

//! Error types for the upgrade core

use crate::transaction::TransactionError;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by staging, boot preparation and the transaction engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Package error: {0}")]
    PackageError(String),

    #[error("Boot setup error: {0}")]
    BootError(String),

    #[error("Command failed: {0}")]
    CommandError(String),

    #[error("Invalid transaction state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::ConfigError(format!("Failed to parse upgrade config: {}", e))
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::ConfigError(format!("Failed to serialize upgrade config: {}", e))
    }
}

impl From<rpm::Error> for Error {
    fn from(e: rpm::Error) -> Self {
        Error::PackageError(e.to_string())
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::Io(std::io::Error::from(e))
    }
}
