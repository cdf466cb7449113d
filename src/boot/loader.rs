// src/boot/loader.rs

//! Boot-loader entry management
//!
//! The controller only builds the kernel arguments and banner; creating and
//! removing the entry is delegated to a [`BootLoader`].

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Adds and removes boot-loader entries
pub trait BootLoader {
    /// Add an entry booting `kernel`/`initrd`, returning its identifier
    fn add_entry(&self, kernel: &Path, initrd: &Path, banner: &str, kernel_args: &[String]) -> Result<String>;

    /// Remove the entry for `kernel`, restoring the previous default
    fn remove_entry(&self, kernel: &Path) -> Result<()>;
}

/// [`BootLoader`] backed by the `grubby` tool
#[derive(Debug, Clone)]
pub struct Grubby {
    program: PathBuf,
}

impl Grubby {
    /// Find `grubby` in PATH
    pub fn locate() -> Result<Self> {
        let program = which::which("grubby")
            .map_err(|e| Error::NotFound(format!("grubby not available: {}", e)))?;
        Ok(Self { program })
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[String]) -> Result<String> {
        debug!("{} {}", self.program.display(), args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| Error::CommandError(format!("Failed to run grubby: {}", e)))?;

        if !output.status.success() {
            return Err(Error::BootError(format!(
                "grubby {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl BootLoader for Grubby {
    fn add_entry(&self, kernel: &Path, initrd: &Path, banner: &str, kernel_args: &[String]) -> Result<String> {
        // A leftover entry from an interrupted run would shadow the new one
        if let Err(e) = self.remove_entry(kernel) {
            debug!("No previous entry for {}: {}", kernel.display(), e);
        }

        let mut args = vec![
            format!("--add-kernel={}", kernel.display()),
            format!("--initrd={}", initrd.display()),
            format!("--title={}", banner),
            "--copy-default".to_string(),
            "--make-default".to_string(),
        ];
        if !kernel_args.is_empty() {
            args.push(format!("--args={}", kernel_args.join(" ")));
        }
        self.run(&args)?;

        let entry = self.run(&["--default-index".to_string()])?;
        info!("Added boot entry {} for {}", entry, kernel.display());
        Ok(entry)
    }

    fn remove_entry(&self, kernel: &Path) -> Result<()> {
        self.run(&[format!("--remove-kernel={}", kernel.display())])?;
        info!("Removed boot entry for {}", kernel.display());
        Ok(())
    }
}
