// src/cli.rs
//! CLI definitions for system-upgrade
//!
//! The pre-reboot steps (`stage`, `prep-boot`, `check`) and the post-reboot
//! ones (`install`, `cleanup`) share one binary. Handlers live in the
//! `commands` module.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "system-upgrade")]
#[command(author = "System Upgrade Contributors")]
#[command(version)]
#[command(about = "Offline major-version upgrade of an installed system", long_about = None)]
pub struct Cli {
    /// Root of the system being upgraded
    #[arg(short, long, global = true, default_value = "/")]
    pub root: PathBuf,

    /// Log debug output, including the package engine's
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Stage downloaded packages and arm the upgrade boot
    Stage {
        /// Package files to stage
        packages: Vec<PathBuf>,

        /// Package on the upgrade media, relative to the media root
        #[arg(long = "media-package", value_name = "PATH")]
        media_packages: Vec<String>,

        /// Device holding the upgrade media
        #[arg(long, value_name = "DEVICE")]
        media_device: Option<String>,

        /// Filesystem type of the upgrade media
        #[arg(long, requires = "media_device")]
        media_fstype: Option<String>,

        /// Mount options for the upgrade media
        #[arg(long, requires = "media_device")]
        media_options: Option<String>,
    },

    /// Finish the upgrade initrd and add the upgrade boot entry
    PrepBoot {
        /// Kernel image to boot into the upgrade
        kernel: PathBuf,

        /// Initrd for the upgrade boot
        initrd: PathBuf,
    },

    /// Check the staged packages for conflicts and missing requirements
    Check {
        /// Also simulate the whole transaction
        #[arg(long)]
        test: bool,
    },

    /// Install the staged packages (run from the upgrade boot)
    Install {
        /// Go through the transaction without changing anything
        #[arg(long)]
        dry_run: bool,

        /// Log progress instead of drawing a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Remove the upgrade boot entry, restoring the previous default
    ResetBoot,

    /// Remove the upgrade boot entry and its kernel and initrd
    RemoveBoot,

    /// Remove everything the upgrade left behind
    Cleanup,

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_stage_with_media() {
        let cli = Cli::try_parse_from([
            "system-upgrade",
            "--root",
            "/mnt/sysimage",
            "stage",
            "a.rpm",
            "--media-package",
            "Packages/b.rpm",
            "--media-device",
            "/dev/sr0",
            "--media-fstype",
            "iso9660",
        ])
        .unwrap();

        assert_eq!(cli.root, PathBuf::from("/mnt/sysimage"));
        match cli.command {
            Commands::Stage {
                packages,
                media_packages,
                media_device,
                media_fstype,
                ..
            } => {
                assert_eq!(packages, vec![PathBuf::from("a.rpm")]);
                assert_eq!(media_packages, vec!["Packages/b.rpm".to_string()]);
                assert_eq!(media_device.as_deref(), Some("/dev/sr0"));
                assert_eq!(media_fstype.as_deref(), Some("iso9660"));
            }
            _ => panic!("expected stage"),
        }
    }

    #[test]
    fn test_media_fstype_requires_device() {
        assert!(Cli::try_parse_from(["system-upgrade", "stage", "--media-fstype", "iso9660"]).is_err());
    }
}
