// src/main.rs

mod cli;
mod commands;

use anyhow::{Result, bail};
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use nix::unistd::Uid;
use std::path::Path;
use system_upgrade::{MountEntry, UpgradePaths};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber for logging
    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let paths = UpgradePaths::with_root(&cli.root);
    if !matches!(cli.command, Commands::Completions { .. })
        && paths.root() == Path::new("/")
        && !Uid::effective().is_root()
    {
        bail!("system-upgrade must be run as root");
    }

    match cli.command {
        Commands::Stage {
            packages,
            media_packages,
            media_device,
            media_fstype,
            media_options,
        } => {
            let media = media_device.map(|device| {
                // The upgrade boot mounts the media under the upgrade link
                let mut entry = MountEntry::new(device, paths.media_mount_point());
                entry.fstype = media_fstype;
                entry.options = media_options;
                entry
            });
            commands::cmd_stage(&paths, &packages, &media_packages, media)
        }
        Commands::PrepBoot { kernel, initrd } => commands::cmd_prep_boot(&paths, &kernel, &initrd),
        Commands::Check { test } => commands::cmd_check(&paths, test, cli.debug),
        Commands::Install {
            dry_run,
            no_progress,
        } => commands::cmd_install(&paths, dry_run, no_progress, cli.debug),
        Commands::ResetBoot => commands::cmd_reset_boot(&paths),
        Commands::RemoveBoot => commands::cmd_remove_boot(&paths),
        Commands::Cleanup => commands::cmd_cleanup(&paths),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "system-upgrade", &mut std::io::stdout());
            Ok(())
        }
    }
}
