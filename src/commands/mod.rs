// src/commands/mod.rs
//! Command handlers for the system-upgrade CLI

mod boot;
mod cleanup;
mod install;
pub mod progress;
mod stage;

pub use boot::{cmd_prep_boot, cmd_remove_boot, cmd_reset_boot};
pub use cleanup::cmd_cleanup;
pub use install::{cmd_check, cmd_install};
pub use stage::cmd_stage;

use system_upgrade::{BootController, Grubby, ProblemSummary, UpgradePaths};
use tracing::debug;

/// Boot controller driving grubby
///
/// A missing grubby only matters to the steps that touch boot entries, so
/// it is reported when one of them runs.
fn boot_controller(paths: &UpgradePaths) -> BootController<Grubby> {
    let loader = Grubby::locate().unwrap_or_else(|e| {
        debug!("{}", e);
        Grubby::with_program("grubby")
    });
    BootController::new(paths.clone(), loader)
}

fn print_summaries(summaries: &[ProblemSummary]) {
    for summary in summaries {
        eprintln!("{}", summary);
    }
}
