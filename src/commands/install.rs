// src/commands/install.rs
//! Transaction commands

use super::print_summaries;
use super::progress::InstallProgress;
use anyhow::{Context, Result, bail};
use system_upgrade::{
    Error, LogPipe, LogProgress, Manifest, ProgressTracker, RpmLogLevel, SilentProgress, TransactionProgress,
    UpgradePaths, UpgradeTransaction, rpm_opener, summarize_problems,
};
use tracing::{Level, info, warn};

fn read_manifest(paths: &UpgradePaths) -> Result<Manifest> {
    let list = paths.package_list();
    let manifest = Manifest::read(&list).with_context(|| format!("No staged upgrade found at {}", list.display()))?;
    if manifest.is_empty() {
        warn!("{} lists no packages", list.display());
    }
    Ok(manifest)
}

fn open_transaction(paths: &UpgradePaths, debug: bool) -> Result<UpgradeTransaction> {
    let level = if debug { Level::DEBUG } else { Level::INFO };
    let pipe = LogPipe::open(Level::INFO).context("Failed to open rpm log pipe")?;
    Ok(UpgradeTransaction::new(paths, rpm_opener()).with_log_pipe(pipe, RpmLogLevel::from_level(level)))
}

/// Show problem summaries before handing the error up
fn report(err: Error) -> anyhow::Error {
    if let Error::Transaction(e) = &err {
        print_summaries(&e.summaries);
    }
    anyhow::Error::new(err)
}

/// Check the staged transaction, optionally simulating it
pub fn cmd_check(paths: &UpgradePaths, test: bool, debug: bool) -> Result<()> {
    let manifest = read_manifest(paths)?;
    let mut txn = open_transaction(paths, debug)?;

    let problems = txn.populate(&manifest, false).map_err(report)?;
    if !problems.is_empty() {
        print_summaries(&summarize_problems(&problems));
        txn.close()?;
        bail!("{} problem(s) found in the upgrade transaction", problems.len());
    }

    if test {
        // Each package is already logged as it is tested
        let tracker = SilentProgress::new();
        let progress = TransactionProgress::new(&tracker);
        txn.execute(&mut |event| progress.handle(event), true)
            .map_err(report)?;
    }
    txn.close()?;

    println!("No problems found in {} staged package(s)", manifest.len());
    Ok(())
}

/// Run the upgrade transaction
pub fn cmd_install(paths: &UpgradePaths, dry_run: bool, no_progress: bool, debug: bool) -> Result<()> {
    let manifest = read_manifest(paths)?;
    let mut txn = open_transaction(paths, debug)?;
    txn.populate(&manifest, true).map_err(report)?;

    let operation = if dry_run { "Testing upgrade" } else { "Upgrading" };
    let tracker: Box<dyn ProgressTracker> = if no_progress {
        Box::new(LogProgress::new(operation, manifest.len() as u64))
    } else {
        Box::new(InstallProgress::new(operation))
    };
    let progress = TransactionProgress::new(tracker.as_ref());

    let result = txn.execute(&mut |event| progress.handle(event), dry_run);
    match &result {
        Ok(_) => tracker.finish_with_message("done"),
        Err(_) => tracker.finish_with_error("transaction failed"),
    }
    let rv = result.map_err(report)?;
    txn.close()?;

    if rv != 0 {
        info!("rpm reported result code {}", rv);
    }
    if dry_run {
        println!("Test transaction of {} package(s) completed", manifest.len());
    } else {
        println!("Upgrade of {} package(s) completed", manifest.len());
    }
    Ok(())
}
