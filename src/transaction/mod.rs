// src/transaction/mod.rs

//! Upgrade transaction engine
//!
//! Drives the staged package set through a native package transaction as a
//! single unit, and turns whatever the engine complains about into
//! [`TransactionError`]s carrying per-kind summaries.
//!
//! # Lifecycle
//!
//! ```text
//! Idle -> Populated -> Checked -> Ordered -> TestRun -> Run -> Closed
//!                                        \--------------^
//! ```
//!
//! The check stage only keeps conflicts and missing requirements. The run
//! stage keeps everything except disk space, which was checked upstream
//! before the reboot.

mod logpipe;
mod problem;
mod rpmcli;
mod set;

pub use logpipe::{LogPipe, forward_lines};
pub use problem::{
    Problem, ProblemKind, ProblemSummary, SummaryDetails, TransactionError, human_size, summarize_problems,
};
pub use rpmcli::{RpmCliTransaction, parse_problems};
pub use set::{RpmLogLevel, TransFlags, TransactionEvent, TransactionSet};

use crate::filesystem::Manifest;
use crate::paths::UpgradePaths;
use crate::progress::ProgressTracker;
use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Opens a [`TransactionSet`] against a target root
pub type TransactionOpener = Box<dyn Fn(&Path) -> Result<Box<dyn TransactionSet>>>;

/// Opener backed by the system `rpm` binary
pub fn rpm_opener() -> TransactionOpener {
    Box::new(|root| Ok(Box::new(RpmCliTransaction::open(root)?) as Box<dyn TransactionSet>))
}

/// Transaction state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction opened yet
    Idle,
    /// Packages added
    Populated,
    /// Dependencies and conflicts verified
    Checked,
    /// Sorted and cleaned, ready to run
    Ordered,
    /// Dry run completed
    TestRun,
    /// Real run completed
    Run,
    /// Database and log pipe closed
    Closed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Populated => "populated",
            Self::Checked => "checked",
            Self::Ordered => "ordered",
            Self::TestRun => "test-run",
            Self::Run => "run",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The upgrade transaction over the staged packages
pub struct UpgradeTransaction {
    root: PathBuf,
    package_dir: PathBuf,
    opener: TransactionOpener,
    ts: Option<Box<dyn TransactionSet>>,
    logpipe: Option<LogPipe>,
    verbosity: RpmLogLevel,
    state: TransactionState,
}

impl UpgradeTransaction {
    /// Engine installing into `paths.root()` from the staging directory
    pub fn new(paths: &UpgradePaths, opener: TransactionOpener) -> Self {
        Self {
            root: paths.root().to_path_buf(),
            package_dir: paths.package_dir(),
            opener,
            ts: None,
            logpipe: None,
            verbosity: RpmLogLevel::default(),
            state: TransactionState::Idle,
        }
    }

    /// Route engine and scriptlet output through `pipe` at `verbosity`
    pub fn with_log_pipe(mut self, pipe: LogPipe, verbosity: RpmLogLevel) -> Self {
        self.logpipe = Some(pipe);
        self.verbosity = verbosity;
        self
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn expect_state(&self, allowed: &[TransactionState], op: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(Error::InvalidState(format!(
            "cannot {} a transaction that is {}",
            op, self.state
        )))
    }

    /// Open the transaction, add the manifest's packages, check, order and clean it
    ///
    /// Packages that cannot be added are logged and skipped. Returns the
    /// conflicts and missing requirements the check found; with
    /// `check_fatal` any of them fails the call instead.
    pub fn populate(&mut self, manifest: &Manifest, check_fatal: bool) -> Result<Vec<Problem>> {
        self.expect_state(&[TransactionState::Idle], "populate")?;
        debug!("Opening transaction against {}", self.root.display());

        let ts = self.ts.insert((self.opener)(&self.root)?);
        if let Some(pipe) = &self.logpipe {
            ts.set_verbosity(self.verbosity);
            ts.set_script_log(Some(pipe.writer()?));
        }

        for pkg in manifest.package_paths(&self.package_dir) {
            if let Err(e) = ts.add_install(&pkg, true) {
                warn!("error adding pkg {}: {}", pkg.display(), e);
            }
        }
        self.state = TransactionState::Populated;

        debug!("Checking transaction");
        let problems: Vec<Problem> = ts
            .check()?
            .into_iter()
            .filter(|p| matches!(p.kind, ProblemKind::Conflict | ProblemKind::Requires))
            .collect();
        if !problems.is_empty() {
            info!("problems with transaction check:");
            for p in &problems {
                info!("{}", p);
            }
            if check_fatal {
                return Err(TransactionError::new(problems).into());
            }
        }
        self.state = TransactionState::Checked;

        debug!("Ordering transaction");
        ts.order()?;
        ts.clean()?;
        self.state = TransactionState::Ordered;
        debug!("transaction is ready");
        Ok(problems)
    }

    /// Run the transaction, or only simulate it with `dry_run`
    ///
    /// Returns the engine's result code. Any problem other than disk space
    /// fails the call with a [`TransactionError`].
    pub fn execute(&mut self, callback: &mut dyn FnMut(TransactionEvent), dry_run: bool) -> Result<i32> {
        self.expect_state(
            &[TransactionState::Ordered, TransactionState::TestRun],
            "execute",
        )?;
        let ts = self
            .ts
            .as_mut()
            .ok_or_else(|| Error::InvalidState("transaction is not open".to_string()))?;

        let ignore = [ProblemKind::DiskSpace];
        let rv = if dry_run {
            let old_flags = ts.set_flags(TransFlags::test());
            let rv = ts.run(callback, &ignore);
            ts.set_flags(old_flags);
            rv?
        } else {
            ts.run(callback, &ignore)?
        };
        if rv != 0 {
            info!("transaction completed with problems - code {}", rv);
        }

        let problems: Vec<Problem> = ts
            .problems()
            .into_iter()
            .filter(|p| !ignore.contains(&p.kind))
            .collect();
        if !problems.is_empty() {
            return Err(TransactionError::new(problems).into());
        }

        self.state = if dry_run {
            TransactionState::TestRun
        } else {
            TransactionState::Run
        };
        Ok(rv)
    }

    /// Close the database and the log pipe
    ///
    /// Safe to call more than once; also runs on drop.
    pub fn close(&mut self) -> Result<()> {
        if self.state == TransactionState::Closed {
            return Ok(());
        }
        self.state = TransactionState::Closed;

        let mut result = Ok(());
        if let Some(mut ts) = self.ts.take() {
            result = ts.close_db();
            if self.logpipe.is_some() {
                ts.set_verbosity(RpmLogLevel::default());
                ts.set_script_log(None);
            }
        }

        if let Some(pipe) = self.logpipe.take() {
            match pipe.close() {
                Ok(lines) => debug!("log pipe closed after {} lines", lines),
                Err(e) if result.is_ok() => result = Err(e),
                Err(e) => warn!("Failed to close log pipe: {}", e),
            }
        }
        result
    }
}

impl Drop for UpgradeTransaction {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close transaction: {}", e);
        }
    }
}

/// Feeds transaction events to a [`ProgressTracker`]
pub struct TransactionProgress<'a> {
    tracker: &'a dyn ProgressTracker,
}

impl<'a> TransactionProgress<'a> {
    pub fn new(tracker: &'a dyn ProgressTracker) -> Self {
        Self { tracker }
    }

    pub fn handle(&self, event: TransactionEvent) {
        match event {
            TransactionEvent::Start { total } => {
                self.tracker.set_length(total);
                self.tracker.set_position(0);
            }
            TransactionEvent::InstallStart { key, index, total } => {
                info!("installing {} ({}/{})", key, index, total);
                self.tracker.set_message(&key);
            }
            TransactionEvent::InstallDone { .. } => self.tracker.increment(1),
            TransactionEvent::Progress { .. } | TransactionEvent::Stop => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentProgress;
    use std::cell::RefCell;
    use std::fs::File;
    use std::io::Write;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};
    use tracing::Level;

    #[derive(Default)]
    struct FakeState {
        added: Vec<PathBuf>,
        check_problems: Vec<Problem>,
        run_problems: Vec<Problem>,
        run_code: i32,
        runs: Vec<TransFlags>,
        ignored: Vec<ProblemKind>,
        script_log: Option<File>,
        verbosity: Vec<RpmLogLevel>,
        closed: bool,
    }

    struct FakeSet {
        state: Rc<RefCell<FakeState>>,
        flags: TransFlags,
    }

    impl TransactionSet for FakeSet {
        fn add_install(&mut self, path: &Path, _upgrade: bool) -> Result<()> {
            if path.to_string_lossy().contains("broken") {
                return Err(Error::PackageError("bad header".to_string()));
            }
            self.state.borrow_mut().added.push(path.to_path_buf());
            Ok(())
        }

        fn check(&mut self) -> Result<Vec<Problem>> {
            Ok(self.state.borrow().check_problems.clone())
        }

        fn order(&mut self) -> Result<()> {
            Ok(())
        }

        fn clean(&mut self) -> Result<()> {
            Ok(())
        }

        fn run(&mut self, callback: &mut dyn FnMut(TransactionEvent), ignore: &[ProblemKind]) -> Result<i32> {
            let mut state = self.state.borrow_mut();
            state.runs.push(self.flags);
            state.ignored = ignore.to_vec();
            if let Some(log) = &mut state.script_log {
                writeln!(log, "D: running transaction")?;
                writeln!(log, "scriptlet output")?;
            }
            let total = state.added.len();
            callback(TransactionEvent::Start { total: total as u64 });
            for (i, pkg) in state.added.iter().enumerate() {
                let key = pkg.file_name().unwrap().to_string_lossy().to_string();
                callback(TransactionEvent::InstallStart {
                    key: key.clone(),
                    index: i + 1,
                    total,
                });
                callback(TransactionEvent::InstallDone { key });
            }
            callback(TransactionEvent::Stop);
            Ok(state.run_code)
        }

        fn problems(&self) -> Vec<Problem> {
            self.state.borrow().run_problems.clone()
        }

        fn set_flags(&mut self, flags: TransFlags) -> TransFlags {
            std::mem::replace(&mut self.flags, flags)
        }

        fn set_verbosity(&mut self, level: RpmLogLevel) {
            self.state.borrow_mut().verbosity.push(level);
        }

        fn set_script_log(&mut self, log: Option<File>) {
            self.state.borrow_mut().script_log = log;
        }

        fn close_db(&mut self) -> Result<()> {
            self.state.borrow_mut().closed = true;
            Ok(())
        }
    }

    fn engine(state: &Rc<RefCell<FakeState>>) -> UpgradeTransaction {
        let state = state.clone();
        let opener: TransactionOpener = Box::new(move |_root| {
            Ok(Box::new(FakeSet {
                state: state.clone(),
                flags: TransFlags::default(),
            }) as Box<dyn TransactionSet>)
        });
        UpgradeTransaction::new(&UpgradePaths::with_root("/sysroot"), opener)
    }

    fn manifest() -> Manifest {
        [
            "bash-5.2.26-3.fc40.x86_64.rpm",
            "broken-1.0-1.noarch.rpm",
            "glibc-2.39-2.fc40.x86_64.rpm",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    #[test]
    fn test_populate_skips_unreadable_packages() {
        let state = Rc::new(RefCell::new(FakeState::default()));
        let mut txn = engine(&state);

        let problems = txn.populate(&manifest(), false).unwrap();

        assert!(problems.is_empty());
        assert_eq!(txn.state(), TransactionState::Ordered);
        assert_eq!(
            state.borrow().added,
            vec![
                PathBuf::from("/sysroot/var/lib/system-upgrade/bash-5.2.26-3.fc40.x86_64.rpm"),
                PathBuf::from("/sysroot/var/lib/system-upgrade/glibc-2.39-2.fc40.x86_64.rpm"),
            ]
        );
    }

    #[test]
    fn test_check_keeps_only_conflicts_and_requirements() {
        let state = Rc::new(RefCell::new(FakeState {
            check_problems: vec![
                Problem::new(ProblemKind::Requires, "pkgA", "capX"),
                Problem::new(ProblemKind::DiskSpace, "pkgB", "/").with_num(10),
                Problem::new(ProblemKind::OldPackage, "pkgC", ""),
                Problem::new(ProblemKind::Conflict, "pkgD", "capY"),
            ],
            ..Default::default()
        }));
        let mut txn = engine(&state);

        let problems = txn.populate(&manifest(), false).unwrap();

        let kinds: Vec<_> = problems.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![ProblemKind::Requires, ProblemKind::Conflict]);
        assert_eq!(txn.state(), TransactionState::Ordered);
    }

    #[test]
    fn test_check_fatal_raises() {
        let state = Rc::new(RefCell::new(FakeState {
            check_problems: vec![Problem::new(ProblemKind::Conflict, "pkgD", "capY")],
            ..Default::default()
        }));
        let mut txn = engine(&state);

        let err = match txn.populate(&manifest(), true) {
            Err(Error::Transaction(err)) => err,
            other => panic!("expected transaction error, got {:?}", other.map(|_| ())),
        };
        assert_eq!(err.problems.len(), 1);
        assert_eq!(err.summaries[0].kind, ProblemKind::Conflict);

        txn.close().unwrap();
        assert!(state.borrow().closed);
    }

    #[test]
    fn test_execute_ignores_disk_space_only_problems() {
        let state = Rc::new(RefCell::new(FakeState {
            run_problems: vec![
                Problem::new(ProblemKind::DiskSpace, "pkgA", "/").with_num(100),
                Problem::new(ProblemKind::DiskSpace, "pkgB", "/boot").with_num(200),
            ],
            run_code: 2,
            ..Default::default()
        }));
        let mut txn = engine(&state);
        txn.populate(&manifest(), false).unwrap();

        let rv = txn.execute(&mut |_| {}, false).unwrap();

        assert_eq!(rv, 2);
        assert_eq!(txn.state(), TransactionState::Run);
        assert_eq!(state.borrow().ignored, vec![ProblemKind::DiskSpace]);
    }

    #[test]
    fn test_execute_raises_on_conflict() {
        let state = Rc::new(RefCell::new(FakeState {
            run_problems: vec![
                Problem::new(ProblemKind::DiskSpace, "pkgA", "/").with_num(100),
                Problem::new(ProblemKind::Conflict, "pkgB", "capZ"),
            ],
            run_code: 1,
            ..Default::default()
        }));
        let mut txn = engine(&state);
        txn.populate(&manifest(), false).unwrap();

        let err = match txn.execute(&mut |_| {}, false) {
            Err(Error::Transaction(err)) => err,
            other => panic!("expected transaction error, got {:?}", other),
        };
        assert_eq!(err.problems.len(), 1);
        assert_eq!(err.problems[0].kind, ProblemKind::Conflict);
    }

    #[test]
    fn test_dry_run_sets_and_restores_test_flag() {
        let state = Rc::new(RefCell::new(FakeState::default()));
        let mut txn = engine(&state);
        txn.populate(&manifest(), false).unwrap();

        txn.execute(&mut |_| {}, true).unwrap();
        assert_eq!(txn.state(), TransactionState::TestRun);
        txn.execute(&mut |_| {}, false).unwrap();
        assert_eq!(txn.state(), TransactionState::Run);

        assert_eq!(state.borrow().runs, vec![TransFlags::test(), TransFlags::default()]);
        assert!(matches!(
            txn.execute(&mut |_| {}, false),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_execute_requires_populate() {
        let state = Rc::new(RefCell::new(FakeState::default()));
        let mut txn = engine(&state);
        assert!(matches!(
            txn.execute(&mut |_| {}, true),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_progress_follows_installs() {
        let state = Rc::new(RefCell::new(FakeState::default()));
        let mut txn = engine(&state);
        txn.populate(&manifest(), false).unwrap();

        let tracker = SilentProgress::new();
        let progress = TransactionProgress::new(&tracker);
        txn.execute(&mut |event| progress.handle(event), false).unwrap();

        assert_eq!(tracker.length(), 2);
        assert_eq!(tracker.position(), 2);
    }

    #[test]
    fn test_log_pipe_drained_on_close() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let pipe = LogPipe::open_with_sink(Level::INFO, move |level, line| {
            sink_seen.lock().unwrap().push((level, line.to_string()));
        })
        .unwrap();
        let fifo = pipe.path().to_path_buf();

        let state = Rc::new(RefCell::new(FakeState::default()));
        let mut txn = engine(&state).with_log_pipe(pipe, RpmLogLevel::Info);
        txn.populate(&manifest(), false).unwrap();
        txn.execute(&mut |_| {}, false).unwrap();
        txn.close().unwrap();

        assert!(!fifo.exists());
        assert!(state.borrow().closed);
        assert!(state.borrow().script_log.is_none());
        assert_eq!(
            state.borrow().verbosity,
            vec![RpmLogLevel::Info, RpmLogLevel::Warning]
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Level::DEBUG, "running transaction".to_string()),
                (Level::INFO, "scriptlet output".to_string()),
            ]
        );
    }

    #[test]
    fn test_drop_tears_down_after_failure() {
        let pipe = LogPipe::open_with_sink(Level::INFO, |_, _| {}).unwrap();
        let fifo = pipe.path().to_path_buf();
        let state = Rc::new(RefCell::new(FakeState {
            check_problems: vec![Problem::new(ProblemKind::Requires, "pkgA", "capX")],
            ..Default::default()
        }));

        {
            let mut txn = engine(&state).with_log_pipe(pipe, RpmLogLevel::Info);
            assert!(txn.populate(&manifest(), true).is_err());
        }

        assert!(state.borrow().closed);
        assert!(!fifo.exists());
    }
}
