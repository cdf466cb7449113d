// src/transaction/rpmcli.rs

//! [`TransactionSet`] over the system `rpm` binary
//!
//! Package headers are read with the `rpm` crate when packages are added,
//! so unreadable files are caught before anything runs. Checking and
//! running go through `rpm -U`, whose problem reports are parsed back into
//! [`Problem`] records.

use super::problem::{Problem, ProblemKind};
use super::set::{RpmLogLevel, TransFlags, TransactionEvent, TransactionSet};
use crate::{Error, Result};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// A package added to the transaction
#[derive(Debug, Clone)]
struct TransactionElement {
    path: PathBuf,
    nevra: String,
}

/// Transaction driven through the `rpm` command
pub struct RpmCliTransaction {
    program: PathBuf,
    root: PathBuf,
    elements: Vec<TransactionElement>,
    upgrade: bool,
    flags: TransFlags,
    verbosity: RpmLogLevel,
    script_log: Option<File>,
    problems: Vec<Problem>,
}

impl RpmCliTransaction {
    /// Open a transaction against `root` using `rpm` from PATH
    pub fn open(root: &Path) -> Result<Self> {
        let program = which::which("rpm").map_err(|e| Error::NotFound(format!("rpm not available: {}", e)))?;
        Ok(Self::with_program(program, root))
    }

    pub fn with_program(program: impl Into<PathBuf>, root: &Path) -> Self {
        Self {
            program: program.into(),
            root: root.to_path_buf(),
            elements: Vec::new(),
            upgrade: true,
            flags: TransFlags::default(),
            verbosity: RpmLogLevel::default(),
            script_log: None,
            problems: Vec::new(),
        }
    }

    /// Base command against the target root
    ///
    /// Signatures were verified when the packages were downloaded.
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--root").arg(&self.root).arg("--nosignature");
        cmd.args(self.verbosity.args());
        cmd
    }

    fn install_command(&self) -> Command {
        let mut cmd = self.command();
        cmd.arg(if self.upgrade { "-U" } else { "-i" });
        cmd
    }

    /// The installed package currently providing `capability`
    fn whatprovides(&self, capability: &str) -> Option<String> {
        let output = self
            .command()
            .arg("-q")
            .arg("--qf")
            .arg("%{NAME}-%{VERSION}-%{RELEASE}.%{ARCH}\\n")
            .arg("--whatprovides")
            .arg(capability)
            .output();
        match output {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string),
            Ok(_) => None,
            Err(e) => {
                debug!("Can't look up provider of {}: {}", capability, e);
                None
            }
        }
    }

    /// Copy captured engine output into the script log
    fn forward_output(&mut self, output: &[u8]) {
        if output.is_empty() {
            return;
        }
        match &mut self.script_log {
            Some(log) => {
                if let Err(e) = log.write_all(output) {
                    warn!("Failed to write rpm output to log pipe: {}", e);
                }
            }
            None => {
                for line in String::from_utf8_lossy(output).lines() {
                    debug!("rpm: {}", line);
                }
            }
        }
    }
}

impl TransactionSet for RpmCliTransaction {
    fn add_install(&mut self, path: &Path, upgrade: bool) -> Result<()> {
        let file = File::open(path)
            .map_err(|e| Error::PackageError(format!("Failed to open {}: {}", path.display(), e)))?;
        let metadata = rpm::PackageMetadata::parse(&mut BufReader::new(file))
            .map_err(|e| Error::PackageError(format!("Failed to read header of {}: {}", path.display(), e)))?;

        let nevra = format!(
            "{}-{}-{}.{}",
            metadata.get_name()?,
            metadata.get_version()?,
            metadata.get_release()?,
            metadata.get_arch()?
        );
        debug!("Adding {} from {}", nevra, path.display());

        self.upgrade = upgrade;
        self.elements.push(TransactionElement {
            path: path.to_path_buf(),
            nevra,
        });
        Ok(())
    }

    fn check(&mut self) -> Result<Vec<Problem>> {
        if self.elements.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = self.install_command();
        cmd.arg("--test").args(self.elements.iter().map(|e| &e.path));
        let output = cmd
            .output()
            .map_err(|e| Error::CommandError(format!("Failed to run rpm: {}", e)))?;

        self.forward_output(&output.stderr);
        let mut problems = parse_problems(&String::from_utf8_lossy(&output.stderr));
        fill_providers(&mut problems, |cap| self.whatprovides(cap));
        Ok(problems)
    }

    fn order(&mut self) -> Result<()> {
        // rpm orders the transaction itself when it runs
        debug!("Ordering {} transaction elements", self.elements.len());
        Ok(())
    }

    fn clean(&mut self) -> Result<()> {
        if self.elements.is_empty() {
            return Ok(());
        }

        let mut cmd = self.command();
        cmd.arg("-q")
            .arg("--qf")
            .arg("%{NAME}-%{VERSION}-%{RELEASE}.%{ARCH}\\n")
            .args(self.elements.iter().map(|e| &e.nevra));
        let output = cmd
            .output()
            .map_err(|e| Error::CommandError(format!("Failed to run rpm: {}", e)))?;

        // Packages that are not installed are reported on stdout too, as
        // "package X is not installed"; only bare NEVRAs are installed.
        let installed: HashSet<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.contains(' '))
            .map(str::to_string)
            .collect();

        let before = self.elements.len();
        self.elements.retain(|e| !installed.contains(&e.nevra));
        if self.elements.len() < before {
            info!("Dropped {} already installed package(s)", before - self.elements.len());
        }
        Ok(())
    }

    fn run(&mut self, callback: &mut dyn FnMut(TransactionEvent), ignore: &[ProblemKind]) -> Result<i32> {
        self.problems.clear();
        let total = self.elements.len();

        let mut cmd = self.install_command();
        cmd.arg("--percent");
        if self.flags.test {
            cmd.arg("--test");
        }
        if ignore.contains(&ProblemKind::DiskSpace) {
            cmd.arg("--ignoresize");
        }
        cmd.args(self.elements.iter().map(|e| &e.path));

        // stderr is parsed for problems after the run, so it goes to a file
        // rather than straight into the script log.
        let mut stderr_log = tempfile::tempfile()?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::from(stderr_log.try_clone()?));

        debug!("Running {:?}", cmd);
        let mut child = cmd
            .spawn()
            .map_err(|e| Error::CommandError(format!("Failed to run rpm: {}", e)))?;

        callback(TransactionEvent::Start { total: total as u64 });
        if let Some(stdout) = child.stdout.take() {
            let keys: Vec<&str> = self.elements.iter().map(|e| e.nevra.as_str()).collect();
            read_progress(BufReader::new(stdout), &keys, callback)?;
        }
        let status = child.wait()?;
        callback(TransactionEvent::Stop);

        let mut stderr = Vec::new();
        stderr_log.seek(SeekFrom::Start(0))?;
        stderr_log.read_to_end(&mut stderr)?;
        self.forward_output(&stderr);

        let mut problems: Vec<Problem> = parse_problems(&String::from_utf8_lossy(&stderr))
            .into_iter()
            .filter(|p| !ignore.contains(&p.kind))
            .collect();
        fill_providers(&mut problems, |cap| self.whatprovides(cap));
        self.problems = problems;

        Ok(status.code().unwrap_or(-1))
    }

    fn problems(&self) -> Vec<Problem> {
        self.problems.clone()
    }

    fn set_flags(&mut self, flags: TransFlags) -> TransFlags {
        std::mem::replace(&mut self.flags, flags)
    }

    fn set_verbosity(&mut self, level: RpmLogLevel) {
        self.verbosity = level;
    }

    fn set_script_log(&mut self, log: Option<File>) {
        self.script_log = log;
    }

    fn close_db(&mut self) -> Result<()> {
        // Every rpm invocation opens and closes the database itself
        debug!("Closing rpm transaction for {}", self.root.display());
        self.script_log = None;
        Ok(())
    }
}

/// Turn `rpm --percent` output into transaction events
///
/// rpm prints the NEVRA of each element when it starts and `%% <percent>`
/// lines while it is installed. Any other line (the "Preparing packages..."
/// banners, old versions being erased) ends the current element without
/// starting a new one.
fn read_progress<R: BufRead>(
    reader: R,
    keys: &[&str],
    callback: &mut dyn FnMut(TransactionEvent),
) -> io::Result<()> {
    let total = keys.len();
    let mut started: HashSet<&str> = HashSet::new();
    let mut current: Option<String> = None;
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(percent) = line.strip_prefix("%%") {
            if let Ok(percent) = percent.trim().parse::<f64>() {
                callback(TransactionEvent::Progress {
                    amount: percent.clamp(0.0, 100.0) as u64,
                    total: 100,
                });
            }
            continue;
        }

        if let Some(done) = current.take() {
            callback(TransactionEvent::InstallDone { key: done });
        }

        let label = strip_epoch(line);
        match keys.iter().find(|k| **k == label) {
            Some(key) if started.insert(*key) => {
                callback(TransactionEvent::InstallStart {
                    key: key.to_string(),
                    index: started.len(),
                    total,
                });
                current = Some(key.to_string());
            }
            _ => debug!("rpm: {}", line),
        }
    }
    if let Some(done) = current {
        callback(TransactionEvent::InstallDone { key: done });
    }
    Ok(())
}

/// Drop the `E:` epoch from a NEVRA label
fn strip_epoch(label: &str) -> String {
    let Some(colon) = label.find(':') else {
        return label.to_string();
    };
    match label[..colon].rfind('-') {
        Some(dash) if label[dash + 1..colon].chars().all(|c| c.is_ascii_digit()) => {
            format!("{}{}", &label[..=dash], &label[colon + 1..])
        }
        _ => label.to_string(),
    }
}

/// Attribute each missing requirement to the package that provides it today
///
/// rpm's messages name only the capability; the provider is what the
/// dependency summary groups by. Lookups are cached per capability.
fn fill_providers<F>(problems: &mut [Problem], mut lookup: F)
where
    F: FnMut(&str) -> Option<String>,
{
    let mut cache: HashMap<String, Option<String>> = HashMap::new();
    for p in problems
        .iter_mut()
        .filter(|p| p.kind == ProblemKind::Requires && p.related.is_none())
    {
        let provider = cache
            .entry(p.detail.clone())
            .or_insert_with(|| lookup(&p.detail))
            .clone();
        p.related = provider;
    }
}

static REQUIRES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?) is needed by (?:\(installed\) )?(\S+)$").expect("valid regex"));
static CONFLICT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?) conflicts with (?:\(installed\) )?(\S+)$").expect("valid regex"));
static FILE_CONFLICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^file (\S+) from install of (\S+) conflicts with file from package (\S+)$").expect("valid regex")
});
static NEW_FILE_CONFLICT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^file (\S+) conflicts between attempted installs of (\S+) and (\S+)$").expect("valid regex")
});
static DISK_SPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^installing package (\S+) needs ([\d,]+)([KMG]?)B more space on the (\S+) filesystem$")
        .expect("valid regex")
});
static DISK_NODES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^installing package (\S+) needs (\d+) more inodes on the (\S+) filesystem$").expect("valid regex")
});
static OLD_PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^package (\S+) \(which is newer than (\S+)\) is already installed$").expect("valid regex")
});
static INSTALLED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^package (\S+) is already installed$").expect("valid regex"));
static BAD_ARCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^package (\S+) is intended for a different architecture$").expect("valid regex"));
static BAD_OS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^package (\S+) is intended for a different operating system$").expect("valid regex")
});

/// Parse the problem lines rpm prints on a failed or test transaction
pub fn parse_problems(output: &str) -> Vec<Problem> {
    output.lines().filter_map(|line| parse_problem(line.trim())).collect()
}

fn parse_problem(line: &str) -> Option<Problem> {
    if let Some(c) = REQUIRES_RE.captures(line) {
        return Some(Problem::new(ProblemKind::Requires, &c[2], &c[1]));
    }
    if let Some(c) = CONFLICT_RE.captures(line) {
        return Some(Problem::new(ProblemKind::Conflict, &c[2], &c[1]));
    }
    if let Some(c) = FILE_CONFLICT_RE.captures(line) {
        return Some(Problem::new(ProblemKind::FileConflict, &c[2], &c[1]).with_related(&c[3]));
    }
    if let Some(c) = NEW_FILE_CONFLICT_RE.captures(line) {
        return Some(Problem::new(ProblemKind::NewFileConflict, &c[2], &c[1]).with_related(&c[3]));
    }
    if let Some(c) = DISK_SPACE_RE.captures(line) {
        let amount: u64 = c[2].replace(',', "").parse().ok()?;
        let scale = match &c[3] {
            "K" => 1024,
            "M" => 1024 * 1024,
            "G" => 1024 * 1024 * 1024,
            _ => 1,
        };
        return Some(Problem::new(ProblemKind::DiskSpace, &c[1], &c[4]).with_num(amount * scale));
    }
    if let Some(c) = DISK_NODES_RE.captures(line) {
        let nodes: u64 = c[2].parse().ok()?;
        return Some(Problem::new(ProblemKind::DiskNodes, &c[1], &c[3]).with_num(nodes));
    }
    if let Some(c) = OLD_PACKAGE_RE.captures(line) {
        return Some(Problem::new(ProblemKind::OldPackage, &c[2], "").with_related(&c[1]));
    }
    if let Some(c) = INSTALLED_RE.captures(line) {
        return Some(Problem::new(ProblemKind::PkgInstalled, &c[1], ""));
    }
    if let Some(c) = BAD_ARCH_RE.captures(line) {
        return Some(Problem::new(ProblemKind::BadArch, &c[1], ""));
    }
    if let Some(c) = BAD_OS_RE.captures(line) {
        return Some(Problem::new(ProblemKind::BadOs, &c[1], ""));
    }
    None
}
