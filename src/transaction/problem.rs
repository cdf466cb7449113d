// src/transaction/problem.rs

//! Transaction problem records and their per-kind summaries
//!
//! The engine reports one [`Problem`] per diagnostic. Large upgrades produce
//! hundreds of them, mostly repeating the same few facts, so they are
//! grouped into one [`ProblemSummary`] per kind before being shown.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Kind of a transaction problem
///
/// Variants are declared in the engine's problem-code order, which is also
/// the order summaries are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProblemKind {
    BadArch,
    BadOs,
    PkgInstalled,
    Requires,
    Conflict,
    NewFileConflict,
    FileConflict,
    OldPackage,
    DiskSpace,
    DiskNodes,
}

/// Aggregates the problems of one kind into summary details
type Summarizer = fn(&[Problem]) -> SummaryDetails;

impl ProblemKind {
    /// Human-readable label used when rendering a summary
    pub fn label(self) -> &'static str {
        match self {
            ProblemKind::BadArch => "package for incorrect arch",
            ProblemKind::BadOs => "package for incorrect os",
            ProblemKind::PkgInstalled => "package already installed",
            ProblemKind::Requires => "broken dependencies",
            ProblemKind::Conflict => "package conflicts",
            ProblemKind::NewFileConflict | ProblemKind::FileConflict => "file conflicts",
            ProblemKind::OldPackage => "older package(s)",
            ProblemKind::DiskSpace => "insufficient disk space",
            ProblemKind::DiskNodes => "insufficient disk inodes",
        }
    }

    fn summarizer(self) -> Summarizer {
        match self {
            ProblemKind::DiskSpace => disk_space_details,
            ProblemKind::Requires => dependency_details,
            _ => no_details,
        }
    }
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One raw diagnostic from the transaction engine
///
/// Field meaning depends on the kind:
/// - `Requires`: `package` lacks the capability `detail`, which `related`
///   (when known) no longer provides
/// - `Conflict`: `package` conflicts with the capability `detail`
/// - `DiskSpace`/`DiskNodes`: `detail` is the mount point, `num` the
///   additional bytes or inodes needed
/// - file conflicts: `detail` is the file, `related` the other package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    pub kind: ProblemKind,
    pub package: String,
    pub related: Option<String>,
    pub detail: String,
    pub num: u64,
}

impl Problem {
    pub fn new(kind: ProblemKind, package: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            package: package.into(),
            related: None,
            detail: detail.into(),
            num: 0,
        }
    }

    pub fn with_related(mut self, related: impl Into<String>) -> Self {
        self.related = Some(related.into());
        self
    }

    pub fn with_num(mut self, num: u64) -> Self {
        self.num = num;
        self
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ProblemKind::Requires => write!(f, "{} is needed by {}", self.detail, self.package)?,
            ProblemKind::Conflict => write!(f, "{} conflicts with {}", self.detail, self.package)?,
            ProblemKind::DiskSpace => write!(
                f,
                "installing package {} needs {} more space on the {} filesystem",
                self.package,
                human_size(self.num),
                self.detail
            )?,
            ProblemKind::DiskNodes => write!(
                f,
                "installing package {} needs {} more inodes on the {} filesystem",
                self.package, self.num, self.detail
            )?,
            _ => write!(f, "{}: {}", self.kind, self.package)?,
        }
        if let (Some(related), ProblemKind::Requires) = (&self.related, self.kind) {
            write!(f, " (from {})", related)?;
        }
        Ok(())
    }
}

/// Kind-specific aggregation of a summary's problems
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryDetails {
    /// Nothing beyond the label
    None,
    /// Largest additional space needed, by mount point
    DiskSpace(BTreeMap<String, u64>),
    /// Package lacking requirements -> package no longer providing them -> capabilities
    Requires(BTreeMap<String, BTreeMap<Option<String>, BTreeSet<String>>>),
}

/// All problems of one kind, with their aggregated details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemSummary {
    pub kind: ProblemKind,
    pub problems: Vec<Problem>,
    pub details: SummaryDetails,
}

impl ProblemSummary {
    pub fn new(kind: ProblemKind, problems: Vec<Problem>) -> Self {
        let details = (kind.summarizer())(&problems);
        Self {
            kind,
            problems,
            details,
        }
    }

    /// One line per aggregated entry
    pub fn detail_lines(&self) -> Vec<String> {
        match &self.details {
            SummaryDetails::None => Vec::new(),
            SummaryDetails::DiskSpace(needs) => needs
                .iter()
                .map(|(mnt, size)| format!("{} needs {} more free space", mnt, human_size(*size)))
                .collect(),
            SummaryDetails::Requires(pkgprobs) => pkgprobs
                .iter()
                .flat_map(|(pkg, providers)| {
                    providers.iter().map(move |(provider, caps)| {
                        let caps = caps.iter().map(String::as_str).collect::<Vec<_>>().join(", ");
                        match provider {
                            Some(provider) => format!("{} requires {} from {}", pkg, caps, provider),
                            None => format!("{} requires {}", pkg, caps),
                        }
                    })
                })
                .collect(),
        }
    }
}

impl fmt::Display for ProblemSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lines = self.detail_lines();
        if lines.is_empty() {
            return f.write_str(self.kind.label());
        }
        write!(f, "{}:", self.kind.label())?;
        for line in lines {
            write!(f, "\n  {}", line)?;
        }
        Ok(())
    }
}

fn no_details(_problems: &[Problem]) -> SummaryDetails {
    SummaryDetails::None
}

fn disk_space_details(problems: &[Problem]) -> SummaryDetails {
    let mut needs: BTreeMap<String, u64> = BTreeMap::new();
    for p in problems {
        let need = needs.entry(p.detail.clone()).or_insert(0);
        *need = (*need).max(p.num);
    }
    SummaryDetails::DiskSpace(needs)
}

fn dependency_details(problems: &[Problem]) -> SummaryDetails {
    let mut pkgprobs: BTreeMap<String, BTreeMap<Option<String>, BTreeSet<String>>> = BTreeMap::new();
    for p in problems {
        pkgprobs
            .entry(p.package.clone())
            .or_default()
            .entry(p.related.clone())
            .or_default()
            .insert(p.detail.clone());
    }
    SummaryDetails::Requires(pkgprobs)
}

/// Group problems into one summary per kind, ordered by kind
pub fn summarize_problems(problems: &[Problem]) -> Vec<ProblemSummary> {
    let kinds: BTreeSet<ProblemKind> = problems.iter().map(|p| p.kind).collect();
    kinds
        .into_iter()
        .map(|kind| {
            let of_kind = problems.iter().filter(|p| p.kind == kind).cloned().collect();
            ProblemSummary::new(kind, of_kind)
        })
        .collect()
}

fn render_summaries(summaries: &[ProblemSummary]) -> String {
    summaries
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Problems that stopped a transaction, with their summaries
#[derive(Error, Debug, Clone)]
#[error("upgrade transaction failed:\n{}", render_summaries(.summaries))]
pub struct TransactionError {
    pub problems: Vec<Problem>,
    pub summaries: Vec<ProblemSummary>,
}

impl TransactionError {
    pub fn new(problems: Vec<Problem>) -> Self {
        let summaries = summarize_problems(&problems);
        Self { problems, summaries }
    }
}

/// Format a byte count with a binary unit, e.g. `1.5 GiB`
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}
