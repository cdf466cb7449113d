// src/progress.rs

//! Progress reporting for long-running upgrade steps
//!
//! The transaction engine reports through [`ProgressTracker`] so the same
//! run can drive a terminal bar, the log, or nothing at all.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

/// Receives progress updates
pub trait ProgressTracker: Send + Sync {
    /// Set the current status message
    fn set_message(&self, message: &str);

    fn increment(&self, amount: u64);

    fn set_position(&self, position: u64);

    fn set_length(&self, length: u64);

    fn position(&self) -> u64;

    fn length(&self) -> u64;

    fn finish_with_message(&self, message: &str);

    fn finish_with_error(&self, message: &str);

    fn is_finished(&self) -> bool;
}

/// Position/length/finished state shared by the trackers below
#[derive(Debug, Default)]
struct Counter {
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl Counter {
    fn with_length(length: u64) -> Self {
        Self {
            length: AtomicU64::new(length),
            ..Default::default()
        }
    }

    fn add(&self, amount: u64) -> u64 {
        self.position.fetch_add(amount, Ordering::Relaxed) + amount
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    fn length(&self) -> u64 {
        self.length.load(Ordering::Relaxed)
    }

    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn finish(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

/// Tracker that only counts
#[derive(Debug, Default)]
pub struct SilentProgress {
    counter: Counter,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressTracker for SilentProgress {
    fn set_message(&self, _message: &str) {}

    fn increment(&self, amount: u64) {
        self.counter.add(amount);
    }

    fn set_position(&self, position: u64) {
        self.counter.set_position(position);
    }

    fn set_length(&self, length: u64) {
        self.counter.set_length(length);
    }

    fn position(&self) -> u64 {
        self.counter.position()
    }

    fn length(&self) -> u64 {
        self.counter.length()
    }

    fn finish_with_message(&self, _message: &str) {
        self.counter.finish();
    }

    fn finish_with_error(&self, _message: &str) {
        self.counter.finish();
    }

    fn is_finished(&self) -> bool {
        self.counter.is_finished()
    }
}

/// Tracker that logs at info level
///
/// Used by the one-shot boot, where there is no terminal to draw on.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    counter: Counter,
    /// Only log every N increments
    log_interval: u64,
}

impl LogProgress {
    pub fn new(name: impl Into<String>, length: u64) -> Self {
        Self {
            name: name.into(),
            counter: Counter::with_length(length),
            log_interval: std::cmp::max(1, length / 10),
        }
    }
}

impl ProgressTracker for LogProgress {
    fn set_message(&self, message: &str) {
        info!("{}: {}", self.name, message);
    }

    fn increment(&self, amount: u64) {
        let new_pos = self.counter.add(amount);
        let old_pos = new_pos - amount;
        let length = self.counter.length();

        if length > 0 && self.log_interval > 0 && new_pos / self.log_interval > old_pos / self.log_interval {
            info!("{}: {}% ({}/{})", self.name, (new_pos * 100) / length, new_pos, length);
        }
    }

    fn set_position(&self, position: u64) {
        self.counter.set_position(position);
    }

    fn set_length(&self, length: u64) {
        self.counter.set_length(length);
    }

    fn position(&self) -> u64 {
        self.counter.position()
    }

    fn length(&self) -> u64 {
        self.counter.length()
    }

    fn finish_with_message(&self, message: &str) {
        self.counter.finish();
        info!("{}: {}", self.name, message);
    }

    fn finish_with_error(&self, message: &str) {
        self.counter.finish();
        info!("{}: ERROR - {}", self.name, message);
    }

    fn is_finished(&self) -> bool {
        self.counter.is_finished()
    }
}
