// src/transaction/logpipe.rs

//! Named pipe carrying the package engine's output into tracing
//!
//! The engine and its scriptlets write to a file descriptor, not to our
//! logger. A private FIFO bridges the two: the engine gets the write end,
//! and a single worker thread reads lines and re-emits them as tracing
//! events under the `system_upgrade::rpm` target.

use crate::{Error, Result};
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tempfile::TempDir;
use tracing::{Level, debug, error, info, trace, warn};

/// Prefix the engine puts on its debug output
const DEBUG_PREFIX: &str = "D: ";

/// Log target for forwarded lines
const RPM_TARGET: &str = "system_upgrade::rpm";

/// A FIFO drained into the logger by a background thread
pub struct LogPipe {
    dir: Option<TempDir>,
    path: PathBuf,
    writer: Option<File>,
    worker: Option<JoinHandle<io::Result<usize>>>,
}

impl LogPipe {
    /// Open a pipe whose lines are logged at `level`
    pub fn open(level: Level) -> Result<Self> {
        Self::open_with_sink(level, log_line)
    }

    /// Open a pipe whose lines are handed to `sink`
    ///
    /// Returns once the worker has the read end open.
    pub fn open_with_sink<F>(level: Level, mut sink: F) -> Result<Self>
    where
        F: FnMut(Level, &str) + Send + 'static,
    {
        debug!("creating log pipe");
        let dir = tempfile::Builder::new().prefix("rpm-log-pipe.").tempdir()?;
        let path = dir.path().join("pipe");
        mkfifo(&path, Mode::S_IRUSR | Mode::S_IWUSR)?;

        debug!("starting logging thread");
        let reader_path = path.clone();
        let worker = thread::Builder::new()
            .name("pipelogger".to_string())
            .spawn(move || -> io::Result<usize> {
                debug!(target: RPM_TARGET, "opening pipe");
                let reader = BufReader::new(File::open(&reader_path)?);
                let count = forward_lines(reader, level, &mut sink)?;
                debug!(target: RPM_TARGET, "got EOF after {} lines", count);
                Ok(count)
            })?;

        // Opening the write end blocks until the worker opens the read end
        debug!("opening log pipe");
        let writer = OpenOptions::new().write(true).open(&path)?;

        Ok(Self {
            dir: Some(dir),
            path,
            writer: Some(writer),
            worker: Some(worker),
        })
    }

    /// Path of the FIFO
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A new handle on the write end
    ///
    /// Every handle must be dropped before [`LogPipe::close`], or the worker
    /// never sees end-of-stream.
    pub fn writer(&self) -> Result<File> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| Error::InvalidState("log pipe is closed".to_string()))?;
        Ok(writer.try_clone()?)
    }

    /// Close the write end, wait for the worker and remove the FIFO
    ///
    /// Returns the number of lines forwarded.
    pub fn close(mut self) -> Result<usize> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<usize> {
        debug!("closing log pipe");
        drop(self.writer.take());

        let count = match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| Error::IoError("log pipe worker panicked".to_string()))??,
            None => 0,
        };

        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        if let Some(dir) = self.dir.take() {
            dir.close()?;
        }
        Ok(count)
    }
}

impl Drop for LogPipe {
    fn drop(&mut self) {
        if self.worker.is_some()
            && let Err(e) = self.shutdown()
        {
            warn!("Failed to close log pipe {}: {}", self.path.display(), e);
        }
    }
}

/// Forward every line of `reader` to `sink`
///
/// Lines carrying the engine's debug prefix go out at debug level with the
/// prefix stripped; everything else at `level`.
pub fn forward_lines<R: BufRead>(
    mut reader: R,
    level: Level,
    sink: &mut dyn FnMut(Level, &str),
) -> io::Result<usize> {
    let mut buf = Vec::new();
    let mut count = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(count);
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end();
        match line.strip_prefix(DEBUG_PREFIX) {
            Some(rest) => sink(Level::DEBUG, rest),
            None => sink(level, line),
        }
        count += 1;
    }
}

/// Emit one forwarded line as a tracing event
fn log_line(level: Level, line: &str) {
    if level == Level::ERROR {
        error!(target: RPM_TARGET, "{}", line);
    } else if level == Level::WARN {
        warn!(target: RPM_TARGET, "{}", line);
    } else if level == Level::INFO {
        info!(target: RPM_TARGET, "{}", line);
    } else if level == Level::DEBUG {
        debug!(target: RPM_TARGET, "{}", line);
    } else {
        trace!(target: RPM_TARGET, "{}", line);
    }
}
