//! Kernel log buffer.
//!
//! Bounded in-memory ring of structured entries with a severity filter for
//! console emission. The buffer is the kernel's logging subsystem: there is
//! no process-wide logger, every component receives an `Arc<KernelLog>` at
//! construction so tests can instantiate isolated kernels.
//!
//! # Guarantees
//! - Entries from a single thread appear in that thread's log order.
//! - Across threads, order is commit order to the buffer.
//! - Console writes are line-atomic (one `writeln!` under the stdout lock).
//! - At capacity the oldest entry is evicted; evictions are counted.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::hal::Hal;

/// Severity, ordered lowest to highest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Trace => "TRC",
            Level::Debug => "DBG",
            Level::Info => "INF",
            Level::Warn => "WRN",
            Level::Error => "ERR",
            Level::Critical => "CRT",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One committed log record.
#[derive(Clone, Debug)]
pub struct LogEntry {
    /// Nanoseconds since boot (HAL clock).
    pub at_ns: u64,
    pub level: Level,
    /// Producing thread's name, or its id when unnamed.
    pub thread: String,
    pub message: String,
}

impl LogEntry {
    fn render(&self) -> String {
        let secs = self.at_ns / 1_000_000_000;
        let millis = (self.at_ns / 1_000_000) % 1_000;
        format!(
            "[{secs:>5}.{millis:03}] [{}] [{}] {}",
            self.level, self.thread, self.message
        )
    }
}

struct LogInner {
    buf: VecDeque<LogEntry>,
    evicted: u64,
}

/// Observable buffer counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogStats {
    /// Entries currently buffered.
    pub buffered: usize,
    /// Entries evicted since boot.
    pub evicted: u64,
}

/// Bounded structured log with synchronous console emission.
pub struct KernelLog {
    hal: Arc<Hal>,
    capacity: usize,
    console_level: Level,
    inner: Mutex<LogInner>,
}

impl KernelLog {
    pub fn new(hal: Arc<Hal>, capacity: usize, console_level: Level) -> Self {
        assert!(capacity > 0, "log capacity must be > 0");
        Self {
            hal,
            capacity,
            console_level,
            inner: Mutex::new(LogInner {
                buf: VecDeque::with_capacity(capacity.min(1024)),
                evicted: 0,
            }),
        }
    }

    /// Commits one entry, echoing it to the console when `level` passes the
    /// severity filter. Console write failures are dropped: losing a console
    /// line must not fail the producing subsystem.
    pub fn log(&self, level: Level, message: impl Into<String>) {
        let entry = LogEntry {
            at_ns: self.hal.now_ns(),
            level,
            thread: thread_tag(),
            message: message.into(),
        };

        if level >= self.console_level {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{}", entry.render());
        }

        let mut inner = self.inner.lock().expect("log buffer mutex poisoned");
        if inner.buf.len() >= self.capacity {
            inner.buf.pop_front();
            inner.evicted += 1;
        }
        inner.buf.push_back(entry);
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.log(Level::Trace, message);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(Level::Error, message);
    }

    pub fn critical(&self, message: impl Into<String>) {
        self.log(Level::Critical, message);
    }

    /// Writes a snapshot of the buffer to `w` in insertion order.
    ///
    /// The snapshot is taken under the buffer lock; the write happens after,
    /// so slow writers never block producers.
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let entries: Vec<LogEntry> = {
            let inner = self.inner.lock().expect("log buffer mutex poisoned");
            inner.buf.iter().cloned().collect()
        };
        for entry in &entries {
            writeln!(w, "{}", entry.render())?;
        }
        Ok(())
    }

    /// Snapshot of buffered entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        let inner = self.inner.lock().expect("log buffer mutex poisoned");
        inner.buf.iter().cloned().collect()
    }

    pub fn stats(&self) -> LogStats {
        let inner = self.inner.lock().expect("log buffer mutex poisoned");
        LogStats {
            buffered: inner.buf.len(),
            evicted: inner.evicted,
        }
    }
}

fn thread_tag() -> String {
    let current = thread::current();
    match current.name() {
        Some(name) => name.to_owned(),
        None => format!("{:?}", current.id()),
    }
}
