//! Bounded in-memory diagnostic log.
//!
//! Decoder and context failures are recorded here so they can be shown in
//! the debug overlay and returned by `gwctl status`. Every entry is also
//! forwarded to the `log` facade.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Maximum number of retained entries
pub const MAX_ENTRIES: usize = 50;

/// Ring buffer of `HH:MM:SS.mmm [tag] message` lines
#[derive(Debug)]
pub struct DiagnosticLog {
    entries: Mutex<VecDeque<String>>,
    capacity: usize,
    revision: AtomicU64,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTRIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            revision: AtomicU64::new(0),
        }
    }

    /// Append an entry, evicting the oldest one when full
    pub fn record(&self, tag: &str, message: impl AsRef<str>) {
        let message = message.as_ref();
        log::info!("[{}] {}", tag, message);

        let line = format!(
            "{} [{}] {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            tag,
            message
        );

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(line);
        self.revision.fetch_add(1, Ordering::Release);
    }

    /// Bumped on every append
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// All entries, oldest first
    pub fn lines(&self) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().cloned().collect()
    }

    /// The newest `count` entries, oldest first
    pub fn tail(&self, count: usize) -> Vec<String> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::new()
    }
}
