use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Tracks changing files until they have been quiet for the settle time.
#[derive(Debug)]
pub struct FileSettleTracker {
    /// Last time each path was reported as changed.
    pending: HashMap<PathBuf, Instant>,
    settle_time: Duration,
}

impl FileSettleTracker {
    pub fn new(settle_time: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            settle_time,
        }
    }

    pub fn file_changed(&mut self, path: PathBuf, at: Instant) {
        self.pending.insert(path, at);
    }

    /// Remove and return every path unchanged for at least the settle time,
    /// sorted so same-directory artifacts come out in name order.
    pub fn take_settled(&mut self, now: Instant) -> Vec<PathBuf> {
        let settle_time = self.settle_time;
        let mut settled = Vec::new();
        self.pending.retain(|path, last_change| {
            if now.saturating_duration_since(*last_change) >= settle_time {
                settled.push(path.clone());
                false
            } else {
                true
            }
        });
        settled.sort();
        settled
    }

    pub fn remove(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
