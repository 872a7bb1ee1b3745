use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::rr::{Record, SerialNumber};

/// Whether a journal entry records a removal or an addition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Removed,
    Added,
}

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub kind: ChangeKind,
    pub record: Record,
}

/// One committed zone change: the SOA pair bracketing the deleted and added
/// records, in the exact order a secondary replays them for IXFR.
#[derive(Debug, Clone)]
pub struct Commit {
    pub committed_at: DateTime<Utc>,
    pub old_serial: SerialNumber,
    pub new_serial: SerialNumber,
    pub entries: Vec<JournalEntry>,
}

/// Bounded history of zone commits, ordered by SOA serial.
///
/// History never covers more than the zone's SOA EXPIRE interval; eviction
/// always removes whole commits, oldest first, so any serial present in the
/// journal can be replayed contiguously to the head.
#[derive(Debug, Default)]
pub struct Journal {
    commits: Mutex<VecDeque<Commit>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a commit and evict history older than `retention`.
    pub fn append(&self, commit: Commit, retention: Duration, now: DateTime<Utc>) {
        let mut commits = self.commits.lock().expect("journal poisoned");
        commits.push_back(commit);

        let horizon = now - retention;
        while let Some(oldest) = commits.front() {
            if oldest.committed_at < horizon {
                commits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Number of retained commits.
    pub fn len(&self) -> usize {
        self.commits.lock().expect("journal poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.lock().expect("journal poisoned").is_empty()
    }

    /// Snapshot of the retained history.
    pub fn commits(&self) -> Vec<Commit> {
        self.commits
            .lock()
            .expect("journal poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Commits after the given serial, for an IXFR response.
    ///
    /// Returns `None` when the serial predates retained history or does not
    /// line up with a commit boundary; the caller falls back to AXFR.
    pub fn commits_since(&self, serial: SerialNumber) -> Option<Vec<Commit>> {
        let commits = self.commits.lock().expect("journal poisoned");
        if let Some(newest) = commits.back()
            && newest.new_serial == serial
        {
            return Some(Vec::new());
        }
        let start = commits
            .iter()
            .position(|commit| commit.old_serial == serial)?;
        Some(commits.iter().skip(start).cloned().collect())
    }

    /// Restore history from a persisted snapshot.
    pub fn restore(&self, history: Vec<Commit>) {
        let mut commits = self.commits.lock().expect("journal poisoned");
        commits.clear();
        commits.extend(history);
    }
}
