use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, fmt};

use crate::types::PostureClassification;

/// Summary of the classifications currently held in history
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryStats {
    /// Number of recorded classifications
    pub total: usize,
    /// Good posture count
    pub good_count: usize,
    /// Good posture share in percent, one decimal
    pub good_percentage: f64,
    /// Bad posture count
    pub bad_count: usize,
    /// Bad posture share in percent, one decimal
    pub bad_percentage: f64,
}

impl HistoryStats {
    fn from_counts(good_count: usize, bad_count: usize) -> Self {
        let total = good_count + bad_count;
        Self {
            total,
            good_count,
            good_percentage: percentage(good_count, total),
            bad_count,
            bad_percentage: percentage(bad_count, total),
        }
    }
}

impl fmt::Display for HistoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples, good {} ({:.1}%), bad {} ({:.1}%)",
            self.total, self.good_count, self.good_percentage, self.bad_count, self.bad_percentage
        )
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Fixed-capacity FIFO of recent good/bad verdicts, oldest first
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<bool>,
    capacity: usize,
}

impl History {
    /// Create an empty history holding at most `capacity` entries (at least one)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a classification; `Unknown` is ignored
    ///
    /// Returns whether an entry was added.
    pub fn record(&mut self, classification: PostureClassification) -> bool {
        let good = match classification {
            PostureClassification::Good => true,
            PostureClassification::Bad => false,
            PostureClassification::Unknown => return false,
        };

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(good);
        true
    }

    /// Counts and percentages over the current contents
    #[must_use]
    pub fn stats(&self) -> HistoryStats {
        let good_count = self.entries.iter().filter(|&&good| good).count();
        HistoryStats::from_counts(good_count, self.entries.len() - good_count)
    }

    /// Entries in chronological order, `true` meaning good posture
    #[must_use]
    pub fn entries(&self) -> Vec<bool> {
        self.entries.iter().copied().collect()
    }

    /// Number of recorded entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries kept
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
