//! Windowed consensus tracking of bib observations.
//!
//! A single noisy recognition must not trigger a persisted record, but the
//! pipeline also must not wait for a closing analysis window: an identifier
//! becomes eligible within the same frame its evidence count crosses the
//! threshold.

use std::collections::{HashMap, HashSet};

use crate::normalize::BibNumber;

/// Sliding-evidence filter over per-frame bib sightings.
///
/// Per processed frame, every bib seen in the frame gains one count and
/// every tracked bib absent from the frame loses one; entries that reach
/// zero are removed. The table is bounded: when it overflows, the
/// lowest-count entries are evicted first (ties broken by ascending bib
/// value, so behavior is reproducible).
#[derive(Debug)]
pub struct ConsensusTracker {
    counts: HashMap<BibNumber, u32>,
    min_frames: u32,
    max_entries: usize,
}

impl ConsensusTracker {
    pub fn new(min_frames: u32, max_entries: usize) -> Self {
        Self {
            counts: HashMap::new(),
            min_frames: min_frames.max(1),
            max_entries: max_entries.max(1),
        }
    }

    /// Fold one processed frame's accepted bibs into the table.
    ///
    /// Returns the bibs that are confirmation-eligible as of this frame:
    /// present in it and at or above the evidence threshold after the
    /// update. Eligibility is computed after eviction, so an entry cannot
    /// be both evicted and eligible in the same decision.
    pub fn observe_frame(&mut self, present: &HashSet<BibNumber>) -> Vec<BibNumber> {
        for bib in present {
            *self.counts.entry(*bib).or_insert(0) += 1;
        }

        self.counts.retain(|bib, count| {
            if !present.contains(bib) {
                *count -= 1;
            }
            *count > 0
        });

        if self.counts.len() > self.max_entries {
            self.evict_overflow();
        }

        let mut eligible: Vec<BibNumber> = present
            .iter()
            .filter(|bib| self.counts.get(*bib).is_some_and(|c| *c >= self.min_frames))
            .copied()
            .collect();
        eligible.sort();
        eligible
    }

    fn evict_overflow(&mut self) {
        let excess = self.counts.len() - self.max_entries;
        let mut entries: Vec<(BibNumber, u32)> =
            self.counts.iter().map(|(b, c)| (*b, *c)).collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)));
        for (bib, count) in entries.into_iter().take(excess) {
            log::debug!("tracking table full, evicting bib {} (count {})", bib, count);
            self.counts.remove(&bib);
        }
    }

    /// Current count for a bib, zero when untracked.
    pub fn count(&self, bib: &BibNumber) -> u32 {
        self.counts.get(bib).copied().unwrap_or(0)
    }

    /// Number of distinct tracked bibs.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Operator command: drop all tracking state.
    pub fn clear(&mut self) {
        self.counts.clear();
    }
}
