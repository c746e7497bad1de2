//! Deduplication gate.
//!
//! Ensures each confirmed bib triggers at most one persisted record per
//! process. The guarantee is at-least-once-per-bib-per-process: a race with
//! another process between the remote existence check and its insert can
//! still produce a duplicate remote record.

use std::collections::BTreeSet;

use crate::normalize::BibNumber;
use crate::store::RunnerStore;

/// Gate decision for one confirmation-eligible bib.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    /// Already handled in this run; nothing to do.
    AlreadyConfirmed,
    /// The remote store already has this bib (cross-run duplicate);
    /// memoized locally, no job enqueued.
    KnownRemote,
    /// First sighting anywhere: enqueue an upload job.
    NewConfirmation,
}

/// Local confirmed-set plus the remote existence check.
///
/// The set is append-only during a run and cleared only by explicit
/// operator action. A `BTreeSet` keeps run summaries sorted for free.
#[derive(Debug, Default)]
pub struct DedupGate {
    confirmed: BTreeSet<BibNumber>,
}

impl DedupGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide what to do with a confirmation-eligible bib.
    ///
    /// The remote check happens-before any enqueue the caller performs for
    /// this bib. Once a bib lands in the confirmed set, whether from a
    /// fresh confirmation or a remote hit, no further remote queries are
    /// made for it during this run (intentional memoization).
    ///
    /// A failing remote check is logged and treated as "not present": with
    /// an unreachable store the pipeline leans on the at-least-once
    /// guarantee rather than dropping the sighting.
    pub fn evaluate(&mut self, bib: &BibNumber, store: &mut dyn RunnerStore) -> GateOutcome {
        if self.confirmed.contains(bib) {
            return GateOutcome::AlreadyConfirmed;
        }

        let known_remote = match store.exists(bib) {
            Ok(known) => known,
            Err(err) => {
                log::warn!("remote existence check failed for bib {}: {}", bib, err);
                false
            }
        };

        self.confirmed.insert(*bib);
        if known_remote {
            log::debug!("bib {} already recorded remotely, skipping", bib);
            GateOutcome::KnownRemote
        } else {
            GateOutcome::NewConfirmation
        }
    }

    /// Number of bibs confirmed this run.
    pub fn len(&self) -> usize {
        self.confirmed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty()
    }

    /// Confirmed bibs in ascending numeric order (run summary).
    pub fn sorted(&self) -> Vec<BibNumber> {
        self.confirmed.iter().copied().collect()
    }

    /// Operator command: forget all confirmations for this run.
    pub fn clear(&mut self) {
        self.confirmed.clear();
    }
}
