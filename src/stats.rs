/// Lock-free counters for atomic traffic issued against a target.
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct AtomicStats {
    plain_atomics: AtomicU64,
    pair_atomics: AtomicU64,
    cas_retries: AtomicU64,
    reducer_groups: AtomicU64,
    lanes_folded: AtomicU64,
    coalesced_pairs: AtomicU64,
}

/// Point-in-time copy of [`AtomicStats`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Single-element atomic adds
    pub plain_atomics: u64,
    /// Paired (2-wide) atomic adds
    pub pair_atomics: u64,
    /// Failed compare-and-swap attempts that had to be retried
    pub cas_retries: u64,
    /// Same-address lane groups formed by the cooperative reducer
    pub reducer_groups: u64,
    /// Lanes whose value was folded into a leader instead of issuing an atomic
    pub lanes_folded: u64,
    /// Leader pairs targeting adjacent elements merged into one paired atomic
    pub coalesced_pairs: u64,
}

impl StatsSnapshot {
    /// Atomic instructions that reached memory.
    pub fn atomics_issued(&self) -> u64 {
        self.plain_atomics + self.pair_atomics
    }

    /// Counter-wise difference `self - earlier`.
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            plain_atomics: self.plain_atomics - earlier.plain_atomics,
            pair_atomics: self.pair_atomics - earlier.pair_atomics,
            cas_retries: self.cas_retries - earlier.cas_retries,
            reducer_groups: self.reducer_groups - earlier.reducer_groups,
            lanes_folded: self.lanes_folded - earlier.lanes_folded,
            coalesced_pairs: self.coalesced_pairs - earlier.coalesced_pairs,
        }
    }
}

impl AtomicStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn plain(&self) {
        self.plain_atomics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pair(&self) {
        self.pair_atomics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retry(&self) {
        self.cas_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reduced(&self, groups: u64, folded: u64, coalesced: u64) {
        self.reducer_groups.fetch_add(groups, Ordering::Relaxed);
        self.lanes_folded.fetch_add(folded, Ordering::Relaxed);
        self.coalesced_pairs.fetch_add(coalesced, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            plain_atomics: self.plain_atomics.load(Ordering::Relaxed),
            pair_atomics: self.pair_atomics.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
            reducer_groups: self.reducer_groups.load(Ordering::Relaxed),
            lanes_folded: self.lanes_folded.load(Ordering::Relaxed),
            coalesced_pairs: self.coalesced_pairs.load(Ordering::Relaxed),
        }
    }
}
