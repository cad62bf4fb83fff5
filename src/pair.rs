/// Pair-atomic adapter: atomically adds a packed pair of 16-bit floats to two
/// contiguous, 4-byte aligned elements and returns the previous pair.
///
/// Two interchangeable backends exist:
///   - `NativePairAdd`: the target has a packed fp16x2/bf16x2 atomic add.
///     On the host it is a single read-modify-write of the word.
///   - `CasPairAdd`: no instruction; read the word, add lane-wise, and
///     compare-and-swap until no other writer got in between.
/// The backend is picked once per target and element kind (see `PairBackend`).
use crate::arch::PairSupport;
use crate::precision::{HalfFloat, Pair};
use crate::stats::AtomicStats;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::trace;

pub trait PairAtomicAdd {
    /// Add `value` to the pair stored in `slot`, returning the pair **before**
    /// the addition. `slot` must be the word of a naturally aligned pair.
    fn fetch_add_pair<T: HalfFloat>(&self, slot: &AtomicU32, value: Pair<T>, stats: &AtomicStats) -> Pair<T>;
}

/// Hardware packed atomic add.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativePairAdd;

impl PairAtomicAdd for NativePairAdd {
    fn fetch_add_pair<T: HalfFloat>(&self, slot: &AtomicU32, value: Pair<T>, stats: &AtomicStats) -> Pair<T> {
        stats.pair();
        // One instruction on the device; fetch_update is how a host expresses it.
        let prev = slot
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some(Pair::<T>::from_bits(bits).add(value).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        Pair::from_bits(prev)
    }
}

/// Compare-and-swap emulation over the packed bit pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct CasPairAdd;

impl PairAtomicAdd for CasPairAdd {
    fn fetch_add_pair<T: HalfFloat>(&self, slot: &AtomicU32, value: Pair<T>, stats: &AtomicStats) -> Pair<T> {
        stats.pair();
        let mut current = slot.load(Ordering::Relaxed);
        loop {
            let next = Pair::<T>::from_bits(current).add(value).to_bits();
            match slot.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
                Ok(prev) => return Pair::from_bits(prev),
                Err(observed) => {
                    // A failed attempt always observes a newer word (or spurious failure).
                    stats.retry();
                    trace!(expected = current, observed, "pair CAS retry");
                    current = observed;
                }
            }
        }
    }
}

/// Per-kind backend selection, fixed when the target is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairBackend {
    Native,
    CasLoop,
    /// Pairing disabled; callers must take the single-element path.
    Unavailable,
}

impl PairBackend {
    pub fn is_available(self) -> bool {
        self != PairBackend::Unavailable
    }

    /// Issue the paired add, or `None` if this target has no pair backend.
    pub fn fetch_add_pair<T: HalfFloat>(
        self,
        slot: &AtomicU32,
        value: Pair<T>,
        stats: &AtomicStats,
    ) -> Option<Pair<T>> {
        match self {
            PairBackend::Native      => Some(NativePairAdd.fetch_add_pair(slot, value, stats)),
            PairBackend::CasLoop     => Some(CasPairAdd.fetch_add_pair(slot, value, stats)),
            PairBackend::Unavailable => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PairBackend::Native      => "native",
            PairBackend::CasLoop     => "cas-loop",
            PairBackend::Unavailable => "unavailable",
        }
    }
}

impl From<PairSupport> for PairBackend {
    fn from(support: PairSupport) -> Self {
        match support {
            PairSupport::Native      => PairBackend::Native,
            PairSupport::CasLoop     => PairBackend::CasLoop,
            PairSupport::Unavailable => PairBackend::Unavailable,
        }
    }
}
