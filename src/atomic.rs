/// Atomic accumulation into 16-bit float buffers.
///
/// `atomic_add` is the plain single-element add every target supports.
/// `fast_atomic_add` upgrades it to a paired add whenever the logically
/// adjacent element belongs to the same buffer, placing the additive identity
/// in the partner slot. Pairing is declined at the buffer edges so no byte
/// outside `[buffer[0], buffer[numel])` is ever touched.
use crate::arch::ArchConfig;
use crate::memory::{DeviceBuffer, half_of, with_half};
use crate::pair::PairBackend;
use crate::precision::{ELEM_BYTES, ElementKind, HalfFloat, PAIR_BYTES, Pair};
use crate::stats::AtomicStats;
use std::sync::atomic::Ordering;
use tracing::{debug, trace};

/// Atomic capabilities of one execution target, resolved once at build time.
#[derive(Debug)]
pub struct AtomicTarget {
    pub arch_name: String,
    f16_pairs: PairBackend,
    bf16_pairs: PairBackend,
    lane_match: bool,
    stats: AtomicStats,
}

impl AtomicTarget {
    pub fn new(arch: &ArchConfig) -> Self {
        let target = AtomicTarget {
            arch_name: arch.name.clone(),
            f16_pairs: arch.pair_support(ElementKind::F16).into(),
            bf16_pairs: arch.pair_support(ElementKind::BF16).into(),
            lane_match: arch.has_lane_match(),
            stats: AtomicStats::new(),
        };
        debug!(
            arch = %target.arch_name,
            fp16x2 = target.f16_pairs.name(),
            bf16x2 = target.bf16_pairs.name(),
            lane_match = target.lane_match,
            "atomic target selected"
        );
        target
    }

    pub fn pair_backend(&self, kind: ElementKind) -> PairBackend {
        match kind {
            ElementKind::F16  => self.f16_pairs,
            ElementKind::BF16 => self.bf16_pairs,
        }
    }

    /// Whether the cooperative-lane reducer can run on this target.
    pub fn has_lane_match(&self) -> bool {
        self.lane_match
    }

    pub fn stats(&self) -> &AtomicStats {
        &self.stats
    }
}

/// Plain atomic add: `buffer[index] += value`.
///
/// Implemented as a compare-and-swap on the enclosing 32-bit word that only
/// rewrites this element's 16 bits, so the neighbor sharing the word keeps its
/// exact bit pattern. Returns the previous value.
pub fn atomic_add<T: HalfFloat>(target: &AtomicTarget, buffer: &DeviceBuffer<'_, T>, index: usize, value: T) -> T {
    let addr = buffer.addr_of(index);
    let word = buffer.elem_word(addr);
    target.stats.plain();

    let mut current = word.load(Ordering::Relaxed);
    loop {
        let old = T::from_bits(half_of(current, addr));
        let next = with_half(current, addr, old.add(value).to_bits());
        match word.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return old,
            Err(observed) => {
                target.stats.retry();
                trace!(index, addr, "plain CAS retry");
                current = observed;
            }
        }
    }
}

/// Atomic add with the same effect as [`atomic_add`], issued as a paired
/// atomic when that is safe.
///
/// `numel` is the element count of the buffer; `index` must be in `[0, numel)`.
/// With `use_fast_path == false`, or on a target without a pair backend for
/// `T`, this is exactly [`atomic_add`].
pub fn fast_atomic_add<T: HalfFloat>(
    target: &AtomicTarget,
    buffer: &DeviceBuffer<'_, T>,
    index: usize,
    numel: usize,
    value: T,
    use_fast_path: bool,
) {
    debug_assert!(index < numel && numel <= buffer.len());

    let backend = target.pair_backend(T::KIND);
    if !use_fast_path || !backend.is_available() {
        atomic_add(target, buffer, index, value);
        return;
    }

    let addr = buffer.addr_of(index);
    let is_low = addr % PAIR_BYTES == 0;

    if is_low && index + 1 < numel {
        // Right neighbor exists: pair starts here.
        backend.fetch_add_pair(buffer.pair_word(addr), Pair::low(value), &target.stats);
    } else if !is_low && index > 0 {
        // Left neighbor exists: pair starts one element back.
        let pair_addr = addr - ELEM_BYTES;
        backend.fetch_add_pair(buffer.pair_word(pair_addr), Pair::high(value), &target.stats);
    } else {
        atomic_add(target, buffer, index, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::HBM;
    use half::{bf16, f16};

    fn h(v: f32) -> f16 {
        f16::from_f32(v)
    }

    #[test]
    fn scenario_two_lanes_middle_of_buffer() {
        let target = AtomicTarget::new(&ArchConfig::h100());
        let hbm = HBM::new(1 << 16);
        let alloc = hbm.alloc::<f16>(4).unwrap();
        let buf = alloc.view();

        fast_atomic_add(&target, &buf, 1, 4, h(1.0), true);
        fast_atomic_add(&target, &buf, 2, 4, h(2.0), true);

        assert_eq!(buf.read(), vec![h(0.0), h(1.0), h(2.0), h(0.0)]);
        assert_eq!(target.stats().snapshot().pair_atomics, 2);
        assert_eq!(buf.touched(), Some(buf.byte_range()));
    }

    #[test]
    fn single_element_buffer_never_pairs() {
        let target = AtomicTarget::new(&ArchConfig::h100());
        let hbm = HBM::new(1 << 16);
        let alloc = hbm.alloc::<f16>(1).unwrap();
        let buf = alloc.view();

        fast_atomic_add(&target, &buf, 0, 1, h(5.0), true);

        assert_eq!(buf.read(), vec![h(5.0)]);
        let s = target.stats().snapshot();
        assert_eq!((s.plain_atomics, s.pair_atomics), (1, 0));
        assert_eq!(buf.touched(), Some(buf.byte_range()));
    }

    #[test]
    fn high_member_at_index_zero_falls_back() {
        let target = AtomicTarget::new(&ArchConfig::a100());
        let hbm = HBM::new(1 << 16);
        let alloc = hbm.alloc::<bf16>(6).unwrap();
        alloc.write(&[bf16::from_f32(9.0); 6]).unwrap();
        // Starts at an odd element, so index 0 is the high member of its pair.
        let buf = alloc.view_range(1, 4).unwrap();

        fast_atomic_add(&target, &buf, 0, 4, bf16::from_f32(1.0), true);
        fast_atomic_add(&target, &buf, 3, 4, bf16::from_f32(1.0), true);

        let all = alloc.read();
        assert_eq!(all[0], bf16::from_f32(9.0));
        assert_eq!(all[1], bf16::from_f32(10.0));
        assert_eq!(all[4], bf16::from_f32(10.0));
        assert_eq!(all[5], bf16::from_f32(9.0));
        // index 0 is high with no left neighbor, index 3 is low with no right
        // neighbor: both must take the plain path.
        assert_eq!(target.stats().snapshot().pair_atomics, 0);
        let touched = buf.touched().unwrap();
        assert!(touched.start >= buf.byte_range().start);
        assert!(touched.end <= buf.byte_range().end);
    }

    #[test]
    fn fast_path_flag_off_forces_plain() {
        let target = AtomicTarget::new(&ArchConfig::h100());
        let hbm = HBM::new(1 << 16);
        let alloc = hbm.alloc::<f16>(8).unwrap();
        let buf = alloc.view();
        for i in 0..8 {
            fast_atomic_add(&target, &buf, i, 8, h(1.0), false);
        }
        let s = target.stats().snapshot();
        assert_eq!((s.plain_atomics, s.pair_atomics), (8, 0));
        assert!(buf.read().iter().all(|v| *v == h(1.0)));
    }

    #[test]
    fn older_generation_never_pairs() {
        let target = AtomicTarget::new(&ArchConfig::v100());
        let hbm = HBM::new(1 << 16);
        let alloc = hbm.alloc::<bf16>(8).unwrap();
        let buf = alloc.view();
        for i in 0..8 {
            fast_atomic_add(&target, &buf, i, 8, bf16::from_f32(2.0), true);
        }
        assert_eq!(target.stats().snapshot().pair_atomics, 0);
        assert!(buf.read().iter().all(|v| *v == bf16::from_f32(2.0)));
    }

    #[test]
    fn neighbor_signed_zero_survives_pairing() {
        let target = AtomicTarget::new(&ArchConfig::mi250());
        let hbm = HBM::new(1 << 16);
        let alloc = hbm.alloc::<f16>(2).unwrap();
        alloc.write(&[f16::NEG_ZERO, f16::NEG_ZERO]).unwrap();
        let buf = alloc.view();

        fast_atomic_add(&target, &buf, 0, 2, h(3.0), true);

        let out = buf.read();
        assert_eq!(out[0], h(3.0));
        assert_eq!(out[1].to_bits(), f16::NEG_ZERO.to_bits());
    }

    #[test]
    fn plain_add_returns_previous_value() {
        let target = AtomicTarget::new(&ArchConfig::k80());
        let hbm = HBM::new(1 << 16);
        let alloc = hbm.alloc::<f16>(3).unwrap();
        let buf = alloc.view();
        assert_eq!(atomic_add(&target, &buf, 2, h(4.0)), h(0.0));
        assert_eq!(atomic_add(&target, &buf, 2, h(4.0)), h(4.0));
        assert_eq!(buf.get(2), h(8.0));
    }
}
