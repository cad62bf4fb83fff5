/// Cooperative-lane reducer.
///
/// When several lanes of one step add into the same element, only one atomic
/// is needed: lanes are grouped by destination with `match_any`, the lowest
/// lane of each group becomes the leader, and the leader gathers the group's
/// values through shuffles before issuing a single `fast_atomic_add`.
///
/// Leaders that land on the two halves of the same naturally aligned pair
/// from adjacent lanes are merged once more into one paired atomic carrying
/// both totals.
use crate::atomic::{AtomicTarget, fast_atomic_add};
use crate::memory::DeviceBuffer;
use crate::precision::{ELEM_BYTES, HalfFloat, PAIR_BYTES, Pair};
use crate::warp::LaneCollective;

/// One lane's contribution for the current step: `buffer[index] += value`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneContribution<T> {
    pub index: usize,
    pub value: T,
}

impl<T> LaneContribution<T> {
    pub fn new(index: usize, value: T) -> Self {
        LaneContribution { index, value }
    }
}

/// What one reducer step sent to memory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReduceOutcome {
    /// Contribution groups formed; one per active lane when the target
    /// cannot match lanes
    pub groups: u32,
    /// Atomic operations issued (plain or paired)
    pub atomics_issued: u32,
    /// Adjacent-lane leader pairs merged into one paired atomic
    pub coalesced_pairs: u32,
}

/// Warp-cooperative `fast_atomic_add`.
///
/// `lanes[i]` is lane `i`'s contribution, `None` for lanes with nothing to add.
/// Lanes outside the warp's active mask are ignored. Every index must be in
/// `[0, numel)`. On targets without lane matching each lane falls back to its
/// own `fast_atomic_add`.
pub fn opportunistic_fast_atomic_add<T: HalfFloat, W: LaneCollective>(
    target: &AtomicTarget,
    warp: &W,
    buffer: &DeviceBuffer<'_, T>,
    numel: usize,
    lanes: &[Option<LaneContribution<T>>],
) -> ReduceOutcome {
    let width = warp.width();
    let active = warp.active_mask();
    let ops: Vec<Option<LaneContribution<T>>> = (0..width)
        .map(|lane| if active.contains(lane) { lanes.get(lane).copied().flatten() } else { None })
        .collect();

    let mut outcome = ReduceOutcome::default();

    if !target.has_lane_match() {
        for op in ops.iter().flatten() {
            fast_atomic_add(target, buffer, op.index, numel, op.value, true);
            outcome.groups += 1;
            outcome.atomics_issued += 1;
        }
        return outcome;
    }

    let dst: Vec<Option<usize>> = ops.iter().map(|op| op.map(|c| buffer.addr_of(c.index))).collect();
    let values: Vec<T> = ops.iter().map(|op| op.map_or(T::NEUTRAL, |c| c.value)).collect();
    let groups = warp.match_any(&dst);

    // Leaders fold their group's values; everyone else is done after this.
    let mut totals: Vec<Option<T>> = vec![None; width];
    for lane in 0..width {
        let group = groups[lane];
        if group.first_active() != Some(lane) {
            continue;
        }
        let mut acc = values[lane];
        for src in group.iter().filter(|&src| src != lane) {
            acc = acc.add(warp.shfl(&values, src));
        }
        totals[lane] = Some(acc);
    }

    let contributing = ops.iter().flatten().count() as u32;
    outcome.groups = totals.iter().flatten().count() as u32;

    let backend = target.pair_backend(T::KIND);
    let leader_dst: Vec<Option<usize>> = (0..width).map(|lane| totals[lane].and(dst[lane])).collect();
    let next_dst = warp.shfl_down(&leader_dst, 1);
    let next_total = warp.shfl_down(&totals, 1);
    let prev_dst = warp.shfl_up(&leader_dst, 1);

    for lane in 0..width {
        let (Some(addr), Some(total), Some(op)) = (leader_dst[lane], totals[lane], ops[lane]) else {
            continue;
        };

        if backend.is_available() {
            let is_low = addr % PAIR_BYTES == 0;
            if is_low && lane + 1 < width && next_dst[lane] == Some(addr + ELEM_BYTES) {
                if let Some(hi) = next_total[lane] {
                    backend.fetch_add_pair(buffer.pair_word(addr), Pair::new(total, hi), target.stats());
                    outcome.atomics_issued += 1;
                    outcome.coalesced_pairs += 1;
                    continue;
                }
            }
            if !is_low && lane > 0 && prev_dst[lane] == Some(addr - ELEM_BYTES) {
                // Carried by the lane below.
                continue;
            }
        }

        fast_atomic_add(target, buffer, op.index, numel, total, true);
        outcome.atomics_issued += 1;
    }

    target.stats().reduced(
        outcome.groups as u64,
        (contributing - outcome.groups) as u64,
        outcome.coalesced_pairs as u64,
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::ArchConfig;
    use crate::memory::HBM;
    use crate::warp::{LaneMask, WARP_SIZE, Warp};
    use half::f16;

    fn h(v: f32) -> f16 {
        f16::from_f32(v)
    }

    #[test]
    fn hot_address_issues_one_atomic() {
        let target = AtomicTarget::new(&ArchConfig::h100());
        let hbm = HBM::new(1 << 16);
        let alloc = hbm.alloc::<f16>(16).unwrap();
        let buf = alloc.view();
        let warp = Warp::new(0, WARP_SIZE);
        let lanes: Vec<_> = (0..WARP_SIZE).map(|_| Some(LaneContribution::new(5, h(1.0)))).collect();

        let outcome = opportunistic_fast_atomic_add(&target, &warp, &buf, 16, &lanes);

        assert_eq!(outcome, ReduceOutcome { groups: 1, atomics_issued: 1, coalesced_pairs: 0 });
        assert_eq!(buf.get(5), h(32.0));
        let s = target.stats().snapshot();
        assert_eq!(s.atomics_issued(), 1);
        assert_eq!(s.lanes_folded, 31);
    }

    #[test]
    fn adjacent_leaders_share_one_pair() {
        let target = AtomicTarget::new(&ArchConfig::h100());
        let hbm = HBM::new(1 << 16);
        let alloc = hbm.alloc::<f16>(8).unwrap();
        let buf = alloc.view();
        let warp = Warp::new(0, 4);
        let lanes = [
            Some(LaneContribution::new(2, h(1.0))),
            Some(LaneContribution::new(3, h(2.0))),
            Some(LaneContribution::new(2, h(4.0))),
            None,
        ];

        let outcome = opportunistic_fast_atomic_add(&target, &warp, &buf, 8, &lanes);

        assert_eq!(outcome.groups, 2);
        assert_eq!(outcome.coalesced_pairs, 1);
        assert_eq!(outcome.atomics_issued, 1);
        assert_eq!(buf.read(), vec![h(0.0), h(0.0), h(5.0), h(2.0), h(0.0), h(0.0), h(0.0), h(0.0)]);
    }

    #[test]
    fn inactive_lanes_contribute_nothing() {
        let target = AtomicTarget::new(&ArchConfig::mi250());
        let hbm = HBM::new(1 << 16);
        let alloc = hbm.alloc::<f16>(4).unwrap();
        let buf = alloc.view();
        let warp = Warp::new(0, 64).with_active(LaneMask(0b1010));
        let lanes: Vec<_> = (0..64).map(|_| Some(LaneContribution::new(0, h(1.0)))).collect();

        let outcome = opportunistic_fast_atomic_add(&target, &warp, &buf, 4, &lanes);

        assert_eq!(outcome.groups, 1);
        assert_eq!(buf.get(0), h(2.0));
    }

    #[test]
    fn no_lane_match_falls_back_per_lane() {
        let target = AtomicTarget::new(&ArchConfig::p100());
        let hbm = HBM::new(1 << 16);
        let alloc = hbm.alloc::<f16>(4).unwrap();
        let buf = alloc.view();
        let warp = Warp::new(0, WARP_SIZE);
        let lanes: Vec<_> = (0..WARP_SIZE).map(|_| Some(LaneContribution::new(1, h(1.0)))).collect();

        let outcome = opportunistic_fast_atomic_add(&target, &warp, &buf, 4, &lanes);

        assert_eq!(outcome.atomics_issued, 32);
        assert_eq!(buf.get(1), h(32.0));
        assert_eq!(target.stats().snapshot().reducer_groups, 0);
    }
}
