/// Warp simulation and lane collectives.
/// A warp is a group of lanes executing the same instruction in lockstep
/// (32 lanes on NVIDIA, 64-lane wavefronts on AMD). Collective primitives are
/// evaluated over every lane of one instruction step at once: each takes the
/// per-lane register values as a slice indexed by lane id.

pub const WARP_SIZE: usize = 32; // Standard CUDA warp size
pub const MAX_WARP_SIZE: usize = 64; // AMD wavefront

/// Bit set of lanes within a warp; bit `i` is lane `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaneMask(pub u64);

impl LaneMask {
    pub const EMPTY: LaneMask = LaneMask(0);

    /// All lanes `0..width`.
    pub fn full(width: usize) -> Self {
        if width >= 64 {
            LaneMask(u64::MAX)
        } else {
            LaneMask((1u64 << width) - 1)
        }
    }

    pub fn contains(self, lane: usize) -> bool {
        lane < 64 && self.0 & (1u64 << lane) != 0
    }

    pub fn with(self, lane: usize) -> Self {
        LaneMask(self.0 | (1u64 << lane))
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Lowest set lane (`__ffs(mask) - 1`).
    pub fn first_active(self) -> Option<usize> {
        (self.0 != 0).then(|| self.0.trailing_zeros() as usize)
    }

    /// Set lanes in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let lane = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(lane)
        })
    }
}

/// Group-collective communication across the lanes of one lockstep step.
pub trait LaneCollective {
    /// Lanes in the group.
    fn width(&self) -> usize;

    /// Lanes participating in the current step.
    fn active_mask(&self) -> LaneMask;

    /// For every active lane, the mask of active lanes holding an equal key.
    /// Inactive lanes (or lanes with no key) get an empty mask.
    fn match_any<K: PartialEq>(&self, keys: &[Option<K>]) -> Vec<LaneMask>;

    /// Value held by `src_lane`, broadcast to the caller.
    fn shfl<V: Copy>(&self, values: &[V], src_lane: usize) -> V;

    /// Each lane `i` receives `values[i + delta]`; lanes whose source falls
    /// outside the group keep their own value.
    fn shfl_down<V: Copy>(&self, values: &[V], delta: usize) -> Vec<V>;

    /// Each lane `i` receives `values[i - delta]`; lanes whose source falls
    /// outside the group keep their own value.
    fn shfl_up<V: Copy>(&self, values: &[V], delta: usize) -> Vec<V>;
}

/// A warp executing one lockstep step.
#[derive(Debug, Clone)]
pub struct Warp {
    pub id: usize,
    pub width: usize,
    pub active: LaneMask,
}

impl Warp {
    pub fn new(id: usize, width: usize) -> Self {
        debug_assert!(width <= MAX_WARP_SIZE);
        Warp {
            id,
            width,
            active: LaneMask::full(width),
        }
    }

    /// Restrict the step to `active` lanes (a partial warp or divergent branch).
    pub fn with_active(mut self, active: LaneMask) -> Self {
        self.active = LaneMask(active.0 & LaneMask::full(self.width).0);
        self
    }
}

impl LaneCollective for Warp {
    fn width(&self) -> usize {
        self.width
    }

    fn active_mask(&self) -> LaneMask {
        self.active
    }

    fn match_any<K: PartialEq>(&self, keys: &[Option<K>]) -> Vec<LaneMask> {
        let key_of = |lane: usize| {
            if self.active.contains(lane) {
                keys.get(lane).and_then(|k| k.as_ref())
            } else {
                None
            }
        };

        (0..self.width)
            .map(|lane| match key_of(lane) {
                None => LaneMask::EMPTY,
                Some(key) => (0..self.width)
                    .filter(|&other| key_of(other) == Some(key))
                    .fold(LaneMask::EMPTY, LaneMask::with),
            })
            .collect()
    }

    fn shfl<V: Copy>(&self, values: &[V], src_lane: usize) -> V {
        values[src_lane % self.width]
    }

    fn shfl_down<V: Copy>(&self, values: &[V], delta: usize) -> Vec<V> {
        (0..self.width)
            .map(|lane| {
                let src = lane + delta;
                if src < self.width { values[src] } else { values[lane] }
            })
            .collect()
    }

    fn shfl_up<V: Copy>(&self, values: &[V], delta: usize) -> Vec<V> {
        (0..self.width)
            .map(|lane| {
                if lane >= delta { values[lane - delta] } else { values[lane] }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_basics() {
        let m = LaneMask::EMPTY.with(3).with(7).with(31);
        assert_eq!(m.count(), 3);
        assert_eq!(m.first_active(), Some(3));
        assert_eq!(m.iter().collect::<Vec<_>>(), vec![3, 7, 31]);
        assert!(LaneMask::EMPTY.first_active().is_none());
        assert_eq!(LaneMask::full(64).count(), 64);
        assert_eq!(LaneMask::full(32).count(), 32);
    }

    #[test]
    fn match_any_groups_equal_keys() {
        let warp = Warp::new(0, 8).with_active(LaneMask(0b0111_1111));
        let keys = [Some(10), Some(20), Some(10), None, Some(20), Some(30), Some(10), Some(10)];
        let masks = warp.match_any(&keys);
        assert_eq!(masks[0], LaneMask(0b0100_0101));
        assert_eq!(masks[1], LaneMask(0b0001_0010));
        assert_eq!(masks[3], LaneMask::EMPTY);
        assert_eq!(masks[5], LaneMask(0b0010_0000));
        // Lane 7 is inactive: neither matched nor matching.
        assert_eq!(masks[7], LaneMask::EMPTY);
    }

    #[test]
    fn shuffles_respect_group_edges() {
        let warp = Warp::new(0, 4);
        let v = [1, 2, 3, 4];
        assert_eq!(warp.shfl(&v, 2), 3);
        assert_eq!(warp.shfl_down(&v, 1), vec![2, 3, 4, 4]);
        assert_eq!(warp.shfl_up(&v, 1), vec![1, 1, 2, 3]);
    }
}
