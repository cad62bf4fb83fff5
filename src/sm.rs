/// Streaming Multiprocessor (SM), the core compute unit of a GPU.
/// An SM runs the thread blocks assigned to it: threads are grouped into
/// warps, every lane of a warp evaluates the kernel, and the warp's
/// contributions are issued to memory together as one lockstep step.
use crate::atomic::{AtomicTarget, atomic_add, fast_atomic_add};
use crate::error::{Error, Result};
use crate::kernel::{AccumulateMode, Dim3, LaunchConfig, ScatterKernel, ThreadCtx};
use crate::memory::DeviceBuffer;
use crate::precision::HalfFloat;
use crate::reducer::{LaneContribution, opportunistic_fast_atomic_add};
use crate::warp::{LaneMask, Warp};
use tracing::debug;

/// Work done by one SM during a launch.
#[derive(Debug, Default, Clone)]
pub struct BlockStats {
    pub blocks: u32,
    pub warps: u32,
    pub threads: u32,
    pub contributions: u64,
}

impl BlockStats {
    pub fn merge(&mut self, other: &BlockStats) {
        self.blocks += other.blocks;
        self.warps += other.warps;
        self.threads += other.threads;
        self.contributions += other.contributions;
    }
}

pub struct StreamingMultiprocessor {
    pub id: usize,
    /// Lanes per warp on this architecture
    pub warp_size: usize,
}

impl StreamingMultiprocessor {
    pub fn new(id: usize, warp_size: usize) -> Self {
        StreamingMultiprocessor { id, warp_size }
    }

    /// Execute every thread of one block, one warp step at a time.
    /// All indices of a warp are checked before that warp issues any atomic.
    pub fn execute_block<T: HalfFloat>(
        &self,
        target: &AtomicTarget,
        kernel: &ScatterKernel<T>,
        config: &LaunchConfig,
        block_idx: Dim3,
        buffer: &DeviceBuffer<'_, T>,
        numel: usize,
        mode: AccumulateMode,
    ) -> Result<BlockStats> {
        let threads_per_block = config.threads_per_block() as usize;
        let num_warps = threads_per_block.div_ceil(self.warp_size);
        let mut stats = BlockStats { blocks: 1, ..Default::default() };

        for warp_id in 0..num_warps {
            let warp_start = warp_id * self.warp_size;
            let warp_end = (warp_start + self.warp_size).min(threads_per_block);

            // Last warp of the block may be partial
            let mut active = LaneMask::EMPTY;
            let mut lanes: Vec<Option<LaneContribution<T>>> = vec![None; self.warp_size];
            for flat in warp_start..warp_end {
                let lane = flat - warp_start;
                active = active.with(lane);
                let ctx = ThreadCtx {
                    thread_idx: config.block_dim.unflatten(flat as u32),
                    block_idx,
                    block_dim: config.block_dim,
                    grid_dim: config.grid_dim,
                    warp_id: warp_id as u32,
                    lane: lane as u32,
                };
                let contribution = (kernel.func)(&ctx);
                if let Some(c) = contribution {
                    if c.index >= numel {
                        return Err(Error::IndexOutOfBounds {
                            thread: ctx.global_id(),
                            index: c.index,
                            numel,
                        });
                    }
                    stats.contributions += 1;
                }
                lanes[lane] = contribution;
                stats.threads += 1;
            }

            let warp = Warp::new(warp_id, self.warp_size).with_active(active);
            self.issue(target, &warp, buffer, numel, &lanes, mode);
            stats.warps += 1;
        }

        debug!(sm = self.id, block = ?block_idx, warps = stats.warps, "block done");
        Ok(stats)
    }

    fn issue<T: HalfFloat>(
        &self,
        target: &AtomicTarget,
        warp: &Warp,
        buffer: &DeviceBuffer<'_, T>,
        numel: usize,
        lanes: &[Option<LaneContribution<T>>],
        mode: AccumulateMode,
    ) {
        match mode {
            AccumulateMode::Plain => {
                for c in lanes.iter().flatten() {
                    atomic_add(target, buffer, c.index, c.value);
                }
            }
            AccumulateMode::Fast => {
                for c in lanes.iter().flatten() {
                    fast_atomic_add(target, buffer, c.index, numel, c.value, true);
                }
            }
            AccumulateMode::Opportunistic => {
                opportunistic_fast_atomic_add(target, warp, buffer, numel, lanes);
            }
        }
    }
}
