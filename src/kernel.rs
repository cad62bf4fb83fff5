/// Kernel definitions and launch configuration.
/// A scatter kernel is a function that every thread executes, identified by
/// its thread/block coordinates, producing at most one contribution
/// `buffer[index] += value` for the launch's target buffer.
use crate::error::{Error, Result};
use crate::reducer::LaneContribution;

/// Hardware cap on threads per block
pub const MAX_THREADS_PER_BLOCK: u32 = 1024;

/// 3D dimension struct used for grid and block sizes (mirrors CUDA's dim3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Dim3 { x, y, z }
    }

    /// Convenience constructor for 1D configs
    pub fn x(x: u32) -> Self {
        Dim3 { x, y: 1, z: 1 }
    }

    /// Total number of threads/blocks in this dimension
    pub fn size(&self) -> u32 {
        self.x * self.y * self.z
    }

    /// Row-major flat index of `idx` within `self`.
    pub fn flatten(&self, idx: Dim3) -> u32 {
        (idx.z * self.y + idx.y) * self.x + idx.x
    }

    /// Inverse of [`Dim3::flatten`].
    pub fn unflatten(&self, flat: u32) -> Dim3 {
        let x = flat % self.x;
        let y = (flat / self.x) % self.y;
        let z = flat / (self.x * self.y);
        Dim3::new(x, y, z)
    }
}

/// Configuration for launching a kernel: how many blocks (grid) and
/// how many threads per block (block).
#[derive(Debug, Clone, Copy)]
pub struct LaunchConfig {
    pub grid_dim: Dim3,
    pub block_dim: Dim3,
}

impl LaunchConfig {
    pub fn new(grid_dim: Dim3, block_dim: Dim3) -> Self {
        LaunchConfig { grid_dim, block_dim }
    }

    /// Enough 1D blocks of `threads_per_block` to cover `n` threads.
    pub fn for_elements(n: u32, threads_per_block: u32) -> Self {
        let blocks = n.div_ceil(threads_per_block.max(1)).max(1);
        LaunchConfig::new(Dim3::x(blocks), Dim3::x(threads_per_block))
    }

    /// Total number of thread blocks in the grid
    pub fn num_blocks(&self) -> u32 {
        self.grid_dim.size()
    }

    /// Total number of threads per block
    pub fn threads_per_block(&self) -> u32 {
        self.block_dim.size()
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_blocks() == 0 {
            return Err(Error::InvalidLaunch(format!("empty grid {:?}", self.grid_dim)));
        }
        let threads = self.threads_per_block();
        if threads == 0 || threads > MAX_THREADS_PER_BLOCK {
            return Err(Error::InvalidLaunch(format!(
                "block of {} threads, must be 1..={}",
                threads, MAX_THREADS_PER_BLOCK
            )));
        }
        Ok(())
    }
}

/// Per-thread context passed into the kernel function.
#[derive(Debug, Clone, Copy)]
pub struct ThreadCtx {
    pub thread_idx: Dim3,
    pub block_idx: Dim3,
    pub block_dim: Dim3,
    pub grid_dim: Dim3,
    /// Warp index within the block
    pub warp_id: u32,
    /// Lane index within the warp
    pub lane: u32,
}

impl ThreadCtx {
    /// Flat global thread index across the whole grid.
    /// For 1D launches this is blockIdx.x * blockDim.x + threadIdx.x.
    pub fn global_id(&self) -> u32 {
        self.grid_dim.flatten(self.block_idx) * self.block_dim.size() + self.block_dim.flatten(self.thread_idx)
    }
}

type ScatterFn<T> = dyn Fn(&ThreadCtx) -> Option<LaneContribution<T>> + Send + Sync;

/// A GPU kernel: a named function executed by every thread in the launch grid.
pub struct ScatterKernel<T> {
    pub name: String,
    pub func: Box<ScatterFn<T>>,
}

impl<T> ScatterKernel<T> {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&ThreadCtx) -> Option<LaneContribution<T>> + Send + Sync + 'static,
    {
        ScatterKernel {
            name: name.to_string(),
            func: Box::new(func),
        }
    }
}

/// How a warp's contributions reach memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulateMode {
    /// One plain single-element atomic per lane
    Plain,
    /// `fast_atomic_add` per lane
    Fast,
    /// Warp-cooperative reduction, then `fast_atomic_add` per leader
    Opportunistic,
}

impl AccumulateMode {
    pub const ALL: [AccumulateMode; 3] = [AccumulateMode::Plain, AccumulateMode::Fast, AccumulateMode::Opportunistic];

    pub fn name(&self) -> &'static str {
        match self {
            AccumulateMode::Plain         => "plain",
            AccumulateMode::Fast          => "fast",
            AccumulateMode::Opportunistic => "opportunistic",
        }
    }
}

impl std::fmt::Display for AccumulateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_round_trips() {
        let dim = Dim3::new(4, 3, 2);
        for flat in 0..dim.size() {
            assert_eq!(dim.flatten(dim.unflatten(flat)), flat);
        }
    }

    #[test]
    fn global_id_matches_1d_formula() {
        let ctx = ThreadCtx {
            thread_idx: Dim3::x(7),
            block_idx: Dim3::x(3),
            block_dim: Dim3::x(128),
            grid_dim: Dim3::x(10),
            warp_id: 0,
            lane: 7,
        };
        assert_eq!(ctx.global_id(), 3 * 128 + 7);
    }

    #[test]
    fn launch_validation() {
        assert!(LaunchConfig::for_elements(1000, 256).validate().is_ok());
        assert_eq!(LaunchConfig::for_elements(1000, 256).num_blocks(), 4);
        assert!(LaunchConfig::new(Dim3::x(0), Dim3::x(32)).validate().is_err());
        assert!(LaunchConfig::new(Dim3::x(1), Dim3::x(2048)).validate().is_err());
    }
}
