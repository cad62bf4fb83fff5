/// Kernel execution engine.
/// Distributes thread blocks across SMs (round-robin by flat block id) and
/// runs the SMs on host threads, so atomics from different SMs race on the
/// target buffer just as they would on the device.
use crate::error::{Error, Result};
use crate::gpu::GPU;
use crate::kernel::{AccumulateMode, LaunchConfig, ScatterKernel};
use crate::memory::DeviceBuffer;
use crate::metrics::{LiveMetrics, now_ms, write_metrics};
use crate::precision::HalfFloat;
use crate::sm::BlockStats;
use crate::stats::StatsSnapshot;
use tracing::{info, warn};

/// Statistics collected during a kernel launch.
#[derive(Debug, Default, Clone)]
pub struct ExecutionStats {
    /// Total number of thread blocks executed
    pub blocks_executed: u32,
    /// Total number of warps executed
    pub warps_executed: u32,
    /// Total number of threads executed
    pub threads_executed: u32,
    /// Lane contributions produced by the kernel
    pub contributions: u64,
    /// Blocks executed per SM, indexed by SM id
    pub sm_blocks: Vec<u32>,
    /// Atomic traffic issued by this launch
    pub atomics: StatsSnapshot,
    pub mode: String,
}

/// Executes a scatter kernel on a GPU, simulating the SM/warp/lane hierarchy.
pub struct KernelExecutor<'a> {
    pub gpu: &'a GPU,
    pub mode: AccumulateMode,
}

impl<'a> KernelExecutor<'a> {
    pub fn new(gpu: &'a GPU, mode: AccumulateMode) -> Self {
        KernelExecutor { gpu, mode }
    }

    /// Launch a kernel that accumulates into the first `numel` elements of `buffer`.
    /// Blocks are assigned to SMs round-robin; SMs are spread over at most
    /// `available_parallelism` host threads.
    pub fn launch<T: HalfFloat>(
        &self,
        kernel: &ScatterKernel<T>,
        config: &LaunchConfig,
        buffer: &DeviceBuffer<'_, T>,
        numel: usize,
    ) -> Result<ExecutionStats> {
        config.validate()?;
        if numel > buffer.len() {
            return Err(Error::InvalidLaunch(format!(
                "numel {} exceeds buffer of {} elements",
                numel,
                buffer.len()
            )));
        }

        let num_sms = self.gpu.sms.len();
        let num_blocks = config.num_blocks() as usize;
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(num_sms)
            .min(num_blocks)
            .max(1);

        let kind = T::KIND;
        info!(
            kernel = %kernel.name,
            mode = %self.mode,
            arch = %self.gpu.arch.name,
            kind = %kind,
            grid = ?config.grid_dim,
            block = ?config.block_dim,
            workers,
            "launching kernel"
        );

        let before = self.gpu.target.stats().snapshot();
        let mut snapshot = self.live_snapshot::<T>(kernel, config, numel);
        if self.gpu.live_metrics {
            snapshot.status = "running".to_string();
            write_metrics(&snapshot);
        }

        let results: Vec<Result<Vec<BlockStats>>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|worker| s.spawn(move || self.run_worker(worker, workers, kernel, config, buffer, numel)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        let mut per_sm = vec![BlockStats::default(); num_sms];
        let mut first_err = None;
        for result in results {
            match result {
                Ok(sm_stats) => {
                    for (total, part) in per_sm.iter_mut().zip(&sm_stats) {
                        total.merge(part);
                    }
                }
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        let mut totals = BlockStats::default();
        for sm in &per_sm {
            totals.merge(sm);
        }
        let stats = ExecutionStats {
            blocks_executed: totals.blocks,
            warps_executed: totals.warps,
            threads_executed: totals.threads,
            contributions: totals.contributions,
            sm_blocks: per_sm.iter().map(|s| s.blocks).collect(),
            atomics: self.gpu.target.stats().snapshot().since(&before),
            mode: self.mode.to_string(),
        };

        if self.gpu.live_metrics {
            snapshot.status = if first_err.is_some() { "failed" } else { "complete" }.to_string();
            snapshot.blocks_executed = stats.blocks_executed;
            snapshot.warps_executed = stats.warps_executed;
            snapshot.threads_executed = stats.threads_executed;
            snapshot.contributions = stats.contributions;
            snapshot.sm_active_blocks = stats.sm_blocks.clone();
            snapshot.atomics = stats.atomics;
            snapshot.timestamp_ms = now_ms();
            write_metrics(&snapshot);
        }

        if let Some(e) = first_err {
            warn!(kernel = %kernel.name, error = %e, "kernel aborted");
            return Err(e);
        }

        info!(
            kernel = %kernel.name,
            blocks = stats.blocks_executed,
            warps = stats.warps_executed,
            threads = stats.threads_executed,
            contributions = stats.contributions,
            atomics = stats.atomics.atomics_issued(),
            pair_atomics = stats.atomics.pair_atomics,
            cas_retries = stats.atomics.cas_retries,
            "kernel complete"
        );
        Ok(stats)
    }

    /// Run every block owned by the SMs assigned to `worker`.
    /// Returns per-SM stats indexed by SM id.
    fn run_worker<T: HalfFloat>(
        &self,
        worker: usize,
        workers: usize,
        kernel: &ScatterKernel<T>,
        config: &LaunchConfig,
        buffer: &DeviceBuffer<'_, T>,
        numel: usize,
    ) -> Result<Vec<BlockStats>> {
        let num_sms = self.gpu.sms.len();
        let mut per_sm = vec![BlockStats::default(); num_sms];

        for flat_block_id in 0..config.num_blocks() {
            let sm_id = flat_block_id as usize % num_sms;
            if sm_id % workers != worker {
                continue;
            }
            let block_idx = config.grid_dim.unflatten(flat_block_id);
            let stats = self.gpu.sms[sm_id].execute_block(
                &self.gpu.target,
                kernel,
                config,
                block_idx,
                buffer,
                numel,
                self.mode,
            )?;
            per_sm[sm_id].merge(&stats);
        }
        Ok(per_sm)
    }

    fn live_snapshot<T: HalfFloat>(&self, kernel: &ScatterKernel<T>, config: &LaunchConfig, numel: usize) -> LiveMetrics {
        LiveMetrics {
            status: "idle".to_string(),
            kernel_name: kernel.name.clone(),
            mode: self.mode.to_string(),
            arch: self.gpu.arch.name.clone(),
            element_kind: T::KIND.to_string(),
            pair_backend: self.gpu.target.pair_backend(T::KIND).name().to_string(),
            warp_size: self.gpu.arch.warp_size,
            grid: [config.grid_dim.x, config.grid_dim.y, config.grid_dim.z],
            block: [config.block_dim.x, config.block_dim.y, config.block_dim.z],
            numel,
            blocks_total: config.num_blocks(),
            sm_active_blocks: vec![0; self.gpu.sms.len()],
            timestamp_ms: now_ms(),
            ..Default::default()
        }
    }
}
