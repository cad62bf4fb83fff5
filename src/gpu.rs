/// Top-level GPU simulator.
/// Models a GPU as a collection of Streaming Multiprocessors (SMs) sharing
/// global memory, plus the atomic capabilities of its architecture.
use crate::arch::ArchConfig;
use crate::atomic::AtomicTarget;
use crate::error::Result;
use crate::executor::{ExecutionStats, KernelExecutor};
use crate::kernel::{AccumulateMode, LaunchConfig, ScatterKernel};
use crate::memory::{Allocation, DeviceBuffer, HBM};
use crate::precision::HalfFloat;
use crate::sm::StreamingMultiprocessor;

pub struct GPU {
    pub arch: ArchConfig,
    /// All SMs on the GPU
    pub sms: Vec<StreamingMultiprocessor>,
    /// High Bandwidth Memory (main GPU memory)
    pub hbm: HBM,
    /// Atomic backends selected for this architecture
    pub target: AtomicTarget,
    /// Write live snapshots for the viz binary
    pub live_metrics: bool,
}

impl GPU {
    pub fn new(arch: ArchConfig) -> Result<Self> {
        arch.validate()?;
        Ok(Self::build(arch))
    }

    fn build(arch: ArchConfig) -> Self {
        let sms = (0..arch.num_sms)
            .map(|id| StreamingMultiprocessor::new(id, arch.warp_size))
            .collect();

        GPU {
            sms,
            hbm: HBM::new(arch.sim_hbm_bytes),
            target: AtomicTarget::new(&arch),
            arch,
            live_metrics: false,
        }
    }

    /// Create an H100-like GPU configuration.
    pub fn h100() -> Self {
        Self::build(ArchConfig::h100())
    }

    pub fn with_live_metrics(mut self, enabled: bool) -> Self {
        self.live_metrics = enabled;
        self
    }

    /// Allocate `count` zeroed elements in HBM.
    pub fn alloc<T: HalfFloat>(&self, count: usize) -> Result<Allocation<T>> {
        self.hbm.alloc(count)
    }

    /// Launch a scatter-accumulate kernel into the first `numel` elements of `buffer`.
    pub fn launch_scatter_add<T: HalfFloat>(
        &self,
        kernel: &ScatterKernel<T>,
        config: &LaunchConfig,
        buffer: &DeviceBuffer<'_, T>,
        numel: usize,
        mode: AccumulateMode,
    ) -> Result<ExecutionStats> {
        KernelExecutor::new(self, mode).launch(kernel, config, buffer, numel)
    }
}
