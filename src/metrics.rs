/// Live metrics for the TUI visualizer.
///
/// When live metrics are enabled on the GPU, the executor writes a JSON
/// snapshot to METRICS_PATH when a launch starts and when it completes.
/// The viz binary polls this file and re-renders the dashboard.
/// Writes are atomic (write to .tmp then rename) to avoid torn reads.
use crate::stats::StatsSnapshot;
use serde::{Deserialize, Serialize};

pub const METRICS_PATH: &str = "/tmp/gpusim_atomics_live.json";

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub struct LiveMetrics {
    /// "idle" | "running" | "complete" | "failed"
    pub status: String,
    pub kernel_name: String,
    /// Accumulate mode: "plain" | "fast" | "opportunistic"
    pub mode: String,
    pub arch: String,
    /// "fp16" | "bf16"
    pub element_kind: String,
    /// Pair backend used for the element kind on this arch
    pub pair_backend: String,
    pub warp_size: usize,
    /// Grid dimensions [x, y, z]
    pub grid: [u32; 3],
    /// Block dimensions [x, y, z]
    pub block: [u32; 3],
    /// Elements in the target buffer
    pub numel: usize,
    /// Total blocks in the grid
    pub blocks_total: u32,
    /// Blocks completed so far
    pub blocks_executed: u32,
    /// Warps executed so far
    pub warps_executed: u32,
    /// Threads executed so far
    pub threads_executed: u32,
    /// Lane contributions produced by the kernel
    pub contributions: u64,
    /// Blocks run per SM, indexed by SM id
    pub sm_active_blocks: Vec<u32>,
    /// Atomic traffic for this launch
    #[serde(default)]
    pub atomics: StatsSnapshot,
    /// Unix timestamp in ms when this snapshot was written
    pub timestamp_ms: u64,
}

impl LiveMetrics {
    /// Contributions per atomic actually issued; 1.0 means no reduction.
    pub fn reduction_ratio(&self) -> f64 {
        let issued = self.atomics.atomics_issued();
        if issued == 0 {
            0.0
        } else {
            self.contributions as f64 / issued as f64
        }
    }
}

/// Atomically write metrics to METRICS_PATH.
/// Uses a .tmp intermediate file + rename to avoid torn reads by the viz.
pub fn write_metrics(metrics: &LiveMetrics) {
    if let Ok(json) = serde_json::to_string(metrics) {
        let tmp = format!("{}.tmp", METRICS_PATH);
        if std::fs::write(&tmp, &json).is_ok() {
            let _ = std::fs::rename(&tmp, METRICS_PATH);
        }
    }
}

/// Read the latest metrics snapshot. Returns None if the file doesn't exist
/// or can't be parsed (e.g. no simulation has run yet).
pub fn read_metrics() -> Option<LiveMetrics> {
    let data = std::fs::read_to_string(METRICS_PATH).ok()?;
    serde_json::from_str(&data).ok()
}

/// Returns current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_json_round_trip() {
        let m = LiveMetrics {
            status: "complete".to_string(),
            kernel_name: "index_add".to_string(),
            contributions: 64,
            atomics: StatsSnapshot { pair_atomics: 8, plain_atomics: 8, ..Default::default() },
            sm_active_blocks: vec![1, 0, 2],
            ..Default::default()
        };
        let json = serde_json::to_string(&m).unwrap();
        let back: LiveMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sm_active_blocks, vec![1, 0, 2]);
        assert_eq!(back.atomics, m.atomics);
        assert_eq!(back.reduction_ratio(), 4.0);
    }
}
