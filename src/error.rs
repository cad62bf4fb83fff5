//! Error types for simulator setup and kernel launches.
//!
//! The atomic accumulation path itself never fails; these errors only cover
//! configuration, allocation, and launch validation.

/// Result type for gpusim-atomics operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Simulated HBM capacity exhausted
    #[error("Out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    /// A view does not fit inside its allocation
    #[error("Invalid buffer view: offset {offset} + count {count} exceeds {len} elements")]
    InvalidView { offset: usize, count: usize, len: usize },

    /// Host write length does not match the buffer
    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Launch configuration rejected before any thread runs
    #[error("Invalid launch: {0}")]
    InvalidLaunch(String),

    /// A thread produced a flat index outside the target buffer
    #[error("Index out of bounds: thread {thread} produced index {index} >= numel {numel}")]
    IndexOutOfBounds { thread: u32, index: usize, numel: usize },

    /// Unknown or inconsistent target architecture
    #[error("Invalid architecture config: {0}")]
    InvalidArch(String),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
