pub mod arch;
pub mod atomic;
pub mod error;
pub mod executor;
pub mod gpu;
pub mod kernel;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod pair;
pub mod precision;
pub mod reducer;
pub mod sm;
pub mod stats;
pub mod warp;

pub use atomic::{AtomicTarget, atomic_add, fast_atomic_add};
pub use error::{Error, Result};
pub use reducer::{LaneContribution, opportunistic_fast_atomic_add};
