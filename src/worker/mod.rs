//! Core-pinning helpers for the ingest/writer pipeline (see §5: RX tasks run
//! on one dedicated core at high priority, the log writer task on another
//! at lower priority, matching the original firmware's task pinning).

pub mod affinity;

use tracing::warn;

/// Pin the calling thread to `core`, logging (not failing) if the platform
/// doesn't support it. RX tasks and the writer task call this once at
/// startup, each with its own core index.
pub fn pin_to_performance_core(core: usize) {
    if let Err(e) = affinity::set_cpu_affinity(&[core]) {
        warn!(core, error = %e, "failed to pin thread to performance core");
    }
}
