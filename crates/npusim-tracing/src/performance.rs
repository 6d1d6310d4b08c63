//! Timing helpers for the compile pass.
//!
//! ```rust
//! use npusim_tracing::performance::{record_tiling, PerformanceSpan};
//!
//! let span = PerformanceSpan::new("tile_attention", Some(100));
//! record_tiling("Attention", 7, 57, 56);
//! drop(span); // logged only if it took at least 100µs
//! ```

use std::time::Instant;

/// RAII guard that logs its lifetime when dropped.
///
/// Nothing is logged if the elapsed time stays under the optional threshold.
pub struct PerformanceSpan {
    threshold_us: Option<u64>,
    start_time: Instant,
    span: tracing::Span,
}

impl PerformanceSpan {
    /// Start a debug-level span named `span_name`.
    pub fn new(span_name: impl AsRef<str>, threshold_us: Option<u64>) -> Self {
        let name = span_name.as_ref();
        Self {
            threshold_us,
            start_time: Instant::now(),
            span: tracing::debug_span!("perf", name = %name),
        }
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        let elapsed_us = self.elapsed_us();
        if self.threshold_us.is_none_or(|t| elapsed_us >= t) {
            let _entered = self.span.enter();
            tracing::debug!(duration_us = elapsed_us, "performance_span_complete");
        }
    }
}

/// Record the outcome of tiling one operator.
pub fn record_tiling(optype: &str, operator_id: u32, tiles: usize, instructions: usize) {
    tracing::debug!(
        event = "tiling",
        optype = optype,
        operator_id = operator_id,
        tiles = tiles,
        instructions = instructions,
        "operator_tiled"
    );
}

/// Record a DRAM region handed out by the address allocator.
pub fn record_allocation(address: u64, size_bytes: u64, alignment: u64) {
    tracing::trace!(
        event = "allocation",
        address = address,
        size_bytes = size_bytes,
        alignment = alignment,
        "dram_region_allocated"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_measures_elapsed_time() {
        let span = PerformanceSpan::new("measure", None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(span.elapsed_us() >= 2_000);
    }

    #[test]
    fn test_span_under_threshold_drops_cleanly() {
        let _span = PerformanceSpan::new("quiet_span", Some(u64::MAX));
    }

    #[test]
    fn test_recorders_do_not_panic() {
        record_tiling("AdaptiveAvgPool", 3, 48, 144);
        record_allocation(0x100, 512, 256);
    }
}
