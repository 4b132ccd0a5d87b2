//! Timing helpers over `tracing`.
//!
//! The engine only emits events; wiring them to a subscriber or an exporter
//! is left to the binary.

use std::time::{Duration, Instant};

/// Run `f`, then log how long it took under `what`.
pub fn timed<T>(what: &'static str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    record(what, start.elapsed());
    out
}

pub fn record(what: &'static str, elapsed: Duration) {
    tracing::debug!(what, elapsed_ms = elapsed.as_secs_f64() * 1e3, "timing");
}
