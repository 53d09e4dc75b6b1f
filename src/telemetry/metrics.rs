//! Metric instrument factories for voxq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an exporter configured these are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for voxq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("voxq")
}

/// Counter: number of work items submitted.
/// Labels: `kind`.
pub fn work_submitted() -> Counter<u64> {
    meter()
        .u64_counter("voxq.work.submitted")
        .with_description("Number of work items submitted")
        .build()
}

/// Counter: work item state transitions.
/// Labels: `from`, `to`.
pub fn work_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("voxq.work.state_transitions")
        .with_description("Number of work item state transitions")
        .build()
}

/// Counter: work items failed because no handler serves the kind.
/// Labels: `kind`.
pub fn work_unroutable() -> Counter<u64> {
    meter()
        .u64_counter("voxq.work.unroutable")
        .with_description("Work items with no registered handler")
        .build()
}

/// Histogram: handler run time in milliseconds.
/// Labels: `kind`, `result` ("ok" | "error").
pub fn handler_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("voxq.handler.duration_ms")
        .with_description("Handler duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: voice cache lookups.
/// Labels: `result` ("hit" | "miss").
pub fn cache_lookups() -> Counter<u64> {
    meter()
        .u64_counter("voxq.cache.lookups")
        .with_description("Voice cache lookups")
        .build()
}

/// Counter: voice cache evictions.
/// Labels: `reason` ("idle" | "explicit").
pub fn cache_evictions() -> Counter<u64> {
    meter()
        .u64_counter("voxq.cache.evictions")
        .with_description("Voice models evicted from the cache")
        .build()
}
