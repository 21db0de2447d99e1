//! Prometheus metrics for arena and page pool activity
//!
//! Metrics are updated on page map/unmap and on large-object traffic only,
//! never on the per-slot fast path.

use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref LIVE_PAGES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("pagealloc_live_pages", "Slot pages currently mapped by size classes"),
        &["tag"]
    ).unwrap();

    pub static ref LARGE_ALLOCATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("pagealloc_large_allocations_total", "Allocations served by the large-object path"),
        &["tag"]
    ).unwrap();

    pub static ref LARGE_BYTES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("pagealloc_large_bytes", "Bytes currently held by large-object allocations"),
        &["tag"]
    ).unwrap();

    pub static ref POOL_MAPPED_BYTES: IntGauge = IntGauge::new(
        "pagealloc_pool_mapped_bytes",
        "Bytes currently mapped by system page pools"
    ).unwrap();
}

/// Register all metrics with [`METRICS_REGISTRY`]
pub fn init_metrics() {
    info!("Initializing pagealloc metrics");

    METRICS_REGISTRY.register(Box::new(LIVE_PAGES.clone())).ok();
    METRICS_REGISTRY.register(Box::new(LARGE_ALLOCATIONS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(LARGE_BYTES.clone())).ok();
    METRICS_REGISTRY.register(Box::new(POOL_MAPPED_BYTES.clone())).ok();
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# Error converting metrics\n"))
}
