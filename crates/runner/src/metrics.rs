//! Prometheus registry for a harness run.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Registry, TextEncoder};

/// Registry holding the library's metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for metric in corecheck_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
    registry
});

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_scenario_counter() {
        corecheck_core::metrics::SCENARIOS
            .with_label_values(&["check_version", "pass"])
            .inc();
        let text = encode_metrics();
        assert!(text.contains("corecheck_scenarios_total"));
    }
}
