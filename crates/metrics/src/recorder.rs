//! Prometheus recorder installation.

use {metrics_exporter_prometheus::PrometheusBuilder, tracing::info};

pub use metrics_exporter_prometheus::PrometheusHandle;

use crate::definitions::webhook;

/// Buckets for webhook delivery latency, in seconds.
const DELIVERY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Install the global Prometheus recorder and return a handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                webhook::DELIVERY_DURATION_SECONDS.to_string(),
            ),
            DELIVERY_BUCKETS,
        )?
        .install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}
