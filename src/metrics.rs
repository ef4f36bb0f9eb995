use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    opts, register_int_counter, register_int_counter_vec, register_int_gauge, Encoder,
    IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

use crate::error::AuthError;

pub static TOKENS_ISSUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_tokens_issued_total",
        "Total number of credentials issued"
    ))
    .expect("Failed to register gateway_tokens_issued_total metric")
});

pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gateway_auth_failures_total",
            "Total number of rejected credential requests and credentials"
        ),
        &["reason"]
    )
    .expect("Failed to register gateway_auth_failures_total metric")
});

pub static HUB_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_hub_connections_total",
        "Total number of hub connections that reached the open state"
    ))
    .expect("Failed to register gateway_hub_connections_total metric")
});

pub static HUB_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(opts!(
        "gateway_hub_connections_active",
        "Number of currently registered hub connections"
    ))
    .expect("Failed to register gateway_hub_connections_active metric")
});

pub static ANOMALIES_DISPATCHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_anomalies_dispatched_total",
        "Total number of anomaly events fanned out"
    ))
    .expect("Failed to register gateway_anomalies_dispatched_total metric")
});

pub static FANOUT_DROPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "gateway_fanout_drops_total",
        "Total number of connections dropped after a failed delivery"
    ))
    .expect("Failed to register gateway_fanout_drops_total metric")
});

pub static SUBMISSIONS_FORWARDED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gateway_submissions_forwarded_total",
            "Total number of submissions accepted by the queue"
        ),
        &["queue"]
    )
    .expect("Failed to register gateway_submissions_forwarded_total metric")
});

pub static SUBMISSIONS_FAILED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "gateway_submissions_failed_total",
            "Total number of submissions the queue did not accept"
        ),
        &["queue"]
    )
    .expect("Failed to register gateway_submissions_failed_total metric")
});

pub fn record_auth_failure(error: AuthError) {
    AUTH_FAILURES_TOTAL.with_label_values(&[error.reason()]).inc();
}

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        TOKENS_ISSUED_TOTAL.inc();
        record_auth_failure(AuthError::Expired);
        HUB_CONNECTIONS_TOTAL.inc();
        HUB_CONNECTIONS_ACTIVE.inc();
        HUB_CONNECTIONS_ACTIVE.dec();
        ANOMALIES_DISPATCHED_TOTAL.inc();
        FANOUT_DROPS_TOTAL.inc();
        SUBMISSIONS_FORWARDED_TOTAL.with_label_values(&["data"]).inc();
        SUBMISSIONS_FAILED_TOTAL.with_label_values(&["data"]).inc();
    }

    #[test]
    fn test_gather_includes_gateway_metrics() {
        TOKENS_ISSUED_TOTAL.inc();
        let text = gather_metrics().unwrap();
        assert!(text.contains("gateway_tokens_issued_total"));
    }
}
