use axum::http::StatusCode;
use prometheus::{Encoder, TextEncoder};

/// GET /metrics, Prometheus text format. Internal only.
pub async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metrics;

    #[tokio::test]
    async fn exposes_registered_counters() {
        metrics::linkage("unlinked");
        let body = metrics_handler().await.unwrap();
        assert!(body.contains("api_linkage_transitions_total"));
    }
}
