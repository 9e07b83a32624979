use lazy_static::lazy_static;
use prometheus::{CounterVec, HistogramVec, Opts, Registry};
use std::time::Instant;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    static ref PROCESS_START: Instant = Instant::now();

    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("http_requests_total", "Total HTTP requests handled")
            .namespace("trace_lite"),
        &["method", "path", "status"],
    )
    .expect("metric can be created");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .namespace("trace_lite"),
        &["method", "path"],
    )
    .expect("metric can be created");

    pub static ref INGEST_LINES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("ingest_lines_total", "Ingested log lines by outcome")
            .namespace("trace_lite"),
        &["outcome"],
    )
    .expect("metric can be created");

    pub static ref FLUSH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "flush_duration_seconds",
            "Reconstructor flush tick duration in seconds",
        )
        .namespace("trace_lite"),
        &["outcome"],
    )
    .expect("metric can be created");

    pub static ref TRACES_FLUSHED_TOTAL: CounterVec = CounterVec::new(
        Opts::new("traces_flushed_total", "Traces flushed to the store")
            .namespace("trace_lite"),
        &["outcome"],
    )
    .expect("metric can be created");

    pub static ref STORE_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "store_request_duration_seconds",
            "Outbound store HTTP request latency in seconds",
        )
        .namespace("trace_lite"),
        &["operation", "outcome"],
    )
    .expect("metric can be created");
}

/// Registers all collectors. Call once at startup in each binary.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(INGEST_LINES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(FLUSH_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(TRACES_FLUSHED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_REQUEST_DURATION_SECONDS.clone()))?;
    Ok(())
}

/// Seconds since this process started; sampled lazily on first metrics/health access.
pub fn uptime_seconds() -> u64 {
    PROCESS_START.elapsed().as_secs()
}

/// Renders the registry in Prometheus text exposition format.
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("encoding to an in-memory buffer cannot fail");
    String::from_utf8(buffer).expect("prometheus output is always valid utf8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_metrics_includes_namespace() {
        let _ = init_metrics();
        INGEST_LINES_TOTAL.with_label_values(&["accepted"]).inc();
        let output = gather_metrics();
        assert!(output.contains("trace_lite_ingest_lines_total"));
    }
}
