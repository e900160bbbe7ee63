// src/metrics.rs
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_activities_total",
            "Activities forwarded from sources onto the shared channel."
        );
        describe_counter!(
            "ingest_source_errors_total",
            "Per-pass faults reported by sources."
        );
        describe_counter!("ingest_passes_total", "Fetch passes started by the engine.");
        describe_histogram!("ingest_pass_ms", "Fetch pass duration in milliseconds.");
        describe_gauge!("ingest_sources_active", "Sources currently scheduled.");
        describe_counter!(
            "ingest_processed_total",
            "Activities stored by the processor."
        );
        describe_counter!(
            "ingest_skipped_total",
            "Activities skipped because an identical copy is already stored."
        );
        describe_counter!(
            "llm_gateway_attempts_total",
            "HTTP attempts made through the rate-limited gateway."
        );
        describe_counter!(
            "llm_gateway_retries_total",
            "Attempts retried after a 429/503 response."
        );
        describe_counter!(
            "llm_gateway_exhausted_total",
            "Requests that ran out of attempts."
        );
        describe_counter!("llm_cache_hits_total", "Model calls served from cache.");
        describe_counter!("llm_cache_misses_total", "Model calls forwarded upstream.");
        describe_gauge!(
            "llm_usage_cost_usd_total",
            "Accumulated model spend in USD, by model."
        );
        describe_counter!("llm_usage_tokens_total", "Tokens billed, by model.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        ensure_described();
        Ok(Self { handle })
    }

    pub fn from_handle(handle: PrometheusHandle) -> Self {
        Self { handle }
    }

    /// `/metrics` in Prometheus exposition format plus a plain `/health` check.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new()
            .route(
                "/metrics",
                get(move || {
                    let h = handle.clone();
                    async move { h.render() }
                }),
            )
            .route("/health", get(|| async { "ok" }))
    }
}
