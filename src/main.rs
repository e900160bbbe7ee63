//! feedpulse: binary entrypoint.
//! Loads configuration, starts every configured source on the stream engine and
//! drains the activity channel into the store until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feedpulse::metrics::Metrics;
use feedpulse::{
    consume_faults, llm, ActivityProcessor, ActivityStore, AppConfig, LlmConfig, MemoryActivityStore,
    ProviderConfig, SourceRegistry, StreamEngine,
};

/// How long the processor may keep draining after the engine stopped.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// `RUST_LOG` filter (default `feedpulse=info,warn`); JSON lines when `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feedpulse=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

async fn serve_metrics(addr: String, metrics: Metrics, cancel: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding metrics listener on {addr}"))?;
    info!(%addr, "serving /metrics and /health");
    axum::serve(listener, metrics.router())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("metrics server")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::load_default()?;
    let provider = ProviderConfig::from_env();
    let llm_cfg = LlmConfig::from_env();
    info!(
        sources = cfg.sources.len(),
        channel_capacity = cfg.engine.channel_capacity,
        processor_concurrency = cfg.engine.processor_concurrency,
        "config loaded"
    );

    let shutdown = CancellationToken::new();
    let metrics = Metrics::init()?;
    let metrics_task = cfg.engine.metrics_addr.clone().map(|addr| {
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(addr, metrics, cancel).await {
                error!(error = ?e, "metrics server failed");
            }
        })
    });

    let (activities_tx, activities_rx) = mpsc::channel(cfg.engine.channel_capacity);
    let (faults_tx, faults_rx) = mpsc::channel(cfg.engine.channel_capacity);

    let store: Arc<dyn ActivityStore> = Arc::new(MemoryActivityStore::new());
    let summarizer = llm::build_from_config(&llm_cfg)?;
    let usage = summarizer.as_ref().and_then(|s| s.usage().cloned());
    let processor = ActivityProcessor::new(store.clone(), summarizer, cfg.engine.processor_concurrency);

    // Consumers stop when the engine drops its senders, not on the shutdown token.
    let processor_task = tokio::spawn(async move { processor.run(activities_rx, CancellationToken::new()).await });
    let faults_task = tokio::spawn(consume_faults(faults_rx, CancellationToken::new()));

    let registry = SourceRegistry::with_provider(&provider)?;
    let engine = StreamEngine::with_cancel(provider, activities_tx, faults_tx, shutdown.clone());
    for source_cfg in cfg.sources {
        let source = match registry.build(source_cfg) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "skipping source");
                continue;
            }
        };
        let uid = source.uid();
        let since = store.latest_for_source(&uid).await?;
        match engine.add(source, since) {
            Ok(true) => info!(source_uid = %uid, "source added"),
            Ok(false) => warn!(source_uid = %uid, "duplicate source ignored"),
            Err(e) => warn!(error = %e, source_uid = %uid, "source not started"),
        }
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested");
    shutdown.cancel();
    engine.shutdown().await;
    drop(engine);

    match tokio::time::timeout(DRAIN_TIMEOUT, processor_task).await {
        Ok(Ok(stats)) => info!(
            stored = stats.stored,
            unchanged = stats.unchanged,
            failed = stats.failed,
            "processor drained"
        ),
        Ok(Err(e)) => error!(error = ?e, "processor task failed"),
        Err(_) => warn!("processor did not drain in time"),
    }
    match faults_task.await {
        Ok(faults) => info!(faults, "fault consumer stopped"),
        Err(e) => error!(error = ?e, "fault consumer failed"),
    }
    if let Some(usage) = usage {
        let total = usage.total_usage();
        info!(?total, "LLM usage");
    }
    if let Some(task) = metrics_task {
        let _ = task.await;
    }
    Ok(())
}
