// src/processor.rs
//! Consumers of the engine's shared channels: activities are enriched and stored,
//! faults are logged and counted.

use std::sync::Arc;

use anyhow::Result;
use metrics::counter;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::llm::Summarizer;
use crate::sources::SourceFault;
use crate::store::{ActivityStore, StoredActivity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Stored,
    /// Same UID and `created_at` already stored.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub stored: usize,
    pub unchanged: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ActivityProcessor {
    store: Arc<dyn ActivityStore>,
    summarizer: Option<Summarizer>,
    concurrency: usize,
}

impl ActivityProcessor {
    pub fn new(store: Arc<dyn ActivityStore>, summarizer: Option<Summarizer>, concurrency: usize) -> Self {
        Self {
            store,
            summarizer,
            concurrency: concurrency.max(1),
        }
    }

    /// Drain `rx` until it closes or `cancel` fires, then wait for in-flight work.
    pub async fn run(&self, mut rx: mpsc::Receiver<Activity>, cancel: CancellationToken) -> ProcessorStats {
        crate::metrics::ensure_described();
        let limiter = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut stats = ProcessorStats::default();

        loop {
            let activity = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = rx.recv() => match next {
                    Some(a) => a,
                    None => break,
                },
            };
            // Backpressure: wait for a slot before taking the next activity.
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                p = limiter.clone().acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let this = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let uid = activity.uid();
                this.process(activity).await.map_err(|e| (uid, e))
            });

            while let Some(done) = tasks.try_join_next() {
                tally(&mut stats, done);
            }
        }

        while let Some(done) = tasks.join_next().await {
            tally(&mut stats, done);
        }
        info!(
            stored = stats.stored,
            unchanged = stats.unchanged,
            failed = stats.failed,
            "activity processor stopped"
        );
        stats
    }

    pub async fn process(&self, activity: Activity) -> Result<Outcome> {
        let uid = activity.uid();
        if let Some(existing) = self.store.get(&uid).await? {
            if existing.activity.created_at() == activity.created_at() {
                self.store.add_sources(&uid, &activity.source_uids()).await?;
                counter!("ingest_skipped_total").increment(1);
                debug!(activity_uid = %uid, "activity unchanged, skipping");
                return Ok(Outcome::Unchanged);
            }
        }

        let mut record = StoredActivity::new(activity);
        if let Some(summarizer) = &self.summarizer {
            match summarizer.enrich(&record.activity).await {
                Ok(enrichment) => {
                    record.summary = Some(enrichment.summary);
                    record.embedding = Some(enrichment.embedding);
                }
                Err(e) => {
                    warn!(error = ?e, activity_uid = %uid, "enrichment failed, storing without it");
                }
            }
        }

        self.store.upsert(record).await?;
        counter!("ingest_processed_total").increment(1);
        Ok(Outcome::Stored)
    }
}

type TaskResult = Result<Result<Outcome, (crate::uid::TypedUid, anyhow::Error)>, tokio::task::JoinError>;

fn tally(stats: &mut ProcessorStats, done: TaskResult) {
    match done {
        Ok(Ok(Outcome::Stored)) => stats.stored += 1,
        Ok(Ok(Outcome::Unchanged)) => stats.unchanged += 1,
        Ok(Err((uid, e))) => {
            stats.failed += 1;
            warn!(error = ?e, activity_uid = %uid, "processing activity failed");
        }
        Err(e) => {
            stats.failed += 1;
            warn!(error = ?e, "processing task aborted");
        }
    }
}

/// Log every source fault until the channel closes or `cancel` fires.
/// Returns how many were seen.
pub async fn consume_faults(mut rx: mpsc::Receiver<SourceFault>, cancel: CancellationToken) -> usize {
    crate::metrics::ensure_described();
    let mut seen = 0;
    loop {
        let fault = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(f) => f,
                None => break,
            },
        };
        seen += 1;
        counter!("ingest_source_errors_total", "source_type" => fault.source_uid.kind().to_string()).increment(1);
        warn!(error = ?fault.error, source_uid = %fault.source_uid, "source fetch failed");
    }
    seen
}
