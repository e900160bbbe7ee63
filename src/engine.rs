// src/engine.rs
//! # Stream Engine
//! One task per active source: fetch immediately, then wait the source's
//! interval (plus jitter) and fetch again, until cancelled.
//!
//! Per-source state: `Idle → Running → Waiting → Running → … → Cancelled`.
//! The engine owns the `since` cursor. After every pass it keeps the newest
//! forwarded activity (by `created_at`) and hands it to the next pass.
//!
//! The activity and fault channels belong to the caller. The engine only holds
//! senders; dropping the engine after [`StreamEngine::shutdown`] lets the
//! consumers observe the close.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::activity::Activity;
use crate::config::{ConfigError, ProviderConfig};
use crate::sources::{Emitter, Source, SourceFault};
use crate::uid::TypedUid;

/// Default upper bound of the random extra delay, as a fraction of the interval.
pub const DEFAULT_JITTER: f64 = 0.1;

/// Buffer between a running stream and the shared activity channel.
const FORWARD_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    Running,
    Waiting,
    Cancelled,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceState::Idle => "idle",
            SourceState::Running => "running",
            SourceState::Waiting => "waiting",
            SourceState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

fn join_errors(errors: &[ConfigError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid source configuration: {}", join_errors(.0))]
    Invalid(Vec<ConfigError>),
    #[error("source initialization failed: {0}")]
    Config(#[from] ConfigError),
    #[error("engine is shut down")]
    ShutDown,
}

struct Handle {
    cancel: CancellationToken,
    state: Arc<RwLock<SourceState>>,
    task: Option<JoinHandle<()>>,
}

pub struct StreamEngine {
    provider: Arc<ProviderConfig>,
    activities: mpsc::Sender<Activity>,
    faults: mpsc::Sender<SourceFault>,
    root: CancellationToken,
    jitter: f64,
    sources: Mutex<HashMap<TypedUid, Handle>>,
}

impl StreamEngine {
    pub fn new(
        provider: ProviderConfig,
        activities: mpsc::Sender<Activity>,
        faults: mpsc::Sender<SourceFault>,
    ) -> Self {
        Self::with_cancel(provider, activities, faults, CancellationToken::new())
    }

    /// Engine whose tasks also stop when `parent` is cancelled.
    pub fn with_cancel(
        provider: ProviderConfig,
        activities: mpsc::Sender<Activity>,
        faults: mpsc::Sender<SourceFault>,
        parent: CancellationToken,
    ) -> Self {
        crate::metrics::ensure_described();
        Self {
            provider: Arc::new(provider),
            activities,
            faults,
            root: parent.child_token(),
            jitter: DEFAULT_JITTER,
            sources: Mutex::new(HashMap::new()),
        }
    }

    /// Random extra delay per wait, up to `fraction` of the interval. `0.0` disables it.
    pub fn with_jitter(mut self, fraction: f64) -> Self {
        self.jitter = fraction.clamp(0.0, 1.0);
        self
    }

    /// Validate, initialize and start `source`.
    ///
    /// `Ok(false)` when a source with the same UID is already scheduled.
    /// `since` seeds the cursor of the first pass.
    pub fn add(&self, mut source: Box<dyn Source>, since: Option<Activity>) -> Result<bool, EngineError> {
        if self.root.is_cancelled() {
            return Err(EngineError::ShutDown);
        }
        let errors = source.validate();
        if !errors.is_empty() {
            return Err(EngineError::Invalid(errors));
        }

        let uid = source.uid();
        let mut sources = self.sources.lock();
        if let Some(existing) = sources.get(&uid) {
            if *existing.state.read() != SourceState::Cancelled {
                debug!(source_uid = %uid, "source already scheduled");
                return Ok(false);
            }
        }
        source.initialize(&self.provider)?;

        let source: Arc<dyn Source> = Arc::from(source);
        let cancel = self.root.child_token();
        let state = Arc::new(RwLock::new(SourceState::Idle));
        let span = info_span!("source", source_uid = %uid, source_type = source.source_type());
        let task = tokio::spawn(
            drive(
                source,
                since,
                Channels {
                    activities: self.activities.clone(),
                    faults: self.faults.clone(),
                },
                cancel.clone(),
                state.clone(),
                self.jitter,
            )
            .instrument(span),
        );
        sources.insert(
            uid,
            Handle {
                cancel,
                state,
                task: Some(task),
            },
        );
        Ok(true)
    }

    /// Cancel and forget one source. Waits for its task to finish.
    pub async fn remove(&self, uid: &TypedUid) -> bool {
        let Some(mut handle) = self.sources.lock().remove(uid) else {
            return false;
        };
        handle.cancel.cancel();
        if let Some(task) = handle.task.take() {
            if let Err(e) = task.await {
                warn!(error = ?e, source_uid = %uid, "source task ended abnormally");
            }
        }
        *handle.state.write() = SourceState::Cancelled;
        true
    }

    /// Cancel every source and wait for all tasks. Entries stay, in `Cancelled`.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let pending: Vec<(TypedUid, Arc<RwLock<SourceState>>, JoinHandle<()>)> = self
            .sources
            .lock()
            .iter_mut()
            .filter_map(|(uid, h)| h.task.take().map(|t| (uid.clone(), h.state.clone(), t)))
            .collect();

        let count = pending.len();
        for (uid, state, task) in pending {
            if let Err(e) = task.await {
                warn!(error = ?e, source_uid = %uid, "source task ended abnormally");
            }
            *state.write() = SourceState::Cancelled;
        }
        info!(sources = count, "stream engine stopped");
    }

    pub fn state(&self, uid: &TypedUid) -> Option<SourceState> {
        self.sources.lock().get(uid).map(|h| *h.state.read())
    }

    pub fn source_uids(&self) -> Vec<TypedUid> {
        let mut uids: Vec<_> = self.sources.lock().keys().cloned().collect();
        uids.sort();
        uids
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

#[derive(Clone)]
struct Channels {
    activities: mpsc::Sender<Activity>,
    faults: mpsc::Sender<SourceFault>,
}

async fn drive(
    source: Arc<dyn Source>,
    mut since: Option<Activity>,
    channels: Channels,
    cancel: CancellationToken,
    state: Arc<RwLock<SourceState>>,
    jitter: f64,
) {
    let source_type = source.source_type();
    gauge!("ingest_sources_active").increment(1.0);
    info!(since = ?since.as_ref().map(Activity::created_at), "source started");

    loop {
        *state.write() = SourceState::Running;
        counter!("ingest_passes_total", "source_type" => source_type).increment(1);
        let started = Instant::now();

        let (newest, forwarded) = run_once(&*source, since.as_ref(), &channels, &cancel).await;

        histogram!("ingest_pass_ms", "source_type" => source_type)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        counter!("ingest_activities_total", "source_type" => source_type).increment(forwarded as u64);
        debug!(forwarded, elapsed_ms = started.elapsed().as_millis() as u64, "pass finished");

        if let Some(newest) = newest {
            if since.as_ref().map_or(true, |s| newest.created_at() > s.created_at()) {
                since = Some(newest);
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        *state.write() = SourceState::Waiting;
        let delay = jittered(source.poll_interval(), jitter);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    *state.write() = SourceState::Cancelled;
    gauge!("ingest_sources_active").decrement(1.0);
    info!("source stopped");
}

/// One fetch pass. Activities go through a local channel so the engine can see
/// what was forwarded. Returns the newest forwarded activity and the count.
async fn run_once(
    source: &dyn Source,
    since: Option<&Activity>,
    channels: &Channels,
    cancel: &CancellationToken,
) -> (Option<Activity>, usize) {
    let (tx, mut rx) = mpsc::channel::<Activity>(FORWARD_CAPACITY);
    let out = Emitter::new(source.uid(), tx, channels.faults.clone(), cancel.clone());

    let activities = channels.activities.clone();
    let forward_cancel = cancel.clone();
    let forward = async move {
        let mut newest: Option<Activity> = None;
        let mut forwarded = 0usize;
        while let Some(activity) = rx.recv().await {
            let candidate = newest
                .as_ref()
                .map_or(true, |n| activity.created_at() > n.created_at())
                .then(|| activity.clone());
            let sent = tokio::select! {
                biased;
                _ = forward_cancel.cancelled() => false,
                res = activities.send(activity) => res.is_ok(),
            };
            if !sent {
                break;
            }
            forwarded += 1;
            if candidate.is_some() {
                newest = candidate;
            }
        }
        (newest, forwarded)
    };
    let stream = async move {
        let out = out;
        source.stream(cancel, since, &out).await;
    };

    let ((), result) = tokio::join!(stream, forward);
    result
}

fn jittered(interval: Duration, fraction: f64) -> Duration {
    if fraction <= 0.0 {
        return interval;
    }
    let extra = rand::rng().random_range(0.0..=fraction);
    interval.mul_f64(1.0 + extra)
}
