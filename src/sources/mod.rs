// src/sources/mod.rs
//! The source contract and the helpers every provider adapter shares.
//!
//! A source is configured (serde), validated, initialized once with the
//! [`ProviderConfig`], then asked to [`Source::stream`] new activities since the last
//! one it produced. Streams report into an [`Emitter`]; they never own or close the
//! engine's channels.

pub mod article;
pub mod changedetection;
pub mod cursor;
pub mod github;
pub mod hackernews;
pub mod lobsters;
pub mod mastodon;
pub mod producthunt;
pub mod reddit;
pub mod rss;
pub mod text;
pub mod validate;

use std::fmt;
use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::activity::Activity;
use crate::config::{ConfigError, ProviderConfig};
use crate::uid::TypedUid;

pub const USER_AGENT: &str = concat!("feedpulse/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[async_trait]
pub trait Source: Send + Sync {
    /// Pure function of the configured parameters.
    fn uid(&self) -> TypedUid;
    /// Configuration discriminant, e.g. `"rssfeed"`.
    fn source_type(&self) -> &'static str;
    fn name(&self) -> String;
    fn description(&self) -> String;
    fn url(&self) -> String;
    /// Nominal delay between fetch passes.
    fn poll_interval(&self) -> Duration;

    /// Field checks run before [`Source::initialize`]; empty means valid.
    fn validate(&self) -> Vec<ConfigError>;

    /// Bind credentials and build the provider client. Must succeed before `stream`.
    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError>;

    /// One fetch pass: emit every activity newer than `since`.
    ///
    /// Errors go to `out.fail` once and end the pass. Returns promptly when
    /// `cancel` fires.
    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter);

    /// Configuration JSON including the `type` discriminant.
    fn to_config(&self) -> serde_json::Value;
}

impl fmt::Debug for dyn Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("uid", &self.uid().to_string())
            .finish()
    }
}

/// A per-pass fault, tagged with the source that reported it.
#[derive(Debug)]
pub struct SourceFault {
    pub source_uid: TypedUid,
    pub error: anyhow::Error,
}

impl fmt::Display for SourceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:#}", self.source_uid, self.error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error("activity channel closed")]
    Closed,
    #[error("stream cancelled")]
    Cancelled,
}

/// Write side handed to a stream: activities and faults for one source.
#[derive(Clone)]
pub struct Emitter {
    source_uid: TypedUid,
    activities: mpsc::Sender<Activity>,
    faults: mpsc::Sender<SourceFault>,
    cancel: CancellationToken,
}

impl Emitter {
    pub fn new(
        source_uid: TypedUid,
        activities: mpsc::Sender<Activity>,
        faults: mpsc::Sender<SourceFault>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source_uid,
            activities,
            faults,
            cancel,
        }
    }

    pub fn source_uid(&self) -> &TypedUid {
        &self.source_uid
    }

    /// Waits for channel capacity unless the stream is cancelled first.
    pub async fn send(&self, activity: Activity) -> Result<(), EmitError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EmitError::Cancelled),
            res = self.activities.send(activity) => res.map_err(|_| EmitError::Closed),
        }
    }

    /// Report a fault for this pass. Dropped silently once cancelled or closed.
    pub async fn fail(&self, error: anyhow::Error) {
        let fault = SourceFault {
            source_uid: self.source_uid.clone(),
            error,
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            _ = self.faults.send(fault) => {}
        }
    }
}

/// Run one fetch pass, reporting its error once. Cancellation abandons the pass.
pub async fn run_pass<F>(cancel: &CancellationToken, out: &Emitter, pass: F)
where
    F: Future<Output = anyhow::Result<()>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        res = pass => {
            if let Err(e) = res {
                // The consumer went away; nobody is left to tell.
                if e.downcast_ref::<EmitError>().is_none() {
                    out.fail(e).await;
                }
            }
        }
    }
}

/// Serialize a source configuration and tag it with its discriminant.
pub fn tagged_config<T: Serialize>(source_type: &str, config: &T) -> serde_json::Value {
    let mut value = serde_json::to_value(config).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(map) = value.as_object_mut() {
        map.insert("type".into(), serde_json::Value::String(source_type.into()));
    }
    value
}

/// HTTP client with the crate's user agent and the given per-request timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, ConfigError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .map_err(|e| ConfigError::new("client", format!("building HTTP client: {e}")))
}

/// Client and endpoint bound by `initialize`.
#[derive(Debug, Clone)]
pub struct HttpRuntime {
    pub client: reqwest::Client,
    pub base_url: String,
}

impl HttpRuntime {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// The runtime of an initialized source, or an error for streams started too early.
pub fn runtime(rt: &Option<HttpRuntime>) -> anyhow::Result<&HttpRuntime> {
    rt.as_ref()
        .context("source used before initialize() succeeded")
}

/// Send, require a 2xx status, decode JSON.
pub async fn fetch_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> anyhow::Result<T> {
    let response = request.send().await.context("sending request")?;
    let status = response.status();
    let url = response.url().to_string();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let (body, _) = text::limit_string_length(&body, 300);
        bail!("{url} returned {status}: {body}");
    }
    response
        .json::<T>()
        .await
        .with_context(|| format!("decoding response from {url}"))
}
