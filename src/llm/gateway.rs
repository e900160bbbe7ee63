// src/llm/gateway.rs
//! Retrying HTTP gateway for rate-limited model APIs.
//!
//! `429` and `503` responses are retried with a delay taken from the
//! `x-ratelimit-*` headers plus random jitter. Transport errors and every other
//! non-200 status go straight back to the caller. Running out of attempts is a
//! distinct [`GatewayError::RetriesExhausted`], never a response.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use once_cell::sync::OnceCell;
use rand::Rng;
use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::llm::usage::UsageTracker;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

pub const HEADER_REMAINING_REQUESTS: &str = "x-ratelimit-remaining-requests";
pub const HEADER_RESET_REQUESTS: &str = "x-ratelimit-reset-requests";
pub const HEADER_REMAINING_TOKENS: &str = "x-ratelimit-remaining-tokens";
pub const HEADER_RESET_TOKENS: &str = "x-ratelimit-reset-tokens";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("max retries exceeded after {attempts} attempts (last status {last_status})")]
    RetriesExhausted {
        attempts: u32,
        last_status: StatusCode,
    },
}

/// Fully buffered response, so usage tracking and the caller can both read the body.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    async fn read(response: reqwest::Response) -> Result<Self, GatewayError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();
        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

/// Quota hints from one response. `None` means the header was absent or unreadable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub remaining_requests: Option<i64>,
    pub reset_requests: Duration,
    pub remaining_tokens: Option<i64>,
    pub reset_tokens: Duration,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        Self {
            remaining_requests: get(HEADER_REMAINING_REQUESTS).and_then(parse_count),
            reset_requests: get(HEADER_RESET_REQUESTS).map(parse_reset).unwrap_or_default(),
            remaining_tokens: get(HEADER_REMAINING_TOKENS).and_then(parse_count),
            reset_tokens: get(HEADER_RESET_TOKENS).map(parse_reset).unwrap_or_default(),
        }
    }

    /// Reset wait implied by an exhausted quota, requests first, then tokens.
    pub fn reset_hint(&self) -> Duration {
        let exhausted = |remaining: Option<i64>| matches!(remaining, Some(r) if (0..=1).contains(&r));
        if exhausted(self.remaining_requests) && !self.reset_requests.is_zero() {
            return self.reset_requests;
        }
        if exhausted(self.remaining_tokens) && !self.reset_tokens.is_zero() {
            return self.reset_tokens;
        }
        Duration::ZERO
    }
}

fn parse_count(s: &str) -> Option<i64> {
    s.trim().parse().ok()
}

/// Reset header value: float seconds (`"1"`, `"0.5"`), else a duration string
/// (`"6m0s"`, `"20ms"`, `"1h2m"`), else zero.
pub fn parse_reset(s: &str) -> Duration {
    let s = s.trim();
    if s.is_empty() {
        return Duration::ZERO;
    }
    if let Ok(secs) = s.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).unwrap_or_default();
    }
    parse_duration_string(s).unwrap_or_default()
}

fn parse_duration_string(s: &str) -> Option<Duration> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|μs|ms|s|m|h)").expect("valid duration regex")
    });

    let mut rest = s.strip_prefix('+').unwrap_or(s);
    if rest.is_empty() {
        return None;
    }
    let mut total_nanos = 0.0_f64;
    while !rest.is_empty() {
        let caps = re.captures(rest)?;
        let value: f64 = caps[1].parse().ok()?;
        let unit_nanos = match &caps[2] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        total_nanos += value * unit_nanos;
        rest = &rest[caps[0].len()..];
    }
    Some(Duration::from_nanos(total_nanos.round() as u64))
}

/// Reset hint plus uniform jitter in `[0, max_jitter)`.
pub fn backoff_with_jitter(headers: &RateLimitHeaders, max_jitter: Duration) -> Duration {
    let jitter_ms = max_jitter.as_millis() as u64;
    let jitter = if jitter_ms == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(rand::rng().random_range(0..jitter_ms))
    };
    headers.reset_hint() + jitter
}

#[derive(Clone)]
pub struct RateLimitedClient {
    http: reqwest::Client,
    max_attempts: u32,
    max_jitter: Duration,
    usage: Option<Arc<UsageTracker>>,
}

impl RateLimitedClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_jitter: DEFAULT_MAX_JITTER,
            usage: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    pub fn with_usage_tracker(mut self, tracker: Arc<UsageTracker>) -> Self {
        self.usage = Some(tracker);
        self
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn usage(&self) -> Option<&Arc<UsageTracker>> {
        self.usage.as_ref()
    }

    /// Send `request`, retrying rate-limited responses.
    ///
    /// The request is cloned before each send so a retry can resend the body; a
    /// request whose body cannot be cloned gets exactly one attempt.
    pub async fn execute(&self, request: reqwest::Request) -> Result<GatewayResponse, GatewayError> {
        crate::metrics::ensure_described();

        let mut template = Some(request);
        let mut last_status = StatusCode::TOO_MANY_REQUESTS;
        let mut attempts = 0;

        while attempts < self.max_attempts {
            let Some(current) = template.take() else {
                break;
            };
            attempts += 1;
            if attempts < self.max_attempts {
                template = current.try_clone();
            }

            counter!("llm_gateway_attempts_total").increment(1);
            let response = match self.http.execute(current).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(error = %e, attempt = attempts, "model API transport error");
                    return Err(e.into());
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE {
                let limits = RateLimitHeaders::from_headers(response.headers());
                last_status = status;
                if template.is_none() {
                    // Out of attempts, or the body could not be cloned for a resend.
                    if attempts < self.max_attempts {
                        return GatewayResponse::read(response).await;
                    }
                    break;
                }
                let delay = backoff_with_jitter(&limits, self.max_jitter);
                tracing::warn!(
                    status = status.as_u16(),
                    attempt = attempts,
                    remaining_requests = ?limits.remaining_requests,
                    reset_requests_ms = limits.reset_requests.as_millis() as u64,
                    remaining_tokens = ?limits.remaining_tokens,
                    reset_tokens_ms = limits.reset_tokens.as_millis() as u64,
                    delay_ms = delay.as_millis() as u64,
                    "model API rate limited, retrying with backoff"
                );
                counter!("llm_gateway_retries_total").increment(1);
                tokio::time::sleep(delay).await;
                continue;
            }

            let buffered = GatewayResponse::read(response).await?;
            if status != StatusCode::OK {
                tracing::warn!(
                    status = status.as_u16(),
                    attempt = attempts,
                    body = %buffered.text(),
                    "model API returned non-ok response"
                );
                return Ok(buffered);
            }

            tracing::debug!(attempt = attempts, "model API request successful");
            if let Some(tracker) = &self.usage {
                if let Err(e) = tracker.track(&buffered.body) {
                    tracing::debug!(error = %e, "usage not tracked");
                }
            }
            return Ok(buffered);
        }

        counter!("llm_gateway_exhausted_total").increment(1);
        tracing::error!(attempts, last_status = last_status.as_u16(), "model API retries exhausted");
        Err(GatewayError::RetriesExhausted {
            attempts,
            last_status,
        })
    }
}
