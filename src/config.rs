// src/config.rs
//! Runtime configuration: provider credentials and endpoints from the environment,
//! engine settings and configured sources from a TOML or JSON file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

pub const ENV_CONFIG_PATH: &str = "FEEDPULSE_CONFIG";
pub const DEFAULT_TOML_PATH: &str = "config/feedpulse.toml";
pub const DEFAULT_JSON_PATH: &str = "config/feedpulse.json";

/// A missing or malformed source field. Blocks initialization of that source only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ConfigError {
    pub field: String,
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn flag(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

/// Credentials and base URLs shared by all sources of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub reddit_base_url: String,
    pub hackernews_api_url: String,
    pub producthunt_token: Option<String>,
    pub producthunt_api_url: String,
    pub changedetection_token: Option<String>,
    pub mastodon_access_token: Option<String>,
    /// Pull the linked article's text into link-only posts.
    pub fetch_articles: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            github_token: None,
            github_api_url: "https://api.github.com".into(),
            reddit_base_url: "https://www.reddit.com".into(),
            hackernews_api_url: "https://hacker-news.firebaseio.com/v0".into(),
            producthunt_token: None,
            producthunt_api_url: "https://api.producthunt.com/v2/api/graphql".into(),
            changedetection_token: None,
            mastodon_access_token: None,
            fetch_articles: false,
        }
    }
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup; empty values count as unset.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let d = Self::default();
        let url = |key: &str, default: String| non_empty(get(key)).unwrap_or(default);
        Self {
            github_token: non_empty(get("GITHUB_API_KEY")),
            github_api_url: url("GITHUB_API_URL", d.github_api_url),
            reddit_base_url: url("REDDIT_BASE_URL", d.reddit_base_url),
            hackernews_api_url: url("HACKERNEWS_API_URL", d.hackernews_api_url),
            producthunt_token: non_empty(get("PRODUCTHUNT_API_TOKEN")),
            producthunt_api_url: url("PRODUCTHUNT_API_URL", d.producthunt_api_url),
            changedetection_token: non_empty(get("CHANGEDETECTION_API_KEY")),
            mastodon_access_token: non_empty(get("MASTODON_ACCESS_TOKEN")),
            fetch_articles: non_empty(get("FETCH_ARTICLE_TEXT")).is_some_and(|v| flag(&v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    /// No key means enrichment is disabled.
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub completion_model: String,
    pub cache_ttl: Duration,
    /// Fold the model id into cache keys.
    pub cache_scope_by_model: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: crate::llm::openai::DEFAULT_BASE_URL.into(),
            embedding_model: "text-embedding-3-large".into(),
            completion_model: "gpt-5-nano-2025-08-07".into(),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            cache_scope_by_model: false,
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(get: F) -> Self {
        let d = Self::default();
        Self {
            api_key: non_empty(get("OPENAI_API_KEY")),
            base_url: non_empty(get("OPENAI_BASE_URL")).unwrap_or(d.base_url),
            embedding_model: non_empty(get("LLM_EMBEDDING_MODEL")).unwrap_or(d.embedding_model),
            completion_model: non_empty(get("LLM_COMPLETION_MODEL")).unwrap_or(d.completion_model),
            cache_ttl: non_empty(get("LLM_CACHE_TTL_SECS"))
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(d.cache_ttl),
            cache_scope_by_model: non_empty(get("LLM_CACHE_SCOPE_BY_MODEL"))
                .map(|v| flag(&v))
                .unwrap_or(d.cache_scope_by_model),
        }
    }

    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of the shared activity and fault channels.
    pub channel_capacity: usize,
    pub processor_concurrency: usize,
    /// `host:port` for `/metrics` and `/health`; unset disables the listener.
    pub metrics_addr: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            processor_concurrency: 30,
            metrics_addr: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Source configurations, each tagged with its `type`.
    #[serde(default)]
    pub sources: Vec<serde_json::Value>,
}

impl AppConfig {
    /// Load from an explicit path. TOML or JSON, chosen by extension.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_config(&content, &ext).with_context(|| format!("parsing {}", path.display()))
    }

    /// Load using env var + fallbacks:
    /// 1) $FEEDPULSE_CONFIG
    /// 2) config/feedpulse.toml
    /// 3) config/feedpulse.json
    ///
    /// No file at all yields the defaults with no sources.
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
        }
        for candidate in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
            let p = PathBuf::from(candidate);
            if p.exists() {
                return Self::load_from(&p);
            }
        }
        Ok(Self::default())
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig> {
    match hint_ext {
        "toml" => Ok(toml::from_str(s)?),
        "json" => Ok(serde_json::from_str(s)?),
        _ => {
            if let Ok(v) = toml::from_str(s) {
                return Ok(v);
            }
            serde_json::from_str(s).map_err(|_| anyhow!("unsupported config format"))
        }
    }
}
