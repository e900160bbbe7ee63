// src/llm/mod.rs
//! Model access for activity enrichment: a rate-limited gateway, usage accounting,
//! OpenAI-compatible models and cached wrappers around them.

pub mod cached;
pub mod gateway;
pub mod openai;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::activity::Activity;
use crate::cache::TtlCache;
use crate::config::LlmConfig;
use crate::sources::text::limit_string_length;
use cached::{CachedCompletion, CachedEmbedder};
use gateway::RateLimitedClient;
use openai::{CompletionModel, EmbeddingModel, OpenAiClient, OpenAiCompletion, OpenAiEmbedder};
use usage::UsageTracker;

const BODY_PROMPT_CHARS: usize = 4_000;

#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub summary: String,
    pub embedding: Vec<f32>,
}

/// Summarizes an activity and embeds the summary.
#[derive(Clone)]
pub struct Summarizer {
    completion: Arc<dyn CompletionModel>,
    embedding: Arc<dyn EmbeddingModel>,
    usage: Option<Arc<UsageTracker>>,
}

impl Summarizer {
    pub fn new(completion: Arc<dyn CompletionModel>, embedding: Arc<dyn EmbeddingModel>) -> Self {
        Self {
            completion,
            embedding,
            usage: None,
        }
    }

    pub fn usage(&self) -> Option<&Arc<UsageTracker>> {
        self.usage.as_ref()
    }

    pub async fn enrich(&self, activity: &Activity) -> Result<Enrichment> {
        let summary = self
            .completion
            .complete(&summary_prompt(activity))
            .await
            .context("summarizing activity")?;
        let mut vectors = self
            .embedding
            .create_embeddings(std::slice::from_ref(&summary))
            .await
            .context("embedding summary")?;
        let embedding = vectors.pop().context("embedding model returned no vector")?;
        Ok(Enrichment { summary, embedding })
    }
}

fn summary_prompt(activity: &Activity) -> String {
    let (body, truncated) = limit_string_length(&activity.body(), BODY_PROMPT_CHARS);
    let marker = if truncated { " [truncated]" } else { "" };
    format!(
        "Summarize the following item in at most three sentences. \
         Keep names, versions and numbers exact.\n\n\
         Title: {}\nURL: {}\n\n{body}{marker}",
        activity.title(),
        activity.url(),
    )
}

/// Build the summarizer from configuration. `None` when no API key is set.
pub fn build_from_config(cfg: &LlmConfig) -> Result<Option<Summarizer>> {
    let Some(api_key) = cfg.api_key.as_deref() else {
        warn!("LLM enrichment disabled: OPENAI_API_KEY is not set");
        return Ok(None);
    };
    info!(
        base_url = %cfg.base_url,
        embedding_model = %cfg.embedding_model,
        completion_model = %cfg.completion_model,
        key_len = api_key.len(),
        cache_ttl_secs = cfg.cache_ttl.as_secs(),
        cache_scope_by_model = cfg.cache_scope_by_model,
        "LLM cfg loaded"
    );

    let http = reqwest::Client::builder()
        .user_agent(crate::sources::USER_AGENT)
        .timeout(Duration::from_secs(60))
        .build()
        .context("building LLM HTTP client")?;
    let tracker = Arc::new(UsageTracker::default());
    let gateway = RateLimitedClient::new(http).with_usage_tracker(tracker.clone());
    let client = OpenAiClient::new(gateway, &cfg.base_url, api_key);

    let completion = CachedCompletion::new(
        OpenAiCompletion::new(client.clone(), cfg.completion_model.clone()),
        Arc::new(TtlCache::new(cfg.cache_ttl)),
    )
    .scope_by_model(cfg.cache_scope_by_model);
    let embedding = CachedEmbedder::new(
        OpenAiEmbedder::new(client, cfg.embedding_model.clone()),
        Arc::new(TtlCache::new(cfg.cache_ttl)),
    )
    .scope_by_model(cfg.cache_scope_by_model);

    let mut summarizer = Summarizer::new(Arc::new(completion), Arc::new(embedding));
    summarizer.usage = Some(tracker);
    Ok(Some(summarizer))
}
