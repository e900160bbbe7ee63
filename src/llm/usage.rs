// src/llm/usage.rs
//! Token usage and cost accounting for successful model responses.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("response is not a usage-bearing JSON object: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no pricing known for model '{0}'")]
    UnknownModel(String),
}

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_1m: f64,
    pub output_per_1m: f64,
}

pub fn default_pricing() -> HashMap<String, ModelPricing> {
    HashMap::from([
        (
            "gpt-5-nano-2025-08-07".to_string(),
            ModelPricing {
                input_per_1m: 0.05,
                output_per_1m: 0.4,
            },
        ),
        (
            "text-embedding-3-small".to_string(),
            ModelPricing {
                input_per_1m: 0.02,
                output_per_1m: 0.0,
            },
        ),
        (
            "text-embedding-3-large".to_string(),
            ModelPricing {
                input_per_1m: 0.13,
                output_per_1m: 0.0,
            },
        ),
    ])
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetrics {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Part of `completion_tokens`, reported separately.
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
    pub prompt_cost: f64,
    pub completion_cost: f64,
    pub reasoning_cost: f64,
    pub total_cost: f64,
    pub model: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl UsageMetrics {
    fn accumulate(&mut self, other: &UsageMetrics) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.reasoning_tokens += other.reasoning_tokens;
        self.total_tokens += other.total_tokens;
        self.prompt_cost += other.prompt_cost;
        self.completion_cost += other.completion_cost;
        self.reasoning_cost += other.reasoning_cost;
        self.total_cost += other.total_cost;
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    usage: ApiUsage,
}

#[derive(Debug, Default, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    completion_tokens_details: Option<CompletionDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionDetails {
    #[serde(default)]
    reasoning_tokens: u64,
}

#[derive(Debug)]
pub struct UsageTracker {
    pricing: HashMap<String, ModelPricing>,
    records: RwLock<Vec<UsageMetrics>>,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(default_pricing())
    }
}

impl UsageTracker {
    pub fn new(pricing: HashMap<String, ModelPricing>) -> Self {
        Self {
            pricing,
            records: RwLock::new(Vec::new()),
        }
    }

    /// Record usage from a raw response body.
    pub fn track(&self, body: &[u8]) -> Result<UsageMetrics, UsageError> {
        let parsed: ApiResponse = serde_json::from_slice(body)?;
        let pricing = self
            .pricing
            .get(&parsed.model)
            .copied()
            .ok_or_else(|| UsageError::UnknownModel(parsed.model.clone()))?;

        let usage = calculate_costs(&parsed, pricing);
        tracing::info!(
            model = %usage.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            reasoning_tokens = usage.reasoning_tokens,
            total_tokens = usage.total_tokens,
            total_cost = usage.total_cost,
            "model API usage tracked"
        );
        counter!("llm_usage_tokens_total", "model" => usage.model.clone()).increment(usage.total_tokens);
        gauge!("llm_usage_cost_usd_total", "model" => usage.model.clone()).increment(usage.total_cost);

        self.records.write().push(usage.clone());
        Ok(usage)
    }

    pub fn total_usage(&self) -> UsageMetrics {
        let records = self.records.read();
        let mut total = UsageMetrics::default();
        for r in records.iter() {
            total.accumulate(r);
        }
        total.timestamp = records.last().and_then(|r| r.timestamp);
        total
    }

    pub fn usage_by_model(&self) -> HashMap<String, UsageMetrics> {
        let mut by_model: HashMap<String, UsageMetrics> = HashMap::new();
        for r in self.records.read().iter() {
            let entry = by_model.entry(r.model.clone()).or_insert_with(|| UsageMetrics {
                model: r.model.clone(),
                ..Default::default()
            });
            entry.accumulate(r);
            entry.timestamp = r.timestamp;
        }
        by_model
    }

    pub fn clear_usage(&self) {
        self.records.write().clear();
    }
}

fn calculate_costs(res: &ApiResponse, pricing: ModelPricing) -> UsageMetrics {
    let reasoning_tokens = res
        .usage
        .completion_tokens_details
        .as_ref()
        .map(|d| d.reasoning_tokens)
        .unwrap_or_default();
    let per_token = |tokens: u64, rate: f64| tokens as f64 * rate / 1_000_000.0;

    let prompt_cost = per_token(res.usage.prompt_tokens, pricing.input_per_1m);
    let completion_cost = per_token(res.usage.completion_tokens, pricing.output_per_1m);
    let reasoning_cost = per_token(reasoning_tokens, pricing.output_per_1m);

    UsageMetrics {
        prompt_tokens: res.usage.prompt_tokens,
        completion_tokens: res.usage.completion_tokens,
        reasoning_tokens,
        total_tokens: res.usage.total_tokens,
        prompt_cost,
        completion_cost,
        reasoning_cost,
        // Reasoning is already billed inside completion tokens.
        total_cost: prompt_cost + completion_cost,
        model: res.model.clone(),
        timestamp: Some(Utc::now()),
    }
}
