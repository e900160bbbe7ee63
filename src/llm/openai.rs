// src/llm/openai.rs
//! Embedding and completion models. The OpenAI implementations send every request
//! through the [`RateLimitedClient`].

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::gateway::RateLimitedClient;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    fn model_id(&self) -> &str;
    /// One vector per input text, in input order.
    async fn create_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait CompletionModel: Send + Sync {
    fn model_id(&self) -> &str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct OpenAiClient {
    gateway: RateLimitedClient,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(gateway: RateLimitedClient, base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            gateway,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<R> {
        let request = self
            .gateway
            .http()
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .build()
            .context("building model API request")?;

        let response = self.gateway.execute(request).await?;
        if !response.is_success() {
            bail!(
                "model API {path} returned {}: {}",
                response.status,
                response.text()
            );
        }
        response
            .json()
            .with_context(|| format!("decoding model API {path} response"))
    }
}

pub struct OpenAiEmbedder {
    client: OpenAiClient,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingModel for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn create_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut resp: EmbeddingResponse = self.client.post("embeddings", &req).await?;
        if resp.data.len() != texts.len() {
            bail!(
                "embedding count mismatch: sent {}, received {}",
                texts.len(),
                resp.data.len()
            );
        }
        resp.data.sort_by_key(|d| d.index);
        Ok(resp.data.into_iter().map(|d| d.embedding).collect())
    }
}

pub struct OpenAiCompletion {
    client: OpenAiClient,
    model: String,
}

impl OpenAiCompletion {
    pub fn new(client: OpenAiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionModel for OpenAiCompletion {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let req = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };
        let resp: ChatResponse = self.client.post("chat/completions", &req).await?;
        resp.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| anyhow!("completion response had no content"))
    }
}
