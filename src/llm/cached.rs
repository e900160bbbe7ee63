// src/llm/cached.rs
//! Model wrappers that memoize results in a [`TtlCache`].
//!
//! Keys hash the request payload only, so switching models keeps serving the
//! previous model's results until entries expire. `scope_by_model` folds the model
//! id into the key for deployments that swap models.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use metrics::counter;

use crate::cache::{hash_params, TtlCache};
use crate::llm::openai::{CompletionModel, EmbeddingModel};

fn cache_key(kind: &str, model: &str, payload: &str, scope_by_model: bool) -> String {
    let hash = if scope_by_model {
        hash_params(&[model, payload])
    } else {
        hash_params(&[payload])
    };
    format!("{kind}:{hash}")
}

pub struct CachedEmbedder<E> {
    inner: E,
    cache: Arc<TtlCache<String, Vec<f32>>>,
    scope_by_model: bool,
}

impl<E: EmbeddingModel> CachedEmbedder<E> {
    pub fn new(inner: E, cache: Arc<TtlCache<String, Vec<f32>>>) -> Self {
        Self {
            inner,
            cache,
            scope_by_model: false,
        }
    }

    pub fn scope_by_model(mut self, enabled: bool) -> Self {
        self.scope_by_model = enabled;
        self
    }

    fn key(&self, text: &str) -> String {
        cache_key("embedding", self.inner.model_id(), text, self.scope_by_model)
    }
}

#[async_trait]
impl<E: EmbeddingModel> EmbeddingModel for CachedEmbedder<E> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn create_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut missing: Vec<usize> = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(&self.key(text)) {
                Some(v) => {
                    counter!("llm_cache_hits_total", "kind" => "embedding").increment(1);
                    out.push(Some(v));
                }
                None => {
                    counter!("llm_cache_misses_total", "kind" => "embedding").increment(1);
                    out.push(None);
                    missing.push(i);
                }
            }
        }

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.create_embeddings(&batch).await?;
            if fresh.len() != batch.len() {
                bail!(
                    "embedding model returned {} vectors for {} inputs",
                    fresh.len(),
                    batch.len()
                );
            }
            for (&i, vector) in missing.iter().zip(fresh) {
                self.cache.set(self.key(&texts[i]), vector.clone());
                out[i] = Some(vector);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }
}

pub struct CachedCompletion<C> {
    inner: C,
    cache: Arc<TtlCache<String, String>>,
    scope_by_model: bool,
}

impl<C: CompletionModel> CachedCompletion<C> {
    pub fn new(inner: C, cache: Arc<TtlCache<String, String>>) -> Self {
        Self {
            inner,
            cache,
            scope_by_model: false,
        }
    }

    pub fn scope_by_model(mut self, enabled: bool) -> Self {
        self.scope_by_model = enabled;
        self
    }
}

#[async_trait]
impl<C: CompletionModel> CompletionModel for CachedCompletion<C> {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let key = cache_key("completion", self.inner.model_id(), prompt, self.scope_by_model);
        if let Some(hit) = self.cache.get(&key) {
            counter!("llm_cache_hits_total", "kind" => "completion").increment(1);
            return Ok(hit);
        }
        counter!("llm_cache_misses_total", "kind" => "completion").increment(1);
        let answer = self.inner.complete(prompt).await?;
        self.cache.set(key, answer.clone());
        Ok(answer)
    }
}
