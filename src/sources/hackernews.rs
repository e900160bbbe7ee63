// src/sources/hackernews.rs
//! Hacker News story feeds via the Firebase API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::activity::{Activity, HackerNewsPost};
use crate::config::{ConfigError, ProviderConfig};
use crate::sources::article::{self, ArticleFetcher};
use crate::sources::cursor::{IdCursor, TimestampCursor};
use crate::sources::validate::{first_error, Validator};
use crate::sources::{fetch_json, run_pass, runtime, tagged_config, Emitter, HttpRuntime, Source};
use crate::uid::TypedUid;

pub const TYPE_POSTS: &str = "hackernewsposts";

pub const FEEDS: &[&str] = &["top", "new", "best"];

/// Stories fetched per pass, cold or warm.
pub const MAX_ITEMS: usize = 15;
const ITEM_CONCURRENCY: usize = 10;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HackerNewsPosts {
    pub feed_name: String,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
    #[serde(skip)]
    articles: Option<ArticleFetcher>,
}

impl HackerNewsPosts {
    pub fn new(feed_name: impl Into<String>) -> Self {
        Self {
            feed_name: feed_name.into(),
            rt: None,
            articles: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ItemDto {
    id: u64,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    descendants: i64,
    #[serde(default)]
    dead: bool,
    #[serde(default)]
    deleted: bool,
}

fn is_ranked(feed: &str) -> bool {
    feed != "new"
}

/// Ids the pass should fetch, in feed order.
fn select_ids(feed: &str, ids: Vec<u64>, cursor: &IdCursor) -> Vec<u64> {
    let since = match cursor.id().and_then(|id| id.parse::<u64>().ok()) {
        Some(since) if !is_ranked(feed) => since,
        // top/best are rankings, not timelines; items are filtered by time instead.
        _ => return ids.into_iter().take(MAX_ITEMS).collect(),
    };
    ids.into_iter().filter(|id| *id > since).take(MAX_ITEMS).collect()
}

impl HackerNewsPosts {
    async fn fetch_items(&self, rt: &HttpRuntime, ids: Vec<u64>) -> anyhow::Result<Vec<ItemDto>> {
        let limiter = Arc::new(Semaphore::new(ITEM_CONCURRENCY));
        let mut set = JoinSet::new();
        for (rank, id) in ids.into_iter().enumerate() {
            let req = rt.client.get(rt.endpoint(&format!("item/{id}.json")));
            let limiter = limiter.clone();
            set.spawn(async move {
                let _permit = limiter.acquire_owned().await?;
                let item: Option<ItemDto> = fetch_json(req).await?;
                anyhow::Ok((rank, item))
            });
        }

        let mut ranked = Vec::new();
        while let Some(joined) = set.join_next().await {
            let (rank, item) = joined.context("item task panicked")??;
            if let Some(item) = item {
                ranked.push((rank, item));
            }
        }
        ranked.sort_by_key(|(rank, _)| *rank);
        Ok(ranked.into_iter().map(|(_, item)| item).collect())
    }

    async fn fetch(&self, cursor: IdCursor, times: TimestampCursor, out: &Emitter) -> anyhow::Result<()> {
        let rt = runtime(&self.rt)?;
        let source_id = self.uid();

        let ids: Vec<u64> = fetch_json(rt.client.get(rt.endpoint(&format!("{}stories.json", self.feed_name)))).await?;
        let ids = select_ids(&self.feed_name, ids, &cursor);
        if ids.is_empty() {
            return Ok(());
        }

        let ranked = is_ranked(&self.feed_name);
        let mut emitted = 0usize;
        for item in self.fetch_items(rt, ids).await? {
            if item.dead || item.deleted || item.kind.as_deref().is_some_and(|k| k != "story") {
                continue;
            }
            let time = DateTime::from_timestamp(item.time, 0).unwrap_or_else(Utc::now);
            if ranked && !times.is_new(time) {
                continue;
            }
            let mut post = HackerNewsPost {
                id: item.id,
                title: item.title.unwrap_or_default(),
                text: item.text,
                link_url: item.url,
                time,
                score: item.score,
                descendants: item.descendants,
                article_text: None,
                source_id: source_id.clone(),
            };
            if post.text.as_deref().map_or(true, str::is_empty) {
                post.article_text = article::maybe_fetch(&self.articles, post.link_url.as_deref()).await;
            }
            out.send(Activity::HackerNewsPost(post)).await?;
            emitted += 1;
        }
        tracing::debug!(feed = %self.feed_name, emitted, "hacker news pass done");
        Ok(())
    }
}

#[async_trait]
impl Source for HackerNewsPosts {
    fn uid(&self) -> TypedUid {
        TypedUid::new(TYPE_POSTS, [self.feed_name.clone()])
    }

    fn source_type(&self) -> &'static str {
        TYPE_POSTS
    }

    fn name(&self) -> String {
        format!("{} Hacker News stories", crate::sources::text::capitalize(&self.feed_name))
    }

    fn description(&self) -> String {
        format!("The {} stories on Hacker News", self.feed_name)
    }

    fn url(&self) -> String {
        match self.feed_name.as_str() {
            "new" => "https://news.ycombinator.com/newest".into(),
            "best" => "https://news.ycombinator.com/best".into(),
            _ => "https://news.ycombinator.com/news".into(),
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(10 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new()
            .required("feedName", &self.feed_name)
            .one_of("feedName", &self.feed_name, FEEDS)
            .finish()
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        self.rt = Some(HttpRuntime::new(&config.hackernews_api_url, Duration::from_secs(10))?);
        self.articles = ArticleFetcher::from_config(config)?;
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        let cursor = IdCursor::from_since(since, |a| match a {
            Activity::HackerNewsPost(p) => Some(p.id.to_string()),
            _ => None,
        });
        run_pass(cancel, out, self.fetch(cursor, TimestampCursor::from_since(since), out)).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_POSTS, self)
    }
}
