// src/sources/lobsters.rs
//! Lobsters (and compatible instances) front-page feeds and tag listings.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::activity::{Activity, LobstersPost};
use crate::config::{ConfigError, ProviderConfig};
use crate::sources::article::{self, ArticleFetcher};
use crate::sources::cursor::{drain_pages, Page, Step, TimestampCursor};
use crate::sources::text::strip_url;
use crate::sources::validate::{first_error, Validator};
use crate::sources::{fetch_json, run_pass, runtime, tagged_config, Emitter, HttpRuntime, Source, DEFAULT_TIMEOUT};
use crate::uid::TypedUid;

pub const TYPE_FEED: &str = "lobstersfeed";
pub const TYPE_TAG: &str = "lobsterstag";

pub const DEFAULT_INSTANCE: &str = "https://lobste.rs";
pub const FEEDS: &[&str] = &["hottest", "newest"];

fn default_instance() -> String {
    DEFAULT_INSTANCE.into()
}

#[derive(Debug, Deserialize)]
struct StoryDto {
    short_id: String,
    created_at: DateTime<Utc>,
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    comment_count: i64,
    comments_url: String,
    #[serde(default)]
    tags: Vec<String>,
}

/// Listings are ranked, not chronological: filter instead of stopping.
async fn fetch_stories(
    rt: &HttpRuntime,
    url: String,
    source_type: &'static str,
    source_id: TypedUid,
    cursor: TimestampCursor,
    articles: &Option<ArticleFetcher>,
    out: &Emitter,
) -> anyhow::Result<()> {
    let emitted = drain_pages(
        out,
        url,
        1,
        |url: String| {
            let req = rt.client.get(url);
            let source_id = &source_id;
            async move {
                let stories = fetch_json::<Vec<StoryDto>>(req).await?;
                let mut posts = Vec::with_capacity(stories.len());
                for story in stories.into_iter().filter(|s| cursor.is_new(s.created_at)) {
                    let article_text = article::maybe_fetch(articles, Some(story.url.as_str())).await;
                    posts.push(LobstersPost {
                        short_id: story.short_id,
                        title: story.title,
                        link_url: story.url,
                        comments_url: story.comments_url,
                        created_at: story.created_at,
                        score: story.score,
                        comment_count: story.comment_count,
                        article_text,
                        tags: story.tags,
                        source_type: source_type.to_string(),
                        source_id: source_id.clone(),
                    });
                }
                Ok(Page::last(posts))
            }
        },
        |post: LobstersPost| Step::Emit(Activity::LobstersPost(post)),
    )
    .await?;
    tracing::debug!(emitted, "lobsters stories fetched");
    Ok(())
}

// ------------------------------------------------------------
// Front-page feed
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobstersFeed {
    #[serde(default = "default_instance")]
    pub instance_url: String,
    pub feed: String,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
    #[serde(skip)]
    articles: Option<ArticleFetcher>,
}

impl LobstersFeed {
    pub fn new(feed: impl Into<String>) -> Self {
        Self {
            instance_url: default_instance(),
            feed: feed.into(),
            rt: None,
            articles: None,
        }
    }
}

#[async_trait]
impl Source for LobstersFeed {
    fn uid(&self) -> TypedUid {
        TypedUid::new(TYPE_FEED, [strip_url(&self.instance_url), self.feed.clone()])
    }

    fn source_type(&self) -> &'static str {
        TYPE_FEED
    }

    fn name(&self) -> String {
        format!("{} on {}", crate::sources::text::capitalize(&self.feed), strip_url(&self.instance_url))
    }

    fn description(&self) -> String {
        format!("The {} stories from {}", self.feed, strip_url(&self.instance_url))
    }

    fn url(&self) -> String {
        format!("{}/{}", self.instance_url.trim_end_matches('/'), self.feed)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(10 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new()
            .required("instanceUrl", &self.instance_url)
            .url("instanceUrl", &self.instance_url)
            .required("feed", &self.feed)
            .one_of("feed", &self.feed, FEEDS)
            .finish()
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        self.rt = Some(HttpRuntime::new(&self.instance_url, DEFAULT_TIMEOUT)?);
        self.articles = ArticleFetcher::from_config(config)?;
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        let pass = async {
            let rt = runtime(&self.rt)?;
            let url = rt.endpoint(&format!("{}.json", self.feed));
            let cursor = TimestampCursor::from_since(since);
            fetch_stories(rt, url, TYPE_FEED, self.uid(), cursor, &self.articles, out).await
        };
        run_pass(cancel, out, pass).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_FEED, self)
    }
}

// ------------------------------------------------------------
// Tag listing
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobstersTag {
    #[serde(default = "default_instance")]
    pub instance_url: String,
    /// Full listing URL, replacing `{instanceUrl}/t/{tag}.json`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_url: String,
    pub tag: String,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
    #[serde(skip)]
    articles: Option<ArticleFetcher>,
}

impl LobstersTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            instance_url: default_instance(),
            custom_url: String::new(),
            tag: tag.into(),
            rt: None,
            articles: None,
        }
    }
}

#[async_trait]
impl Source for LobstersTag {
    fn uid(&self) -> TypedUid {
        TypedUid::new(TYPE_TAG, [strip_url(&self.instance_url), self.tag.clone()])
    }

    fn source_type(&self) -> &'static str {
        TYPE_TAG
    }

    fn name(&self) -> String {
        format!("#{} on {}", self.tag, strip_url(&self.instance_url))
    }

    fn description(&self) -> String {
        format!("Stories tagged '{}' on {}", self.tag, strip_url(&self.instance_url))
    }

    fn url(&self) -> String {
        format!("{}/t/{}", self.instance_url.trim_end_matches('/'), self.tag)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(10 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new()
            .required("instanceUrl", &self.instance_url)
            .url("instanceUrl", &self.instance_url)
            .url("customUrl", &self.custom_url)
            .required("tag", &self.tag)
            .finish()
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        self.rt = Some(HttpRuntime::new(&self.instance_url, DEFAULT_TIMEOUT)?);
        self.articles = ArticleFetcher::from_config(config)?;
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        let pass = async {
            let rt = runtime(&self.rt)?;
            let url = if self.custom_url.is_empty() {
                rt.endpoint(&format!("t/{}.json", self.tag))
            } else {
                self.custom_url.clone()
            };
            let cursor = TimestampCursor::from_since(since);
            fetch_stories(rt, url, TYPE_TAG, self.uid(), cursor, &self.articles, out).await
        };
        run_pass(cancel, out, pass).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_TAG, self)
    }
}
