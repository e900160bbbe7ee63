// src/sources/reddit.rs
//! Subreddit listings through Reddit's public JSON endpoints.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::activity::{Activity, RedditPost};
use crate::config::{ConfigError, ProviderConfig};
use crate::sources::article::{self, ArticleFetcher};
use crate::sources::cursor::{drain_pages, IdCursor, Page, Step, TimestampCursor};
use crate::sources::validate::{first_error, Validator};
use crate::sources::{fetch_json, run_pass, runtime, tagged_config, Emitter, HttpRuntime, Source, DEFAULT_TIMEOUT};
use crate::uid::TypedUid;

pub const TYPE_SUBREDDIT: &str = "redditsubreddit";

pub const SORTS: &[&str] = &["hot", "new", "top", "rising"];
pub const TOP_PERIODS: &[&str] = &["hour", "day", "week", "month", "year", "all"];

const PAGE_LIMIT: usize = 10;
const MAX_PAGES: usize = 10;

fn default_sort() -> String {
    "hot".into()
}

fn default_period() -> String {
    "day".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedditSubreddit {
    pub subreddit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subreddit_summary: String,
    #[serde(default = "default_sort")]
    pub sort_by: String,
    #[serde(default = "default_period")]
    pub top_period: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub search: String,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
    #[serde(skip)]
    articles: Option<ArticleFetcher>,
}

impl RedditSubreddit {
    pub fn new(subreddit: impl Into<String>) -> Self {
        Self {
            subreddit: subreddit.into(),
            subreddit_summary: String::new(),
            sort_by: default_sort(),
            top_period: default_period(),
            search: String::new(),
            rt: None,
            articles: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: PostDto,
}

#[derive(Debug, Deserialize)]
struct PostDto {
    id: String,
    name: String,
    subreddit: String,
    title: String,
    #[serde(default)]
    selftext: String,
    permalink: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    is_self: bool,
    #[serde(default)]
    thumbnail: Option<String>,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    stickied: bool,
    #[serde(default)]
    over_18: bool,
}

impl PostDto {
    fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created_utc as i64, 0).unwrap_or_else(Utc::now)
    }

    fn into_activity(self, source_id: &TypedUid) -> RedditPost {
        // "self", "default", "nsfw" and friends are placeholders, not URLs.
        let created_at = self.created_at();
        let thumbnail_url = self.thumbnail.filter(|t| t.starts_with("http"));
        let link_url = if self.is_self { None } else { self.url };
        RedditPost {
            id: self.id,
            fullname: self.name,
            subreddit: self.subreddit,
            title: self.title,
            selftext: self.selftext,
            permalink: self.permalink,
            link_url,
            thumbnail_url,
            created_at,
            score: self.score,
            num_comments: self.num_comments,
            article_text: None,
            source_type: TYPE_SUBREDDIT.to_string(),
            source_ids: vec![source_id.clone()],
        }
    }
}

impl RedditSubreddit {
    fn listing_request(&self, rt: &HttpRuntime, before: Option<&str>) -> reqwest::RequestBuilder {
        let req = if self.search.is_empty() {
            let path = format!("r/{}/{}.json", self.subreddit, self.sort_by);
            rt.client.get(rt.endpoint(&path)).query(&[("t", self.top_period.as_str())])
        } else {
            let path = format!("r/{}/search.json", self.subreddit);
            rt.client.get(rt.endpoint(&path)).query(&[
                ("q", self.search.as_str()),
                ("restrict_sr", "1"),
                ("sort", self.sort_by.as_str()),
                ("t", self.top_period.as_str()),
            ])
        };
        let req = req.query(&[("limit", PAGE_LIMIT.to_string()), ("raw_json", "1".to_string())]);
        match before {
            Some(fullname) => req.query(&[("before", fullname)]),
            None => req,
        }
    }

    /// Only `new` listings are chronological; `before=<fullname>` means "newer" there alone.
    fn is_chronological(&self) -> bool {
        self.sort_by == "new"
    }

    async fn fetch(&self, ids: IdCursor, times: TimestampCursor, out: &Emitter) -> anyhow::Result<()> {
        let rt = runtime(&self.rt)?;
        let source_id = self.uid();

        let emitted = match ids.id() {
            Some(fullname) if self.is_chronological() => {
                match self.drain_newer(rt, fullname, &source_id, out).await? {
                    Some(emitted) => emitted,
                    // The since post left the listing or was removed.
                    None => self.latest_page(rt, times, &source_id, out).await?,
                }
            }
            _ => self.latest_page(rt, times, &source_id, out).await?,
        };
        tracing::debug!(emitted, subreddit = %self.subreddit, sort = %self.sort_by, "subreddit fetched");
        Ok(())
    }

    /// Page backwards from `fullname`. `None` when the first page is empty.
    async fn drain_newer(
        &self,
        rt: &HttpRuntime,
        fullname: &str,
        source_id: &TypedUid,
        out: &Emitter,
    ) -> anyhow::Result<Option<usize>> {
        let anchor_empty = AtomicBool::new(false);
        let emitted = drain_pages(
            out,
            fullname.to_string(),
            MAX_PAGES,
            |before: String| {
                let req = self.listing_request(rt, Some(&before));
                let is_anchor = before == fullname;
                let anchor_empty = &anchor_empty;
                async move {
                    let listing: Listing = fetch_json(req).await?;
                    let items: Vec<PostDto> = listing.data.children.into_iter().map(|c| c.data).collect();
                    if is_anchor && items.is_empty() {
                        anchor_empty.store(true, Ordering::Relaxed);
                    }
                    // Newest first; the next page of newer posts sits before the first one.
                    let next = items.first().map(|first| first.name.clone());
                    let posts = self.build_posts(items, TimestampCursor::default(), source_id).await;
                    Ok(Page { items: posts, next })
                }
            },
            emit_kept,
        )
        .await?;
        if anchor_empty.load(Ordering::Relaxed) {
            return Ok(None);
        }
        Ok(Some(emitted))
    }

    /// One bounded page, keeping posts created after the cursor.
    async fn latest_page(
        &self,
        rt: &HttpRuntime,
        times: TimestampCursor,
        source_id: &TypedUid,
        out: &Emitter,
    ) -> anyhow::Result<usize> {
        drain_pages(
            out,
            (),
            1,
            |()| {
                let req = self.listing_request(rt, None);
                async move {
                    let listing: Listing = fetch_json(req).await?;
                    let items = listing.data.children.into_iter().map(|c| c.data).collect();
                    Ok(Page::last(self.build_posts(items, times, source_id).await))
                }
            },
            emit_kept,
        )
        .await
    }

    /// Pinned, NSFW and already seen posts become `None`; the rest get their article text.
    async fn build_posts(
        &self,
        items: Vec<PostDto>,
        times: TimestampCursor,
        source_id: &TypedUid,
    ) -> Vec<Option<RedditPost>> {
        let mut posts = Vec::with_capacity(items.len());
        for dto in items {
            if dto.stickied || dto.over_18 || !times.is_new(dto.created_at()) {
                posts.push(None);
                continue;
            }
            let mut post = dto.into_activity(source_id);
            if post.selftext.is_empty() {
                post.article_text = article::maybe_fetch(&self.articles, post.link_url.as_deref()).await;
            }
            posts.push(Some(post));
        }
        posts
    }
}

fn emit_kept(post: Option<RedditPost>) -> Step {
    match post {
        Some(post) => Step::Emit(Activity::RedditPost(post)),
        None => Step::Skip,
    }
}

#[async_trait]
impl Source for RedditSubreddit {
    fn uid(&self) -> TypedUid {
        let mut ids = vec![self.subreddit.clone(), self.sort_by.clone(), self.top_period.clone()];
        if !self.search.is_empty() {
            ids.push(self.search.clone());
        }
        TypedUid::new(TYPE_SUBREDDIT, ids)
    }

    fn source_type(&self) -> &'static str {
        TYPE_SUBREDDIT
    }

    fn name(&self) -> String {
        format!("r/{}", self.subreddit)
    }

    fn description(&self) -> String {
        if !self.subreddit_summary.is_empty() {
            return self.subreddit_summary.clone();
        }
        match self.sort_by.as_str() {
            "top" => format!("Top posts of the {} from r/{}", self.top_period, self.subreddit),
            sort => format!("{} posts from r/{}", crate::sources::text::capitalize(sort), self.subreddit),
        }
    }

    fn url(&self) -> String {
        format!("https://www.reddit.com/r/{}", self.subreddit)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(10 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new()
            .required("subreddit", &self.subreddit)
            .required("sortBy", &self.sort_by)
            .one_of("sortBy", &self.sort_by, SORTS)
            .required("topPeriod", &self.top_period)
            .one_of("topPeriod", &self.top_period, TOP_PERIODS)
            .finish()
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        self.rt = Some(HttpRuntime::new(&config.reddit_base_url, DEFAULT_TIMEOUT)?);
        self.articles = ArticleFetcher::from_config(config)?;
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        let ids = IdCursor::from_since(since, |a| match a {
            Activity::RedditPost(p) => Some(p.fullname.clone()),
            _ => None,
        });
        run_pass(cancel, out, self.fetch(ids, TimestampCursor::from_since(since), out)).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_SUBREDDIT, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_uid() {
        let s: RedditSubreddit = serde_json::from_value(serde_json::json!({"subreddit": "rust"})).unwrap();
        assert_eq!(s.sort_by, "hot");
        assert_eq!(s.uid().to_string(), "redditsubreddit:rust:hot:day");
        assert_eq!(s.description(), "Hot posts from r/rust");

        let mut searched = RedditSubreddit::new("rust");
        searched.search = "async".into();
        assert_eq!(searched.uid().to_string(), "redditsubreddit:rust:hot:day:async");
    }

    #[test]
    fn rejects_unknown_sort() {
        let mut s = RedditSubreddit::new("rust");
        s.sort_by = "controversial".into();
        let errors = s.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "sortBy");
    }

    #[test]
    fn placeholder_thumbnails_and_self_links_are_dropped() {
        let dto: PostDto = serde_json::from_value(serde_json::json!({
            "id": "abc",
            "name": "t3_abc",
            "subreddit": "rust",
            "title": "Tokio 2.0 &amp; you",
            "selftext": "",
            "permalink": "/r/rust/comments/abc/tokio/",
            "url": "https://www.reddit.com/r/rust/comments/abc/tokio/",
            "is_self": true,
            "thumbnail": "self",
            "created_utc": 1735689600.0,
            "score": 120,
            "num_comments": 30
        }))
        .unwrap();
        let post = dto.into_activity(&TypedUid::new(TYPE_SUBREDDIT, ["rust", "hot", "day"]));
        assert_eq!(post.thumbnail_url, None);
        assert_eq!(post.link_url, None);
        assert_eq!(post.created_at.timestamp(), 1_735_689_600);

        let activity = Activity::RedditPost(post);
        assert_eq!(activity.title(), "Tokio 2.0 & you");
        assert_eq!(activity.url(), "https://www.reddit.com/r/rust/comments/abc/tokio/");
    }
}
