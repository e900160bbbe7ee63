// src/activity.rs
//! Normalized activities emitted by sources.
//!
//! Every provider record is a variant of [`Activity`]; the JSON envelope carries a
//! `type` discriminant so a stored activity deserializes back into the right record
//! and still knows which source(s) produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sources::text::{capped_ratio, extract_text_from_html, norm_social_score, one_line_title, shorten_description};
use crate::uid::TypedUid;

/// Marker for engagement metrics a provider does not expose.
pub const NOT_APPLICABLE: i64 = -1;

/// Common view over every provider record.
pub trait ActivityRecord {
    fn uid(&self) -> TypedUid;
    fn source_uids(&self) -> Vec<TypedUid>;
    fn title(&self) -> String;
    fn body(&self) -> String;
    fn url(&self) -> String;
    fn image_url(&self) -> Option<String> {
        None
    }
    /// Always concrete; adapters resolve fallbacks before building the record.
    fn created_at(&self) -> DateTime<Utc>;

    fn upvotes(&self) -> i64 {
        NOT_APPLICABLE
    }
    fn downvotes(&self) -> i64 {
        NOT_APPLICABLE
    }
    fn comments(&self) -> i64 {
        NOT_APPLICABLE
    }
    fn amplification(&self) -> i64 {
        NOT_APPLICABLE
    }
    /// Normalized engagement in `[0, 1]`, or `-1.0` when not applicable.
    fn social_score(&self) -> f64 {
        -1.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    GithubIssue(GithubIssue),
    GithubRelease(GithubRelease),
    GithubRepository(GithubRepository),
    RedditPost(RedditPost),
    HackerNewsPost(HackerNewsPost),
    LobstersPost(LobstersPost),
    MastodonPost(MastodonPost),
    FeedItem(FeedItem),
    ProductHuntPost(ProductHuntPost),
    WebsiteChange(WebsiteChange),
}

impl Activity {
    pub fn record(&self) -> &dyn ActivityRecord {
        match self {
            Activity::GithubIssue(r) => r,
            Activity::GithubRelease(r) => r,
            Activity::GithubRepository(r) => r,
            Activity::RedditPost(r) => r,
            Activity::HackerNewsPost(r) => r,
            Activity::LobstersPost(r) => r,
            Activity::MastodonPost(r) => r,
            Activity::FeedItem(r) => r,
            Activity::ProductHuntPost(r) => r,
            Activity::WebsiteChange(r) => r,
        }
    }

    pub fn uid(&self) -> TypedUid {
        self.record().uid()
    }

    pub fn source_uids(&self) -> Vec<TypedUid> {
        self.record().source_uids()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.record().created_at()
    }

    pub fn title(&self) -> String {
        self.record().title()
    }

    pub fn body(&self) -> String {
        self.record().body()
    }

    pub fn url(&self) -> String {
        self.record().url()
    }

    /// Attach another producing source (deduplicated).
    pub fn add_source_uid(&mut self, uid: TypedUid) {
        let ids = match self {
            Activity::GithubRelease(r) => &mut r.source_ids,
            Activity::GithubRepository(r) => &mut r.source_ids,
            Activity::RedditPost(r) => &mut r.source_ids,
            Activity::FeedItem(r) => &mut r.source_ids,
            Activity::ProductHuntPost(r) => &mut r.source_ids,
            _ => return,
        };
        if !ids.contains(&uid) {
            ids.push(uid);
        }
    }
}

// ------------------------------------------------------------
// Code hosting
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubIssue {
    pub repository: String,
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub html_url: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub comments: i64,
    #[serde(default)]
    pub is_pull_request: bool,
    pub source_id: TypedUid,
}

impl ActivityRecord for GithubIssue {
    fn uid(&self) -> TypedUid {
        TypedUid::new(
            crate::sources::github::TYPE_ISSUES,
            [self.repository.clone(), self.number.to_string()],
        )
    }
    fn source_uids(&self) -> Vec<TypedUid> {
        vec![self.source_id.clone()]
    }
    fn title(&self) -> String {
        self.title.clone()
    }
    fn body(&self) -> String {
        self.body.clone()
    }
    fn url(&self) -> String {
        self.html_url.clone()
    }
    fn image_url(&self) -> Option<String> {
        Some(format!(
            "https://opengraph.githubassets.com/{}/{}/issues/{}",
            self.updated_at.timestamp(),
            self.repository,
            self.number
        ))
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
    fn comments(&self) -> i64 {
        self.comments
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubRelease {
    pub owner: String,
    pub repo: String,
    pub id: u64,
    pub name: String,
    pub tag_name: String,
    #[serde(default)]
    pub body: String,
    pub html_url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub prerelease: bool,
    pub source_ids: Vec<TypedUid>,
}

impl ActivityRecord for GithubRelease {
    fn uid(&self) -> TypedUid {
        TypedUid::new(crate::sources::github::TYPE_RELEASES, [self.id.to_string()])
    }
    fn source_uids(&self) -> Vec<TypedUid> {
        self.source_ids.clone()
    }
    fn title(&self) -> String {
        if self.name.trim().is_empty() {
            self.tag_name.clone()
        } else {
            self.name.clone()
        }
    }
    fn body(&self) -> String {
        self.body.clone()
    }
    fn url(&self) -> String {
        self.html_url.clone()
    }
    fn image_url(&self) -> Option<String> {
        Some(format!(
            "https://opengraph.githubassets.com/{}/{}/{}/releases/tag/{}",
            self.published_at.timestamp(),
            self.owner,
            self.repo,
            self.tag_name
        ))
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.published_at
    }
}

/// A repository surfaced by a topic watch. Several topics may produce the same one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubRepository {
    /// `owner/name`
    pub full_name: String,
    #[serde(default)]
    pub description: String,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub stars: i64,
    #[serde(default)]
    pub forks: i64,
    #[serde(default)]
    pub topics: Vec<String>,
    pub source_ids: Vec<TypedUid>,
}

impl ActivityRecord for GithubRepository {
    fn uid(&self) -> TypedUid {
        TypedUid::new(crate::sources::github::TYPE_TOPIC, [self.full_name.clone()])
    }
    fn source_uids(&self) -> Vec<TypedUid> {
        self.source_ids.clone()
    }
    fn title(&self) -> String {
        self.full_name.clone()
    }
    fn body(&self) -> String {
        let mut body = if self.description.is_empty() {
            self.full_name.clone()
        } else {
            self.description.clone()
        };
        if !self.topics.is_empty() {
            body.push_str("\n\nTopics: ");
            body.push_str(&self.topics.join(", "));
        }
        body
    }
    fn url(&self) -> String {
        self.html_url.clone()
    }
    fn image_url(&self) -> Option<String> {
        Some(format!(
            "https://opengraph.githubassets.com/{}/{}",
            self.created_at.timestamp(),
            self.full_name
        ))
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn upvotes(&self) -> i64 {
        self.stars
    }
    fn amplification(&self) -> i64 {
        self.forks
    }
    fn social_score(&self) -> f64 {
        (capped_ratio(self.stars as f64, 100_000.0) * 0.8 + capped_ratio(self.forks as f64, 20_000.0) * 0.2).min(1.0)
    }
}

// ------------------------------------------------------------
// Link aggregators
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedditPost {
    pub id: String,
    /// `t3_<id>`, used as the listing cursor.
    pub fullname: String,
    pub subreddit: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    pub permalink: String,
    #[serde(default)]
    pub link_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    /// Text of the linked page, when article fetching is on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub score: i64,
    pub num_comments: i64,
    pub source_type: String,
    pub source_ids: Vec<TypedUid>,
}

impl ActivityRecord for RedditPost {
    fn uid(&self) -> TypedUid {
        TypedUid::new(self.source_type.clone(), [self.id.clone()])
    }
    fn source_uids(&self) -> Vec<TypedUid> {
        self.source_ids.clone()
    }
    fn title(&self) -> String {
        html_escape::decode_html_entities(&self.title).into_owned()
    }
    fn body(&self) -> String {
        match (&self.link_url, self.selftext.is_empty(), &self.article_text) {
            (Some(_), true, Some(article)) => format!("{}\n\n{article}", self.title()),
            (Some(link), true, None) => format!("{}\n\nLink: {link}", self.title()),
            _ => self.selftext.clone(),
        }
    }
    fn url(&self) -> String {
        format!("https://www.reddit.com{}", self.permalink)
    }
    fn image_url(&self) -> Option<String> {
        self.thumbnail_url.clone()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn upvotes(&self) -> i64 {
        self.score
    }
    fn comments(&self) -> i64 {
        self.num_comments
    }
    fn social_score(&self) -> f64 {
        norm_social_score(self.score as f64, 10_000.0) * 0.6
            + norm_social_score(self.num_comments as f64, 1_000.0) * 0.4
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HackerNewsPost {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub link_url: Option<String>,
    /// Text of the linked page, when article fetching is on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_text: Option<String>,
    pub time: DateTime<Utc>,
    pub score: i64,
    pub descendants: i64,
    pub source_id: TypedUid,
}

impl ActivityRecord for HackerNewsPost {
    fn uid(&self) -> TypedUid {
        TypedUid::new(crate::sources::hackernews::TYPE_POSTS, [self.id.to_string()])
    }
    fn source_uids(&self) -> Vec<TypedUid> {
        vec![self.source_id.clone()]
    }
    fn title(&self) -> String {
        self.title.clone()
    }
    fn body(&self) -> String {
        match (self.text.as_deref(), &self.article_text) {
            (Some(text), _) if !text.is_empty() => extract_text_from_html(text),
            (_, Some(article)) => format!("{}\n\n{article}", self.title),
            _ => self.title.clone(),
        }
    }
    fn url(&self) -> String {
        // Discussion page, not the linked article.
        format!("https://news.ycombinator.com/item?id={}", self.id)
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.time
    }
    fn upvotes(&self) -> i64 {
        self.score
    }
    fn comments(&self) -> i64 {
        self.descendants
    }
    fn social_score(&self) -> f64 {
        // Most upvoted story ever sits around 6k; comments use the same ceiling.
        let score = capped_ratio(self.score as f64, 6_000.0) * 0.6
            + capped_ratio(self.descendants as f64, 6_000.0) * 0.4;
        score.min(1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobstersPost {
    pub short_id: String,
    pub title: String,
    #[serde(default)]
    pub link_url: String,
    pub comments_url: String,
    pub created_at: DateTime<Utc>,
    pub score: i64,
    pub comment_count: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Text of the linked page, when article fetching is on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_text: Option<String>,
    pub source_type: String,
    pub source_id: TypedUid,
}

impl ActivityRecord for LobstersPost {
    fn uid(&self) -> TypedUid {
        TypedUid::new(self.source_type.clone(), [self.short_id.clone()])
    }
    fn source_uids(&self) -> Vec<TypedUid> {
        vec![self.source_id.clone()]
    }
    fn title(&self) -> String {
        self.title.clone()
    }
    fn body(&self) -> String {
        let mut body = self.title.clone();
        if let Some(article) = &self.article_text {
            body.push_str("\n\n");
            body.push_str(article);
        }
        if !self.tags.is_empty() {
            body.push_str("\n\nTags: ");
            body.push_str(&self.tags.join(", "));
        }
        body
    }
    fn url(&self) -> String {
        if self.link_url.is_empty() {
            self.comments_url.clone()
        } else {
            self.link_url.clone()
        }
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn upvotes(&self) -> i64 {
        self.score
    }
    fn comments(&self) -> i64 {
        self.comment_count
    }
    fn social_score(&self) -> f64 {
        let score = capped_ratio(self.score as f64, 500.0) * 0.6
            + capped_ratio(self.comment_count as f64, 100.0) * 0.4;
        score.min(1.0)
    }
}

// ------------------------------------------------------------
// Federated timelines
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MastodonReblog {
    pub acct: String,
    pub content: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MastodonPost {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub reblog: Option<MastodonReblog>,
    #[serde(default)]
    pub card_title: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub favourites: i64,
    pub reblogs: i64,
    pub replies: i64,
    pub source_type: String,
    pub source_id: TypedUid,
}

impl ActivityRecord for MastodonPost {
    fn uid(&self) -> TypedUid {
        TypedUid::new(self.source_type.clone(), [self.id.clone()])
    }
    fn source_uids(&self) -> Vec<TypedUid> {
        vec![self.source_id.clone()]
    }
    fn title(&self) -> String {
        match &self.card_title {
            Some(title) if !title.is_empty() => title.clone(),
            _ => one_line_title(&self.body(), 50),
        }
    }
    fn body(&self) -> String {
        if !self.content.is_empty() {
            return extract_text_from_html(&self.content);
        }
        match &self.reblog {
            Some(reblog) if !reblog.content.is_empty() => format!(
                "Reblogged {}'s post: {}",
                reblog.acct,
                extract_text_from_html(&reblog.content)
            ),
            _ => String::new(),
        }
    }
    fn url(&self) -> String {
        match &self.reblog {
            Some(reblog) if self.content.is_empty() => reblog.url.clone(),
            _ => self.url.clone(),
        }
    }
    fn image_url(&self) -> Option<String> {
        self.media_url.clone()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn upvotes(&self) -> i64 {
        self.favourites
    }
    fn comments(&self) -> i64 {
        self.replies
    }
    fn amplification(&self) -> i64 {
        self.reblogs
    }
    fn social_score(&self) -> f64 {
        let score = capped_ratio(self.favourites as f64, 500.0) * 0.4
            + capped_ratio(self.reblogs as f64, 100.0) * 0.4
            + capped_ratio(self.replies as f64, 50.0) * 0.2;
        score.min(1.0)
    }
}

// ------------------------------------------------------------
// Syndication feeds
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub link: String,
    pub feed_url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub source_type: String,
    pub source_ids: Vec<TypedUid>,
}

impl ActivityRecord for FeedItem {
    fn uid(&self) -> TypedUid {
        let id = match self.guid.as_deref() {
            Some(guid) if !guid.is_empty() => guid.to_string(),
            _ => crate::sources::text::strip_url(&self.url()),
        };
        TypedUid::new(self.source_type.clone(), [id])
    }
    fn source_uids(&self) -> Vec<TypedUid> {
        self.source_ids.clone()
    }
    fn title(&self) -> String {
        if !self.title.is_empty() {
            return html_escape::decode_html_entities(&self.title).into_owned();
        }
        shorten_description(&self.description, 100)
    }
    fn body(&self) -> String {
        let raw = if !self.description.is_empty() {
            &self.description
        } else {
            &self.content
        };
        extract_text_from_html(raw)
    }
    fn url(&self) -> String {
        if self.link.starts_with("http://") || self.link.starts_with("https://") {
            return self.link.clone();
        }
        match reqwest::Url::parse(&self.feed_url) {
            Ok(base) => {
                let host = base.host_str().unwrap_or_default();
                let path = if self.link.starts_with('/') {
                    self.link.clone()
                } else {
                    format!("/{}", self.link)
                };
                format!("{}://{}{}", base.scheme(), host, path)
            }
            Err(_) => self.link.clone(),
        }
    }
    fn image_url(&self) -> Option<String> {
        self.image_url.clone()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

// ------------------------------------------------------------
// Product launches
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductHuntPost {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub votes: i64,
    pub comments: i64,
    pub created_at: DateTime<Utc>,
    pub source_ids: Vec<TypedUid>,
}

impl ActivityRecord for ProductHuntPost {
    fn uid(&self) -> TypedUid {
        TypedUid::new(crate::sources::producthunt::TYPE_POSTS, [self.id.clone()])
    }
    fn source_uids(&self) -> Vec<TypedUid> {
        self.source_ids.clone()
    }
    fn title(&self) -> String {
        if self.tagline.is_empty() {
            self.name.clone()
        } else {
            format!("{}: {}", self.name, self.tagline)
        }
    }
    fn body(&self) -> String {
        if self.description.is_empty() {
            self.tagline.clone()
        } else {
            self.description.clone()
        }
    }
    fn url(&self) -> String {
        if self.url.is_empty() {
            format!("https://www.producthunt.com/posts/{}", self.slug)
        } else {
            self.url.clone()
        }
    }
    fn image_url(&self) -> Option<String> {
        self.image_url.clone()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    fn upvotes(&self) -> i64 {
        self.votes
    }
    fn comments(&self) -> i64 {
        self.comments
    }
    fn social_score(&self) -> f64 {
        norm_social_score(self.votes as f64, 5_000.0) * 0.7
            + norm_social_score(self.comments as f64, 5_000.0) * 0.3
    }
}

// ------------------------------------------------------------
// Website change monitors
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebsiteChange {
    pub title: String,
    pub url: String,
    pub last_changed: DateTime<Utc>,
    #[serde(default)]
    pub diff_url: Option<String>,
    #[serde(default)]
    pub previous_hash: Option<String>,
    pub source_id: TypedUid,
}

impl ActivityRecord for WebsiteChange {
    fn uid(&self) -> TypedUid {
        TypedUid::new(
            crate::sources::changedetection::TYPE_WEBSITE,
            [
                crate::sources::text::strip_url(&self.url),
                self.last_changed.timestamp().to_string(),
            ],
        )
    }
    fn source_uids(&self) -> Vec<TypedUid> {
        vec![self.source_id.clone()]
    }
    fn title(&self) -> String {
        if self.title.is_empty() {
            format!("Change detected on {}", crate::sources::text::strip_url(&self.url))
        } else {
            self.title.clone()
        }
    }
    fn body(&self) -> String {
        match &self.diff_url {
            Some(diff) => format!("{} changed. Diff: {diff}", self.url),
            None => format!("{} changed", self.url),
        }
    }
    fn url(&self) -> String {
        self.url.clone()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.last_changed
    }
}
