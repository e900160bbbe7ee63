// src/sources/github.rs
//! GitHub issue, release and topic watches over the REST API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::activity::{Activity, GithubIssue, GithubRelease, GithubRepository};
use crate::config::{ConfigError, ProviderConfig};
use crate::sources::cursor::{drain_pages, Page, Step, TimestampCursor};
use crate::sources::validate::{first_error, Validator};
use crate::sources::{fetch_json, run_pass, runtime, tagged_config, Emitter, HttpRuntime, Source, DEFAULT_TIMEOUT};
use crate::uid::TypedUid;

pub const TYPE_ISSUES: &str = "githubissues";
pub const TYPE_RELEASES: &str = "githubreleases";
pub const TYPE_TOPIC: &str = "githubtopic";

const PER_PAGE: usize = 30;
const MAX_PAGES: usize = 10;

fn get(rt: &HttpRuntime, token: Option<&str>, path: &str) -> reqwest::RequestBuilder {
    let req = rt
        .client
        .get(rt.endpoint(path))
        .header(reqwest::header::ACCEPT, "application/vnd.github+json")
        .header("X-GitHub-Api-Version", "2022-11-28");
    match token {
        Some(t) => req.bearer_auth(t),
        None => req,
    }
}

/// Source-level token wins over the provider-wide one.
fn resolve_token(own: &Option<String>, provider: &ProviderConfig) -> Option<String> {
    own.clone()
        .filter(|t| !t.is_empty())
        .or_else(|| provider.github_token.clone())
}

// ------------------------------------------------------------
// Issues
// ------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubIssues {
    /// `owner/name`
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
    #[serde(skip)]
    auth: Option<String>,
}

impl GithubIssues {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct IssueDto {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    comments: i64,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl GithubIssues {
    async fn fetch(&self, cursor: TimestampCursor, out: &Emitter) -> anyhow::Result<()> {
        let rt = runtime(&self.rt)?;
        let source_id = self.uid();
        let path = format!("repos/{}/issues", self.repository);
        let since = cursor.since().map(|s| s.to_rfc3339());
        let max_pages = if cursor.is_cold() { 1 } else { MAX_PAGES };

        let emitted = drain_pages(
            out,
            1u32,
            max_pages,
            |page| {
                let mut req = get(rt, self.auth.as_deref(), &path).query(&[
                    ("state", "all"),
                    ("sort", "updated"),
                    ("direction", "desc"),
                ]);
                req = req.query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())]);
                if let Some(since) = &since {
                    req = req.query(&[("since", since)]);
                }
                async move {
                    let items: Vec<IssueDto> = fetch_json(req).await?;
                    let next = (items.len() == PER_PAGE).then_some(page + 1);
                    Ok(Page { items, next })
                }
            },
            |dto: IssueDto| {
                if !cursor.is_new(dto.updated_at) {
                    return Step::Stop;
                }
                Step::Emit(Activity::GithubIssue(GithubIssue {
                    repository: self.repository.clone(),
                    number: dto.number,
                    title: dto.title,
                    body: dto.body.unwrap_or_default(),
                    html_url: dto.html_url,
                    updated_at: dto.updated_at,
                    comments: dto.comments,
                    is_pull_request: dto.pull_request.is_some(),
                    source_id: source_id.clone(),
                }))
            },
        )
        .await?;
        tracing::debug!(emitted, repository = %self.repository, "issues fetched");
        Ok(())
    }
}

#[async_trait]
impl Source for GithubIssues {
    fn uid(&self) -> TypedUid {
        TypedUid::new(TYPE_ISSUES, [self.repository.clone()])
    }

    fn source_type(&self) -> &'static str {
        TYPE_ISSUES
    }

    fn name(&self) -> String {
        format!("Issues on {}", self.repository)
    }

    fn description(&self) -> String {
        format!("Recent issue activity from {}", self.repository)
    }

    fn url(&self) -> String {
        format!("https://github.com/{}", self.repository)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new()
            .required("repository", &self.repository)
            .contains("repository", &self.repository, "/")
            .finish()
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        self.auth = resolve_token(&self.token, config);
        self.rt = Some(HttpRuntime::new(&config.github_api_url, DEFAULT_TIMEOUT)?);
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        let cursor = TimestampCursor::from_since(since);
        run_pass(cancel, out, self.fetch(cursor, out)).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_ISSUES, self)
    }
}

// ------------------------------------------------------------
// Releases
// ------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubReleases {
    pub owner: String,
    pub repo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default)]
    pub include_prereleases: bool,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
    #[serde(skip)]
    auth: Option<String>,
}

impl GithubReleases {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReleaseDto {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    tag_name: String,
    #[serde(default)]
    body: Option<String>,
    html_url: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    prerelease: bool,
}

impl GithubReleases {
    fn to_activity(&self, dto: ReleaseDto, source_id: &TypedUid) -> GithubRelease {
        GithubRelease {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            id: dto.id,
            name: dto.name.unwrap_or_default(),
            tag_name: dto.tag_name,
            body: dto.body.unwrap_or_default(),
            html_url: dto.html_url,
            published_at: dto.published_at.unwrap_or(dto.created_at),
            prerelease: dto.prerelease,
            source_ids: vec![source_id.clone()],
        }
    }

    async fn fetch(&self, cursor: TimestampCursor, out: &Emitter) -> anyhow::Result<()> {
        let rt = runtime(&self.rt)?;
        let source_id = self.uid();
        let path = format!("repos/{}/{}/releases", self.owner, self.repo);
        let max_pages = if cursor.is_cold() { 1 } else { MAX_PAGES };

        drain_pages(
            out,
            1u32,
            max_pages,
            |page| {
                let req = get(rt, self.auth.as_deref(), &path)
                    .query(&[("per_page", PER_PAGE.to_string()), ("page", page.to_string())]);
                async move {
                    let items: Vec<ReleaseDto> = fetch_json(req).await?;
                    let next = (items.len() == PER_PAGE).then_some(page + 1);
                    Ok(Page { items, next })
                }
            },
            |dto: ReleaseDto| {
                if dto.draft || (dto.prerelease && !self.include_prereleases) {
                    return Step::Skip;
                }
                let release = self.to_activity(dto, &source_id);
                if !cursor.is_new(release.published_at) {
                    return Step::Stop;
                }
                Step::Emit(Activity::GithubRelease(release))
            },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Source for GithubReleases {
    fn uid(&self) -> TypedUid {
        TypedUid::new(TYPE_RELEASES, [self.owner.clone(), self.repo.clone()])
    }

    fn source_type(&self) -> &'static str {
        TYPE_RELEASES
    }

    fn name(&self) -> String {
        format!("Releases of {}/{}", self.owner, self.repo)
    }

    fn description(&self) -> String {
        format!("New releases published in {}/{}", self.owner, self.repo)
    }

    fn url(&self) -> String {
        format!("https://github.com/{}/{}/releases", self.owner, self.repo)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(15 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new()
            .required("owner", &self.owner)
            .required("repo", &self.repo)
            .finish()
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        self.auth = resolve_token(&self.token, config);
        self.rt = Some(HttpRuntime::new(&config.github_api_url, DEFAULT_TIMEOUT)?);
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        let cursor = TimestampCursor::from_since(since);
        run_pass(cancel, out, self.fetch(cursor, out)).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_RELEASES, self)
    }
}

// ------------------------------------------------------------
// Topics
// ------------------------------------------------------------

pub const DEFAULT_MIN_STARS: u32 = 1000;
/// Cold-start window for newly created repositories.
const TOPIC_LOOKBACK_DAYS: i64 = 30;
const TOPIC_SUGGESTIONS: usize = 5;

fn default_min_stars() -> u32 {
    DEFAULT_MIN_STARS
}

/// Popular repositories recently created under one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubTopic {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default = "default_min_stars")]
    pub min_stars: u32,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
    #[serde(skip)]
    auth: Option<String>,
}

impl GithubTopic {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            token: None,
            min_stars: DEFAULT_MIN_STARS,
            rt: None,
            auth: None,
        }
    }

    fn search_query(&self, cursor: &TimestampCursor) -> String {
        let since = cursor
            .since()
            .unwrap_or_else(|| Utc::now() - chrono::Duration::days(TOPIC_LOOKBACK_DAYS));
        // Day granularity upstream; the cursor trims same-day repositories.
        format!(
            "topic:{} stars:>{} created:>={}",
            self.topic,
            self.min_stars,
            since.format("%Y-%m-%d")
        )
    }
}

#[derive(Debug, Deserialize)]
struct SearchDto<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RepositoryDto {
    full_name: String,
    #[serde(default)]
    description: Option<String>,
    html_url: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    forks_count: i64,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TopicDto {
    name: String,
}

impl GithubTopic {
    async fn fetch(&self, cursor: TimestampCursor, out: &Emitter) -> anyhow::Result<()> {
        let rt = runtime(&self.rt)?;
        let source_id = self.uid();
        let query = self.search_query(&cursor);
        let per_page = PER_PAGE.to_string();
        tracing::debug!(topic = %self.topic, %query, "searching repositories by topic");

        let emitted = drain_pages(
            out,
            (),
            1,
            |()| {
                let req = get(rt, self.auth.as_deref(), "search/repositories").query(&[
                    ("q", query.as_str()),
                    ("sort", "created"),
                    ("order", "desc"),
                    ("per_page", per_page.as_str()),
                ]);
                async move {
                    let found: SearchDto<RepositoryDto> = fetch_json(req).await?;
                    Ok(Page::last(found.items))
                }
            },
            |dto: RepositoryDto| {
                let created_at = dto.created_at.or(dto.pushed_at).unwrap_or_else(Utc::now);
                // Newest first.
                if !cursor.is_new(created_at) {
                    return Step::Stop;
                }
                Step::Emit(Activity::GithubRepository(GithubRepository {
                    full_name: dto.full_name,
                    description: dto.description.unwrap_or_default(),
                    html_url: dto.html_url,
                    created_at,
                    stars: dto.stargazers_count,
                    forks: dto.forks_count,
                    topics: dto.topics,
                    source_ids: vec![source_id.clone()],
                }))
            },
        )
        .await?;
        tracing::debug!(emitted, topic = %self.topic, "topic repositories fetched");
        Ok(())
    }
}

#[async_trait]
impl Source for GithubTopic {
    fn uid(&self) -> TypedUid {
        TypedUid::new(TYPE_TOPIC, [self.topic.clone()])
    }

    fn source_type(&self) -> &'static str {
        TYPE_TOPIC
    }

    fn name(&self) -> String {
        format!("Topic #{}", self.topic)
    }

    fn description(&self) -> String {
        format!("Trending repositories tagged #{}", self.topic)
    }

    fn url(&self) -> String {
        format!("https://github.com/topics/{}", self.topic)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(60 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new().required("topic", &self.topic).finish()
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        self.auth = resolve_token(&self.token, config);
        self.rt = Some(HttpRuntime::new(&config.github_api_url, DEFAULT_TIMEOUT)?);
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        let cursor = TimestampCursor::from_since(since);
        run_pass(cancel, out, self.fetch(cursor, out)).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_TOPIC, self)
    }
}

/// Topic names GitHub suggests for `query`, deduplicated, best match first.
pub async fn search_topics(rt: &HttpRuntime, token: Option<&str>, query: &str) -> anyhow::Result<Vec<String>> {
    let per_page = TOPIC_SUGGESTIONS.to_string();
    let req = get(rt, token, "search/topics").query(&[("q", query), ("per_page", per_page.as_str())]);
    let found: SearchDto<TopicDto> = fetch_json(req).await?;
    let mut topics: Vec<String> = Vec::with_capacity(found.items.len());
    for name in found.items.into_iter().map(|t| t.name.trim().to_string()) {
        if !name.is_empty() && !topics.contains(&name) {
            topics.push(name);
        }
    }
    Ok(topics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn uids_are_pure_functions_of_parameters() {
        let a = GithubIssues::new("tokio-rs/tokio");
        assert_eq!(a.uid().to_string(), "githubissues:tokio-rs%2Ftokio");
        let b: GithubIssues = serde_json::from_value(serde_json::json!({
            "repository": "tokio-rs/tokio",
            "token": "ghp_x"
        }))
        .unwrap();
        assert_eq!(a.uid(), b.uid());

        let r = GithubReleases::new("rust-lang", "rust");
        assert_eq!(r.uid().to_string(), "githubreleases:rust-lang:rust");

        let t: GithubTopic = serde_json::from_value(serde_json::json!({"topic": "rust"})).unwrap();
        assert_eq!(t.uid().to_string(), "githubtopic:rust");
        assert_eq!(t.min_stars, DEFAULT_MIN_STARS);
    }

    #[test]
    fn topic_query_starts_at_cursor_day() {
        let mut t = GithubTopic::new("wasm");
        t.min_stars = 50;
        let since = Utc.with_ymd_and_hms(2025, 5, 10, 18, 30, 0).unwrap();
        assert_eq!(
            t.search_query(&TimestampCursor::at(since)),
            "topic:wasm stars:>50 created:>=2025-05-10"
        );
        let cold = t.search_query(&TimestampCursor::default());
        assert!(cold.starts_with("topic:wasm stars:>50 created:>="), "{cold}");
        assert_eq!(GithubTopic::new("").validate()[0].field, "topic");
    }

    #[test]
    fn repository_must_name_owner() {
        let errors = GithubIssues::new("tokio").validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "repository");

        let mut bad = GithubReleases::new("", "rust");
        assert!(bad.initialize(&ProviderConfig::default()).is_err());
    }

    #[test]
    fn source_token_overrides_provider_token() {
        let provider = ProviderConfig {
            github_token: Some("global".into()),
            ..Default::default()
        };
        let mut s = GithubIssues::new("a/b");
        s.initialize(&provider).unwrap();
        assert_eq!(s.auth.as_deref(), Some("global"));

        s.token = Some("own".into());
        s.initialize(&provider).unwrap();
        assert_eq!(s.auth.as_deref(), Some("own"));
    }

    #[test]
    fn config_round_trips_with_type() {
        let mut r = GithubReleases::new("rust-lang", "rust");
        r.include_prereleases = true;
        let v = r.to_config();
        assert_eq!(v["type"], TYPE_RELEASES);
        assert_eq!(v["includePrereleases"], true);
        assert!(v.get("token").is_none());
    }
}
