// src/registry.rs
//! Source type registry: JSON configuration → boxed [`Source`], and discovery of
//! sources through per-provider [`Fetcher`]s.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use strsim::jaro_winkler;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{ConfigError, ProviderConfig};
use crate::sources::changedetection::{self, WebsiteChangeWatch};
use crate::sources::github::{self, GithubIssues, GithubReleases, GithubTopic};
use crate::sources::hackernews::{self, HackerNewsPosts};
use crate::sources::lobsters::{self, LobstersFeed, LobstersTag};
use crate::sources::mastodon::{self, MastodonAccount, MastodonTag};
use crate::sources::producthunt::{self, ProductHuntPosts};
use crate::sources::reddit::{self, RedditSubreddit};
use crate::sources::rss::{self, RssFeed};
use crate::sources::{HttpRuntime, Source, DEFAULT_TIMEOUT};
use crate::uid::TypedUid;

/// Minimum Jaro-Winkler similarity for a query word to match a word of a preset.
pub const FUZZY_THRESHOLD: f64 = 0.85;

pub type Constructor = fn(Value) -> Result<Box<dyn Source>, serde_json::Error>;

/// [`Constructor`] for any deserializable source.
pub fn construct<S>(config: Value) -> Result<Box<dyn Source>, serde_json::Error>
where
    S: Source + DeserializeOwned + 'static,
{
    Ok(Box::new(serde_json::from_value::<S>(config)?))
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("source configuration has no \"type\" field")]
    MissingType,
    #[error("unknown source type '{0}'")]
    UnknownType(String),
    #[error("decoding {source_type} configuration: {error}")]
    Decode {
        source_type: String,
        #[source]
        error: serde_json::Error,
    },
    #[error("invalid {source_type} configuration: {}", .errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Invalid {
        source_type: String,
        errors: Vec<ConfigError>,
    },
}

/// Discovers sources of one provider from a free-text query.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str) -> anyhow::Result<Vec<Box<dyn Source>>>;

    async fn find_by_uid(&self, uid: &TypedUid) -> anyhow::Result<Option<Box<dyn Source>>> {
        Ok(self.search("").await?.into_iter().find(|s| &s.uid() == uid))
    }
}

/// Case-insensitive match of every query word against `text`, by substring or by
/// Jaro-Winkler similarity to one of its words. An empty query matches everything.
pub fn fuzzy_match(query: &str, text: &str) -> bool {
    let text = text.to_lowercase();
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    query
        .to_lowercase()
        .split_whitespace()
        .all(|q| text.contains(q) || words.iter().any(|w| jaro_winkler(q, w) >= FUZZY_THRESHOLD))
}

// ------------------------------------------------------------
// Preset lists
// ------------------------------------------------------------

/// A fixed list of source configurations filtered by [`fuzzy_match`].
pub struct PresetFetcher {
    name: &'static str,
    constructor: Constructor,
    presets: Vec<Value>,
}

impl PresetFetcher {
    pub fn new(name: &'static str, constructor: Constructor, presets: Vec<Value>) -> Self {
        Self {
            name,
            constructor,
            presets,
        }
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

#[async_trait]
impl Fetcher for PresetFetcher {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<Box<dyn Source>>> {
        let mut found = Vec::new();
        for preset in &self.presets {
            let source = (self.constructor)(preset.clone())?;
            let haystack = format!("{} {} {}", source.name(), source.description(), source.uid());
            if fuzzy_match(query, &haystack) {
                found.push(source);
            }
        }
        Ok(found)
    }
}

fn hackernews_presets() -> PresetFetcher {
    let presets = hackernews::FEEDS.iter().map(|f| json!({ "feedName": f })).collect();
    PresetFetcher::new(hackernews::TYPE_POSTS, construct::<HackerNewsPosts>, presets)
}

fn lobsters_feed_presets() -> PresetFetcher {
    let presets = lobsters::FEEDS.iter().map(|f| json!({ "feed": f })).collect();
    PresetFetcher::new(lobsters::TYPE_FEED, construct::<LobstersFeed>, presets)
}

fn lobsters_tag_presets() -> PresetFetcher {
    let presets = ["rust", "programming", "security", "linux", "databases", "distributed", "ai", "web"]
        .iter()
        .map(|t| json!({ "tag": t }))
        .collect();
    PresetFetcher::new(lobsters::TYPE_TAG, construct::<LobstersTag>, presets)
}

fn reddit_presets() -> PresetFetcher {
    let presets = [
        ("rust", "The Rust programming language"),
        ("programming", "Computer programming"),
        ("golang", "The Go programming language"),
        ("MachineLearning", "Machine learning research and news"),
        ("LocalLLaMA", "Running language models locally"),
        ("selfhosted", "Self-hosted software and services"),
        ("devops", "DevOps practices and tooling"),
        ("webdev", "Web development"),
        ("technology", "Technology news"),
    ]
    .iter()
    .map(|(sub, summary)| json!({ "subreddit": sub, "subredditSummary": summary }))
    .collect();
    PresetFetcher::new(reddit::TYPE_SUBREDDIT, construct::<RedditSubreddit>, presets)
}

fn mastodon_tag_presets() -> PresetFetcher {
    let presets = ["rust", "rustlang", "opensource", "linux", "programming", "ai", "selfhosting", "fediverse"]
        .iter()
        .map(|t| json!({ "instanceUrl": "https://mastodon.social", "tag": t }))
        .collect();
    PresetFetcher::new(mastodon::TYPE_TAG, construct::<MastodonTag>, presets)
}

fn producthunt_presets() -> PresetFetcher {
    let presets = producthunt::FEEDS.iter().map(|f| json!({ "feedName": f })).collect();
    PresetFetcher::new(producthunt::TYPE_POSTS, construct::<ProductHuntPosts>, presets)
}

// ------------------------------------------------------------
// Parameterised fetchers
// ------------------------------------------------------------

/// `owner/repo`, or a GitHub URL pointing into a repository.
pub fn parse_github_repository(query: &str) -> Option<(String, String)> {
    let q = query.trim().trim_end_matches('/');
    let path = ["https://github.com/", "http://github.com/", "https://www.github.com/", "github.com/"]
        .iter()
        .find_map(|p| q.strip_prefix(p))
        .unwrap_or(q);
    let mut parts = path.split('/');
    let owner = parts.next()?.trim();
    let repo = parts.next()?.trim().trim_end_matches(".git");
    let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || "-_.".contains(c));
    if !valid(owner) || !valid(repo) {
        return None;
    }
    // Bare input must be exactly `owner/repo`; URLs may point deeper.
    if path.len() == q.len() && parts.next().is_some() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

/// `topic:<name>` or a `github.com/topics/<name>` URL.
pub fn parse_github_topic(query: &str) -> Option<String> {
    let q = query.trim().trim_end_matches('/');
    let topic = ["topic:", "https://github.com/topics/", "http://github.com/topics/", "github.com/topics/"]
        .iter()
        .find_map(|p| q.strip_prefix(p))?
        .trim();
    let valid = !topic.is_empty() && topic.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    valid.then(|| topic.to_ascii_lowercase())
}

/// Issues and releases of the repository named by the query, or the topic it names.
pub struct GithubFetcher;

#[async_trait]
impl Fetcher for GithubFetcher {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<Box<dyn Source>>> {
        if let Some(topic) = parse_github_topic(query) {
            return Ok(vec![Box::new(GithubTopic::new(topic)) as Box<dyn Source>]);
        }
        let Some((owner, repo)) = parse_github_repository(query) else {
            return Ok(Vec::new());
        };
        let found: Vec<Box<dyn Source>> = vec![
            Box::new(GithubIssues::new(format!("{owner}/{repo}"))),
            Box::new(GithubReleases::new(owner, repo)),
        ];
        Ok(found)
    }

    async fn find_by_uid(&self, uid: &TypedUid) -> anyhow::Result<Option<Box<dyn Source>>> {
        let source: Option<Box<dyn Source>> = match (uid.kind(), uid.identifiers()) {
            (github::TYPE_ISSUES, [repository]) => Some(Box::new(GithubIssues::new(repository.clone()))),
            (github::TYPE_RELEASES, [owner, repo]) => {
                Some(Box::new(GithubReleases::new(owner.clone(), repo.clone())))
            }
            (github::TYPE_TOPIC, [topic]) => Some(Box::new(GithubTopic::new(topic.clone()))),
            _ => None,
        };
        Ok(source)
    }
}

/// Topics suggested by GitHub's topic search. Needs network, so it is only part of
/// [`SourceRegistry::with_provider`].
pub struct GithubTopicFetcher {
    rt: HttpRuntime,
    token: Option<String>,
}

impl GithubTopicFetcher {
    pub fn new(config: &ProviderConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            rt: HttpRuntime::new(&config.github_api_url, DEFAULT_TIMEOUT)?,
            token: config.github_token.clone(),
        })
    }
}

#[async_trait]
impl Fetcher for GithubTopicFetcher {
    fn name(&self) -> &'static str {
        github::TYPE_TOPIC
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<Box<dyn Source>>> {
        let query = query.trim();
        // Topics cannot be enumerated.
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let topics = github::search_topics(&self.rt, self.token.as_deref(), query).await?;
        debug!(query, suggestions = topics.len(), "github topic suggestions");
        Ok(topics
            .into_iter()
            .map(|t| Box::new(GithubTopic::new(t)) as Box<dyn Source>)
            .collect())
    }

    async fn find_by_uid(&self, uid: &TypedUid) -> anyhow::Result<Option<Box<dyn Source>>> {
        let source: Option<Box<dyn Source>> = match (uid.kind(), uid.identifiers()) {
            (github::TYPE_TOPIC, [topic]) => Some(Box::new(GithubTopic::new(topic.clone()))),
            _ => None,
        };
        Ok(source)
    }
}

/// A feed given by its URL.
pub struct RssFetcher;

#[async_trait]
impl Fetcher for RssFetcher {
    fn name(&self) -> &'static str {
        rss::TYPE_FEED
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<Box<dyn Source>>> {
        let feed = RssFeed::new(query.trim());
        if query.trim().is_empty() || !feed.validate().is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![Box::new(feed) as Box<dyn Source>])
    }

    async fn find_by_uid(&self, uid: &TypedUid) -> anyhow::Result<Option<Box<dyn Source>>> {
        if uid.kind() != rss::TYPE_FEED {
            return Ok(None);
        }
        Ok(uid
            .primary()
            .map(|u| Box::new(RssFeed::new(format!("https://{u}"))) as Box<dyn Source>))
    }
}

/// `@user@instance` handles.
pub struct MastodonAccountFetcher;

pub fn parse_mastodon_handle(query: &str) -> Option<(String, String)> {
    let handle = query.trim().trim_start_matches('@');
    let (user, instance) = handle.split_once('@')?;
    if user.is_empty() || instance.is_empty() || instance.contains('@') || !instance.contains('.') {
        return None;
    }
    Some((format!("https://{instance}"), user.to_string()))
}

#[async_trait]
impl Fetcher for MastodonAccountFetcher {
    fn name(&self) -> &'static str {
        mastodon::TYPE_ACCOUNT
    }

    async fn search(&self, query: &str) -> anyhow::Result<Vec<Box<dyn Source>>> {
        Ok(parse_mastodon_handle(query)
            .map(|(instance, user)| Box::new(MastodonAccount::new(instance, user)) as Box<dyn Source>)
            .into_iter()
            .collect())
    }

    async fn find_by_uid(&self, uid: &TypedUid) -> anyhow::Result<Option<Box<dyn Source>>> {
        let source: Option<Box<dyn Source>> = match (uid.kind(), uid.identifiers()) {
            (mastodon::TYPE_ACCOUNT, [instance, user]) => Some(Box::new(MastodonAccount::new(
                format!("https://{instance}"),
                user.clone(),
            ))),
            _ => None,
        };
        Ok(source)
    }
}

// ------------------------------------------------------------
// Registry
// ------------------------------------------------------------

#[derive(Default, Clone)]
pub struct SourceRegistry {
    constructors: BTreeMap<&'static str, Constructor>,
    fetchers: Vec<Arc<dyn Fetcher>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in source type, with presets and parameterised fetchers.
    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        r.register(github::TYPE_ISSUES, construct::<GithubIssues>);
        r.register(github::TYPE_RELEASES, construct::<GithubReleases>);
        r.register(github::TYPE_TOPIC, construct::<GithubTopic>);
        r.register(reddit::TYPE_SUBREDDIT, construct::<RedditSubreddit>);
        r.register(hackernews::TYPE_POSTS, construct::<HackerNewsPosts>);
        r.register(lobsters::TYPE_FEED, construct::<LobstersFeed>);
        r.register(lobsters::TYPE_TAG, construct::<LobstersTag>);
        r.register(mastodon::TYPE_TAG, construct::<MastodonTag>);
        r.register(mastodon::TYPE_ACCOUNT, construct::<MastodonAccount>);
        r.register(rss::TYPE_FEED, construct::<RssFeed>);
        r.register(producthunt::TYPE_POSTS, construct::<ProductHuntPosts>);
        r.register(changedetection::TYPE_WEBSITE, construct::<WebsiteChangeWatch>);

        r.register_fetcher(hackernews_presets());
        r.register_fetcher(lobsters_feed_presets());
        r.register_fetcher(lobsters_tag_presets());
        r.register_fetcher(reddit_presets());
        r.register_fetcher(mastodon_tag_presets());
        r.register_fetcher(producthunt_presets());
        r.register_fetcher(GithubFetcher);
        r.register_fetcher(RssFetcher);
        r.register_fetcher(MastodonAccountFetcher);
        r
    }

    /// [`SourceRegistry::with_defaults`] plus the fetchers that query provider APIs.
    pub fn with_provider(config: &ProviderConfig) -> Result<Self, ConfigError> {
        let mut r = Self::with_defaults();
        r.register_fetcher(GithubTopicFetcher::new(config)?);
        Ok(r)
    }

    pub fn register(&mut self, source_type: &'static str, constructor: Constructor) {
        self.constructors.insert(source_type, constructor);
    }

    pub fn register_fetcher(&mut self, fetcher: impl Fetcher + 'static) {
        self.fetchers.push(Arc::new(fetcher));
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.constructors.keys().copied().collect()
    }

    /// Decode and validate a `type`-tagged configuration. The source is not initialized.
    pub fn build(&self, config: Value) -> Result<Box<dyn Source>, RegistryError> {
        let source_type = config
            .get("type")
            .and_then(Value::as_str)
            .ok_or(RegistryError::MissingType)?
            .to_string();
        let constructor = self
            .constructors
            .get(source_type.as_str())
            .ok_or_else(|| RegistryError::UnknownType(source_type.clone()))?;
        let source = constructor(config).map_err(|error| RegistryError::Decode {
            source_type: source_type.clone(),
            error,
        })?;
        let errors = source.validate();
        if !errors.is_empty() {
            return Err(RegistryError::Invalid { source_type, errors });
        }
        Ok(source)
    }

    /// Ask every fetcher concurrently. Results keep fetcher registration order and
    /// are deduplicated by UID. Failing fetchers are logged and skipped.
    pub async fn search(&self, query: &str) -> Vec<Box<dyn Source>> {
        let mut tasks = JoinSet::new();
        for (idx, fetcher) in self.fetchers.iter().enumerate() {
            let fetcher = fetcher.clone();
            let query = query.to_string();
            tasks.spawn(async move { (idx, fetcher.name(), fetcher.search(&query).await) });
        }

        let mut by_fetcher: Vec<Vec<Box<dyn Source>>> = (0..self.fetchers.len()).map(|_| Vec::new()).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, _, Ok(found))) => by_fetcher[idx] = found,
                Ok((_, name, Err(e))) => warn!(error = ?e, fetcher = name, "source search failed"),
                Err(e) => warn!(error = ?e, "source search task aborted"),
            }
        }

        let mut seen = HashSet::new();
        let results: Vec<_> = by_fetcher
            .into_iter()
            .flatten()
            .filter(|s| seen.insert(s.uid()))
            .collect();
        debug!(query, results = results.len(), "source search finished");
        results
    }

    /// First fetcher that recognizes `uid`.
    pub async fn find_by_uid(&self, uid: &TypedUid) -> Option<Box<dyn Source>> {
        for fetcher in &self.fetchers {
            match fetcher.find_by_uid(uid).await {
                Ok(Some(source)) => return Some(source),
                Ok(None) => {}
                Err(e) => warn!(error = ?e, fetcher = fetcher.name(), source_uid = %uid, "lookup failed"),
            }
        }
        None
    }
}
