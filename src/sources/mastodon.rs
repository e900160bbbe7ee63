// src/sources/mastodon.rs
//! Mastodon hashtag and account timelines.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::activity::{Activity, MastodonPost, MastodonReblog};
use crate::config::{ConfigError, ProviderConfig};
use crate::sources::cursor::{drain_pages, newer_id, IdCursor, Page, Step};
use crate::sources::text::strip_url;
use crate::sources::validate::{first_error, Validator};
use crate::sources::{fetch_json, run_pass, runtime, tagged_config, Emitter, HttpRuntime, Source, DEFAULT_TIMEOUT};
use crate::uid::TypedUid;

pub const TYPE_TAG: &str = "mastodontag";
pub const TYPE_ACCOUNT: &str = "mastodonaccount";

/// Statuses requested on a cold start.
pub const COLD_START_LIMIT: usize = 10;
const PAGE_LIMIT: usize = 15;
const MAX_PAGES: usize = 10;

#[derive(Debug, Deserialize)]
struct AccountDto {
    id: String,
    #[serde(default)]
    acct: String,
}

#[derive(Debug, Deserialize)]
struct CardDto {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct MediaDto {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    preview_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReblogDto {
    account: AccountDto,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusDto {
    id: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    reblog: Option<ReblogDto>,
    #[serde(default)]
    card: Option<CardDto>,
    #[serde(default)]
    media_attachments: Vec<MediaDto>,
    #[serde(default)]
    favourites_count: i64,
    #[serde(default)]
    reblogs_count: i64,
    #[serde(default)]
    replies_count: i64,
}

impl StatusDto {
    fn into_activity(self, source_type: &str, source_id: &TypedUid) -> MastodonPost {
        let media_url = self
            .media_attachments
            .into_iter()
            .find_map(|m| m.preview_url.or(m.url));
        MastodonPost {
            id: self.id,
            content: self.content,
            url: self.url.unwrap_or_default(),
            reblog: self.reblog.map(|r| MastodonReblog {
                acct: r.account.acct,
                content: r.content,
                url: r.url.unwrap_or_default(),
            }),
            card_title: self.card.map(|c| c.title).filter(|t| !t.is_empty()),
            media_url,
            created_at: self.created_at,
            favourites: self.favourites_count,
            reblogs: self.reblogs_count,
            replies: self.replies_count,
            source_type: source_type.to_string(),
            source_id: source_id.clone(),
        }
    }
}

fn authorized(req: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
    match token {
        Some(t) => req.bearer_auth(t),
        None => req,
    }
}

fn since_id(since: Option<&Activity>) -> IdCursor {
    IdCursor::from_since(since, |a| match a {
        Activity::MastodonPost(p) => Some(p.id.clone()),
        _ => None,
    })
}

/// Walk a timeline forward from `cursor` with `min_id`. A cold start reads one
/// bounded page of the latest statuses.
async fn drain_timeline(
    rt: &HttpRuntime,
    token: Option<&str>,
    path: &str,
    source_type: &'static str,
    source_id: TypedUid,
    cursor: IdCursor,
    out: &Emitter,
) -> anyhow::Result<usize> {
    let (limit, max_pages) = if cursor.is_cold() {
        (COLD_START_LIMIT, 1)
    } else {
        (PAGE_LIMIT, MAX_PAGES)
    };

    drain_pages(
        out,
        cursor.id().map(str::to_string),
        max_pages,
        |min_id: Option<String>| {
            let mut req = authorized(rt.client.get(rt.endpoint(path)), token).query(&[("limit", limit.to_string())]);
            if let Some(min_id) = &min_id {
                req = req.query(&[("min_id", min_id)]);
            }
            async move {
                let items: Vec<StatusDto> = fetch_json(req).await?;
                let next = items
                    .iter()
                    .map(|s| s.id.as_str())
                    .reduce(newer_id)
                    .map(|id| Some(id.to_string()));
                Ok(Page { items, next })
            }
        },
        |status: StatusDto| Step::Emit(Activity::MastodonPost(status.into_activity(source_type, &source_id))),
    )
    .await
}

// ------------------------------------------------------------
// Hashtag timeline
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MastodonTag {
    pub instance_url: String,
    pub tag: String,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
    #[serde(skip)]
    token: Option<String>,
}

impl MastodonTag {
    pub fn new(instance_url: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            instance_url: instance_url.into(),
            tag: tag.into(),
            rt: None,
            token: None,
        }
    }

    fn tag_name(&self) -> &str {
        self.tag.trim_start_matches('#')
    }
}

#[async_trait]
impl Source for MastodonTag {
    fn uid(&self) -> TypedUid {
        TypedUid::new(TYPE_TAG, [strip_url(&self.instance_url), self.tag_name().to_string()])
    }

    fn source_type(&self) -> &'static str {
        TYPE_TAG
    }

    fn name(&self) -> String {
        format!("#{} on {}", self.tag_name(), strip_url(&self.instance_url))
    }

    fn description(&self) -> String {
        format!("Posts tagged #{} on {}", self.tag_name(), strip_url(&self.instance_url))
    }

    fn url(&self) -> String {
        format!("{}/tags/{}", self.instance_url.trim_end_matches('/'), self.tag_name())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new()
            .required("instanceUrl", &self.instance_url)
            .url("instanceUrl", &self.instance_url)
            .required("tag", self.tag_name())
            .finish()
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        self.token = config.mastodon_access_token.clone();
        self.rt = Some(HttpRuntime::new(&self.instance_url, DEFAULT_TIMEOUT)?);
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        let pass = async {
            let rt = runtime(&self.rt)?;
            let path = format!("api/v1/timelines/tag/{}", self.tag_name());
            let emitted = drain_timeline(
                rt,
                self.token.as_deref(),
                &path,
                TYPE_TAG,
                self.uid(),
                since_id(since),
                out,
            )
            .await?;
            tracing::debug!(emitted, tag = self.tag_name(), "mastodon tag fetched");
            Ok(())
        };
        run_pass(cancel, out, pass).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_TAG, self)
    }
}

// ------------------------------------------------------------
// Account timeline
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MastodonAccount {
    pub instance_url: String,
    /// `user` or `user@domain`
    pub account: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub account_bio: String,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
    #[serde(skip)]
    token: Option<String>,
}

impl MastodonAccount {
    pub fn new(instance_url: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            instance_url: instance_url.into(),
            account: account.into(),
            account_bio: String::new(),
            rt: None,
            token: None,
        }
    }

    fn handle(&self) -> &str {
        self.account.trim_start_matches('@')
    }
}

#[async_trait]
impl Source for MastodonAccount {
    fn uid(&self) -> TypedUid {
        TypedUid::new(TYPE_ACCOUNT, [strip_url(&self.instance_url), self.handle().to_string()])
    }

    fn source_type(&self) -> &'static str {
        TYPE_ACCOUNT
    }

    fn name(&self) -> String {
        format!("@{}", self.handle())
    }

    fn description(&self) -> String {
        if self.account_bio.is_empty() {
            format!("Posts by @{} on {}", self.handle(), strip_url(&self.instance_url))
        } else {
            self.account_bio.clone()
        }
    }

    fn url(&self) -> String {
        format!("{}/@{}", self.instance_url.trim_end_matches('/'), self.handle())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new()
            .required("instanceUrl", &self.instance_url)
            .url("instanceUrl", &self.instance_url)
            .required("account", self.handle())
            .finish()
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        self.token = config.mastodon_access_token.clone();
        self.rt = Some(HttpRuntime::new(&self.instance_url, DEFAULT_TIMEOUT)?);
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        let pass = async {
            let rt = runtime(&self.rt)?;
            let lookup = authorized(rt.client.get(rt.endpoint("api/v1/accounts/lookup")), self.token.as_deref())
                .query(&[("acct", self.handle())]);
            let account: AccountDto = fetch_json(lookup).await?;

            let path = format!("api/v1/accounts/{}/statuses", account.id);
            let emitted = drain_timeline(
                rt,
                self.token.as_deref(),
                &path,
                TYPE_ACCOUNT,
                self.uid(),
                since_id(since),
                out,
            )
            .await?;
            tracing::debug!(emitted, account = self.handle(), "mastodon account fetched");
            Ok(())
        };
        run_pass(cancel, out, pass).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_ACCOUNT, self)
    }
}
