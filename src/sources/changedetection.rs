// src/sources/changedetection.rs
//! A single changedetection.io watch, emitted whenever its `last_changed` moves.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio_util::sync::CancellationToken;

use crate::activity::{Activity, WebsiteChange};
use crate::config::{ConfigError, ProviderConfig};
use crate::sources::cursor::TimestampCursor;
use crate::sources::text::strip_url;
use crate::sources::validate::{first_error, Validator};
use crate::sources::{fetch_json, run_pass, runtime, tagged_config, Emitter, HttpRuntime, Source, DEFAULT_TIMEOUT};
use crate::uid::TypedUid;

pub const TYPE_WEBSITE: &str = "changedetectionwebsite";

pub const DEFAULT_INSTANCE: &str = "https://www.changedetection.io";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteChangeWatch {
    /// Watch UUID.
    pub watch: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
    #[serde(skip)]
    api_key: Option<String>,
}

impl WebsiteChangeWatch {
    pub fn new(watch: impl Into<String>) -> Self {
        Self {
            watch: watch.into(),
            ..Default::default()
        }
    }

    fn instance(&self) -> &str {
        if self.instance_url.is_empty() {
            DEFAULT_INSTANCE
        } else {
            &self.instance_url
        }
    }
}

/// `last_changed` arrives as epoch seconds or an RFC 3339 string.
fn de_last_changed<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Epoch(i64),
        Text(String),
    }
    Ok(match Option::<Raw>::deserialize(d)? {
        Some(Raw::Epoch(0)) | None => None,
        Some(Raw::Epoch(secs)) => DateTime::from_timestamp(secs, 0),
        Some(Raw::Text(s)) => DateTime::parse_from_rfc3339(&s).ok().map(|dt| dt.with_timezone(&Utc)),
    })
}

#[derive(Debug, Deserialize)]
struct WatchDto {
    #[serde(default)]
    title: Option<String>,
    url: String,
    #[serde(default, deserialize_with = "de_last_changed")]
    last_changed: Option<DateTime<Utc>>,
    #[serde(default)]
    diff_url: Option<String>,
    #[serde(default)]
    previous_hash: Option<String>,
}

impl WebsiteChangeWatch {
    async fn fetch(&self, cursor: TimestampCursor, out: &Emitter) -> anyhow::Result<()> {
        let rt = runtime(&self.rt)?;
        let mut req = rt.client.get(rt.endpoint(&format!("api/v1/watch/{}", self.watch)));
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        let dto: WatchDto = fetch_json(req).await?;

        // Never checked or never changed: nothing to report yet.
        let Some(last_changed) = dto.last_changed else {
            return Ok(());
        };
        if !cursor.is_new(last_changed) {
            return Ok(());
        }
        let change = WebsiteChange {
            title: dto.title.unwrap_or_default(),
            url: dto.url,
            last_changed,
            diff_url: dto.diff_url.filter(|u| !u.is_empty()),
            previous_hash: dto.previous_hash.filter(|h| !h.is_empty()),
            source_id: self.uid(),
        };
        out.send(Activity::WebsiteChange(change)).await?;
        Ok(())
    }
}

#[async_trait]
impl Source for WebsiteChangeWatch {
    fn uid(&self) -> TypedUid {
        TypedUid::new(TYPE_WEBSITE, [strip_url(self.instance()), self.watch.clone()])
    }

    fn source_type(&self) -> &'static str {
        TYPE_WEBSITE
    }

    fn name(&self) -> String {
        format!("Watch {}", self.watch)
    }

    fn description(&self) -> String {
        format!("Changes detected by {} for watch {}", strip_url(self.instance()), self.watch)
    }

    fn url(&self) -> String {
        format!("{}/edit/{}", self.instance().trim_end_matches('/'), self.watch)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(15 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new()
            .required("watch", &self.watch)
            .url("instanceUrl", &self.instance_url)
            .finish()
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        self.api_key = self
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| config.changedetection_token.clone());
        self.rt = Some(HttpRuntime::new(self.instance(), DEFAULT_TIMEOUT)?);
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        run_pass(cancel, out, self.fetch(TimestampCursor::from_since(since), out)).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_WEBSITE, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_changed_accepts_epoch_and_rfc3339() {
        let epoch: WatchDto =
            serde_json::from_value(serde_json::json!({"url": "https://example.com", "last_changed": 1735689600}))
                .unwrap();
        assert_eq!(epoch.last_changed.unwrap().timestamp(), 1_735_689_600);

        let text: WatchDto = serde_json::from_value(
            serde_json::json!({"url": "https://example.com", "last_changed": "2025-01-01T00:00:00Z"}),
        )
        .unwrap();
        assert_eq!(text.last_changed, epoch.last_changed);

        let never: WatchDto =
            serde_json::from_value(serde_json::json!({"url": "https://example.com", "last_changed": 0})).unwrap();
        assert!(never.last_changed.is_none());

        let missing: WatchDto = serde_json::from_value(serde_json::json!({"url": "https://example.com"})).unwrap();
        assert!(missing.last_changed.is_none());
    }

    #[test]
    fn default_instance_and_uid() {
        let w = WebsiteChangeWatch::new("0f7c");
        assert_eq!(w.uid().to_string(), "changedetectionwebsite:changedetection.io:0f7c");
        assert!(w.validate().is_empty());
        assert_eq!(WebsiteChangeWatch::new("").validate()[0].field, "watch");
    }
}
