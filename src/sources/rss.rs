// src/sources/rss.rs
//! RSS 2.0 and Atom feeds.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::activity::{Activity, FeedItem};
use crate::config::{ConfigError, ProviderConfig};
use crate::sources::cursor::TimestampCursor;
use crate::sources::text::strip_url;
use crate::sources::validate::{first_error, Validator};
use crate::sources::{run_pass, runtime, tagged_config, Emitter, HttpRuntime, Source, DEFAULT_TIMEOUT};
use crate::uid::TypedUid;

pub const TYPE_FEED: &str = "rssfeed";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RssFeed {
    pub url: String,
    /// Extra request headers, e.g. auth for private feeds.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
}

impl RssFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

// ------------------------------------------------------------
// Wire formats
// ------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default, rename = "item")]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: String,
    #[serde(default, rename = "@type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    guid: Option<String>,
    #[serde(default, rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(default, rename = "dc:date")]
    dc_date: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "content:encoded")]
    content: Option<String>,
    #[serde(default, rename = "category")]
    categories: Vec<String>,
    #[serde(default)]
    enclosure: Option<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct Atom {
    #[serde(default, rename = "entry")]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(default, rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomCategory {
    #[serde(rename = "@term")]
    term: String,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "link")]
    links: Vec<AtomLink>,
    #[serde(default)]
    published: Option<String>,
    #[serde(default)]
    updated: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, rename = "category")]
    categories: Vec<AtomCategory>,
}

/// Feed-agnostic view of one entry.
#[derive(Debug)]
struct Entry {
    guid: Option<String>,
    title: String,
    link: String,
    description: String,
    content: String,
    image_url: Option<String>,
    categories: Vec<String>,
    created_at: Option<DateTime<Utc>>,
}

fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    let odt = OffsetDateTime::parse(ts, &Rfc2822)
        .or_else(|_| OffsetDateTime::parse(ts, &Rfc3339))
        .ok()?;
    DateTime::from_timestamp(odt.unix_timestamp(), odt.nanosecond())
}

/// HTML entities XML does not define.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

fn parse_feed(xml: &str) -> Result<Vec<Entry>> {
    let xml = scrub_html_entities_for_xml(xml);

    let rss_err = match from_str::<Rss>(&xml) {
        Ok(rss) => return Ok(rss.channel.items.into_iter().map(rss_entry).collect()),
        Err(e) => e,
    };
    match from_str::<Atom>(&xml) {
        Ok(atom) if xml.contains("<feed") => Ok(atom.entries.into_iter().map(atom_entry).collect()),
        Ok(_) => Err(anyhow!(rss_err)).context("parsing rss xml"),
        Err(atom_err) => bail!("feed is neither RSS ({rss_err}) nor Atom ({atom_err})"),
    }
}

fn rss_entry(item: RssItem) -> Entry {
    let image_url = item
        .enclosure
        .filter(|e| e.kind.starts_with("image/"))
        .map(|e| e.url);
    Entry {
        guid: item.guid.map(|g| g.trim().to_string()).filter(|g| !g.is_empty()),
        title: item.title.unwrap_or_default().trim().to_string(),
        link: item.link.unwrap_or_default().trim().to_string(),
        description: item.description.unwrap_or_default(),
        content: item.content.unwrap_or_default(),
        image_url,
        categories: item.categories,
        created_at: item
            .pub_date
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| item.dc_date.as_deref().and_then(parse_timestamp)),
    }
}

fn atom_entry(entry: AtomEntry) -> Entry {
    let link = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or(entry.links.first())
        .map(|l| l.href.clone())
        .unwrap_or_default();
    Entry {
        guid: entry.id.filter(|g| !g.is_empty()),
        title: entry.title.unwrap_or_default().trim().to_string(),
        link,
        description: entry.summary.unwrap_or_default(),
        content: entry.content.unwrap_or_default(),
        image_url: None,
        categories: entry.categories.into_iter().map(|c| c.term).collect(),
        created_at: entry
            .published
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| entry.updated.as_deref().and_then(parse_timestamp)),
    }
}

// ------------------------------------------------------------
// Source
// ------------------------------------------------------------

impl RssFeed {
    fn to_item(&self, entry: Entry, created_at: DateTime<Utc>, source_id: &TypedUid) -> FeedItem {
        FeedItem {
            guid: entry.guid,
            title: entry.title,
            description: entry.description,
            content: entry.content,
            link: entry.link,
            feed_url: self.url.clone(),
            image_url: entry.image_url,
            categories: entry.categories,
            created_at,
            source_type: TYPE_FEED.to_string(),
            source_ids: vec![source_id.clone()],
        }
    }

    async fn fetch(&self, cursor: TimestampCursor, out: &Emitter) -> Result<()> {
        let rt = runtime(&self.rt)?;
        let mut req = rt.client.get(&self.url);
        for (name, value) in &self.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req.send().await.context("rss http get()")?;
        let status = resp.status();
        if !status.is_success() {
            bail!("{} returned {status}", self.url);
        }
        let body = resp.text().await.context("rss http .text()")?;
        let entries = parse_feed(&body).with_context(|| format!("parsing feed {}", self.url))?;

        let source_id = self.uid();
        let mut emitted = 0usize;
        let mut undated = 0usize;
        for entry in entries {
            let Some(created_at) = entry.created_at else {
                undated += 1;
                continue;
            };
            if !cursor.is_new(created_at) {
                continue;
            }
            out.send(Activity::FeedItem(self.to_item(entry, created_at, &source_id)))
                .await?;
            emitted += 1;
        }
        tracing::debug!(emitted, undated, feed = %self.url, "feed fetched");
        Ok(())
    }
}

#[async_trait]
impl Source for RssFeed {
    fn uid(&self) -> TypedUid {
        TypedUid::new(TYPE_FEED, [strip_url(&self.url)])
    }

    fn source_type(&self) -> &'static str {
        TYPE_FEED
    }

    fn name(&self) -> String {
        crate::sources::text::strip_url_host(&self.url).unwrap_or_else(|| strip_url(&self.url))
    }

    fn description(&self) -> String {
        format!("Entries from the feed at {}", strip_url(&self.url))
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(15 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new()
            .required("url", &self.url)
            .url("url", &self.url)
            .finish()
    }

    fn initialize(&mut self, _config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        self.rt = Some(HttpRuntime::new(&self.url, DEFAULT_TIMEOUT)?);
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        run_pass(cancel, out, self.fetch(TimestampCursor::from_since(since), out)).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_FEED, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Rust Blog</title>
    <item>
      <title>Announcing Rust 1.90&nbsp;</title>
      <link>https://blog.rust-lang.org/2025/09/18/Rust-1.90.0/</link>
      <guid>https://blog.rust-lang.org/2025/09/18/Rust-1.90.0/</guid>
      <pubDate>Thu, 18 Sep 2025 00:00:00 +0000</pubDate>
      <description><![CDATA[<p>The Rust team is happy to announce</p>]]></description>
      <category>release</category>
      <category>compiler</category>
      <enclosure url="https://blog.rust-lang.org/img.png" type="image/png" length="1"/>
    </item>
    <item>
      <title>Undated</title>
      <link>/undated</link>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>This Week in Rust</title>
  <entry>
    <id>tag:this-week-in-rust.org,2025:610</id>
    <title>This Week in Rust 610</title>
    <link rel="alternate" href="https://this-week-in-rust.org/blog/2025/08/06/this-week-in-rust-610/"/>
    <updated>2025-08-06T04:00:00Z</updated>
    <summary>Hello and welcome</summary>
    <category term="twir"/>
  </entry>
</feed>"#;

    #[test]
    fn parses_rss_items() {
        let entries = parse_feed(RSS).unwrap();
        assert_eq!(entries.len(), 2);
        let first = &entries[0];
        assert_eq!(first.title, "Announcing Rust 1.90");
        assert_eq!(first.categories, ["release", "compiler"]);
        assert_eq!(first.image_url.as_deref(), Some("https://blog.rust-lang.org/img.png"));
        assert_eq!(first.created_at.unwrap().to_rfc3339(), "2025-09-18T00:00:00+00:00");
        assert!(entries[1].created_at.is_none());
    }

    #[test]
    fn parses_atom_with_updated_fallback() {
        let entries = parse_feed(ATOM).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].guid.as_deref(), Some("tag:this-week-in-rust.org,2025:610"));
        assert_eq!(
            entries[0].link,
            "https://this-week-in-rust.org/blog/2025/08/06/this-week-in-rust-610/"
        );
        assert_eq!(entries[0].categories, ["twir"]);
        assert!(entries[0].created_at.is_some());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_feed("<html><body>nope</body></html>").is_err());
    }

    #[test]
    fn uid_strips_scheme() {
        let feed = RssFeed::new("https://blog.rust-lang.org/feed.xml");
        assert_eq!(feed.uid().to_string(), "rssfeed:blog.rust-lang.org%2Ffeed.xml");
        assert_eq!(feed.name(), "blog.rust-lang.org");
        assert_eq!(RssFeed::new("feed.xml").validate()[0].field, "url");
    }
}
