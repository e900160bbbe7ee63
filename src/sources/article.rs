// src/sources/article.rs
//! Readable text of the page a link post points at.

use std::time::Duration;

use anyhow::{bail, Context};
use once_cell::sync::OnceCell;
use regex::Regex;

use crate::config::{ConfigError, ProviderConfig};
use crate::sources::{http_client, text};

/// Longest article text kept on an activity.
pub const MAX_ARTICLE_CHARS: usize = 20_000;

const ARTICLE_TIMEOUT: Duration = Duration::from_secs(10);

fn re_hidden() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<head\b.*?</head>|<!--.*?-->")
            .expect("valid hidden-markup regex")
    })
}

fn re_blank_lines() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"[ \t]*\n[\s]*\n\s*").expect("valid blank-line regex"))
}

/// Visible text of an HTML page: markup, scripts and styles dropped, blank runs squeezed.
pub fn article_text_from_html(html: &str) -> String {
    let visible = re_hidden().replace_all(html, " ");
    let plain = text::extract_text_from_html(&visible);
    re_blank_lines().replace_all(&plain, "\n\n").into_owned()
}

#[derive(Debug, Clone)]
pub struct ArticleFetcher {
    client: reqwest::Client,
    max_chars: usize,
}

impl ArticleFetcher {
    pub fn new() -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client(ARTICLE_TIMEOUT)?,
            max_chars: MAX_ARTICLE_CHARS,
        })
    }

    /// Enabled only when the provider config asks for article text.
    pub fn from_config(config: &ProviderConfig) -> Result<Option<Self>, ConfigError> {
        if config.fetch_articles {
            Self::new().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Text of the page at `url`. `None` for content that is not HTML (images, PDFs, ...).
    pub async fn fetch_text(&self, url: &str) -> anyhow::Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("fetching article {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{url} returned {status}");
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if !(content_type.contains("text/html") || content_type.contains("application/xhtml+xml")) {
            tracing::debug!(url, %content_type, "unsupported article content type");
            return Ok(None);
        }
        let html = response.text().await.with_context(|| format!("reading article {url}"))?;
        let (text, _) = text::limit_string_length(&article_text_from_html(&html), self.max_chars);
        Ok(Some(text).filter(|t| !t.is_empty()))
    }

    /// Like [`ArticleFetcher::fetch_text`], but a failed fetch leaves the post without text.
    pub async fn text_or_none(&self, url: &str) -> Option<String> {
        match self.fetch_text(url).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = ?e, url, "article fetch failed");
                None
            }
        }
    }
}

/// Article text for `link` when a fetcher is configured.
pub async fn maybe_fetch(articles: &Option<ArticleFetcher>, link: Option<&str>) -> Option<String> {
    match (articles, link) {
        (Some(fetcher), Some(url)) if !url.is_empty() => fetcher.text_or_none(url).await,
        _ => None,
    }
}
