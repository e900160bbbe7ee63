// src/sources/producthunt.rs
//! Product Hunt launches through the v2 GraphQL API.

use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::activity::{Activity, ProductHuntPost};
use crate::config::{ConfigError, ProviderConfig};
use crate::sources::cursor::{drain_pages, Page, Step, TimestampCursor};
use crate::sources::validate::{first_error, Validator};
use crate::sources::{fetch_json, run_pass, runtime, tagged_config, Emitter, HttpRuntime, Source};
use crate::uid::TypedUid;

pub const TYPE_POSTS: &str = "producthuntposts";

pub const FEEDS: &[&str] = &["new", "top"];

const TIMEOUT: Duration = Duration::from_secs(60);
const PAGE_SIZE: u32 = 20;
const MAX_PAGES: usize = 5;

const POSTS_QUERY: &str = r#"query Posts($order: PostsOrder, $first: Int, $after: String) {
  posts(order: $order, first: $first, after: $after) {
    edges {
      node {
        id name tagline description slug url
        votesCount commentsCount createdAt
        thumbnail { url }
      }
    }
    pageInfo { endCursor hasNextPage }
  }
}"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductHuntPosts {
    pub feed_name: String,

    #[serde(skip)]
    rt: Option<HttpRuntime>,
    #[serde(skip)]
    token: Option<String>,
}

impl ProductHuntPosts {
    pub fn new(feed_name: impl Into<String>) -> Self {
        Self {
            feed_name: feed_name.into(),
            ..Default::default()
        }
    }

    fn order(&self) -> &'static str {
        if self.feed_name == "top" {
            "RANKING"
        } else {
            "NEWEST"
        }
    }
}

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<PostsData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PostsData {
    posts: Connection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection {
    #[serde(default)]
    edges: Vec<Edge>,
    page_info: PageInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    #[serde(default)]
    end_cursor: Option<String>,
    #[serde(default)]
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
struct Edge {
    node: PostNode,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostNode {
    id: String,
    name: String,
    #[serde(default)]
    tagline: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    votes_count: i64,
    #[serde(default)]
    comments_count: i64,
    created_at: DateTime<Utc>,
    #[serde(default)]
    thumbnail: Option<Thumbnail>,
}

impl ProductHuntPosts {
    async fn fetch(&self, cursor: TimestampCursor, out: &Emitter) -> anyhow::Result<()> {
        let rt = runtime(&self.rt)?;
        let source_id = self.uid();
        let chronological = self.order() == "NEWEST";
        let max_pages = if cursor.is_cold() { 1 } else { MAX_PAGES };

        drain_pages(
            out,
            None::<String>,
            max_pages,
            |after: Option<String>| {
                let body = GraphQlRequest {
                    query: POSTS_QUERY,
                    variables: serde_json::json!({
                        "order": self.order(),
                        "first": PAGE_SIZE,
                        "after": after,
                    }),
                };
                let mut req = rt.client.post(&rt.base_url).json(&body);
                if let Some(token) = &self.token {
                    req = req.bearer_auth(token);
                }
                async move {
                    let resp: GraphQlResponse = fetch_json(req).await?;
                    if let Some(err) = resp.errors.first() {
                        bail!("graphql error: {}", err.message);
                    }
                    let Some(data) = resp.data else {
                        bail!("graphql response without data");
                    };
                    let info = data.posts.page_info;
                    let next = match (info.has_next_page, info.end_cursor) {
                        (true, Some(c)) => Some(Some(c)),
                        _ => None,
                    };
                    let items = data.posts.edges.into_iter().map(|e| e.node).collect();
                    Ok(Page { items, next })
                }
            },
            |node: PostNode| {
                if !cursor.is_new(node.created_at) {
                    return if chronological { Step::Stop } else { Step::Skip };
                }
                Step::Emit(Activity::ProductHuntPost(ProductHuntPost {
                    id: node.id,
                    name: node.name,
                    tagline: node.tagline,
                    description: node.description.unwrap_or_default(),
                    slug: node.slug,
                    url: node.url,
                    image_url: node.thumbnail.and_then(|t| t.url),
                    votes: node.votes_count,
                    comments: node.comments_count,
                    created_at: node.created_at,
                    source_ids: vec![source_id.clone()],
                }))
            },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Source for ProductHuntPosts {
    fn uid(&self) -> TypedUid {
        TypedUid::new(TYPE_POSTS, [self.feed_name.clone()])
    }

    fn source_type(&self) -> &'static str {
        TYPE_POSTS
    }

    fn name(&self) -> String {
        format!("{} on Product Hunt", crate::sources::text::capitalize(&self.feed_name))
    }

    fn description(&self) -> String {
        match self.feed_name.as_str() {
            "top" => "Top ranked launches on Product Hunt".into(),
            _ => "Newest launches on Product Hunt".into(),
        }
    }

    fn url(&self) -> String {
        "https://www.producthunt.com".into()
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_secs(15 * 60)
    }

    fn validate(&self) -> Vec<ConfigError> {
        Validator::new()
            .required("feedName", &self.feed_name)
            .one_of("feedName", &self.feed_name, FEEDS)
            .finish()
    }

    fn initialize(&mut self, config: &ProviderConfig) -> Result<(), ConfigError> {
        first_error(self.validate())?;
        let Some(token) = config.producthunt_token.clone() else {
            return Err(ConfigError::new("PRODUCTHUNT_API_TOKEN", "is required"));
        };
        self.token = Some(token);
        self.rt = Some(HttpRuntime::new(&config.producthunt_api_url, TIMEOUT)?);
        Ok(())
    }

    async fn stream(&self, cancel: &CancellationToken, since: Option<&Activity>, out: &Emitter) {
        run_pass(cancel, out, self.fetch(TimestampCursor::from_since(since), out)).await;
    }

    fn to_config(&self) -> serde_json::Value {
        tagged_config(TYPE_POSTS, self)
    }
}
