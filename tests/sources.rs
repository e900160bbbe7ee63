// tests/sources.rs
//
// Provider adapters against in-process fakes of their upstream APIs: endpoint
// shapes, cold-start bounds, cursors and single fault reporting.

mod common;

use std::time::Duration;

use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use common::{routed, scripted, serve, Reply};
use feedpulse::activity::{GithubIssue, HackerNewsPost, LobstersPost, MastodonPost, RedditPost};
use feedpulse::sources::changedetection::WebsiteChangeWatch;
use feedpulse::sources::github::{GithubIssues, GithubReleases, GithubTopic};
use feedpulse::sources::hackernews::HackerNewsPosts;
use feedpulse::sources::lobsters::{LobstersFeed, LobstersTag};
use feedpulse::sources::mastodon::{MastodonAccount, MastodonTag};
use feedpulse::sources::reddit::RedditSubreddit;
use feedpulse::sources::rss::RssFeed;
use feedpulse::{Activity, Emitter, ProviderConfig, Source, SourceFault, TypedUid};

/// One fetch pass; returns everything emitted and every fault reported.
async fn run_pass(source: &dyn Source, since: Option<&Activity>) -> (Vec<Activity>, Vec<SourceFault>) {
    let (atx, mut arx) = mpsc::channel(512);
    let (ftx, mut frx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let out = Emitter::new(source.uid(), atx, ftx, cancel.clone());
    tokio::time::timeout(Duration::from_secs(10), source.stream(&cancel, since, &out))
        .await
        .expect("pass finishes");
    drop(out);

    let mut activities = Vec::new();
    while let Ok(a) = arx.try_recv() {
        activities.push(a);
    }
    let mut faults = Vec::new();
    while let Ok(f) = frx.try_recv() {
        faults.push(f);
    }
    (activities, faults)
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 10, hour, 0, 0).unwrap()
}

fn ready<S: Source>(mut source: S, provider: &ProviderConfig) -> S {
    source.initialize(provider).expect("initialize");
    source
}

// ------------------------------------------------------------
// Lobsters
// ------------------------------------------------------------

fn story(short_id: &str, hour: u32) -> serde_json::Value {
    json!({
        "short_id": short_id,
        "created_at": at(hour).to_rfc3339(),
        "title": format!("story {short_id}"),
        "url": format!("https://example.com/{short_id}"),
        "score": 12,
        "comment_count": 3,
        "comments_url": format!("https://lobste.rs/s/{short_id}"),
        "tags": ["rust"]
    })
}

#[tokio::test]
async fn lobsters_skips_seen_stories_in_ranked_listing() {
    // Ranked: an old story sits above a new one.
    let (base, hits) = scripted(vec![Reply::json(json!([story("a", 9), story("b", 5), story("c", 11)]))]).await;
    let mut feed = LobstersFeed::new("hottest");
    feed.instance_url = base;
    let feed = ready(feed, &ProviderConfig::default());

    let since = Activity::LobstersPost(LobstersPost {
        short_id: "x".into(),
        title: "seen".into(),
        link_url: String::new(),
        comments_url: String::new(),
        created_at: at(8),
        score: 0,
        comment_count: 0,
        article_text: None,
        tags: vec![],
        source_type: "lobstersfeed".into(),
        source_id: feed.uid(),
    });
    let (activities, faults) = run_pass(&feed, Some(&since)).await;
    assert!(faults.is_empty());
    let titles: Vec<_> = activities.iter().map(Activity::title).collect();
    assert_eq!(titles, vec!["story a", "story c"]);
    assert_eq!(hits.uris(), vec!["/hottest.json"]);
}

#[tokio::test]
async fn lobsters_tag_reports_http_errors_once() {
    let (base, hits) = scripted(vec![Reply::status(500)]).await;
    let mut tag = LobstersTag::new("rust");
    tag.instance_url = base;
    let tag = ready(tag, &ProviderConfig::default());

    let (activities, faults) = run_pass(&tag, None).await;
    assert!(activities.is_empty());
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].source_uid, tag.uid());
    assert!(faults[0].to_string().contains("500"), "{}", faults[0]);
    assert_eq!(hits.uris(), vec!["/t/rust.json"]);
}

/// Linked pages: one article, one image and one dead link.
async fn article_server() -> (String, common::Hits) {
    routed(vec![
        (
            "/post/",
            Reply::html("<html><head><title>nav</title></head><body><p>Zero-cost &amp; safe.</p></body></html>"),
        ),
        ("/cat.png", Reply::status(200).header("content-type", "image/png")),
    ])
    .await
}

#[tokio::test]
async fn lobsters_link_posts_carry_article_text_when_enabled() {
    let (articles, article_hits) = article_server().await;
    let linked = |id: &str, hour: u32, path: &str| {
        let mut s = story(id, hour);
        s["url"] = json!(format!("{articles}{path}"));
        s
    };
    let listing = json!([linked("a", 9, "/post/a"), linked("b", 10, "/cat.png"), linked("c", 11, "/gone")]);
    let (base, _hits) = scripted(vec![Reply::json(listing)]).await;

    let mut plain = LobstersFeed::new("newest");
    plain.instance_url = base.clone();
    let plain = ready(plain, &ProviderConfig::default());
    let (activities, _) = run_pass(&plain, None).await;
    assert_eq!(activities.len(), 3);
    assert_eq!(article_hits.count(), 0, "article fetching is off by default");

    let provider = ProviderConfig {
        fetch_articles: true,
        ..Default::default()
    };
    let mut feed = LobstersFeed::new("newest");
    feed.instance_url = base;
    let feed = ready(feed, &provider);
    let (activities, faults) = run_pass(&feed, None).await;
    assert!(faults.is_empty(), "a dead link does not fail the pass: {faults:?}");
    let texts: Vec<Option<String>> = activities
        .iter()
        .map(|a| match a {
            Activity::LobstersPost(p) => p.article_text.clone(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(texts, vec![Some("Zero-cost & safe.".to_string()), None, None]);
    assert!(activities[0].body().contains("Zero-cost & safe."), "{}", activities[0].body());
    assert_eq!(article_hits.count(), 3);
}

// ------------------------------------------------------------
// Mastodon
// ------------------------------------------------------------

fn status(id: &str, hour: u32) -> serde_json::Value {
    json!({
        "id": id,
        "created_at": at(hour).to_rfc3339(),
        "content": format!("<p>toot {id}</p>"),
        "url": format!("https://mastodon.example/@ferris/{id}"),
        "favourites_count": 2,
        "reblogs_count": 1,
        "replies_count": 0,
        "media_attachments": []
    })
}

fn mastodon_since(id: &str, source_id: TypedUid) -> Activity {
    Activity::MastodonPost(MastodonPost {
        id: id.into(),
        content: String::new(),
        url: String::new(),
        reblog: None,
        card_title: None,
        media_url: None,
        created_at: at(1),
        favourites: 0,
        reblogs: 0,
        replies: 0,
        source_type: "mastodontag".into(),
        source_id,
    })
}

#[tokio::test]
async fn mastodon_cold_start_reads_one_bounded_page() {
    let (base, hits) = scripted(vec![Reply::json(json!([status("12", 4), status("11", 3)]))]).await;
    let tag = ready(MastodonTag::new(base, "rust"), &ProviderConfig::default());

    let (activities, faults) = run_pass(&tag, None).await;
    assert!(faults.is_empty());
    assert_eq!(activities.len(), 2);
    let uris = hits.uris();
    assert_eq!(uris.len(), 1);
    assert!(uris[0].starts_with("/api/v1/timelines/tag/rust?"), "{}", uris[0]);
    assert!(uris[0].contains("limit=10"));
    assert!(!uris[0].contains("min_id"));
}

#[tokio::test]
async fn mastodon_walks_forward_with_min_id_until_empty() {
    let (base, hits) = scripted(vec![
        Reply::json(json!([status("104", 6), status("103", 5)])),
        Reply::json(json!([status("105", 7)])),
        Reply::json(json!([])),
    ])
    .await;
    let tag = ready(MastodonTag::new(base, "rust"), &ProviderConfig::default());
    let since = mastodon_since("100", tag.uid());

    let (activities, _) = run_pass(&tag, Some(&since)).await;
    assert_eq!(activities.len(), 3);
    let uris = hits.uris();
    assert_eq!(uris.len(), 3);
    assert!(uris[0].contains("min_id=100") && uris[0].contains("limit=15"), "{}", uris[0]);
    assert!(uris[1].contains("min_id=104"), "{}", uris[1]);
    assert!(uris[2].contains("min_id=105"), "{}", uris[2]);
}

#[tokio::test]
async fn mastodon_account_is_looked_up_before_its_timeline() {
    let (base, hits) = routed(vec![
        ("/api/v1/accounts/lookup", Reply::json(json!({"id": "77", "acct": "ferris"}))),
        ("/api/v1/accounts/77/statuses", Reply::json(json!([status("1", 2)]))),
    ])
    .await;
    let account = ready(MastodonAccount::new(base, "@ferris"), &ProviderConfig::default());

    let (activities, faults) = run_pass(&account, None).await;
    assert!(faults.is_empty(), "{faults:?}");
    assert_eq!(activities.len(), 1);
    let uris = hits.uris();
    assert!(uris[0].starts_with("/api/v1/accounts/lookup?acct=ferris"), "{}", uris[0]);
    assert!(uris[1].starts_with("/api/v1/accounts/77/statuses"), "{}", uris[1]);
}

// ------------------------------------------------------------
// RSS / Atom
// ------------------------------------------------------------

const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example&nbsp;Blog</title>
    <item>
      <title>Newest post</title>
      <link>https://blog.example.com/newest</link>
      <guid>newest</guid>
      <pubDate>Sat, 10 May 2025 12:00:00 +0000</pubDate>
      <description>Fresh &mdash; off the press</description>
    </item>
    <item>
      <title>Undated post</title>
      <link>https://blog.example.com/undated</link>
    </item>
    <item>
      <title>Older post</title>
      <link>https://blog.example.com/older</link>
      <guid>older</guid>
      <pubDate>Sat, 10 May 2025 06:00:00 +0000</pubDate>
    </item>
  </channel>
</rss>"#;

const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <entry>
    <title>Only updated</title>
    <id>urn:uuid:1</id>
    <link rel="alternate" href="https://atom.example.com/1"/>
    <updated>2025-05-10T09:00:00Z</updated>
    <summary>Summary</summary>
  </entry>
</feed>"#;

#[tokio::test]
async fn rss_emits_dated_items_newer_than_since() {
    let (base, _hits) = scripted(vec![Reply::xml(RSS)]).await;
    let feed = ready(RssFeed::new(format!("{base}/feed.xml")), &ProviderConfig::default());

    let (cold, faults) = run_pass(&feed, None).await;
    assert!(faults.is_empty(), "{faults:?}");
    let titles: Vec<_> = cold.iter().map(Activity::title).collect();
    assert_eq!(titles, vec!["Newest post", "Older post"]);

    let (warm, _) = run_pass(&feed, Some(&cold[1])).await;
    assert_eq!(warm.len(), 1);
    assert_eq!(warm[0].title(), "Newest post");
}

#[tokio::test]
async fn atom_entries_fall_back_to_updated() {
    let (base, _hits) = scripted(vec![Reply::xml(ATOM)]).await;
    let feed = ready(RssFeed::new(format!("{base}/atom.xml")), &ProviderConfig::default());

    let (items, faults) = run_pass(&feed, None).await;
    assert!(faults.is_empty(), "{faults:?}");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].created_at(), at(9));
    assert_eq!(items[0].url(), "https://atom.example.com/1");
}

#[tokio::test]
async fn garbage_feed_is_a_single_fault() {
    let (base, _hits) = scripted(vec![Reply::xml("<html><body>not a feed</body></html>")]).await;
    let feed = ready(RssFeed::new(format!("{base}/feed.xml")), &ProviderConfig::default());
    let (items, faults) = run_pass(&feed, None).await;
    assert!(items.is_empty());
    assert_eq!(faults.len(), 1);
}

// ------------------------------------------------------------
// GitHub
// ------------------------------------------------------------

fn issue(number: u64, updated: DateTime<Utc>) -> serde_json::Value {
    json!({
        "number": number,
        "title": format!("issue {number}"),
        "body": "details",
        "html_url": format!("https://github.com/tokio-rs/tokio/issues/{number}"),
        "updated_at": updated.to_rfc3339(),
        "comments": 1
    })
}

fn github_provider(base: &str) -> ProviderConfig {
    ProviderConfig {
        github_api_url: base.to_string(),
        github_token: Some("ghp_test".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn github_issues_paginate_until_seen_timestamp() {
    let newest = at(20);
    let page1: Vec<_> = (0..30).map(|i| issue(100 - i, newest - chrono::Duration::minutes(i as i64))).collect();
    let page2 = vec![issue(60, at(12)), issue(59, at(8))];
    let (base, hits) = scripted(vec![Reply::json(json!(page1)), Reply::json(json!(page2))]).await;
    let issues = ready(GithubIssues::new("tokio-rs/tokio"), &github_provider(&base));

    let since = Activity::GithubIssue(GithubIssue {
        repository: "tokio-rs/tokio".into(),
        number: 1,
        title: "seen".into(),
        body: String::new(),
        html_url: String::new(),
        updated_at: at(10),
        comments: 0,
        is_pull_request: false,
        source_id: issues.uid(),
    });
    let (activities, faults) = run_pass(&issues, Some(&since)).await;
    assert!(faults.is_empty(), "{faults:?}");
    assert_eq!(activities.len(), 31);

    let uris = hits.uris();
    assert_eq!(uris.len(), 2);
    assert!(uris[0].starts_with("/repos/tokio-rs/tokio/issues?"), "{}", uris[0]);
    assert!(uris[0].contains("page=1") && uris[0].contains("since="), "{}", uris[0]);
    assert!(uris[1].contains("page=2"), "{}", uris[1]);
}

#[tokio::test]
async fn github_issues_cold_start_reads_one_page() {
    let page: Vec<_> = (0..30).map(|i| issue(100 - i, at(20) - chrono::Duration::minutes(i as i64))).collect();
    let (base, hits) = scripted(vec![Reply::json(json!(page))]).await;
    let issues = ready(GithubIssues::new("tokio-rs/tokio"), &github_provider(&base));

    let (activities, _) = run_pass(&issues, None).await;
    assert_eq!(activities.len(), 30);
    assert_eq!(hits.count(), 1);
}

#[tokio::test]
async fn github_releases_skip_drafts_and_prereleases() {
    let release = |id: u64, tag: &str, draft: bool, pre: bool, hour: u32| {
        json!({
            "id": id,
            "name": tag,
            "tag_name": tag,
            "body": "notes",
            "html_url": format!("https://github.com/tokio-rs/tokio/releases/tag/{tag}"),
            "published_at": at(hour).to_rfc3339(),
            "created_at": at(hour).to_rfc3339(),
            "draft": draft,
            "prerelease": pre
        })
    };
    let (base, _hits) = scripted(vec![Reply::json(json!([
        release(4, "v1.3.0-draft", true, false, 12),
        release(3, "v1.3.0-rc.1", false, true, 11),
        release(2, "v1.2.0", false, false, 10),
        release(1, "v1.1.0", false, false, 9),
    ]))])
    .await;
    let provider = github_provider(&base);

    let stable = ready(GithubReleases::new("tokio-rs", "tokio"), &provider);
    let (activities, _) = run_pass(&stable, None).await;
    let titles: Vec<_> = activities.iter().map(Activity::title).collect();
    assert_eq!(activities.len(), 2, "{titles:?}");

    let mut with_pre = GithubReleases::new("tokio-rs", "tokio");
    with_pre.include_prereleases = true;
    let with_pre = ready(with_pre, &provider);
    let (activities, _) = run_pass(&with_pre, None).await;
    assert_eq!(activities.len(), 3);
}

#[tokio::test]
async fn github_topic_searches_recent_repositories_and_stops_at_cursor() {
    let repo = |name: &str, hour: u32| {
        json!({
            "full_name": format!("ferris/{name}"),
            "description": format!("{name} in Rust"),
            "html_url": format!("https://github.com/ferris/{name}"),
            "created_at": at(hour).to_rfc3339(),
            "stargazers_count": 1500,
            "forks_count": 40,
            "topics": ["rust"]
        })
    };
    let (base, hits) = routed(vec![(
        "/search/repositories",
        Reply::json(json!({
            "total_count": 3,
            "items": [repo("c", 14), repo("b", 12), repo("a", 9)]
        })),
    )])
    .await;
    let topic = ready(GithubTopic::new("rust"), &github_provider(&base));

    let (cold, faults) = run_pass(&topic, None).await;
    assert!(faults.is_empty(), "{faults:?}");
    assert_eq!(cold.len(), 3);
    assert_eq!(cold[0].uid().to_string(), "githubtopic:ferris%2Fc");
    assert_eq!(cold[0].source_uids(), vec![topic.uid()]);

    let (warm, _) = run_pass(&topic, Some(&cold[1])).await;
    let titles: Vec<_> = warm.iter().map(Activity::title).collect();
    assert_eq!(titles, vec!["ferris/c"]);

    let uris = hits.uris();
    assert!(uris[0].starts_with("/search/repositories?"), "{}", uris[0]);
    assert!(uris[0].contains("q=topic%3Arust+stars%3A%3E1000+created%3A%3E%3D"), "{}", uris[0]);
    assert!(uris[0].contains("sort=created") && uris[0].contains("order=desc"), "{}", uris[0]);
    assert!(uris[1].contains("created%3A%3E%3D2025-05-10"), "{}", uris[1]);
}

// ------------------------------------------------------------
// Hacker News
// ------------------------------------------------------------

async fn hackernews_fake(feed_ids: Vec<u64>) -> String {
    let top = feed_ids.clone();
    let router = Router::new()
        .route("/topstories.json", get(move || async move { Json(top) }))
        .route("/newstories.json", get(move || async move { Json(feed_ids) }))
        .route(
            "/item/{file}",
            get(|Path(file): Path<String>| async move {
                let id: u64 = file.trim_end_matches(".json").parse().unwrap_or(0);
                Json(json!({
                    "id": id,
                    "type": "story",
                    "title": format!("story {id}"),
                    "url": format!("https://example.com/{id}"),
                    "time": 1_746_864_000 + id as i64,
                    "score": 10,
                    "descendants": 2,
                    "dead": id % 10 == 3
                }))
            }),
        );
    serve(router).await
}

fn hn_provider(base: &str) -> ProviderConfig {
    ProviderConfig {
        hackernews_api_url: base.to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn hackernews_top_is_capped_and_keeps_rank_order() {
    let base = hackernews_fake((1..=40).rev().collect()).await;
    let top = ready(HackerNewsPosts::new("top"), &hn_provider(&base));

    let (activities, faults) = run_pass(&top, None).await;
    assert!(faults.is_empty(), "{faults:?}");
    let ids: Vec<u64> = activities
        .iter()
        .map(|a| match a {
            Activity::HackerNewsPost(HackerNewsPost { id, .. }) => *id,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    // 40..=26 requested; 33 is dead.
    let expected: Vec<u64> = (26..=40).rev().filter(|id| *id != 33).collect();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn hackernews_new_only_fetches_ids_above_since() {
    let base = hackernews_fake(vec![108, 107, 105, 104, 100, 99]).await;
    let new = ready(HackerNewsPosts::new("new"), &hn_provider(&base));
    let since = Activity::HackerNewsPost(HackerNewsPost {
        id: 104,
        title: "seen".into(),
        text: None,
        link_url: None,
        time: at(1),
        score: 0,
        descendants: 0,
        article_text: None,
        source_id: new.uid(),
    });

    let (activities, _) = run_pass(&new, Some(&since)).await;
    let titles: Vec<_> = activities.iter().map(Activity::title).collect();
    assert_eq!(titles, vec!["story 108", "story 107", "story 105"]);
}

#[tokio::test]
async fn hackernews_ranked_feed_does_not_repeat_stories() {
    let base = hackernews_fake((1..=40).rev().collect()).await;
    let top = ready(HackerNewsPosts::new("top"), &hn_provider(&base));

    let (first, _) = run_pass(&top, None).await;
    assert_eq!(first.len(), 14);
    let newest = first.iter().max_by_key(|a| a.created_at()).unwrap().clone();

    let (second, faults) = run_pass(&top, Some(&newest)).await;
    assert!(faults.is_empty(), "{faults:?}");
    assert!(second.is_empty(), "stable ranking re-emitted {second:?}");
}

#[tokio::test]
async fn hackernews_ranked_feed_emits_only_stories_newer_than_since() {
    let base = hackernews_fake(vec![20, 35, 12, 38]).await;
    let top = ready(HackerNewsPosts::new("top"), &hn_provider(&base));
    let since = Activity::HackerNewsPost(HackerNewsPost {
        id: 30,
        title: "seen".into(),
        text: None,
        link_url: None,
        article_text: None,
        time: DateTime::from_timestamp(1_746_864_000 + 30, 0).unwrap(),
        score: 0,
        descendants: 0,
        source_id: top.uid(),
    });

    let (activities, _) = run_pass(&top, Some(&since)).await;
    let titles: Vec<_> = activities.iter().map(Activity::title).collect();
    // Rank order kept; older stories in the ranking are skipped.
    assert_eq!(titles, vec!["story 35", "story 38"]);
}

#[tokio::test]
async fn hackernews_link_story_gets_article_text() {
    let (articles, article_hits) = article_server().await;
    let link = format!("{articles}/post/7");
    let router = Router::new()
        .route("/newstories.json", get(|| async { Json(vec![8u64, 7]) }))
        .route(
            "/item/{file}",
            get(move |Path(file): Path<String>| {
                let link = link.clone();
                async move {
                    let id: u64 = file.trim_end_matches(".json").parse().unwrap_or(0);
                    let mut item = json!({
                        "id": id,
                        "type": "story",
                        "title": format!("story {id}"),
                        "time": 1_746_864_000 + id as i64,
                    });
                    if id == 7 {
                        item["url"] = json!(link);
                    } else {
                        item["text"] = json!("<p>Ask HN: favourite allocator?</p>");
                    }
                    Json(item)
                }
            }),
        );
    let base = serve(router).await;
    let provider = ProviderConfig {
        fetch_articles: true,
        ..hn_provider(&base)
    };
    let new = ready(HackerNewsPosts::new("new"), &provider);

    let (activities, faults) = run_pass(&new, None).await;
    assert!(faults.is_empty(), "{faults:?}");
    let bodies: Vec<_> = activities.iter().map(Activity::body).collect();
    assert_eq!(
        bodies,
        vec!["Ask HN: favourite allocator?".to_string(), "story 7\n\nZero-cost & safe.".to_string()]
    );
    // Self posts keep their own text; only the link is fetched.
    assert_eq!(article_hits.count(), 1);
}

// ------------------------------------------------------------
// Reddit
// ------------------------------------------------------------

fn post(id: &str, hour: u32, stickied: bool) -> serde_json::Value {
    json!({"kind": "t3", "data": {
        "id": id,
        "name": format!("t3_{id}"),
        "subreddit": "rust",
        "title": format!("post {id}"),
        "selftext": "",
        "permalink": format!("/r/rust/comments/{id}/"),
        "url": format!("https://example.com/{id}"),
        "is_self": false,
        "thumbnail": "default",
        "created_utc": at(hour).timestamp() as f64,
        "score": 42,
        "num_comments": 7,
        "stickied": stickied,
        "over_18": false
    }})
}

fn listing(children: Vec<serde_json::Value>) -> Reply {
    Reply::json(json!({"kind": "Listing", "data": {"children": children}}))
}

fn reddit_provider(base: String) -> ProviderConfig {
    ProviderConfig {
        reddit_base_url: base,
        ..Default::default()
    }
}

fn reddit_sub(sort_by: &str, provider: &ProviderConfig) -> RedditSubreddit {
    let mut sub = RedditSubreddit::new("rust");
    sub.sort_by = sort_by.into();
    ready(sub, provider)
}

fn seen_post(sub: &RedditSubreddit, id: &str, hour: u32) -> Activity {
    Activity::RedditPost(RedditPost {
        id: id.into(),
        fullname: format!("t3_{id}"),
        subreddit: "rust".into(),
        title: "seen".into(),
        selftext: String::new(),
        permalink: String::new(),
        link_url: None,
        thumbnail_url: None,
        created_at: at(hour),
        score: 0,
        num_comments: 0,
        article_text: None,
        source_type: "redditsubreddit".into(),
        source_ids: vec![sub.uid()],
    })
}

#[tokio::test]
async fn reddit_new_pages_backwards_with_before() {
    let (base, hits) = scripted(vec![
        listing(vec![post("c", 9, false), post("b", 8, true)]),
        listing(vec![]),
    ])
    .await;
    let sub = reddit_sub("new", &reddit_provider(base));
    let since = seen_post(&sub, "a", 7);

    let (activities, faults) = run_pass(&sub, Some(&since)).await;
    assert!(faults.is_empty(), "{faults:?}");
    assert_eq!(activities.len(), 1, "stickied post is skipped");
    match &activities[0] {
        Activity::RedditPost(p) => {
            assert_eq!(p.thumbnail_url, None);
            assert_eq!(p.link_url.as_deref(), Some("https://example.com/c"));
        }
        other => panic!("unexpected {other:?}"),
    }
    let uris = hits.uris();
    assert_eq!(uris.len(), 2, "{uris:?}");
    assert!(uris[0].starts_with("/r/rust/new.json?"), "{}", uris[0]);
    assert!(uris[0].contains("before=t3_a"), "{}", uris[0]);
    assert!(uris[1].contains("before=t3_c"), "{}", uris[1]);
}

#[tokio::test]
async fn reddit_new_falls_back_to_timestamps_when_since_post_is_gone() {
    let (base, hits) = scripted(vec![
        listing(vec![]),
        listing(vec![post("y", 9, false), post("x", 8, false), post("w", 6, false)]),
    ])
    .await;
    let sub = reddit_sub("new", &reddit_provider(base));
    let since = seen_post(&sub, "deleted", 7);

    let (activities, faults) = run_pass(&sub, Some(&since)).await;
    assert!(faults.is_empty(), "{faults:?}");
    let titles: Vec<_> = activities.iter().map(Activity::title).collect();
    assert_eq!(titles, vec!["post y", "post x"]);

    let uris = hits.uris();
    assert_eq!(uris.len(), 2, "{uris:?}");
    assert!(uris[0].contains("before=t3_deleted"), "{}", uris[0]);
    assert!(!uris[1].contains("before="), "{}", uris[1]);
}

#[tokio::test]
async fn reddit_ranked_sort_filters_one_page_by_timestamp() {
    // Hot ranking: old posts sit above new ones and the since post is no longer listed.
    let (base, hits) = scripted(vec![listing(vec![
        post("d", 10, false),
        post("old", 5, false),
        post("e", 12, false),
        post("pinned", 13, true),
        post("f", 6, false),
    ])])
    .await;
    let sub = reddit_sub("hot", &reddit_provider(base));
    let since = seen_post(&sub, "unlisted", 7);

    let (activities, faults) = run_pass(&sub, Some(&since)).await;
    assert!(faults.is_empty(), "{faults:?}");
    let titles: Vec<_> = activities.iter().map(Activity::title).collect();
    assert_eq!(titles, vec!["post d", "post e"]);

    // Stable listing: the next pass, seeded with the newest emitted, sees nothing.
    let (again, _) = run_pass(&sub, Some(&activities[1])).await;
    assert!(again.is_empty(), "{again:?}");

    let uris = hits.uris();
    assert_eq!(uris.len(), 2, "{uris:?}");
    assert!(uris.iter().all(|u| u.starts_with("/r/rust/hot.json?") && !u.contains("before=")), "{uris:?}");
}

#[tokio::test]
async fn reddit_link_posts_carry_article_text_when_enabled() {
    let (articles, article_hits) = article_server().await;
    let mut link = post("l", 9, false);
    link["data"]["url"] = json!(format!("{articles}/post/l"));
    let mut own = post("s", 8, false);
    own["data"]["is_self"] = json!(true);
    own["data"]["selftext"] = json!("Self post text");
    let (base, _hits) = scripted(vec![listing(vec![link, own])]).await;
    let provider = ProviderConfig {
        fetch_articles: true,
        ..reddit_provider(base)
    };
    let sub = reddit_sub("hot", &provider);

    let (activities, faults) = run_pass(&sub, None).await;
    assert!(faults.is_empty(), "{faults:?}");
    let bodies: Vec<_> = activities.iter().map(Activity::body).collect();
    assert_eq!(bodies, vec!["post l\n\nZero-cost & safe.".to_string(), "Self post text".to_string()]);
    assert_eq!(article_hits.count(), 1);
}

// ------------------------------------------------------------
// changedetection.io
// ------------------------------------------------------------

#[tokio::test]
async fn website_watch_emits_when_last_changed_moves() {
    let (base, hits) = routed(vec![(
        "/api/v1/watch/0f7c",
        Reply::json(json!({
            "title": "Pricing page",
            "url": "https://example.com/pricing",
            "last_changed": at(15).timestamp()
        })),
    )])
    .await;
    let mut watch = WebsiteChangeWatch::new("0f7c");
    watch.instance_url = base;
    watch.token = Some("cd-key".into());
    let watch = ready(watch, &ProviderConfig::default());

    let (first, faults) = run_pass(&watch, None).await;
    assert!(faults.is_empty(), "{faults:?}");
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].created_at(), at(15));

    let (again, _) = run_pass(&watch, Some(&first[0])).await;
    assert!(again.is_empty());
    assert_eq!(hits.count(), 2);
}
