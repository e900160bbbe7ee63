// src/sources/cursor.rs
//! "New since last run" policies and the paginated fetch-and-emit loop.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::activity::Activity;
use crate::sources::Emitter;

/// Items at or before the last-seen `created_at` count as already seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampCursor {
    since: Option<DateTime<Utc>>,
}

impl TimestampCursor {
    pub fn from_since(since: Option<&Activity>) -> Self {
        Self {
            since: since.map(Activity::created_at),
        }
    }

    pub fn at(since: DateTime<Utc>) -> Self {
        Self { since: Some(since) }
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        self.since
    }

    pub fn is_cold(&self) -> bool {
        self.since.is_none()
    }

    /// Strictly after the cursor.
    pub fn is_new(&self, ts: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| ts > since)
    }
}

/// Provider-native id of the last-seen item, passed back as a "since id".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdCursor {
    id: Option<String>,
}

impl IdCursor {
    pub fn from_since<F>(since: Option<&Activity>, extract: F) -> Self
    where
        F: FnOnce(&Activity) -> Option<String>,
    {
        Self {
            id: since.and_then(extract).filter(|id| !id.is_empty()),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_cold(&self) -> bool {
        self.id.is_none()
    }
}

/// Numeric ids of differing length compare by length first.
pub fn newer_id<'a>(a: &'a str, b: &'a str) -> &'a str {
    if (a.len(), a) >= (b.len(), b) {
        a
    } else {
        b
    }
}

/// What to do with one provider item.
#[derive(Debug)]
pub enum Step {
    Emit(Activity),
    Skip,
    /// Everything from here on has been seen; end the pass.
    Stop,
}

/// One provider page and the cursor for the page after it.
#[derive(Debug)]
pub struct Page<T, C> {
    pub items: Vec<T>,
    pub next: Option<C>,
}

impl<T, C> Page<T, C> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

/// Fetch pages until one comes back empty, the cursor runs out, a step says
/// [`Step::Stop`] or `max_pages` is reached. A fetch error aborts the pass; anything
/// emitted before it stays emitted.
///
/// Returns the number of activities sent.
pub async fn drain_pages<T, C, F, Fut, M>(
    out: &Emitter,
    start: C,
    max_pages: usize,
    mut fetch: F,
    mut step: M,
) -> anyhow::Result<usize>
where
    F: FnMut(C) -> Fut,
    Fut: Future<Output = anyhow::Result<Page<T, C>>>,
    M: FnMut(T) -> Step,
{
    let mut cursor = Some(start);
    let mut emitted = 0;
    let mut pages = 0;

    while let Some(current) = cursor.take() {
        if pages >= max_pages {
            break;
        }
        pages += 1;

        let page = fetch(current).await?;
        if page.items.is_empty() {
            break;
        }
        for item in page.items {
            match step(item) {
                Step::Emit(activity) => {
                    out.send(activity).await?;
                    emitted += 1;
                }
                Step::Skip => {}
                Step::Stop => return Ok(emitted),
            }
        }
        cursor = page.next;
    }

    tracing::debug!(pages, emitted, "pagination finished");
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::HackerNewsPost;
    use crate::sources::SourceFault;
    use crate::uid::TypedUid;
    use chrono::TimeZone;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn post(id: u64, minute: u32) -> Activity {
        Activity::HackerNewsPost(HackerNewsPost {
            id,
            title: format!("story {id}"),
            text: None,
            link_url: None,
            time: Utc.with_ymd_and_hms(2025, 5, 1, 12, minute, 0).unwrap(),
            score: 1,
            descendants: 0,
            article_text: None,
            source_id: TypedUid::new("hackernewsposts", ["new"]),
        })
    }

    fn emitter() -> (Emitter, mpsc::Receiver<Activity>, mpsc::Receiver<SourceFault>) {
        let (atx, arx) = mpsc::channel(64);
        let (ftx, frx) = mpsc::channel(8);
        let uid = TypedUid::new("hackernewsposts", ["new"]);
        (Emitter::new(uid, atx, ftx, CancellationToken::new()), arx, frx)
    }

    fn drain(rx: &mut mpsc::Receiver<Activity>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(a) = rx.try_recv() {
            out.push(a.title());
        }
        out
    }

    #[test]
    fn timestamp_cursor_is_strict() {
        let boundary = post(1, 30);
        let cursor = TimestampCursor::from_since(Some(&boundary));
        assert!(!cursor.is_new(boundary.created_at()));
        assert!(cursor.is_new(post(2, 31).created_at()));
        assert!(!cursor.is_new(post(3, 29).created_at()));
        assert!(TimestampCursor::default().is_new(boundary.created_at()));
    }

    #[test]
    fn id_cursor_ignores_empty_ids() {
        let since = post(9, 0);
        assert_eq!(IdCursor::from_since(Some(&since), |_| Some("9".into())).id(), Some("9"));
        assert!(IdCursor::from_since(Some(&since), |_| Some(String::new())).is_cold());
        assert!(IdCursor::from_since(None, |_| Some("9".into())).is_cold());
    }

    #[test]
    fn newer_id_orders_numeric_strings() {
        assert_eq!(newer_id("99", "100"), "100");
        assert_eq!(newer_id("110", "109"), "110");
    }

    #[tokio::test]
    async fn stops_at_first_seen_item_across_pages() {
        let (out, mut rx, _faults) = emitter();
        let cursor = TimestampCursor::at(post(0, 10).created_at());
        // Newest first: page 1 = minutes 40,30; page 2 = 20,10,5.
        let pages = vec![vec![post(5, 40), post(4, 30)], vec![post(3, 20), post(2, 10), post(1, 5)]];

        let emitted = drain_pages(
            &out,
            0usize,
            10,
            |i| {
                let items = pages.get(i).cloned().unwrap_or_default();
                async move { Ok(Page { items, next: Some(i + 1) }) }
            },
            |a: Activity| {
                if cursor.is_new(a.created_at()) {
                    Step::Emit(a)
                } else {
                    Step::Stop
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(emitted, 3);
        assert_eq!(drain(&mut rx), ["story 5", "story 4", "story 3"]);
    }

    #[tokio::test]
    async fn empty_page_terminates_and_max_pages_bounds() {
        let (out, mut rx, _faults) = emitter();
        let calls = std::cell::Cell::new(0);
        let emitted = drain_pages(
            &out,
            0u32,
            2,
            |i| {
                calls.set(calls.get() + 1);
                async move { Ok(Page { items: vec![post(u64::from(i), i)], next: Some(i + 1) }) }
            },
            Step::Emit,
        )
        .await
        .unwrap();
        assert_eq!(emitted, 2);
        assert_eq!(calls.get(), 2);
        assert_eq!(drain(&mut rx).len(), 2);

        let emitted = drain_pages(
            &out,
            (),
            10,
            |_| async { Ok(Page::<Activity, ()> { items: vec![], next: Some(()) }) },
            Step::Emit,
        )
        .await
        .unwrap();
        assert_eq!(emitted, 0);
    }

    #[tokio::test]
    async fn fetch_error_aborts_after_partial_emission() {
        let (out, mut rx, _faults) = emitter();
        let res = drain_pages(
            &out,
            0u32,
            10,
            |i| async move {
                if i == 0 {
                    Ok(Page { items: vec![post(1, 1)], next: Some(1) })
                } else {
                    Err(anyhow::anyhow!("page {i} failed"))
                }
            },
            Step::Emit,
        )
        .await;
        assert_eq!(res.unwrap_err().to_string(), "page 1 failed");
        assert_eq!(drain(&mut rx), ["story 1"]);
    }
}
