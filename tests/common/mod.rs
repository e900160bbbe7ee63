// tests/common/mod.rs
//
// In-process upstream fakes: axum servers on 127.0.0.1:0 that stand in for
// provider APIs and the model endpoint.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use parking_lot::Mutex;

/// Serve `router` on an ephemeral port; returns `http://127.0.0.1:<port>`.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("mock server");
    });
    format!("http://{addr}")
}

/// A canned upstream reply.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: String,
}

impl Reply {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type", "application/json".into())],
            body: body.to_string(),
        }
    }

    pub fn xml(body: &str) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type", "application/rss+xml".into())],
            body: body.into(),
        }
    }

    pub fn html(body: &str) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type", "text/html; charset=utf-8".into())],
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(&value).expect("header value"),
            );
        }
        let status = StatusCode::from_u16(self.status).expect("status");
        (status, headers, self.body).into_response()
    }
}

/// Request log of a scripted server: path and query of every hit.
#[derive(Clone, Default)]
pub struct Hits {
    seen: Arc<Mutex<Vec<String>>>,
    count: Arc<AtomicUsize>,
}

impl Hits {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn uris(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    fn record(&self, uri: &Uri) -> usize {
        self.seen.lock().push(uri.to_string());
        self.count.fetch_add(1, Ordering::SeqCst)
    }
}

/// Answer every request with the next reply of `script`; the last one repeats.
pub async fn scripted(script: Vec<Reply>) -> (String, Hits) {
    assert!(!script.is_empty(), "script needs at least one reply");
    let hits = Hits::default();
    let script = Arc::new(script);
    let log = hits.clone();
    let router = Router::new().fallback(move |uri: Uri| {
        let script = script.clone();
        let log = log.clone();
        async move {
            let n = log.record(&uri);
            script[n.min(script.len() - 1)].clone()
        }
    });
    (serve(router).await, hits)
}

/// Answer by path: the first `(prefix, reply)` whose prefix matches the request
/// path wins; anything else is a 404.
pub async fn routed(routes: Vec<(&'static str, Reply)>) -> (String, Hits) {
    let hits = Hits::default();
    let routes = Arc::new(routes);
    let log = hits.clone();
    let router = Router::new().fallback(move |uri: Uri| {
        let routes = routes.clone();
        let log = log.clone();
        async move {
            log.record(&uri);
            routes
                .iter()
                .find(|(prefix, _)| uri.path().starts_with(prefix))
                .map(|(_, reply)| reply.clone())
                .unwrap_or_else(|| Reply::status(404))
        }
    });
    (serve(router).await, hits)
}
