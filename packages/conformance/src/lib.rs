//! Shared helpers for the Graphable JSON conformance test suite.
//!
//! Provides [`spawn_fixture`], a function that binds a `TcpListener` on an
//! ephemeral port and serves a fixed set of JSON documents over real HTTP,
//! recording every request path so tests can assert exactly what the
//! resolver fetched and when.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use graphablejson::{HttpFetcher, Resolver, ResolverConfig, COLLECTION_PROFILE};
use serde_json::{json, Value};

/// The documents a fixture server answers with, keyed by path and query
/// (e.g. `/orders?page=2`).
#[derive(Debug, Default)]
pub struct Fixture {
    documents: HashMap<String, Value>,
    raw: HashMap<String, String>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `document` as JSON at `path`.
    pub fn document(mut self, path: impl Into<String>, document: Value) -> Self {
        self.documents.insert(path.into(), document);
        self
    }

    /// Serve `body` verbatim (labelled `application/json`) at `path`.
    pub fn raw(mut self, path: impl Into<String>, body: impl Into<String>) -> Self {
        self.raw.insert(path.into(), body.into());
        self
    }
}

/// Build a collection page with literal items and optional relative
/// pagination links.
pub fn page(items: Value, next: Option<&str>, prev: Option<&str>) -> Value {
    let mut p = json!({ "profile": COLLECTION_PROFILE, "item": items });
    if let Some(next) = next {
        p["next_url"] = json!(next);
    }
    if let Some(prev) = prev {
        p["prev_url"] = json!(prev);
    }
    p
}

#[derive(Clone)]
struct FixtureState {
    documents: Arc<HashMap<String, Value>>,
    raw: Arc<HashMap<String, String>>,
    hits: Arc<Mutex<Vec<String>>>,
}

/// A running fixture server.
pub struct FixtureServer {
    /// e.g. `http://127.0.0.1:51234`
    pub base_url: String,
    hits: Arc<Mutex<Vec<String>>>,
}

impl FixtureServer {
    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request paths (with query) served so far, in arrival order.
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().expect("hits lock poisoned").clone()
    }

    /// A resolver backed by a real [`HttpFetcher`] with a short timeout.
    pub fn resolver(&self) -> Resolver {
        self.resolver_with(ResolverConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        })
    }

    pub fn resolver_with(&self, config: ResolverConfig) -> Resolver {
        let fetcher = HttpFetcher::from_config(&config).expect("build HTTP fetcher");
        Resolver::with_config(Arc::new(fetcher), config)
    }
}

/// Start an ephemeral fixture server serving `fixture`.
///
/// The server runs in a background `tokio` task bound to an OS-assigned port
/// on `127.0.0.1`. Unknown paths answer `404` with a JSON error body.
///
/// # Panics
///
/// Panics if the TCP listener cannot be bound.
pub async fn spawn_fixture(fixture: Fixture) -> FixtureServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("get local addr");

    let hits = Arc::new(Mutex::new(Vec::new()));
    let state = FixtureState {
        documents: Arc::new(fixture.documents),
        raw: Arc::new(fixture.raw),
        hits: Arc::clone(&hits),
    };
    let router = Router::new().fallback(serve).with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("fixture server error");
    });

    FixtureServer {
        base_url: format!("http://{addr}"),
        hits,
    }
}

async fn serve(State(state): State<FixtureState>, uri: Uri) -> Response {
    let key = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    state.hits.lock().expect("hits lock poisoned").push(key.clone());

    if let Some(document) = state.documents.get(&key) {
        return Json(document.clone()).into_response();
    }
    if let Some(body) = state.raw.get(&key) {
        return ([(header::CONTENT_TYPE, "application/json")], body.clone()).into_response();
    }
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("no document at {key}"), "code": "not_found" })),
    )
        .into_response()
}
