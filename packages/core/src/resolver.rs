//! Relationship resolution: turn `(node, name, version)` into a lazy stream of
//! values, following links and collection pagination on demand.
//!
//! # Design
//!
//! Each resolved stream owns a [`Traversal`]: a work queue of nodes still to
//! be expanded, link batches still being fetched, and pages whose neighbour
//! has not been requested yet. Pulling the stream pops work from the front
//! until a value (or a per-element error) is ready, so no fetch happens before
//! a consumer asks for a value that needs it. In particular, the next page of
//! a collection is only requested once every item of the current page has
//! been yielded.
//!
//! Sibling URLs in one link array are fetched concurrently (bounded by
//! [`ResolverConfig::max_concurrent_fetches`]) and reassembled in declaration
//! order. Repeated URLs in one array share a single fetch, and later
//! occurrences anywhere in the stream are served from a per-stream memo.
//! Dropping the stream drops any fetch still in flight.
//!
//! Every collection reached as a value starts its own pagination chain
//! with its own cycle guard and page budget, so the same collection appearing
//! twice yields its full content twice.

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;

use futures::future::{self, BoxFuture, Shared};
use futures::stream::{self, BoxStream, Stream};
use futures::{FutureExt, StreamExt, TryStreamExt};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::collection::{Collection, Direction};
use crate::config::ResolverConfig;
use crate::error::{FetchError, ResolveError};
use crate::fetch::LinkFetcher;
use crate::keys::{CandidateKeys, Version};
use crate::shape::{lookup, Property};

/// A lazy, finite sequence of resolved values in source order.
///
/// Failures that concern a single element ([`ResolveError::LinkUnreachable`],
/// [`ResolveError::MalformedCollection`], [`ResolveError::InvalidLink`]) are
/// yielded in that element's position; the stream keeps going afterwards.
pub type ResolvedStream = Pin<Box<dyn Stream<Item = Result<Value, ResolveError>> + Send>>;

/// Optional parameters for [`Resolver::resolve_with`].
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Select the `name__<version>` slot. `None` selects the unsuffixed slot.
    pub version: Option<Version>,

    /// Pagination relationship to follow after each page's items.
    pub direction: Direction,

    /// URL the input node was loaded from; relative links are joined
    /// against it. `None` passes link values to the fetcher verbatim.
    pub base: Option<Url>,
}

/// Resolves relationships against JSON documents.
///
/// Cheap to clone; every clone shares the same fetcher.
#[derive(Clone)]
pub struct Resolver {
    fetcher: Arc<dyn LinkFetcher>,
    config: ResolverConfig,
}

impl Resolver {
    /// A resolver with [`ResolverConfig::default`].
    pub fn new(fetcher: Arc<dyn LinkFetcher>) -> Self {
        Self::with_config(fetcher, ResolverConfig::default())
    }

    pub fn with_config(fetcher: Arc<dyn LinkFetcher>, config: ResolverConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `name` on `node`, following pagination forward.
    ///
    /// An unversioned request for a missing relationship yields an empty
    /// stream. A versioned request fails with
    /// [`ResolveError::RelationshipNotFound`] when neither `name__<version>`
    /// nor its link forms exist; it never falls back to the unsuffixed key.
    pub fn resolve(
        &self,
        node: &Value,
        name: &str,
        version: Option<&Version>,
    ) -> Result<ResolvedStream, ResolveError> {
        let options = ResolveOptions {
            version: version.cloned(),
            ..Default::default()
        };
        self.resolve_with(node, name, &options)
    }

    /// [`resolve`](Self::resolve) with explicit [`ResolveOptions`].
    pub fn resolve_with(
        &self,
        node: &Value,
        name: &str,
        options: &ResolveOptions,
    ) -> Result<ResolvedStream, ResolveError> {
        let keys = CandidateKeys::new(name, options.version.as_ref());
        let property = lookup(node, &keys);

        if let (Property::Absent, Some(version)) = (&property, &options.version) {
            return Err(ResolveError::RelationshipNotFound {
                name: name.to_string(),
                version: version.to_string(),
            });
        }

        debug!(
            "resolve: {:?} (version {:?}, {:?})",
            name,
            options.version.as_ref().map(Version::as_str),
            options.direction
        );

        let mut traversal = Traversal::new(
            Arc::clone(&self.fetcher),
            self.config.clone(),
            options.direction,
        );
        let work = traversal.schedule(property, options.base.clone(), Expect::Value);
        traversal.push_front_all(work);

        Ok(Box::pin(stream::unfold(traversal, |mut t| async move {
            t.next_item().await.map(|item| (item, t))
        })))
    }

    /// Fetch the document at `url`, then resolve `name` on it with `url` as
    /// the base for relative links.
    pub async fn resolve_url(
        &self,
        url: &str,
        name: &str,
        options: &ResolveOptions,
    ) -> Result<ResolvedStream, ResolveError> {
        let root = self
            .fetcher
            .fetch(url)
            .await
            .map_err(|source| ResolveError::LinkUnreachable {
                url: url.to_string(),
                index: 0,
                source: Arc::new(source),
            })?;

        let options = ResolveOptions {
            base: Url::parse(url).ok().or_else(|| options.base.clone()),
            ..options.clone()
        };
        self.resolve_with(&root, name, &options)
    }

    /// The first resolved value, fetching only what it needs.
    pub async fn first(
        &self,
        node: &Value,
        name: &str,
        version: Option<&Version>,
    ) -> Result<Option<Value>, ResolveError> {
        let mut stream = self.resolve(node, name, version)?;
        stream.next().await.transpose()
    }

    /// Every resolved value, failing on the first per-element error.
    pub async fn all(
        &self,
        node: &Value,
        name: &str,
        version: Option<&Version>,
    ) -> Result<Vec<Value>, ResolveError> {
        self.resolve(node, name, version)?.try_collect().await
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// Pagination state of one collection reached as a value.
#[derive(Debug, Clone, Default)]
struct Chain {
    /// Page URLs of this chain; never followed twice.
    visited: HashSet<String>,
    pages_followed: usize,
}

impl Chain {
    fn starting_at(url: Option<String>) -> Self {
        Self {
            visited: url.into_iter().collect(),
            pages_followed: 0,
        }
    }
}

/// What a node popped from the queue is expected to be.
#[derive(Debug, Clone)]
enum Expect {
    /// Any value; collections are expanded in place.
    Value,
    /// A neighbouring page of `Chain`; anything but a collection is an error.
    Page(Chain),
}

type Fetched = Result<(String, Value), ResolveError>;

/// One fetch shared by every occurrence of a URL within a link array.
type SharedFetch = Shared<BoxFuture<'static, Result<Value, Arc<FetchError>>>>;

enum Work {
    /// A value that still needs collection expansion. `url` is where it was
    /// fetched from, if anywhere.
    Node {
        value: Value,
        base: Option<Url>,
        url: Option<String>,
        expect: Expect,
    },
    /// Fetches for one link property, yielding in declaration order.
    Links {
        pending: BoxStream<'static, Fetched>,
        expect: Expect,
    },
    /// A page whose items are exhausted; follow its pagination link next.
    Turn {
        page: Value,
        base: Option<Url>,
        chain: Chain,
    },
}

struct Traversal {
    fetcher: Arc<dyn LinkFetcher>,
    config: ResolverConfig,
    direction: Direction,
    queue: VecDeque<Work>,
    /// Documents fetched by this stream, keyed by absolute URL.
    memo: HashMap<String, Value>,
}

impl Traversal {
    fn new(fetcher: Arc<dyn LinkFetcher>, config: ResolverConfig, direction: Direction) -> Self {
        Self {
            fetcher,
            config,
            direction,
            queue: VecDeque::new(),
            memo: HashMap::new(),
        }
    }

    /// Run queued work until one item is ready. `None` ends the stream.
    async fn next_item(&mut self) -> Option<Result<Value, ResolveError>> {
        while let Some(work) = self.queue.pop_front() {
            match work {
                Work::Node {
                    value,
                    base,
                    url,
                    expect,
                } => {
                    if let Some(item) = self.expand(value, base, url, expect) {
                        return Some(item);
                    }
                }
                Work::Links {
                    mut pending,
                    expect,
                } => {
                    let Some(fetched) = pending.next().await else {
                        continue;
                    };
                    self.queue.push_front(Work::Links {
                        pending,
                        expect: expect.clone(),
                    });
                    match fetched {
                        Ok((url, document)) => {
                            self.memo.insert(url.clone(), document.clone());
                            self.queue.push_front(Work::Node {
                                value: document,
                                base: Url::parse(&url).ok(),
                                url: Some(url),
                                expect,
                            });
                        }
                        Err(e) => return Some(Err(e)),
                    }
                }
                Work::Turn { page, base, chain } => self.turn_page(&page, base, chain),
            }
        }
        None
    }

    /// Yield `value`, or replace it with its items when it is a collection.
    fn expand(
        &mut self,
        value: Value,
        base: Option<Url>,
        url: Option<String>,
        expect: Expect,
    ) -> Option<Result<Value, ResolveError>> {
        let Some(collection) = Collection::new(&value) else {
            return Some(match expect {
                Expect::Value => Ok(value),
                Expect::Page(_) => Err(ResolveError::MalformedCollection(format!(
                    "page reached through `{}` is not a collection",
                    self.direction.relationship()
                ))),
            });
        };

        let items = collection.items();
        if items == Property::Absent {
            return Some(Err(ResolveError::MalformedCollection(
                "collection has no `item` relationship".into(),
            )));
        }

        let chain = match expect {
            Expect::Value => Chain::starting_at(url),
            Expect::Page(chain) => chain,
        };
        let mut work = self.schedule(items, base.clone(), Expect::Value);
        work.push(Work::Turn {
            page: value,
            base,
            chain,
        });
        self.push_front_all(work);
        None
    }

    /// Queue the neighbouring page of an exhausted collection page.
    fn turn_page(&mut self, page: &Value, base: Option<Url>, mut chain: Chain) {
        let Some(collection) = Collection::new(page) else {
            return;
        };
        let link = collection.page_link(self.direction);
        if link.is_empty() {
            return;
        }

        if let Some(max) = self.config.max_pages {
            if chain.pages_followed >= max {
                warn!("pagination: stopping after {max} pages (max_pages)");
                return;
            }
        }
        chain.pages_followed += 1;
        debug!(
            "pagination: following `{}` (page {})",
            self.direction.relationship(),
            chain.pages_followed + 1
        );

        let work = self.schedule(link, base, Expect::Page(chain));
        self.push_front_all(work);
    }

    /// Turn a looked-up property into queued work, in source order.
    fn schedule(&self, property: Property, base: Option<Url>, expect: Expect) -> Vec<Work> {
        match property {
            Property::Absent => vec![],
            Property::Literal(shape) => shape
                .into_values()
                .into_iter()
                .map(|value| Work::Node {
                    value,
                    base: base.clone(),
                    url: None,
                    expect: expect.clone(),
                })
                .collect(),
            Property::Link { key, shape } => {
                let mut expect = expect;
                let mut batch = HashMap::new();
                let mut fetches: Vec<BoxFuture<'static, Fetched>> = Vec::new();
                for (index, raw) in shape.into_values().into_iter().enumerate() {
                    if let Some(fetch) =
                        self.link(&key, index, raw, base.as_ref(), &mut expect, &mut batch)
                    {
                        fetches.push(fetch);
                    }
                }
                if fetches.is_empty() {
                    return vec![];
                }
                let pending = stream::iter(fetches)
                    .buffered(self.config.concurrency())
                    .boxed();
                vec![Work::Links { pending, expect }]
            }
        }
    }

    /// Build the (not yet started) fetch for one link value.
    fn link(
        &self,
        key: &str,
        index: usize,
        raw: Value,
        base: Option<&Url>,
        expect: &mut Expect,
        batch: &mut HashMap<String, SharedFetch>,
    ) -> Option<BoxFuture<'static, Fetched>> {
        let raw = match raw {
            Value::String(s) => s,
            other => {
                let err = ResolveError::InvalidLink {
                    key: key.to_string(),
                    reason: format!("element {index} is {}, expected a URL string", kind(&other)),
                };
                return Some(future::ready(Err(err)).boxed());
            }
        };
        let url = absolutize(&raw, base);

        if let Expect::Page(chain) = expect {
            if !chain.visited.insert(url.clone()) {
                warn!("pagination: {url} was already visited; stopping");
                return None;
            }
        }

        if let Some(document) = self.memo.get(&url) {
            debug!("fetch: {url} already fetched by this stream");
            return Some(future::ready(Ok((url, document.clone()))).boxed());
        }

        let fetch = batch
            .entry(url.clone())
            .or_insert_with(|| {
                let fetcher = Arc::clone(&self.fetcher);
                let url = url.clone();
                async move { fetcher.fetch(&url).await.map_err(Arc::new) }
                    .boxed()
                    .shared()
            })
            .clone();
        Some(
            async move {
                match fetch.await {
                    Ok(document) => Ok((url, document)),
                    Err(source) => Err(ResolveError::LinkUnreachable { url, index, source }),
                }
            }
            .boxed(),
        )
    }

    fn push_front_all(&mut self, work: Vec<Work>) {
        for w in work.into_iter().rev() {
            self.queue.push_front(w);
        }
    }
}

// --- helpers -----------------------------------------------------------------

fn absolutize(raw: &str, base: Option<&Url>) -> String {
    match base {
        Some(base) => base
            .join(raw)
            .map(String::from)
            .unwrap_or_else(|_| raw.to_string()),
        None => raw.to_string(),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// --- tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::COLLECTION_PROFILE;
    use crate::error::FetchError;
    use crate::fetch::MemoryFetcher;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn resolver(fetcher: &Arc<MemoryFetcher>) -> Resolver {
        resolver_over(fetcher)
    }

    fn resolver_over<F: LinkFetcher>(fetcher: &Arc<F>) -> Resolver {
        Resolver::new(Arc::clone(fetcher) as Arc<dyn LinkFetcher>)
    }

    fn empty() -> Arc<MemoryFetcher> {
        Arc::new(MemoryFetcher::new())
    }

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    async fn values(r: &Resolver, node: &Value, name: &str) -> Vec<Value> {
        r.all(node, name, None).await.unwrap()
    }

    /// Answers each URL after its own delay and records how many fetches
    /// were in flight at once.
    struct SlowFetcher {
        inner: MemoryFetcher,
        delays: HashMap<String, u64>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl LinkFetcher for SlowFetcher {
        async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = self.delays.get(url).copied().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.inner.fetch(url).await
        }
    }

    const HANG: &str = "https://api.test/hang";

    /// Never answers [`HANG`]; flags when that fetch starts and when its
    /// future is dropped.
    struct HangingFetcher {
        inner: MemoryFetcher,
        started: AtomicBool,
        dropped: Arc<AtomicBool>,
    }

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl LinkFetcher for HangingFetcher {
        async fn fetch(&self, url: &str) -> Result<Value, FetchError> {
            if url != HANG {
                return self.inner.fetch(url).await;
            }
            self.started.store(true, Ordering::SeqCst);
            let _guard = SetOnDrop(Arc::clone(&self.dropped));
            future::pending::<()>().await;
            Err(FetchError::NotFound(url.to_string()))
        }
    }

    fn page(items: Value, next: Option<&str>) -> Value {
        let mut p = json!({"profile": COLLECTION_PROFILE, "item": items});
        if let Some(next) = next {
            p["next_url"] = json!(next);
        }
        p
    }

    // -----------------------------------------------------------------------
    // Literal values
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn absent_and_null_yield_nothing() {
        let r = resolver(&empty());
        assert!(values(&r, &json!({}), "email").await.is_empty());
        assert!(values(&r, &json!({"email": null}), "email").await.is_empty());
    }

    #[tokio::test]
    async fn scalars_and_objects_yield_one_value() {
        let r = resolver(&empty());
        for s in [json!("a@x.com"), json!(42), json!(false), json!({"street": "Main"})] {
            let node = json!({ "k": s.clone() });
            assert_eq!(values(&r, &node, "k").await, vec![s]);
        }
    }

    #[tokio::test]
    async fn arrays_yield_elements_in_order() {
        let r = resolver(&empty());
        let node = json!({"email": ["a@x.com", "b@x.com"]});
        assert_eq!(values(&r, &node, "email").await, vec![json!("a@x.com"), json!("b@x.com")]);

        let node = json!({"mixed": [3, null, [1, 2], {"a": 1}]});
        assert_eq!(
            values(&r, &node, "mixed").await,
            vec![json!(3), Value::Null, json!([1, 2]), json!({"a": 1})]
        );
    }

    #[tokio::test]
    async fn resolving_twice_is_idempotent() {
        let fetcher = Arc::new(MemoryFetcher::new().with("https://api.test/a", json!("A")));
        let r = resolver(&fetcher);
        let node = json!({"x_url": ["https://api.test/a"], "y": 1});
        let first = values(&r, &node, "x").await;
        let second = values(&r, &node, "x").await;
        assert_eq!(first, second);
        assert_eq!(first, vec![json!("A")]);
    }

    // -----------------------------------------------------------------------
    // Links
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn link_is_transparent() {
        let address = json!({"street": "Main"});
        let fetcher = Arc::new(MemoryFetcher::new().with("https://api.test/address", address.clone()));
        let r = resolver(&fetcher);

        let literal = json!({"address": address.clone()});
        let snake = json!({"address_url": "https://api.test/address"});
        let camel = json!({"addressUrl": "https://api.test/address"});

        assert_eq!(values(&r, &literal, "address").await, vec![address.clone()]);
        assert_eq!(values(&r, &snake, "address").await, vec![address.clone()]);
        assert_eq!(values(&r, &camel, "address").await, vec![address]);
    }

    #[tokio::test]
    async fn link_arrays_keep_declaration_order() {
        let mut fetcher = MemoryFetcher::new();
        for i in 0..5 {
            fetcher.insert(format!("https://api.test/o/{i}"), json!({ "n": i }));
        }
        let fetcher = Arc::new(fetcher);
        let r = Resolver::with_config(
            Arc::clone(&fetcher) as Arc<dyn LinkFetcher>,
            ResolverConfig {
                max_concurrent_fetches: 3,
                ..Default::default()
            },
        );

        let node = json!({"order_url": [
            "https://api.test/o/4", "https://api.test/o/0", "https://api.test/o/3",
            "https://api.test/o/1", "https://api.test/o/2"
        ]});
        let got: Vec<i64> = values(&r, &node, "order")
            .await
            .iter()
            .map(|v| v["n"].as_i64().unwrap())
            .collect();
        assert_eq!(got, vec![4, 0, 3, 1, 2]);
    }

    #[tokio::test]
    async fn out_of_order_completions_keep_declaration_order() {
        let mut inner = MemoryFetcher::new();
        let mut delays = HashMap::new();
        for i in 0..4u64 {
            let url = format!("https://api.test/o/{i}");
            inner.insert(url.clone(), json!({ "n": i }));
            // o/0 finishes last, o/3 first
            delays.insert(url, 40 - i * 10);
        }
        let fetcher = Arc::new(SlowFetcher {
            inner,
            delays,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let r = Resolver::with_config(
            Arc::clone(&fetcher) as Arc<dyn LinkFetcher>,
            ResolverConfig {
                max_concurrent_fetches: 4,
                ..Default::default()
            },
        );

        let node = json!({"order_url": [
            "https://api.test/o/0", "https://api.test/o/1",
            "https://api.test/o/2", "https://api.test/o/3"
        ]});
        let got: Vec<i64> = values(&r, &node, "order")
            .await
            .iter()
            .map(|v| v["n"].as_i64().unwrap())
            .collect();
        assert_eq!(got, vec![0, 1, 2, 3]);
        assert!(fetcher.peak.load(Ordering::SeqCst) > 1, "fetches never overlapped");
        assert_eq!(fetcher.inner.fetch_count(), 4);
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_pending_fetches() {
        let fetcher = Arc::new(HangingFetcher {
            inner: MemoryFetcher::new().with("https://api.test/a", json!("A")),
            started: AtomicBool::new(false),
            dropped: Arc::new(AtomicBool::new(false)),
        });
        let r = resolver_over(&fetcher);
        let node = json!({"x_url": ["https://api.test/a", HANG]});

        let mut stream = r.resolve(&node, "x", None).unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), json!("A"));

        let waiting = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(waiting.is_err(), "second element should still be pending");
        assert!(fetcher.started.load(Ordering::SeqCst));
        assert!(!fetcher.dropped.load(Ordering::SeqCst));

        drop(stream);
        assert!(fetcher.dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn repeated_sibling_links_share_one_fetch() {
        let fetcher = Arc::new(MemoryFetcher::new().with("https://api.test/a", json!("A")));
        let r = resolver(&fetcher);

        let node = json!({"x_url": ["https://api.test/a", "https://api.test/a"]});
        assert_eq!(values(&r, &node, "x").await, vec![json!("A"), json!("A")]);
        assert_eq!(fetcher.fetch_count(), 1);

        let node = json!({"x_url": ["https://api.test/gone", "https://api.test/gone"]});
        let items: Vec<_> = r.resolve(&node, "x", None).unwrap().collect().await;
        assert!(matches!(&items[0], Err(ResolveError::LinkUnreachable { index: 0, .. })));
        assert!(matches!(&items[1], Err(ResolveError::LinkUnreachable { index: 1, .. })));
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn unreachable_link_fails_only_its_element() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with("https://api.test/a", json!("A"))
                .with("https://api.test/c", json!("C")),
        );
        let r = resolver(&fetcher);
        let node = json!({"x_url": ["https://api.test/a", "https://api.test/b", "https://api.test/c"]});

        let items: Vec<_> = r.resolve(&node, "x", None).unwrap().collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &json!("A"));
        assert!(matches!(
            &items[1],
            Err(ResolveError::LinkUnreachable { url, index: 1, source })
                if url == "https://api.test/b" && matches!(**source, FetchError::NotFound(_))
        ));
        assert_eq!(items[2].as_ref().unwrap(), &json!("C"));
    }

    #[tokio::test]
    async fn non_string_link_is_invalid() {
        let fetcher = Arc::new(MemoryFetcher::new().with("https://api.test/a", json!("A")));
        let r = resolver(&fetcher);
        let node = json!({"x_url": [7, "https://api.test/a"]});

        let items: Vec<_> = r.resolve(&node, "x", None).unwrap().collect().await;
        assert!(matches!(&items[0], Err(ResolveError::InvalidLink { key, .. }) if key == "x_url"));
        assert_eq!(items[1].as_ref().unwrap(), &json!("A"));
    }

    #[tokio::test]
    async fn relative_links_join_against_base() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with("https://api.test/customers/1", json!({"address_url": "address"}))
                .with("https://api.test/customers/address", json!({"street": "Main"})),
        );
        let r = resolver(&fetcher);

        let mut stream = r
            .resolve_url("https://api.test/customers/1", "address", &ResolveOptions::default())
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), json!({"street": "Main"}));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn resolve_url_reports_unreachable_root() {
        let r = resolver(&empty());
        let err = r
            .resolve_url("https://api.test/nope", "x", &ResolveOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ResolveError::LinkUnreachable { index: 0, .. }));
    }

    // -----------------------------------------------------------------------
    // Collections
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn collection_is_transparent() {
        let items = json!([{"id": 1}, {"id": 2}]);
        let fetcher = Arc::new(
            MemoryFetcher::new().with("https://api.test/orders", page(items.clone(), None)),
        );
        let r = resolver(&fetcher);

        let plain = values(&r, &json!({"order": items.clone()}), "order").await;
        let wrapped = values(&r, &json!({"order": page(items.clone(), None)}), "order").await;
        let linked = values(&r, &json!({"order_url": "https://api.test/orders"}), "order").await;

        assert_eq!(plain, wrapped);
        assert_eq!(plain, linked);
        assert_eq!(plain.len(), 2);
    }

    #[tokio::test]
    async fn collection_items_may_be_links() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with("https://api.test/o/1", json!({"id": 1}))
                .with("https://api.test/o/2", json!({"id": 2})),
        );
        let r = resolver(&fetcher);
        let node = json!({"order": {
            "profile_url": COLLECTION_PROFILE,
            "item_url": ["https://api.test/o/1", "https://api.test/o/2"]
        }});
        assert_eq!(values(&r, &node, "order").await, vec![json!({"id": 1}), json!({"id": 2})]);
        // the profile link is compared, never fetched
        assert_eq!(fetcher.fetched(), vec!["https://api.test/o/1", "https://api.test/o/2"]);
    }

    #[tokio::test]
    async fn collections_nested_in_arrays_are_expanded() {
        let r = resolver(&empty());
        let node = json!({"tag": ["a", page(json!(["b", "c"]), None), "d"]});
        assert_eq!(
            values(&r, &node, "tag").await,
            vec![json!("a"), json!("b"), json!("c"), json!("d")]
        );
    }

    #[tokio::test]
    async fn collection_without_item_is_malformed() {
        let r = resolver(&empty());
        let node = json!({"x": ["before", {"profile": COLLECTION_PROFILE}, "after"]});
        let items: Vec<_> = r.resolve(&node, "x", None).unwrap().collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &json!("before"));
        assert!(matches!(items[1], Err(ResolveError::MalformedCollection(_))));
        assert_eq!(items[2].as_ref().unwrap(), &json!("after"));
    }

    #[tokio::test]
    async fn empty_item_is_an_empty_page() {
        let r = resolver(&empty());
        let node = json!({"x": {"profile": COLLECTION_PROFILE, "item": null}});
        assert!(values(&r, &node, "x").await.is_empty());
    }

    #[tokio::test]
    async fn shared_link_is_fetched_once_per_stream() {
        let fetcher = Arc::new(MemoryFetcher::new().with("https://api.test/shared", json!("S")));
        let r = resolver(&fetcher);
        let group = json!({"profile": COLLECTION_PROFILE, "item_url": "https://api.test/shared"});
        let node = json!({"group": [group.clone(), group]});

        assert_eq!(values(&r, &node, "group").await, vec![json!("S"), json!("S")]);
        assert_eq!(fetcher.fetch_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Pagination
    // -----------------------------------------------------------------------

    fn three_pages() -> Arc<MemoryFetcher> {
        Arc::new(
            MemoryFetcher::new()
                .with("https://api.test/p/1", page(json!([1, 2]), Some("https://api.test/p/2")))
                .with("https://api.test/p/2", page(json!([3, 4]), Some("https://api.test/p/3")))
                .with("https://api.test/p/3", page(json!([5, 6]), None)),
        )
    }

    #[tokio::test]
    async fn pages_are_flattened_in_order() {
        let fetcher = three_pages();
        let r = resolver(&fetcher);
        let node = json!({"n_url": "https://api.test/p/1"});
        assert_eq!(
            values(&r, &node, "n").await,
            (1..=6).map(|i| json!(i)).collect::<Vec<_>>()
        );
        assert_eq!(fetcher.fetch_count(), 3);
    }

    #[tokio::test]
    async fn next_page_is_not_fetched_before_it_is_needed() {
        let fetcher = three_pages();
        let r = resolver(&fetcher);
        let node = json!({"n_url": "https://api.test/p/1"});

        let taken: Vec<_> = r.resolve(&node, "n", None).unwrap().take(2).collect().await;
        assert_eq!(taken.len(), 2);
        assert_eq!(fetcher.fetched(), vec!["https://api.test/p/1"]);

        let third = r.resolve(&node, "n", None).unwrap().skip(2).next().await;
        assert_eq!(third.unwrap().unwrap(), json!(3));
        assert_eq!(fetcher.fetch_count(), 3);
    }

    #[tokio::test]
    async fn pagination_cycles_terminate() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with("https://api.test/p/1", page(json!([1]), Some("https://api.test/p/2")))
                .with("https://api.test/p/2", page(json!([2]), Some("https://api.test/p/1"))),
        );
        let r = resolver(&fetcher);
        let node = json!({"n_url": "https://api.test/p/1"});
        assert_eq!(values(&r, &node, "n").await, vec![json!(1), json!(2)]);
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn repeated_collections_paginate_independently() {
        let fetcher = three_pages();
        let r = resolver(&fetcher);
        let nums = |ns: &[i64]| ns.iter().map(|n| json!(n)).collect::<Vec<_>>();

        let linked = json!({"n_url": ["https://api.test/p/1", "https://api.test/p/1"]});
        assert_eq!(
            values(&r, &linked, "n").await,
            nums(&[1, 2, 3, 4, 5, 6, 1, 2, 3, 4, 5, 6])
        );
        assert_eq!(fetcher.fetch_count(), 3);

        let p1 = page(json!([1, 2]), Some("https://api.test/p/2"));
        let inline = json!({"n": [p1.clone(), p1]});
        assert_eq!(
            values(&r, &inline, "n").await,
            nums(&[1, 2, 3, 4, 5, 6, 1, 2, 3, 4, 5, 6])
        );

        let overlapping = json!({"n_url": ["https://api.test/p/2", "https://api.test/p/1"]});
        assert_eq!(
            values(&r, &overlapping, "n").await,
            nums(&[3, 4, 5, 6, 1, 2, 3, 4, 5, 6])
        );
    }

    #[tokio::test]
    async fn max_pages_applies_to_each_collection() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with("https://api.test/a/2", page(json!([2]), Some("https://api.test/a/3")))
                .with("https://api.test/a/3", page(json!([3]), None))
                .with("https://api.test/b/2", page(json!([20]), None)),
        );
        let r = Resolver::with_config(
            Arc::clone(&fetcher) as Arc<dyn LinkFetcher>,
            ResolverConfig {
                max_pages: Some(1),
                ..Default::default()
            },
        );
        let node = json!({"n": [
            page(json!([1]), Some("https://api.test/a/2")),
            page(json!([10]), Some("https://api.test/b/2"))
        ]});

        assert_eq!(
            values(&r, &node, "n").await,
            vec![json!(1), json!(2), json!(10), json!(20)]
        );
        assert!(!fetcher.fetched().contains(&"https://api.test/a/3".to_string()));
    }

    #[tokio::test]
    async fn max_pages_caps_pagination() {
        let fetcher = three_pages();
        let r = Resolver::with_config(
            Arc::clone(&fetcher) as Arc<dyn LinkFetcher>,
            ResolverConfig {
                max_pages: Some(1),
                ..Default::default()
            },
        );
        let node = json!({"n_url": "https://api.test/p/1"});
        assert_eq!(values(&r, &node, "n").await, vec![json!(1), json!(2), json!(3), json!(4)]);
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn next_must_be_a_collection() {
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with("https://api.test/p/1", page(json!([1]), Some("https://api.test/plain")))
                .with("https://api.test/plain", json!({"not": "a page"})),
        );
        let r = resolver(&fetcher);
        let items: Vec<_> = r
            .resolve(&json!({"n_url": "https://api.test/p/1"}), "n", None)
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(ResolveError::MalformedCollection(_))));
    }

    #[tokio::test]
    async fn backward_traversal_follows_prev() {
        let mut p2 = page(json!([3, 4]), Some("https://api.test/p/3"));
        p2["prev_url"] = json!("https://api.test/p/1");
        let fetcher = Arc::new(
            MemoryFetcher::new()
                .with("https://api.test/p/1", page(json!([1, 2]), None))
                .with("https://api.test/p/2", p2),
        );
        let r = resolver(&fetcher);
        let options = ResolveOptions {
            direction: Direction::Backward,
            ..Default::default()
        };
        let got: Vec<Value> = r
            .resolve_with(&json!({"n_url": "https://api.test/p/2"}), "n", &options)
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(got, vec![json!(3), json!(4), json!(1), json!(2)]);
        assert!(!fetcher.fetched().contains(&"https://api.test/p/3".to_string()));
    }

    // -----------------------------------------------------------------------
    // Versions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn versions_select_independent_slots() {
        let r = resolver(&empty());
        let node = json!({"addr": "X", "addr__v2": {"street": "Main"}});

        assert_eq!(r.all(&node, "addr", None).await.unwrap(), vec![json!("X")]);
        assert_eq!(
            r.all(&node, "addr", Some(&v("v2"))).await.unwrap(),
            vec![json!({"street": "Main"})]
        );
        assert!(matches!(
            r.resolve(&node, "addr", Some(&v("v3"))),
            Err(ResolveError::RelationshipNotFound { ref name, ref version })
                if name == "addr" && version == "v3"
        ));
    }

    #[tokio::test]
    async fn versioned_link_forms_are_probed() {
        let fetcher = Arc::new(MemoryFetcher::new().with("https://api.test/addr/v2", json!("V2")));
        let r = resolver(&fetcher);
        let node = json!({"addr": "X", "addr__v2Url": "https://api.test/addr/v2"});
        assert_eq!(r.all(&node, "addr", Some(&v("v2"))).await.unwrap(), vec![json!("V2")]);
    }

    #[tokio::test]
    async fn unversioned_request_never_uses_a_versioned_slot() {
        let r = resolver(&empty());
        let node = json!({"addr__v2": "only v2"});
        assert!(r.all(&node, "addr", None).await.unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Convenience
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn first_fetches_only_what_it_needs() {
        let fetcher = three_pages();
        let r = resolver(&fetcher);
        let node = json!({"n_url": "https://api.test/p/1"});
        assert_eq!(r.first(&node, "n", None).await.unwrap(), Some(json!(1)));
        assert_eq!(fetcher.fetch_count(), 1);
        assert_eq!(r.first(&json!({}), "n", None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn all_fails_fast() {
        let r = resolver(&empty());
        let node = json!({"x_url": "https://api.test/missing"});
        assert!(matches!(
            r.all(&node, "x", None).await,
            Err(ResolveError::LinkUnreachable { .. })
        ));
    }
}
