//! Resolver configuration, populated from environment variables.

use std::time::Duration;

/// Default number of sibling link fetches kept in flight.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Default HTTP fetch timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Runtime configuration for a [`Resolver`](crate::Resolver) and its
/// [`HttpFetcher`](crate::fetch::HttpFetcher).
///
/// | Variable | Default | Description |
/// |----------|---------|-------------|
/// | `GRAPHABLE_MAX_CONCURRENCY` | `8` | Sibling link fetches in flight |
/// | `GRAPHABLE_MAX_PAGES` | (absent = unbounded) | Pages followed per collection |
/// | `GRAPHABLE_TIMEOUT_SECS` | `30` | HTTP request timeout |
/// | `GRAPHABLE_USER_AGENT` | `graphablejson/<crate version>` | HTTP `User-Agent` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Upper bound on concurrent fetches for one array of links. Values below
    /// one are treated as one.
    pub max_concurrent_fetches: usize,

    /// Stop following `next`/`prev` after this many pages of one collection.
    /// `None` follows pagination until it ends.
    pub max_pages: Option<usize>,

    /// Timeout applied to each HTTP request.
    pub timeout: Duration,

    /// `User-Agent` sent with each HTTP request.
    pub user_agent: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENCY,
            max_pages: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: default_user_agent(),
        }
    }
}

impl ResolverConfig {
    /// Populate config from environment variables, applying defaults where
    /// absent. Unparsable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_concurrent_fetches = env_parse::<usize>("GRAPHABLE_MAX_CONCURRENCY")
            .unwrap_or(defaults.max_concurrent_fetches);

        let max_pages = env_parse::<usize>("GRAPHABLE_MAX_PAGES");

        let timeout = env_parse::<u64>("GRAPHABLE_TIMEOUT_SECS")
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        Self {
            max_concurrent_fetches,
            max_pages,
            timeout,
            user_agent: std::env::var("GRAPHABLE_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.max_concurrent_fetches.max(1)
    }
}

fn default_user_agent() -> String {
    format!("graphablejson/{}", env!("CARGO_PKG_VERSION"))
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    let raw = std::env::var(var).ok()?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("config: ignoring unparsable {var}={raw:?}");
            None
        }
    }
}
