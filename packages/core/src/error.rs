//! Error types surfaced by the resolver and its fetchers.

use std::sync::Arc;

use thiserror::Error;

/// Errors a [`LinkFetcher`](crate::fetch::LinkFetcher) can return when
/// dereferencing a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The HTTP request failed or the body was not valid JSON.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-2xx status code.
    #[error("server returned status {0}")]
    BadStatus(u16),

    /// The link value could not be parsed as an absolute URL.
    #[error("invalid URL {0:?}: {1}")]
    InvalidUrl(String, url::ParseError),

    /// No document is known under this URL.
    #[error("no document at {0}")]
    NotFound(String),
}

/// Errors produced while resolving a relationship.
///
/// Only [`ResolveError::RelationshipNotFound`] is returned eagerly from
/// [`Resolver::resolve`](crate::Resolver::resolve). The other variants are
/// yielded as individual items of the resolved stream, so one broken link or
/// collection never hides the values around it.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A specific version was requested and neither the versioned key nor any
    /// of its link forms is present.
    #[error("relationship {name:?} has no property for version {version:?}")]
    RelationshipNotFound { name: String, version: String },

    /// Dereferencing a link failed. `index` is the position of the URL inside
    /// the link property (0 for a single URL). Repeated occurrences of one URL
    /// share the same fetch, and therefore the same `source`.
    #[error("link {url:?} at position {index} is unreachable: {source}")]
    LinkUnreachable {
        url: String,
        index: usize,
        #[source]
        source: Arc<FetchError>,
    },

    /// A node carries the collection profile but cannot be expanded.
    #[error("malformed collection: {0}")]
    MalformedCollection(String),

    /// A link property holds something other than a URL string.
    #[error("property {key:?} is not a valid link: {reason}")]
    InvalidLink { key: String, reason: String },
}
