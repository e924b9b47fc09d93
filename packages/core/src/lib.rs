//! Client-side relationship resolver for Graphable JSON.
//!
//! Graphable JSON treats every property of an API resource as a
//! relationship: a stream of zero or more values that may be embedded in the
//! document, linked by URL, wrapped in a paginated collection, or stored
//! under a versioned key. This crate turns a JSON document plus a way to
//! fetch URLs into that stream, so callers never branch on how a value
//! happens to be represented.
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`keys`] | Link and version suffix conventions, [`CandidateKeys`], [`Version`] |
//! | [`shape`] | Normalization of raw values into [`Shape`] / [`Property`] |
//! | [`collection`] | Collection profile recognition and pagination links |
//! | [`fetch`] | [`LinkFetcher`] trait, [`HttpFetcher`], [`MemoryFetcher`] |
//! | [`resolver`] | [`Resolver`] and the lazy [`ResolvedStream`] |
//! | [`render`] | Plain-text rendering for terminals and logs |
//! | [`config`] | [`ResolverConfig`], populated from the environment |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use graphablejson::{HttpFetcher, Resolver, ResolverConfig};
//!
//! let config = ResolverConfig::from_env();
//! let fetcher = Arc::new(HttpFetcher::from_config(&config)?);
//! let resolver = Resolver::with_config(fetcher, config);
//!
//! let customer = serde_json::json!({
//!     "email": ["a@x.com", "b@x.com"],
//!     "order_url": "https://api.example.com/customers/7/orders"
//! });
//!
//! // Literal, linked and paginated values all come out the same way.
//! let mut orders = resolver.resolve(&customer, "order", None)?;
//! while let Some(order) = orders.next().await {
//!     println!("{}", order?);
//! }
//! ```

pub mod collection;
pub mod config;
pub mod error;
pub mod fetch;
pub mod keys;
pub mod render;
pub mod resolver;
pub mod shape;

pub use collection::{is_collection, Collection, Direction, COLLECTION_PROFILE};
pub use config::ResolverConfig;
pub use error::{FetchError, ResolveError};
pub use fetch::{HttpFetcher, LinkFetcher, MemoryFetcher};
pub use keys::{relationships, CandidateKeys, Form, KeyError, PropertyKey, RelationshipInfo, Version};
pub use resolver::{ResolveOptions, ResolvedStream, Resolver};
pub use shape::{Property, Shape};
pub use url::Url;
