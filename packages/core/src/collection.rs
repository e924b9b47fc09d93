//! Structural recognition of collection resources.
//!
//! A collection is any object whose `profile` relationship carries
//! [`COLLECTION_PROFILE`], either as a literal value or as a link URL. Its
//! members live under `item`; `next` and `prev` point at neighbouring pages.
//! All three are ordinary relationships, so each may be literal, linked, or
//! an array of either.

use serde_json::Value;

use crate::keys::CandidateKeys;
use crate::shape::{lookup, Property};

/// Profile URI marking an object as a collection.
pub const COLLECTION_PROFILE: &str = "https://github.com/smizell/graphablejson/wiki/Collection";

pub const PROFILE: &str = "profile";
pub const ITEM: &str = "item";
pub const NEXT: &str = "next";
pub const PREV: &str = "prev";

/// Which pagination relationship a traversal follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Follow `next`.
    #[default]
    Forward,
    /// Follow `prev`.
    Backward,
}

impl Direction {
    /// The relationship name followed in this direction.
    pub fn relationship(self) -> &'static str {
        match self {
            Direction::Forward => NEXT,
            Direction::Backward => PREV,
        }
    }
}

/// Whether `node` carries the collection profile.
///
/// Link-form profiles are compared by URL and never dereferenced.
pub fn is_collection(node: &Value) -> bool {
    match lookup(node, &CandidateKeys::new(PROFILE, None)) {
        Property::Absent => false,
        Property::Literal(shape) | Property::Link { shape, .. } => shape
            .values()
            .iter()
            .any(|v| v.as_str() == Some(COLLECTION_PROFILE)),
    }
}

/// A read-only view over a node recognised as a collection.
#[derive(Debug, Clone, Copy)]
pub struct Collection<'a> {
    node: &'a Value,
}

impl<'a> Collection<'a> {
    /// Returns `None` when `node` is not a collection.
    pub fn new(node: &'a Value) -> Option<Self> {
        is_collection(node).then_some(Self { node })
    }

    pub fn node(&self) -> &'a Value {
        self.node
    }

    /// The `item` relationship of this page.
    pub fn items(&self) -> Property {
        self.relationship(ITEM)
    }

    pub fn next(&self) -> Property {
        self.relationship(NEXT)
    }

    pub fn prev(&self) -> Property {
        self.relationship(PREV)
    }

    /// The neighbouring page in `direction`.
    pub fn page_link(&self, direction: Direction) -> Property {
        self.relationship(direction.relationship())
    }

    fn relationship(&self, name: &str) -> Property {
        lookup(self.node, &CandidateKeys::new(name, None))
    }
}

// --- tests -------------------------------------------------------------------
