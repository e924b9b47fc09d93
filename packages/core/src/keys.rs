//! Property-key conventions: link suffixes, version suffixes, and the ordered
//! list of keys probed for a relationship.
//!
//! A relationship named `address` may be stored under any of these keys:
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `address` | literal value |
//! | `address_url` / `addressUrl` | link(s) to the value |
//! | `address__v2` | literal value, version `v2` |
//! | `address__v2_url` / `address__v2Url` | link(s) to the value, version `v2` |
//!
//! All naming rules live in this module; the resolver only ever asks for a
//! [`CandidateKeys`] and probes them in order.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Separator between a relationship name and its version token.
pub const VERSION_SEPARATOR: &str = "__";

/// Link suffix used by snake_case documents.
pub const SNAKE_LINK_SUFFIX: &str = "_url";

/// Link suffix used by camelCase documents.
pub const CAMEL_LINK_SUFFIX: &str = "Url";

/// Errors returned when parsing key components.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error(
        "invalid version {0:?}; versions must match [A-Za-z0-9][A-Za-z0-9.-]* \
         (e.g. v2, 2024-01, 1.1)"
    )]
    InvalidVersion(String),
}

/// A version tag selecting the `name__<version>` storage slot.
///
/// Underscores are not allowed inside the token so that `name__v2_url`
/// splits unambiguously into name, version and link suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    pub fn new(token: impl Into<String>) -> Result<Self, KeyError> {
        let token = token.into();
        if VERSION_RE.is_match(&token) {
            Ok(Self(token))
        } else {
            Err(KeyError::InvalidVersion(token))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Version {
    type Err = KeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Version {
    type Error = KeyError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.0
    }
}

/// How a property stores its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Form {
    /// The value is embedded in the document.
    Literal,
    /// The property holds one or more URLs pointing at the value.
    Link,
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Form::Literal => "literal",
            Form::Link => "link",
        })
    }
}

/// The keys to probe for one relationship request, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateKeys {
    /// `name` or `name__<version>`.
    pub literal: String,
    /// `<literal>_url` then `<literal>Url`.
    pub links: [String; 2],
}

impl CandidateKeys {
    /// Build the probe list for `name`, optionally pinned to `version`.
    ///
    /// Without a version only the unsuffixed slot is probed; an explicit
    /// version never falls back to the base key.
    pub fn new(name: &str, version: Option<&Version>) -> Self {
        let literal = match version {
            Some(v) => format!("{name}{VERSION_SEPARATOR}{v}"),
            None => name.to_string(),
        };
        let links = [
            format!("{literal}{SNAKE_LINK_SUFFIX}"),
            format!("{literal}{CAMEL_LINK_SUFFIX}"),
        ];
        Self { literal, links }
    }

    /// All keys in probe order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.literal.as_str()).chain(self.links.iter().map(String::as_str))
    }
}

/// A concrete JSON key decomposed into relationship name, version and form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyKey {
    pub name: String,
    pub version: Option<Version>,
    pub form: Form,
}

impl PropertyKey {
    /// Decompose `key`. Every key parses; keys that follow none of the
    /// conventions are plain literal properties.
    pub fn parse(key: &str) -> Self {
        let (stem, form) = match strip_link_suffix(key) {
            Some(stem) => (stem, Form::Link),
            None => (key, Form::Literal),
        };

        if let Some((name, token)) = stem.rsplit_once(VERSION_SEPARATOR) {
            if !name.is_empty() {
                if let Ok(version) = Version::new(token) {
                    return Self {
                        name: name.to_string(),
                        version: Some(version),
                        form,
                    };
                }
            }
        }

        Self {
            name: stem.to_string(),
            version: None,
            form,
        }
    }
}

/// One physical storage slot of a relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Version>,
    pub form: Form,
}

/// Every slot an object exposes for one relationship name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationshipInfo {
    pub name: String,
    pub slots: Vec<Slot>,
}

impl RelationshipInfo {
    /// Explicit versions present for this relationship, sorted and deduplicated.
    pub fn versions(&self) -> Vec<&Version> {
        let mut out: Vec<&Version> = self.slots.iter().filter_map(|s| s.version.as_ref()).collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Summarise the relationships exposed by `node`, sorted by name.
///
/// Non-object nodes expose no relationships.
pub fn relationships(node: &Value) -> Vec<RelationshipInfo> {
    let Some(obj) = node.as_object() else {
        return vec![];
    };

    let mut by_name: BTreeMap<String, Vec<Slot>> = BTreeMap::new();
    for key in obj.keys() {
        let parsed = PropertyKey::parse(key);
        by_name.entry(parsed.name).or_default().push(Slot {
            key: key.clone(),
            version: parsed.version,
            form: parsed.form,
        });
    }

    by_name
        .into_iter()
        .map(|(name, mut slots)| {
            slots.sort_by(|a, b| (&a.version, a.form).cmp(&(&b.version, b.form)));
            RelationshipInfo { name, slots }
        })
        .collect()
}

// --- helpers -----------------------------------------------------------------

fn strip_link_suffix(key: &str) -> Option<&str> {
    key.strip_suffix(SNAKE_LINK_SUFFIX)
        .or_else(|| key.strip_suffix(CAMEL_LINK_SUFFIX))
        .filter(|stem| !stem.is_empty())
}

/// `^[A-Za-z0-9][A-Za-z0-9.-]*$`
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.\-]*$").expect("invalid version regex")
});

// --- tests -------------------------------------------------------------------
