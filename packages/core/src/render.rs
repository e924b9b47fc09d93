//! Human-readable text rendering of resolved values and relationship summaries.
//!
//! The output is stable plain text for terminals and logs. It is not a
//! canonical format; only the JSON values themselves are normative.

use serde_json::{Map, Value};

use crate::collection::is_collection;
use crate::keys::{Form, PropertyKey, RelationshipInfo};

/// Render one resolved value.
///
/// Scalars render on a single line. Objects render one property per line,
/// with link properties shown by relationship name and target:
///
/// ```text
/// id: 1
/// status: "shipped"
/// customer → https://api.example.com/customers/7
/// address (v2): {…2 keys}
/// ```
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Object(obj) => render_object(obj, is_collection(value)),
        other => format!("{}\n", inline(other)),
    }
}

/// Render the relationships of a document as a summary table.
///
/// ```text
/// Relationships  2
/// ────────────────
///
/// address
///   literal          address
///   link     v2      address__v2_url
///
/// email
///   literal          email
/// ```
pub fn render_relationships(rels: &[RelationshipInfo]) -> String {
    let header = format!("Relationships  {}", rels.len());
    let rule = "─".repeat(header.chars().count());
    let mut out = format!("{header}\n{rule}\n");

    for rel in rels {
        out.push('\n');
        out.push_str(&rel.name);
        out.push('\n');
        for slot in &rel.slots {
            let version = slot.version.as_ref().map(|v| v.as_str()).unwrap_or("");
            out.push_str(&format!("  {:<8} {:<8} {}\n", slot.form, version, slot.key));
        }
    }

    out
}

// --- helpers -----------------------------------------------------------------

fn render_object(obj: &Map<String, Value>, collection: bool) -> String {
    let mut out = String::new();
    if collection {
        out.push_str("[collection]\n");
    }

    let mut keys: Vec<&String> = obj.keys().collect();
    keys.sort();
    for key in keys {
        let value = &obj[key];
        let parsed = PropertyKey::parse(key);
        let label = match &parsed.version {
            Some(v) => format!("{} ({})", parsed.name, v),
            None => parsed.name.clone(),
        };
        match parsed.form {
            Form::Link => out.push_str(&format!("{} → {}\n", label, link_targets(value))),
            Form::Literal => out.push_str(&format!("{}: {}\n", label, inline(value))),
        }
    }
    out
}

fn link_targets(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn inline(value: &Value) -> String {
    match value {
        Value::Object(obj) => format!("{{…{} key{}}}", obj.len(), plural(obj.len())),
        Value::Array(items) => format!("[…{} item{}]", items.len(), plural(items.len())),
        Value::String(s) => format!("\"{}\"", truncate(s, 72)),
        other => other.to_string(),
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 1).collect();
        format!("{cut}…")
    }
}

// --- tests -------------------------------------------------------------------
