//! Normalization of raw property values.
//!
//! Every property value is reduced once to a [`Shape`] and every relationship
//! lookup to a [`Property`]; downstream code never inspects raw JSON shapes.

use serde_json::Value;

use crate::keys::CandidateKeys;

/// A property value reduced to "how many values does it hold".
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    /// Absent or `null`.
    Empty,
    /// A string, number, boolean or object.
    Single(Value),
    /// An array; elements are kept verbatim and in order.
    Many(Vec<Value>),
}

impl Shape {
    pub fn of(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => Shape::Empty,
            Some(Value::Array(items)) => Shape::Many(items.clone()),
            Some(other) => Shape::Single(other.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Shape::Empty => true,
            Shape::Single(_) => false,
            Shape::Many(items) => items.is_empty(),
        }
    }

    pub fn values(&self) -> &[Value] {
        match self {
            Shape::Empty => &[],
            Shape::Single(v) => std::slice::from_ref(v),
            Shape::Many(items) => items,
        }
    }

    pub fn into_values(self) -> Vec<Value> {
        match self {
            Shape::Empty => vec![],
            Shape::Single(v) => vec![v],
            Shape::Many(items) => items,
        }
    }
}

/// The result of looking a relationship up on one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    /// None of the candidate keys is present.
    Absent,
    /// The literal key is present.
    Literal(Shape),
    /// A link key is present; `shape` holds the raw link values.
    Link { key: String, shape: Shape },
}

impl Property {
    /// `true` when the property cannot yield any value.
    pub fn is_empty(&self) -> bool {
        match self {
            Property::Absent => true,
            Property::Literal(shape) | Property::Link { shape, .. } => shape.is_empty(),
        }
    }
}

/// Find the first candidate key present on `node`.
///
/// A present literal key wins even when its value is `null`; link keys are
/// consulted only when the literal key is missing. Non-object nodes have no
/// properties.
pub fn lookup(node: &Value, keys: &CandidateKeys) -> Property {
    let Some(obj) = node.as_object() else {
        return Property::Absent;
    };

    if let Some(value) = obj.get(&keys.literal) {
        return Property::Literal(Shape::of(Some(value)));
    }

    keys.links
        .iter()
        .find_map(|key| {
            obj.get(key).map(|value| Property::Link {
                key: key.clone(),
                shape: Shape::of(Some(value)),
            })
        })
        .unwrap_or(Property::Absent)
}

// --- tests -------------------------------------------------------------------
