//! Identity selectors for the common "record with an id field" shape.

use std::fmt;

use serde_json::Value;

use crate::element::Element;

/// Hashable projection of a scalar leaf: its JSON text, so `1` and `"1"` differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// `None` for `null`, arrays and objects.
    pub fn from_leaf(value: &Value) -> Option<Self> {
        match value {
            Value::Null | Value::Array(_) | Value::Object(_) => None,
            scalar => Some(IdentityKey(scalar.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for IdentityKey {
    fn from(value: i64) -> Self {
        IdentityKey(value.to_string())
    }
}

impl From<&str> for IdentityKey {
    fn from(value: &str) -> Self {
        IdentityKey(Value::from(value).to_string())
    }
}

/// Identity of a node taken from the scalar leaf under `field`.
pub fn field_identity(element: &Element, field: &str) -> Option<IdentityKey> {
    let child = element.single_child(field).ok()??;
    IdentityKey::from_leaf(child.leaf_value().ok()?)
}

/// Root identity selector for [`IdentityCache::merge`](crate::IdentityCache::merge).
pub fn by_field(field: impl Into<String>) -> impl Fn(&Element) -> Option<IdentityKey> {
    let field = field.into();
    move |element| field_identity(element, &field)
}

/// Array identity selector that ignores the directory.
pub fn array_by_field(
    field: impl Into<String>,
) -> impl Fn(&Element, &[String]) -> Option<IdentityKey> {
    let field = field.into();
    move |element, _directory| field_identity(element, &field)
}
