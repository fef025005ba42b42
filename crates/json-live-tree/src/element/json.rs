//! Bridge between `serde_json::Value` documents and element trees.

use serde_json::{Map, Value};

use super::{Children, Element, NodeBuilder};

impl Element {
    /// Converts a JSON document into a fresh tree.
    ///
    /// Objects become nodes and arrays under a key become array children.
    /// Arrays that cannot sit under a key (a top-level array, or an array
    /// directly inside an array) are kept as leaves holding the array.
    pub fn from_json(value: &Value) -> Element {
        match value {
            Value::Object(map) => from_object(map),
            other => Element::leaf(other.clone()),
        }
    }

    /// Renders the current state of the tree as JSON.
    pub fn to_json(&self) -> Value {
        match self.leaf_value() {
            Ok(value) => value.clone(),
            Err(_) => {
                let mut map = Map::new();
                for (key, children) in self.children().unwrap_or_default() {
                    let rendered = match children {
                        Children::Single(child) => child.to_json(),
                        Children::Array(items) => {
                            Value::Array(items.iter().map(Element::to_json).collect())
                        }
                    };
                    map.insert(key, rendered);
                }
                Value::Object(map)
            }
        }
    }
}

fn from_object(map: &Map<String, Value>) -> Element {
    let mut builder = NodeBuilder::new();
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                builder.push_array(key.as_str(), items.iter().map(Element::from_json));
            }
            other => {
                builder.push(key.as_str(), Element::from_json(other));
            }
        }
    }
    builder.build()
}
