use indexmap::IndexMap;

use super::{Children, Element};

/// Two-phase node construction.
///
/// Entries are first grouped by key; [`NodeBuilder::build`] then decides per
/// key whether it becomes a single child (pushed once) or an array (pushed
/// more than once, or pushed through [`NodeBuilder::push_array`]).
#[derive(Debug, Default)]
pub struct NodeBuilder {
    groups: IndexMap<String, Group>,
}

#[derive(Debug, Default)]
struct Group {
    items: Vec<Element>,
    force_array: bool,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, child: Element) -> &mut Self {
        self.groups.entry(key.into()).or_default().items.push(child);
        self
    }

    /// Marks `key` as an array even if it ends up with zero or one item.
    pub fn push_array<I>(&mut self, key: impl Into<String>, items: I) -> &mut Self
    where
        I: IntoIterator<Item = Element>,
    {
        let group = self.groups.entry(key.into()).or_default();
        group.force_array = true;
        group.items.extend(items);
        self
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn build(self) -> Element {
        let children = self
            .groups
            .into_iter()
            .map(|(key, group)| (key, group.into_children()))
            .collect();
        Element::with_children(children)
    }
}

impl Group {
    fn into_children(mut self) -> Children {
        if !self.force_array && self.items.len() == 1 {
            if let Some(only) = self.items.pop() {
                return Children::Single(only);
            }
        }
        Children::Array(self.items)
    }
}

impl<K: Into<String>> FromIterator<(K, Element)> for NodeBuilder {
    fn from_iter<T: IntoIterator<Item = (K, Element)>>(iter: T) -> Self {
        let mut builder = NodeBuilder::new();
        for (key, child) in iter {
            builder.push(key, child);
        }
        builder
    }
}
