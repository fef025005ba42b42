use std::collections::HashSet;

use smallvec::SmallVec;

use crate::directory::Directory;
use crate::element::{Children, Element};

/// Position chosen at each directory segment: `None` for a single child,
/// `Some(index)` for an array step.
pub type IndexPath = SmallVec<[Option<usize>; 4]>;

/// One concrete element reached by walking a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrandChild {
    pub index_path: IndexPath,
    pub value: Element,
}

/// Every element a directory resolves to from one root, sorted by index path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrandChildrenContainer {
    directory: Directory,
    children: Vec<GrandChild>,
}

impl GrandChildrenContainer {
    /// Resolves `directory` against `root` once, without subscribing.
    pub fn resolve(root: &Element, directory: &Directory) -> Self {
        resolve(root, directory).container
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn children(&self) -> &[GrandChild] {
        &self.children
    }

    pub fn values(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().map(|child| &child.value)
    }

    /// Value of the first resolved leaf, if any.
    pub fn first_leaf(&self) -> Option<&serde_json::Value> {
        self.values().find_map(|value| value.leaf_value().ok())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl<'a> IntoIterator for &'a GrandChildrenContainer {
    type Item = &'a GrandChild;
    type IntoIter = std::slice::Iter<'a, GrandChild>;

    fn into_iter(self) -> Self::IntoIter {
        self.children.iter()
    }
}

pub(crate) struct Resolution {
    pub container: GrandChildrenContainer,
    /// Nodes whose children were read while walking, deduplicated.
    pub watched: Vec<Element>,
}

pub(crate) fn resolve(root: &Element, directory: &Directory) -> Resolution {
    let mut frontier = vec![GrandChild {
        index_path: IndexPath::new(),
        value: root.clone(),
    }];
    let mut watched = Vec::new();
    let mut seen = HashSet::new();

    for key in directory.iter() {
        let mut next = Vec::with_capacity(frontier.len());
        for candidate in frontier {
            let Ok(found) = candidate.value.child(key) else {
                continue;
            };
            if seen.insert(candidate.value.addr()) {
                watched.push(candidate.value.clone());
            }
            match found {
                None => {}
                Some(Children::Single(child)) => {
                    let mut index_path = candidate.index_path.clone();
                    index_path.push(None);
                    next.push(GrandChild {
                        index_path,
                        value: child,
                    });
                }
                Some(Children::Array(items)) => {
                    for (index, item) in items.into_iter().enumerate() {
                        let mut index_path = candidate.index_path.clone();
                        index_path.push(Some(index));
                        next.push(GrandChild {
                            index_path,
                            value: item,
                        });
                    }
                }
            }
        }
        frontier = next;
    }

    // `None < Some(_)`, so single steps sort before array positions.
    frontier.sort_by(|a, b| a.index_path.cmp(&b.index_path));
    Resolution {
        container: GrandChildrenContainer {
            directory: directory.clone(),
            children: frontier,
        },
        watched,
    }
}
