//! Structural merge of one node tree into another.
//!
//! Merging never replaces the target: it mutates it in place, one operation
//! per touched node, so every existing reference and subscription stays valid.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use thiserror::Error;

use crate::element::{Children, Element, ElementError, ElementKind};
use crate::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeSide {
    Target,
    Source,
}

impl fmt::Display for MergeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeSide::Target => write!(f, "target"),
            MergeSide::Source => write!(f, "source"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("merge {side} must be a node, found a {found}")]
    NotANode { side: MergeSide, found: ElementKind },
    #[error(transparent)]
    Element(#[from] ElementError),
}

impl MergeError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PreconditionViolation
    }
}

type Select<'s> =
    dyn Fn(Option<&Children>, &Children, &[String]) -> Result<Option<Children>, MergeError> + 's;

/// Merges `source` into `target`, asking `selector` what each key becomes.
///
/// The selector sees the current target children (if any), the incoming
/// children and the directory of the key. Returning `None` leaves the key
/// untouched. When both sides hold a single node under a key, returning the
/// old node keeps it and folds the incoming node into it depth-first; any
/// other replacement is terminal and the old subtree is left as it was.
///
/// Both roots are validated before anything is mutated.
pub fn merge<F>(target: &Element, source: &Element, selector: F) -> Result<(), MergeError>
where
    F: Fn(Option<&Children>, &Children, &[String]) -> Option<Children>,
{
    ensure_nodes(target, source)?;
    let select = |old: Option<&Children>,
                  new: &Children,
                  directory: &[String]|
     -> Result<Option<Children>, MergeError> { Ok(selector(old, new, directory)) };
    merge_nodes(target, source, &select, &mut Vec::new())
}

/// Merges with the standard policy: arrays reconcile by `identity_of`,
/// single nodes merge in place, anything else is replaced by the incoming value.
///
/// Array reconciliation keeps every matched old element (with the new
/// content folded in), appends unmatched new elements in incoming order,
/// then appends old elements whose identity was not seen in the incoming
/// array. Old elements without an identity cannot be matched and are dropped.
pub fn merge_with_identity_selector<I, F>(
    target: &Element,
    source: &Element,
    identity_of: F,
) -> Result<(), MergeError>
where
    I: Eq + Hash,
    F: Fn(&Element, &[String]) -> Option<I>,
{
    ensure_nodes(target, source)?;
    let policy = IdentityPolicy { identity_of };
    policy.merge(target, source, &mut Vec::new())
}

fn ensure_nodes(target: &Element, source: &Element) -> Result<(), MergeError> {
    if !target.is_node() {
        return Err(MergeError::NotANode {
            side: MergeSide::Target,
            found: target.kind(),
        });
    }
    if !source.is_node() {
        return Err(MergeError::NotANode {
            side: MergeSide::Source,
            found: source.kind(),
        });
    }
    Ok(())
}

fn merge_nodes(
    target: &Element,
    source: &Element,
    select: &Select<'_>,
    directory: &mut Vec<String>,
) -> Result<(), MergeError> {
    if target.ptr_eq(source) {
        return Ok(());
    }
    let incoming = source.children()?;
    let op = target.operation()?;
    for (key, new) in incoming {
        let old = target.child(&key)?;
        directory.push(key.clone());
        let replacement = select(old.as_ref(), &new, directory);
        let folded = match &replacement {
            Ok(chosen) => match kept_node(old.as_ref(), &new, chosen.as_ref()) {
                Some((old_node, new_node)) => merge_nodes(old_node, new_node, select, directory),
                None => Ok(()),
            },
            Err(_) => Ok(()),
        };
        directory.pop();
        folded?;
        match replacement? {
            None => {}
            Some(Children::Single(child)) => match old {
                Some(Children::Array(_)) => op.replace_child(&key, Children::Single(child))?,
                _ => op.set_single_child(&key, child)?,
            },
            Some(Children::Array(items)) => match old {
                Some(Children::Single(_)) => op.replace_child(&key, Children::Array(items))?,
                _ => {
                    let created = items.clone();
                    op.modify_array_child(&key, move || created, move |current| *current = items)?
                }
            },
        }
    }
    op.finish()?;
    Ok(())
}

/// The node pair to fold together when the selector kept the old single node.
fn kept_node<'c>(
    old: Option<&'c Children>,
    new: &'c Children,
    chosen: Option<&Children>,
) -> Option<(&'c Element, &'c Element)> {
    match (old, new, chosen) {
        (Some(Children::Single(old)), Children::Single(new), Some(Children::Single(kept)))
            if kept.ptr_eq(old) && old.is_node() && new.is_node() =>
        {
            Some((old, new))
        }
        _ => None,
    }
}

struct IdentityPolicy<F> {
    identity_of: F,
}

impl<I, F> IdentityPolicy<F>
where
    I: Eq + Hash,
    F: Fn(&Element, &[String]) -> Option<I>,
{
    fn merge(
        &self,
        target: &Element,
        source: &Element,
        directory: &mut Vec<String>,
    ) -> Result<(), MergeError> {
        let select = |old: Option<&Children>,
                      new: &Children,
                      directory: &[String]|
         -> Result<Option<Children>, MergeError> { self.select(old, new, directory) };
        merge_nodes(target, source, &select, directory)
    }

    fn select(
        &self,
        old: Option<&Children>,
        new: &Children,
        directory: &[String],
    ) -> Result<Option<Children>, MergeError> {
        let chosen = match (old, new) {
            (Some(Children::Array(old_items)), Children::Array(new_items)) => {
                Children::Array(self.reconcile(old_items, new_items, directory)?)
            }
            // Keeping the old node makes `merge_nodes` fold the new one into it.
            (Some(Children::Single(old_child)), Children::Single(new_child))
                if old_child.is_node() && new_child.is_node() =>
            {
                Children::Single(old_child.clone())
            }
            _ => new.clone(),
        };
        Ok(Some(chosen))
    }

    fn reconcile(
        &self,
        old: &[Element],
        new: &[Element],
        directory: &[String],
    ) -> Result<Vec<Element>, MergeError> {
        let mut by_identity: HashMap<I, usize> = HashMap::with_capacity(old.len());
        let mut keyed = vec![false; old.len()];
        for (position, element) in old.iter().enumerate() {
            if let Some(identity) = (self.identity_of)(element, directory) {
                keyed[position] = true;
                by_identity.entry(identity).or_insert(position);
            }
        }

        let mut matched = vec![false; old.len()];
        let mut result = Vec::with_capacity(old.len().max(new.len()));
        for incoming in new {
            let position = (self.identity_of)(incoming, directory)
                .and_then(|identity| by_identity.get(&identity).copied())
                .filter(|&position| !matched[position]);
            match position {
                Some(position) => {
                    matched[position] = true;
                    let existing = &old[position];
                    if existing.is_node() && incoming.is_node() {
                        self.merge(existing, incoming, &mut directory.to_vec())?;
                        result.push(existing.clone());
                    } else {
                        result.push(incoming.clone());
                    }
                }
                None => result.push(incoming.clone()),
            }
        }
        for (position, element) in old.iter().enumerate() {
            if keyed[position] && !matched[position] {
                result.push(element.clone());
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id_of(element: &Element, _: &[String]) -> Option<i64> {
        element
            .single_child("id")
            .ok()
            .flatten()
            .and_then(|id| id.leaf_value().ok().and_then(|v| v.as_i64()))
    }

    #[test]
    fn rejects_non_node_roots_before_mutating() {
        let leaf = Element::leaf(json!(1));
        let node = Element::from_json(&json!({"a": 1}));
        assert_eq!(
            merge_with_identity_selector(&node, &leaf, id_of),
            Err(MergeError::NotANode {
                side: MergeSide::Source,
                found: ElementKind::Leaf,
            })
        );
        assert_eq!(
            merge(&leaf, &node, |_, new, _| Some(new.clone())),
            Err(MergeError::NotANode {
                side: MergeSide::Target,
                found: ElementKind::Leaf,
            })
        );
        assert_eq!(node.to_json(), json!({"a": 1}));
    }

    #[test]
    fn selector_none_skips_the_key() {
        let target = Element::from_json(&json!({"a": 1, "b": 2}));
        let source = Element::from_json(&json!({"a": 10, "b": 20}));
        merge(&target, &source, |_, new, directory| {
            (directory.last().map(String::as_str) == Some("a")).then(|| new.clone())
        })
        .unwrap();
        assert_eq!(target.to_json(), json!({"a": 10, "b": 2}));
    }

    #[test]
    fn selector_sees_full_directory() {
        let target = Element::from_json(&json!({"user": {"name": "a"}}));
        let source = Element::from_json(&json!({"user": {"name": "b"}}));
        let seen = std::cell::RefCell::new(Vec::new());
        merge(&target, &source, |old, new, directory| {
            seen.borrow_mut().push(directory.join("/"));
            match (old, new) {
                (Some(Children::Single(o)), Children::Single(n)) if o.is_node() && n.is_node() => {
                    Some(Children::Single(o.clone()))
                }
                _ => Some(new.clone()),
            }
        })
        .unwrap();
        assert_eq!(seen.into_inner(), vec!["user", "user/name"]);
        assert_eq!(target.to_json(), json!({"user": {"name": "b"}}));
    }

    #[test]
    fn terminal_replacement_leaves_the_old_subtree_alone() {
        let target = Element::from_json(&json!({"user": {"name": "a"}}));
        let old_user = target.single_child("user").unwrap().unwrap();
        let batches = std::rc::Rc::new(std::cell::Cell::new(0));
        let sink = std::rc::Rc::clone(&batches);
        old_user.on_change(move |_| sink.set(sink.get() + 1)).unwrap();

        let source = Element::from_json(&json!({"user": {"name": "b"}}));
        let new_user = source.single_child("user").unwrap().unwrap();
        merge(&target, &source, |_, new, _| Some(new.clone())).unwrap();

        assert!(target.single_child("user").unwrap().unwrap().ptr_eq(&new_user));
        assert_eq!(old_user.to_json(), json!({"name": "a"}));
        assert_eq!(batches.get(), 0);
    }

    #[test]
    fn shape_change_replaces_without_recursing() {
        let target = Element::from_json(&json!({"xs": {"id": 1}}));
        let old_single = target.single_child("xs").unwrap().unwrap();
        let source = Element::from_json(&json!({"xs": [{"id": 1}]}));
        merge_with_identity_selector(&target, &source, id_of).unwrap();
        let items = target.array_child("xs").unwrap().unwrap();
        assert_eq!(items.len(), 1);
        assert!(!items[0].ptr_eq(&old_single));
    }

    #[test]
    fn reconcile_keeps_unmatched_old_after_incoming() {
        let target = Element::from_json(&json!({"xs": [{"id": 1}, {"id": 2}, {"id": 3}]}));
        let before = target.array_child("xs").unwrap().unwrap();
        let source = Element::from_json(&json!({"xs": [{"id": 3, "x": true}, {"id": 4}]}));
        merge_with_identity_selector(&target, &source, id_of).unwrap();
        let after = target.array_child("xs").unwrap().unwrap();
        let ids: Vec<_> = after.iter().map(|e| id_of(e, &[])).collect();
        assert_eq!(ids, vec![Some(3), Some(4), Some(1), Some(2)]);
        assert!(after[0].ptr_eq(&before[2]));
        assert!(after[2].ptr_eq(&before[0]));
        assert!(after[3].ptr_eq(&before[1]));
        assert_eq!(after[0].to_json(), json!({"id": 3, "x": true}));
    }

    #[test]
    fn unkeyed_old_elements_are_replaced() {
        let target = Element::from_json(&json!({"tags": ["a", "b"]}));
        let source = Element::from_json(&json!({"tags": ["b", "c"]}));
        merge_with_identity_selector(&target, &source, id_of).unwrap();
        assert_eq!(target.to_json(), json!({"tags": ["b", "c"]}));
    }
}
