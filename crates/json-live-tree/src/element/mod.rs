//! The recursive tree node.
//!
//! An [`Element`] is either a leaf holding one JSON scalar (or any opaque
//! [`Value`]) or a node with keyed children. Each key holds either one child
//! or an ordered array of children, never both.
//!
//! Identity is the `Rc` allocation: cloning an `Element` yields another handle
//! to the same node. Two leaves compare equal when their values do; nodes only
//! compare equal to themselves.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::aggregate::{ChangeAggregator, ChangedChild, ChangedChildrenBatch, OperationId};
use crate::ErrorKind;

mod builder;
mod json;

pub use builder::NodeBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Leaf,
    Node,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementKind::Leaf => write!(f, "leaf"),
            ElementKind::Node => write!(f, "node"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElementError {
    #[error("expected a {expected} element, found a {found}")]
    InvalidElementKind {
        expected: ElementKind,
        found: ElementKind,
    },
    #[error("key `{0}` holds an array; use modify_array_child or replace_child")]
    KeyHoldsArray(String),
    #[error("key `{0}` holds a single child; use replace_child")]
    KeyHoldsSingle(String),
    #[error("operation {0} is not open")]
    UnknownOperation(OperationId),
}

impl ElementError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PreconditionViolation
    }
}

/// What a key of a node holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Children {
    Single(Element),
    Array(Vec<Element>),
}

impl Children {
    pub fn is_array(&self) -> bool {
        matches!(self, Children::Array(_))
    }

    pub fn as_slice(&self) -> &[Element] {
        match self {
            Children::Single(child) => std::slice::from_ref(child),
            Children::Array(items) => items,
        }
    }

    pub fn into_vec(self) -> Vec<Element> {
        match self {
            Children::Single(child) => vec![child],
            Children::Array(items) => items,
        }
    }
}

pub type ListenerId = u64;

type BatchListener = Rc<dyn Fn(&ChangedChildrenBatch)>;

#[derive(Clone)]
pub struct Element(Rc<Inner>);

enum Inner {
    Leaf(Value),
    Node(NodeState),
}

struct NodeState {
    children: RefCell<IndexMap<String, Children>>,
    aggregator: RefCell<ChangeAggregator>,
    listeners: RefCell<BTreeMap<ListenerId, BatchListener>>,
    next_listener_id: Cell<ListenerId>,
}

impl NodeState {
    fn new(children: IndexMap<String, Children>) -> Self {
        Self {
            children: RefCell::new(children),
            aggregator: RefCell::new(ChangeAggregator::new()),
            listeners: RefCell::new(BTreeMap::new()),
            next_listener_id: Cell::new(1),
        }
    }
}

impl Element {
    pub fn leaf(value: impl Into<Value>) -> Self {
        Element(Rc::new(Inner::Leaf(value.into())))
    }

    /// An empty node.
    pub fn node() -> Self {
        Self::with_children(IndexMap::new())
    }

    /// Builds a node from `(key, child)` entries; repeated keys become arrays.
    pub fn from_node<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Element)>,
    {
        entries.into_iter().collect::<NodeBuilder>().build()
    }

    pub(crate) fn with_children(children: IndexMap<String, Children>) -> Self {
        Element(Rc::new(Inner::Node(NodeState::new(children))))
    }

    pub fn kind(&self) -> ElementKind {
        match &*self.0 {
            Inner::Leaf(_) => ElementKind::Leaf,
            Inner::Node(_) => ElementKind::Node,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.kind() == ElementKind::Leaf
    }

    pub fn is_node(&self) -> bool {
        self.kind() == ElementKind::Node
    }

    /// Reference identity, regardless of kind.
    pub fn ptr_eq(&self, other: &Element) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn leaf_value(&self) -> Result<&Value, ElementError> {
        match &*self.0 {
            Inner::Leaf(value) => Ok(value),
            Inner::Node(_) => Err(ElementError::InvalidElementKind {
                expected: ElementKind::Leaf,
                found: ElementKind::Node,
            }),
        }
    }

    fn node_state(&self) -> Result<&NodeState, ElementError> {
        match &*self.0 {
            Inner::Node(state) => Ok(state),
            Inner::Leaf(_) => Err(ElementError::InvalidElementKind {
                expected: ElementKind::Node,
                found: ElementKind::Leaf,
            }),
        }
    }

    // ── Reading ───────────────────────────────────────────────────────────

    pub fn child(&self, key: &str) -> Result<Option<Children>, ElementError> {
        Ok(self.node_state()?.children.borrow().get(key).cloned())
    }

    /// The child under `key`, or `None` if the key is missing or holds an array.
    pub fn single_child(&self, key: &str) -> Result<Option<Element>, ElementError> {
        Ok(match self.child(key)? {
            Some(Children::Single(child)) => Some(child),
            _ => None,
        })
    }

    /// The array under `key`, or `None` if the key is missing or holds a single child.
    pub fn array_child(&self, key: &str) -> Result<Option<Vec<Element>>, ElementError> {
        Ok(match self.child(key)? {
            Some(Children::Array(items)) => Some(items),
            _ => None,
        })
    }

    /// Snapshot of every key in insertion order.
    pub fn children(&self) -> Result<Vec<(String, Children)>, ElementError> {
        Ok(self
            .node_state()?
            .children
            .borrow()
            .iter()
            .map(|(key, children)| (key.clone(), children.clone()))
            .collect())
    }

    pub fn keys(&self) -> Result<Vec<String>, ElementError> {
        Ok(self.node_state()?.children.borrow().keys().cloned().collect())
    }

    pub fn len(&self) -> Result<usize, ElementError> {
        Ok(self.node_state()?.children.borrow().len())
    }

    pub fn is_empty(&self) -> Result<bool, ElementError> {
        Ok(self.len()? == 0)
    }

    // ── Operations ────────────────────────────────────────────────────────

    pub fn begin_operation(&self) -> Result<OperationId, ElementError> {
        Ok(self.node_state()?.aggregator.borrow_mut().begin())
    }

    /// Closes `operation` and notifies listeners if anything changed on net.
    pub fn end_operation(&self, operation: OperationId) -> Result<(), ElementError> {
        let state = self.node_state()?;
        let batch = state.aggregator.borrow_mut().end(operation)?;
        if let Some(batch) = batch {
            self.emit(state, &batch);
        }
        Ok(())
    }

    /// Opens an operation that ends when the guard is finished or dropped.
    pub fn operation(&self) -> Result<Operation<'_>, ElementError> {
        let id = self.begin_operation()?;
        Ok(Operation {
            element: self,
            id,
            finished: false,
        })
    }

    fn emit(&self, state: &NodeState, batch: &ChangedChildrenBatch) {
        let listeners: Vec<BatchListener> = state.listeners.borrow().values().cloned().collect();
        trace!(
            operation = batch.operation().get(),
            keys = batch.len(),
            listeners = listeners.len(),
            "children changed"
        );
        for listener in listeners {
            listener(batch);
        }
    }

    fn in_implicit_operation<T>(
        &self,
        f: impl FnOnce(OperationId) -> Result<T, ElementError>,
    ) -> Result<T, ElementError> {
        let op = self.begin_operation()?;
        let result = f(op);
        self.end_operation(op)?;
        result
    }

    fn open_state(&self, operation: OperationId) -> Result<&NodeState, ElementError> {
        let state = self.node_state()?;
        if !state.aggregator.borrow().is_open(operation) {
            return Err(ElementError::UnknownOperation(operation));
        }
        Ok(state)
    }

    fn store(
        &self,
        state: &NodeState,
        operation: OperationId,
        key: &str,
        next: Option<Children>,
    ) -> Result<(), ElementError> {
        let previous = {
            let mut children = state.children.borrow_mut();
            match &next {
                Some(next) => children.insert(key.to_string(), next.clone()),
                None => children.shift_remove(key),
            }
        };
        state.aggregator.borrow_mut().record(ChangedChild::between(
            operation,
            key,
            previous.as_ref(),
            next.as_ref(),
        ))
    }

    // ── Mutators ──────────────────────────────────────────────────────────

    pub fn set_single_child(&self, key: &str, child: Element) -> Result<(), ElementError> {
        self.in_implicit_operation(|op| self.set_single_child_in(op, key, child))
    }

    /// Fails with [`ElementError::KeyHoldsArray`] if `key` currently holds an array.
    pub fn set_single_child_in(
        &self,
        operation: OperationId,
        key: &str,
        child: Element,
    ) -> Result<(), ElementError> {
        let state = self.open_state(operation)?;
        if let Some(Children::Array(_)) = state.children.borrow().get(key) {
            return Err(ElementError::KeyHoldsArray(key.to_string()));
        }
        self.store(state, operation, key, Some(Children::Single(child)))
    }

    pub fn modify_array_child<C, M>(
        &self,
        key: &str,
        create_if_absent: C,
        modify_if_present: M,
    ) -> Result<(), ElementError>
    where
        C: FnOnce() -> Vec<Element>,
        M: FnOnce(&mut Vec<Element>),
    {
        self.in_implicit_operation(|op| {
            self.modify_array_child_in(op, key, create_if_absent, modify_if_present)
        })
    }

    /// Creates the array under `key` if absent, otherwise edits a copy of it.
    ///
    /// Both closures run with no borrow held on this node.
    pub fn modify_array_child_in<C, M>(
        &self,
        operation: OperationId,
        key: &str,
        create_if_absent: C,
        modify_if_present: M,
    ) -> Result<(), ElementError>
    where
        C: FnOnce() -> Vec<Element>,
        M: FnOnce(&mut Vec<Element>),
    {
        let state = self.open_state(operation)?;
        let current = state.children.borrow().get(key).cloned();
        let next = match current {
            None => create_if_absent(),
            Some(Children::Array(mut items)) => {
                modify_if_present(&mut items);
                items
            }
            Some(Children::Single(_)) => {
                return Err(ElementError::KeyHoldsSingle(key.to_string()));
            }
        };
        self.store(state, operation, key, Some(Children::Array(next)))
    }

    pub fn replace_child(&self, key: &str, children: Children) -> Result<(), ElementError> {
        self.in_implicit_operation(|op| self.replace_child_in(op, key, children))
    }

    /// Sets `key` to either representation, switching single/array if needed.
    pub fn replace_child_in(
        &self,
        operation: OperationId,
        key: &str,
        children: Children,
    ) -> Result<(), ElementError> {
        let state = self.open_state(operation)?;
        self.store(state, operation, key, Some(children))
    }

    pub fn remove_child(&self, key: &str) -> Result<(), ElementError> {
        self.in_implicit_operation(|op| self.remove_child_in(op, key))
    }

    pub fn remove_child_in(&self, operation: OperationId, key: &str) -> Result<(), ElementError> {
        let state = self.open_state(operation)?;
        self.store(state, operation, key, None)
    }

    // ── Listeners ─────────────────────────────────────────────────────────

    /// Registers a listener for this node's change batches.
    ///
    /// Listeners run synchronously when an operation ends, in registration
    /// order. They may mutate the tree and (un)subscribe re-entrantly.
    pub fn on_change<F>(&self, listener: F) -> Result<ListenerId, ElementError>
    where
        F: Fn(&ChangedChildrenBatch) + 'static,
    {
        let state = self.node_state()?;
        let id = state.next_listener_id.get();
        state.next_listener_id.set(id.saturating_add(1));
        state.listeners.borrow_mut().insert(id, Rc::new(listener));
        Ok(id)
    }

    pub fn off_change(&self, listener_id: ListenerId) -> bool {
        let Ok(state) = self.node_state() else {
            return false;
        };
        // Dropped outside the borrow: the closure may own observers of this node.
        let removed = state.listeners.borrow_mut().remove(&listener_id);
        removed.is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.node_state()
            .map(|state| state.listeners.borrow().len())
            .unwrap_or(0)
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        match (&*self.0, &*other.0) {
            (Inner::Leaf(a), Inner::Leaf(b)) => a == b,
            _ => self.ptr_eq(other),
        }
    }
}

impl Eq for Element {}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            Inner::Leaf(value) => f.debug_tuple("Leaf").field(value).finish(),
            Inner::Node(state) => match state.children.try_borrow() {
                Ok(children) => f
                    .debug_struct("Node")
                    .field("addr", &format_args!("{:#x}", self.addr()))
                    .field("keys", &children.keys().collect::<Vec<_>>())
                    .finish(),
                Err(_) => f.debug_struct("Node").finish_non_exhaustive(),
            },
        }
    }
}

impl From<Value> for Element {
    fn from(value: Value) -> Self {
        Element::leaf(value)
    }
}

/// Scoped operation on one node.
///
/// All mutations made through the guard are reported as a single batch when
/// it is finished or dropped.
pub struct Operation<'a> {
    element: &'a Element,
    id: OperationId,
    finished: bool,
}

impl<'a> Operation<'a> {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn element(&self) -> &'a Element {
        self.element
    }

    pub fn set_single_child(&self, key: &str, child: Element) -> Result<(), ElementError> {
        self.element.set_single_child_in(self.id, key, child)
    }

    pub fn modify_array_child<C, M>(
        &self,
        key: &str,
        create_if_absent: C,
        modify_if_present: M,
    ) -> Result<(), ElementError>
    where
        C: FnOnce() -> Vec<Element>,
        M: FnOnce(&mut Vec<Element>),
    {
        self.element
            .modify_array_child_in(self.id, key, create_if_absent, modify_if_present)
    }

    pub fn replace_child(&self, key: &str, children: Children) -> Result<(), ElementError> {
        self.element.replace_child_in(self.id, key, children)
    }

    pub fn remove_child(&self, key: &str) -> Result<(), ElementError> {
        self.element.remove_child_in(self.id, key)
    }

    pub fn finish(mut self) -> Result<(), ElementError> {
        self.finished = true;
        self.element.end_operation(self.id)
    }
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.element.end_operation(self.id);
        }
    }
}
