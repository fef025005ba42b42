//! Change aggregation for node mutations.
//!
//! Every primitive child mutation is recorded against an open operation.
//! When the operation ends, records are collapsed per key (oldest old value,
//! newest new value) and handed back as a single [`ChangedChildrenBatch`].
//! Keys whose net effect is "no change" are dropped.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;

use crate::element::{Children, Element, ElementError};

thread_local! {
    static NEXT_OPERATION_ID: Cell<u64> = const { Cell::new(1) };
}

/// Opaque token grouping the mutations reported in one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(u64);

impl OperationId {
    pub(crate) fn next() -> Self {
        NEXT_OPERATION_ID.with(|next| {
            let id = next.get();
            next.set(id.saturating_add(1));
            OperationId(id)
        })
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Net change of one key within one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedChild {
    pub operation: OperationId,
    pub key: String,
    pub old_values: Vec<Element>,
    pub new_values: Vec<Element>,
    pub was_array: bool,
    pub is_array: bool,
}

impl ChangedChild {
    /// Describes the transition of `key` from `old` to `new`; `None` means absent.
    pub fn between(
        operation: OperationId,
        key: impl Into<String>,
        old: Option<&Children>,
        new: Option<&Children>,
    ) -> Self {
        let (old_values, was_array) = flatten(old);
        let (new_values, is_array) = flatten(new);
        Self {
            operation,
            key: key.into(),
            old_values,
            new_values,
            was_array,
            is_array,
        }
    }

    /// `true` when the values and the array/single shape are unchanged.
    pub fn is_noop(&self) -> bool {
        self.was_array == self.is_array && self.old_values == self.new_values
    }

    fn absorb(&mut self, later: ChangedChild) {
        self.new_values = later.new_values;
        self.is_array = later.is_array;
    }
}

fn flatten(children: Option<&Children>) -> (Vec<Element>, bool) {
    match children {
        None => (Vec::new(), false),
        Some(Children::Single(child)) => (vec![child.clone()], false),
        Some(Children::Array(items)) => (items.clone(), true),
    }
}

/// All collapsed changes of one operation, in first-touched key order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedChildrenBatch {
    operation: OperationId,
    changes: Vec<ChangedChild>,
}

impl ChangedChildrenBatch {
    pub fn operation(&self) -> OperationId {
        self.operation
    }

    pub fn changes(&self) -> &[ChangedChild] {
        &self.changes
    }

    pub fn get(&self, key: &str) -> Option<&ChangedChild> {
        self.changes.iter().find(|change| change.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|change| change.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Per-node bookkeeping of open operations.
#[derive(Debug, Default)]
pub struct ChangeAggregator {
    open: BTreeMap<OperationId, IndexMap<String, ChangedChild>>,
}

impl ChangeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a fresh operation. Concurrently open operations never share records.
    pub fn begin(&mut self) -> OperationId {
        let id = OperationId::next();
        self.open.insert(id, IndexMap::new());
        id
    }

    pub fn is_open(&self, operation: OperationId) -> bool {
        self.open.contains_key(&operation)
    }

    pub fn open_operations(&self) -> usize {
        self.open.len()
    }

    pub fn record(&mut self, change: ChangedChild) -> Result<(), ElementError> {
        let pending = self
            .open
            .get_mut(&change.operation)
            .ok_or(ElementError::UnknownOperation(change.operation))?;
        match pending.get_mut(&change.key) {
            Some(earlier) => earlier.absorb(change),
            None => {
                pending.insert(change.key.clone(), change);
            }
        }
        Ok(())
    }

    /// Closes `operation`. Returns `None` when nothing changed on net.
    pub fn end(
        &mut self,
        operation: OperationId,
    ) -> Result<Option<ChangedChildrenBatch>, ElementError> {
        let pending = self
            .open
            .remove(&operation)
            .ok_or(ElementError::UnknownOperation(operation))?;
        let changes: Vec<ChangedChild> = pending
            .into_values()
            .filter(|change| !change.is_noop())
            .collect();
        if changes.is_empty() {
            return Ok(None);
        }
        Ok(Some(ChangedChildrenBatch { operation, changes }))
    }
}
