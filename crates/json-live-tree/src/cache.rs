//! Identity-keyed deduplication of incoming trees.
//!
//! The cache maps an identity key to a weakly held canonical entry. Merging
//! an element whose key is already live folds it into the canonical element;
//! otherwise the element itself becomes canonical. Entries live exactly as
//! long as some [`CanonicalHandle`] clone does.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use thiserror::Error;
use tracing::debug;

use crate::directory::Directory;
use crate::element::Element;
use crate::merge::{merge_with_identity_selector, MergeError};
use crate::observer::{GrandChildrenContainer, PathObserver, WeakPathObserver};
use crate::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("identity selector produced no key for the incoming element")]
    MissingIdentityKey,
    #[error("merge into canonical element failed: {0}")]
    Merge(#[from] MergeError),
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::MissingIdentityKey => ErrorKind::MissingIdentityKey,
            CacheError::Merge(err) => err.kind(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// Dead entries are purged after this many registrations; `0` disables it.
    pub sweep_interval: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { sweep_interval: 64 }
    }
}

impl CacheOptions {
    pub fn with_sweep_interval(mut self, sweep_interval: usize) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }
}

/// Strong reference to a canonical element and its shared observers.
pub struct CanonicalHandle<K> {
    inner: Rc<HandleInner<K>>,
}

struct HandleInner<K> {
    key: K,
    element: Element,
    observers: RefCell<HashMap<Directory, WeakPathObserver>>,
}

impl<K> Clone for CanonicalHandle<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K: fmt::Debug> fmt::Debug for CanonicalHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanonicalHandle")
            .field("key", &self.inner.key)
            .field("element", &self.inner.element)
            .finish()
    }
}

impl<K: 'static> CanonicalHandle<K> {
    pub fn key(&self) -> &K {
        &self.inner.key
    }

    pub fn element(&self) -> &Element {
        &self.inner.element
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current values under `directory`.
    pub fn current_value(&self, directory: impl Into<Directory>) -> GrandChildrenContainer {
        let directory = directory.into();
        if let Some(observer) = self.live_observer(&directory) {
            if let Ok(current) = observer.current() {
                return current;
            }
        }
        GrandChildrenContainer::resolve(&self.inner.element, &directory)
    }

    /// Observer for `directory`, shared with other callers while any holds it.
    ///
    /// The observer keeps this handle, and so the cache entry, alive.
    pub fn changes(&self, directory: impl Into<Directory>) -> PathObserver {
        let directory = directory.into();
        if let Some(observer) = self.live_observer(&directory) {
            return observer;
        }
        let owner: Rc<dyn Any> = self.inner.clone();
        let observer =
            PathObserver::with_owner(self.inner.element.clone(), directory.clone(), Some(owner));
        let mut observers = self.inner.observers.borrow_mut();
        observers.retain(|_, weak| weak.upgrade().is_some());
        observers.insert(directory, observer.downgrade());
        observer
    }

    fn live_observer(&self, directory: &Directory) -> Option<PathObserver> {
        self.inner
            .observers
            .borrow()
            .get(directory)
            .and_then(WeakPathObserver::upgrade)
            .filter(|observer| !observer.is_stopped())
    }

    fn downgrade(&self) -> Weak<HandleInner<K>> {
        Rc::downgrade(&self.inner)
    }
}

type ArrayIdentity<K> = Box<dyn Fn(&Element, &[String]) -> Option<K>>;

pub struct IdentityCache<K> {
    entries: HashMap<K, Weak<HandleInner<K>>>,
    array_identity: ArrayIdentity<K>,
    options: CacheOptions,
    registrations: usize,
}

impl<K> IdentityCache<K>
where
    K: Eq + Hash + Clone + fmt::Debug + 'static,
{
    /// `array_identity` matches array elements when merging into an existing entry.
    pub fn new<F>(array_identity: F) -> Self
    where
        F: Fn(&Element, &[String]) -> Option<K> + 'static,
    {
        Self::with_options(CacheOptions::default(), array_identity)
    }

    pub fn with_options<F>(options: CacheOptions, array_identity: F) -> Self
    where
        F: Fn(&Element, &[String]) -> Option<K> + 'static,
    {
        Self {
            entries: HashMap::new(),
            array_identity: Box::new(array_identity),
            options,
            registrations: 0,
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// Merges `incoming` into the canonical element for its identity key, or
    /// registers it as canonical.
    ///
    /// Returns `Ok(None)` when `key_filter` rejects the key.
    pub fn merge<I, P>(
        &mut self,
        incoming: &Element,
        identity_of: I,
        key_filter: P,
    ) -> Result<Option<CanonicalHandle<K>>, CacheError>
    where
        I: FnOnce(&Element) -> Option<K>,
        P: FnOnce(&K) -> bool,
    {
        let key = identity_of(incoming).ok_or(CacheError::MissingIdentityKey)?;
        if !key_filter(&key) {
            return Ok(None);
        }

        if let Some(handle) = self.get(&key) {
            debug!(key = ?key, "merging into canonical element");
            merge_with_identity_selector(handle.element(), incoming, &*self.array_identity)?;
            return Ok(Some(handle));
        }

        debug!(key = ?key, "registering canonical element");
        let handle = CanonicalHandle {
            inner: Rc::new(HandleInner {
                key: key.clone(),
                element: incoming.clone(),
                observers: RefCell::new(HashMap::new()),
            }),
        };
        self.entries.insert(key, handle.downgrade());
        self.registrations = self.registrations.wrapping_add(1);
        if self.options.sweep_interval > 0 && self.registrations % self.options.sweep_interval == 0 {
            self.purge();
        }
        Ok(Some(handle))
    }

    /// The live handle for `key`, if any.
    pub fn get(&self, key: &K) -> Option<CanonicalHandle<K>> {
        self.entries
            .get(key)
            .and_then(Weak::upgrade)
            .map(|inner| CanonicalHandle { inner })
    }

    /// Drops entries whose handles are gone; returns how many were dropped.
    pub fn purge(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "purged dead cache entries");
        }
        evicted
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: fmt::Debug> fmt::Debug for IdentityCache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityCache")
            .field("entries", &self.entries.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
