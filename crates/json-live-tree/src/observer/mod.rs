//! Path-scoped observation of a tree.
//!
//! A [`PathObserver`] resolves a [`Directory`] from a root element and
//! subscribes to every node it had to read along the way. Whenever one of
//! those nodes reports a batch, the directory is walked again from the root,
//! subscriptions follow the nodes now on the path, and listeners receive the
//! new [`GrandChildrenContainer`] if it differs from the last one.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::mem;
use std::rc::{Rc, Weak};

use thiserror::Error;
use tracing::debug;

use crate::directory::Directory;
use crate::element::{Element, ListenerId};
use crate::ErrorKind;

mod resolve;

pub use resolve::{GrandChild, GrandChildrenContainer, IndexPath};
use resolve::resolve;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserverError {
    #[error("path observer has been stopped")]
    UseAfterStop,
}

impl ObserverError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::UseAfterStop
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathEvent {
    Changed(GrandChildrenContainer),
    Completed,
}

type PathListener = Rc<dyn Fn(&PathEvent)>;

/// Cheaply cloneable handle; the observation ends on [`PathObserver::stop`]
/// or when the last clone is dropped.
#[derive(Clone)]
pub struct PathObserver {
    inner: Rc<ObserverInner>,
}

struct ObserverInner {
    root: Element,
    directory: Directory,
    state: RefCell<ObserverState>,
    listeners: RefCell<BTreeMap<ListenerId, PathListener>>,
    next_listener_id: Cell<ListenerId>,
    /// Kept alive for as long as the observer is.
    _owner: Option<Rc<dyn Any>>,
}

struct ObserverState {
    stopped: bool,
    current: GrandChildrenContainer,
    /// Bumped whenever `current` changes.
    generation: u64,
    watched: Vec<(Element, ListenerId)>,
}

impl PathObserver {
    pub fn new(root: Element, directory: impl Into<Directory>) -> Self {
        Self::with_owner(root, directory.into(), None)
    }

    pub(crate) fn with_owner(
        root: Element,
        directory: Directory,
        owner: Option<Rc<dyn Any>>,
    ) -> Self {
        let resolution = resolve(&root, &directory);
        let inner = Rc::new(ObserverInner {
            root,
            directory,
            state: RefCell::new(ObserverState {
                stopped: false,
                current: resolution.container,
                generation: 0,
                watched: Vec::new(),
            }),
            listeners: RefCell::new(BTreeMap::new()),
            next_listener_id: Cell::new(1),
            _owner: owner,
        });
        inner.rewatch(resolution.watched);
        PathObserver { inner }
    }

    pub fn root(&self) -> &Element {
        &self.inner.root
    }

    pub fn directory(&self) -> &Directory {
        &self.inner.directory
    }

    /// `true` when both handles refer to the same observation.
    pub fn ptr_eq(&self, other: &PathObserver) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.state.borrow().stopped
    }

    /// The last resolved value set.
    pub fn current(&self) -> Result<GrandChildrenContainer, ObserverError> {
        let state = self.inner.state.borrow();
        if state.stopped {
            return Err(ObserverError::UseAfterStop);
        }
        Ok(state.current.clone())
    }

    /// Number of nodes currently subscribed to along the directory.
    pub fn watched_nodes(&self) -> usize {
        self.inner.state.borrow().watched.len()
    }

    /// Registers a listener for value changes and completion.
    ///
    /// If a listener changes the observed value re-entrantly, the newer value
    /// is delivered to every listener and the older one is not delivered to
    /// the listeners it had not reached yet.
    pub fn on_change<F>(&self, listener: F) -> Result<ListenerId, ObserverError>
    where
        F: Fn(&PathEvent) + 'static,
    {
        if self.is_stopped() {
            return Err(ObserverError::UseAfterStop);
        }
        let id = self.inner.next_listener_id.get();
        self.inner.next_listener_id.set(id.saturating_add(1));
        self.inner.listeners.borrow_mut().insert(id, Rc::new(listener));
        Ok(id)
    }

    pub fn off_change(&self, listener_id: ListenerId) -> bool {
        let removed = self.inner.listeners.borrow_mut().remove(&listener_id);
        removed.is_some()
    }

    /// Unsubscribes from the tree and emits [`PathEvent::Completed`]. Idempotent.
    pub fn stop(&self) {
        let watched = {
            let mut state = self.inner.state.borrow_mut();
            if state.stopped {
                return;
            }
            state.stopped = true;
            mem::take(&mut state.watched)
        };
        for (node, id) in watched {
            node.off_change(id);
        }
        debug!(directory = %self.inner.directory, "path observer stopped");
        self.inner.emit(&PathEvent::Completed);
        let listeners = mem::take(&mut *self.inner.listeners.borrow_mut());
        drop(listeners);
    }

    pub(crate) fn downgrade(&self) -> WeakPathObserver {
        WeakPathObserver(Rc::downgrade(&self.inner))
    }
}

impl std::fmt::Debug for PathObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathObserver")
            .field("directory", &self.inner.directory)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

pub(crate) struct WeakPathObserver(Weak<ObserverInner>);

impl WeakPathObserver {
    pub(crate) fn upgrade(&self) -> Option<PathObserver> {
        self.0.upgrade().map(|inner| PathObserver { inner })
    }
}

impl ObserverInner {
    /// Keeps subscriptions on nodes still on the path, drops the rest and
    /// subscribes to newly reached nodes.
    fn rewatch(self: &Rc<Self>, nodes: Vec<Element>) {
        let mut previous = mem::take(&mut self.state.borrow_mut().watched);
        let mut watched = Vec::with_capacity(nodes.len());
        let mut added = 0usize;
        for node in nodes {
            if let Some(position) = previous.iter().position(|(known, _)| known.ptr_eq(&node)) {
                watched.push(previous.swap_remove(position));
                continue;
            }
            let weak = Rc::downgrade(self);
            let subscribed = node.on_change(move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.refresh();
                }
            });
            if let Ok(id) = subscribed {
                watched.push((node, id));
                added += 1;
            }
        }
        let removed = previous.len();
        for (node, id) in previous {
            node.off_change(id);
        }
        if added > 0 || removed > 0 {
            debug!(
                directory = %self.directory,
                added,
                removed,
                watched = watched.len(),
                "path observer resubscribed"
            );
        }
        self.state.borrow_mut().watched = watched;
    }

    fn refresh(self: &Rc<Self>) {
        if self.state.borrow().stopped {
            return;
        }
        let resolution = resolve(&self.root, &self.directory);
        self.rewatch(resolution.watched);
        let changed = {
            let mut state = self.state.borrow_mut();
            if state.current == resolution.container {
                None
            } else {
                state.current = resolution.container.clone();
                state.generation += 1;
                Some((resolution.container, state.generation))
            }
        };
        if let Some((container, generation)) = changed {
            debug!(
                directory = %self.directory,
                values = container.len(),
                "path observer value changed"
            );
            self.emit_changed(PathEvent::Changed(container), generation);
        }
    }

    fn emit_changed(&self, event: PathEvent, generation: u64) {
        let listeners: Vec<PathListener> = self.listeners.borrow().values().cloned().collect();
        for listener in listeners {
            {
                let state = self.state.borrow();
                if state.stopped || state.generation != generation {
                    return;
                }
            }
            listener(&event);
        }
    }

    fn emit(&self, event: &PathEvent) {
        let listeners: Vec<PathListener> = self.listeners.borrow().values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Drop for ObserverInner {
    fn drop(&mut self) {
        for (node, id) in mem::take(&mut self.state.get_mut().watched) {
            node.off_change(id);
        }
    }
}
