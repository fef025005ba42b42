//! In-memory mutable tree for JSON-like data.
//!
//! - [`Element`]: leaf or node; nodes are mutated in place and report one
//!   [`ChangedChildrenBatch`] per operation.
//! - [`merge`](merge::merge) / [`merge_with_identity_selector`]: fold one
//!   tree into another while preserving node identity.
//! - [`PathObserver`]: watches a [`Directory`] through arrays and follows
//!   structural replacement.
//! - [`IdentityCache`]: deduplicates incoming trees by identity key into
//!   weakly held canonical elements.
//!
//! Everything is single-threaded and synchronous: listeners run inline before
//! the mutating call returns.

pub mod aggregate;
pub mod cache;
pub mod directory;
pub mod element;
pub mod identity;
pub mod merge;
pub mod observer;

pub use aggregate::{ChangeAggregator, ChangedChild, ChangedChildrenBatch, OperationId};
pub use cache::{CacheError, CacheOptions, CanonicalHandle, IdentityCache};
pub use directory::Directory;
pub use element::{
    Children, Element, ElementError, ElementKind, ListenerId, NodeBuilder, Operation,
};
pub use identity::IdentityKey;
pub use merge::{merge_with_identity_selector, MergeError, MergeSide};
pub use observer::{
    GrandChild, GrandChildrenContainer, IndexPath, ObserverError, PathEvent, PathObserver,
};

/// Coarse classification shared by every error type in this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid argument or wrong element kind; a caller bug.
    PreconditionViolation,
    /// The identity selector produced no key.
    MissingIdentityKey,
    /// A stopped observer was used.
    UseAfterStop,
}

/// Returns the crate version at compile time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
