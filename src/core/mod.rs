//! Core storage for the polynomial engine
//!
//! This module contains the fundamental types:
//! - `Engine` - the explicit context owning every node store
//! - `Node` / `NodeKind` / `NodeRef` - arena nodes and their stable handles
//! - `Bindings` - caller-owned variable storage
//! - `OverflowStore` - secondary storage for spilled term lists
//! - structural keys for hash-consing

pub(crate) mod bindings;
pub(crate) mod engine;
pub(crate) mod hash;
pub(crate) mod node;
pub(crate) mod overflow;
pub(crate) mod store;

pub use bindings::{Binding, BindingKey, Bindings};
pub use engine::{Engine, EngineStats};
pub use hash::ConstantParts;
pub use node::{External, Factor, Kind, Node, NodeFlags, NodeKind, NodeRef, Term, Variable};
pub use overflow::{MemoryOverflow, OverflowStore, Ticket};

/// Report a broken structural invariant and abort.
///
/// These indicate lifecycle bugs (a freed node dereferenced, an index entry
/// that should exist but does not) and are never recovered from.
#[cold]
#[track_caller]
pub(crate) fn integrity_violation(args: std::fmt::Arguments<'_>) -> ! {
    tracing::error!(target: "pedpoly::integrity", "{}", args);
    panic!("polynomial integrity violation: {args}")
}
