//! Node types stored in the per-kind arenas.
//!
//! A node is addressed from the outside by a [`NodeRef`], which wraps the
//! node's permanent creation id. The store index of a node is private to the
//! engine and is rewritten every time a compaction pass renumbers survivors.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};
use std::sync::Arc;

use super::bindings::BindingKey;
use super::overflow::Ticket;
use crate::evaluator::CompiledPoly;

// =============================================================================
// HANDLES
// =============================================================================

/// Stable handle to an interned node.
///
/// The wrapped id is assigned at creation, increases monotonically and is
/// never reused, so comparing two handles compares creation order. Because
/// of hash-consing, two handles are equal iff they denote structurally equal
/// expressions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeRef(pub(crate) u64);

impl NodeRef {
    /// The permanent creation id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Expression kinds, one store per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Constant = 0,
    Variable = 1,
    Sum = 2,
    Product = 3,
    FunctionCall = 4,
    External = 5,
}

impl Kind {
    /// Number of node stores held by an engine.
    pub const COUNT: usize = 6;

    /// All kinds in store order.
    pub const ALL: [Kind; Kind::COUNT] = [
        Kind::Constant,
        Kind::Variable,
        Kind::Sum,
        Kind::Product,
        Kind::FunctionCall,
        Kind::External,
    ];

    #[inline]
    pub(crate) const fn slot(self) -> usize {
        self as usize
    }

    /// Lower-case label used in logs and summaries.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Kind::Constant => "constant",
            Kind::Variable => "variable",
            Kind::Sum => "sum",
            Kind::Product => "product",
            Kind::FunctionCall => "function",
            Kind::External => "external",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// RETENTION FLAGS
// =============================================================================

/// Per-node retention and scratch bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct NodeFlags(u8);

impl NodeFlags {
    /// No bits set. `compact(NodeFlags::NONE)` keeps held nodes only.
    pub const NONE: Self = Self(0);
    /// Pass-scoped scratch bit: visited (and value cached) in the current pass.
    pub const EVAL: Self = Self(1);
    /// Survive the next light compaction.
    pub const KEEP: Self = Self(1 << 1);
    /// Two or more live parents. Informational.
    pub const REFERENCED: Self = Self(1 << 2);
    /// No live parent. Informational.
    pub const TOP: Self = Self(1 << 3);

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for NodeFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for NodeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for NodeFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for NodeFlags {
    type Output = Self;
    fn not(self) -> Self {
        Self(!self.0)
    }
}

// =============================================================================
// NODE PAYLOADS
// =============================================================================

/// A weighted child of a Sum: `coefficient * term`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Term {
    pub coefficient: f64,
    pub node: NodeRef,
}

/// A powered child of a Product: `node ^ exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Factor {
    pub exponent: i32,
    pub node: NodeRef,
}

/// Variable payload. The value lives in the caller's [`Bindings`](super::Bindings).
#[derive(Debug, Clone)]
pub struct Variable {
    pub binding: BindingKey,
    pub name: Arc<str>,
}

/// Native evaluator payload.
#[derive(Clone)]
pub struct External {
    pub name: Arc<str>,
    pub evaluator: Arc<dyn CompiledPoly>,
}

impl fmt::Debug for External {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("External").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Structure of a node.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Constant(f64),
    Variable(Variable),
    /// Canonical terms, sorted by child id, no duplicates.
    Sum(Vec<Term>),
    /// Canonical factors, sorted by child id, no duplicates.
    Product(Vec<Factor>),
    FunctionCall {
        name: Arc<str>,
        args: Vec<NodeRef>,
    },
    External(External),
    /// A Sum or Product whose term list sits in the overflow store.
    Offline {
        ticket: Ticket,
        kind: Kind,
        len: usize,
    },
}

impl NodeKind {
    /// Children in structural order. Offline nodes report none; callers
    /// that need their children restore them first.
    pub(crate) fn for_each_child(&self, mut f: impl FnMut(NodeRef)) {
        match self {
            NodeKind::Sum(terms) => terms.iter().for_each(|t| f(t.node)),
            NodeKind::Product(factors) => factors.iter().for_each(|t| f(t.node)),
            NodeKind::FunctionCall { args, .. } => args.iter().copied().for_each(f),
            NodeKind::Constant(_)
            | NodeKind::Variable(_)
            | NodeKind::External(_)
            | NodeKind::Offline { .. } => {}
        }
    }

    pub(crate) fn children(&self) -> Vec<NodeRef> {
        let mut out = Vec::new();
        self.for_each_child(|c| out.push(c));
        out
    }

    pub(crate) fn is_offline(&self) -> bool {
        matches!(self, NodeKind::Offline { .. })
    }
}

/// A node as stored in its kind's arena.
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) id: u64,
    pub(crate) key: u64,
    pub(crate) flags: NodeFlags,
    pub(crate) hold: u32,
    /// Live parents referring to this node.
    pub(crate) parents: u32,
    /// Valid only while `flags` contains `EVAL`.
    pub(crate) value: f64,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(id: u64, key: u64, kind: NodeKind) -> Self {
        Self {
            id,
            key,
            flags: NodeFlags::TOP,
            hold: 0,
            parents: 0,
            value: 0.0,
            kind,
        }
    }

    #[must_use]
    pub fn handle(&self) -> NodeRef {
        NodeRef(self.id)
    }

    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[must_use]
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    #[must_use]
    pub fn hold_count(&self) -> u32 {
        self.hold
    }

    #[must_use]
    pub fn parent_count(&self) -> u32 {
        self.parents
    }

    #[must_use]
    pub fn key(&self) -> u64 {
        self.key
    }

    pub(crate) fn add_parent(&mut self) {
        self.parents += 1;
        self.flags.remove(NodeFlags::TOP);
        if self.parents >= 2 {
            self.flags.insert(NodeFlags::REFERENCED);
        }
    }

    pub(crate) fn remove_parent(&mut self) {
        self.parents = self.parents.saturating_sub(1);
        if self.parents < 2 {
            self.flags.remove(NodeFlags::REFERENCED);
        }
        if self.parents == 0 {
            self.flags.insert(NodeFlags::TOP);
        }
    }

    /// Approximate heap footprint of the payload, in bytes.
    pub(crate) fn heap_bytes(&self) -> usize {
        match &self.kind {
            NodeKind::Sum(terms) => terms.capacity() * std::mem::size_of::<Term>(),
            NodeKind::Product(factors) => factors.capacity() * std::mem::size_of::<Factor>(),
            NodeKind::FunctionCall { name, args } => {
                name.len() + args.capacity() * std::mem::size_of::<NodeRef>()
            }
            NodeKind::Variable(v) => v.name.len(),
            NodeKind::External(e) => e.name.len(),
            NodeKind::Constant(_) | NodeKind::Offline { .. } => 0,
        }
    }
}
