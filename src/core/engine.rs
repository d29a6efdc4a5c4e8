//! The engine context: node stores, the id table and interning.
//!
//! Every operation takes the engine by reference, so several isolated
//! engines can live side by side (handy for tests).
//!
//! # Handles and locations
//!
//! A [`NodeRef`] holds the node's permanent id. The engine keeps a map
//! from live id to `(kind, slot)`; compaction rewrites the slot of each
//! survivor and drops the entry of each freed node, so the map is bounded by
//! the live node count, not by the ids ever issued. Resolving a missing
//! entry is an integrity violation, which is how use-after-free surfaces.

use std::fmt;

use rustc_hash::FxHashMap;
use tracing::trace;

use super::hash::ConstantParts;
use super::integrity_violation;
use super::node::{Factor, Kind, Node, NodeFlags, NodeKind, NodeRef, Term};
use super::overflow::{OverflowStore, Ticket, decode_pairs, encode_pairs};
use super::store::Store;
use crate::config::EngineConfig;

/// Where a live node currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Location {
    pub kind: Kind,
    pub slot: u32,
}

/// Running counters, exposed for the driver's logging and tuning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Interning requests answered by an existing node, per kind.
    pub hits: [u64; Kind::COUNT],
    /// Interning requests that created a node, per kind.
    pub misses: [u64; Kind::COUNT],
    /// Sums rebuilt in the storage of their first term.
    pub in_place: u64,
    pub compactions: u64,
    pub freed: u64,
    pub spilled: u64,
    pub restored: u64,
}

/// Owner of every node store.
pub struct Engine {
    config: EngineConfig,
    pub(crate) stores: [Store; Kind::COUNT],
    pub(crate) locations: FxHashMap<u64, Location>,
    next_id: u64,
    pub(crate) pending_discards: usize,
    pub(crate) stats: EngineStats,
    overflow: Option<Box<dyn OverflowStore>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: Vec<(Kind, usize)> = Kind::ALL.iter().map(|&k| (k, self.count(k))).collect();
        f.debug_struct("Engine")
            .field("counts", &counts)
            .field("ids_issued", &self.next_id)
            .field("pending_discards", &self.pending_discards)
            .field("overflow", &self.overflow.is_some())
            .finish_non_exhaustive()
    }
}

impl Engine {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let stores = Kind::ALL.map(|k| {
            Store::new(
                k,
                config.initial_capacity(k),
                config.initial_buckets(k),
                config.bucket_load(),
            )
        });
        Self {
            config,
            stores,
            locations: FxHashMap::default(),
            next_id: 0,
            pending_discards: 0,
            stats: EngineStats::default(),
            overflow: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Install the secondary store used by [`spill`](Self::spill), returning
    /// the previous one.
    pub fn set_overflow(&mut self, store: Box<dyn OverflowStore>) -> Option<Box<dyn OverflowStore>> {
        self.overflow.replace(store)
    }

    /// Live nodes across all stores.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.stores.iter().map(Store::len).sum()
    }

    /// Live nodes of one kind.
    #[must_use]
    pub fn count(&self, kind: Kind) -> usize {
        self.stores[kind.slot()].len()
    }

    /// Ids handed out so far; the next node gets this id.
    #[must_use]
    pub fn ids_issued(&self) -> u64 {
        self.next_id
    }

    /// Discards recorded since the last heavy compaction.
    #[must_use]
    pub fn pending_discards(&self) -> usize {
        self.pending_discards
    }

    // =========================================================================
    // ACCESS
    // =========================================================================

    #[inline]
    #[track_caller]
    pub(crate) fn locate(&self, node: NodeRef) -> Location {
        match self.locations.get(&node.0).copied() {
            Some(loc) => loc,
            None => integrity_violation(format_args!(
                "dereference of freed or unknown node #{}",
                node.0
            )),
        }
    }

    /// Whether `node` has not been freed by a compaction.
    #[must_use]
    pub fn is_live(&self, node: NodeRef) -> bool {
        self.locations.contains_key(&node.0)
    }

    /// The node behind a handle.
    ///
    /// # Panics
    ///
    /// Panics if `node` was freed: that is a lifecycle bug in the caller.
    #[inline]
    #[must_use]
    #[track_caller]
    pub fn get(&self, node: NodeRef) -> &Node {
        let loc = self.locate(node);
        &self.stores[loc.kind.slot()].nodes[loc.slot as usize]
    }

    #[inline]
    #[track_caller]
    pub(crate) fn get_mut(&mut self, node: NodeRef) -> &mut Node {
        let loc = self.locate(node);
        &mut self.stores[loc.kind.slot()].nodes[loc.slot as usize]
    }

    #[must_use]
    pub fn kind_of(&self, node: NodeRef) -> Kind {
        self.locate(node).kind
    }

    /// Live nodes of one kind, in store order.
    pub fn nodes(&self, kind: Kind) -> impl Iterator<Item = &Node> {
        self.stores[kind.slot()].nodes.iter()
    }

    /// Current store slot of a node. Changes on compaction.
    #[must_use]
    pub fn slot_of(&self, node: NodeRef) -> u32 {
        self.locate(node).slot
    }

    #[inline]
    pub(crate) fn key_of(&self, id: u64) -> u64 {
        self.get(NodeRef(id)).key
    }

    /// Numeric value of a constant node.
    #[must_use]
    pub fn constant_value(&self, node: NodeRef) -> Option<f64> {
        match self.get(node).kind {
            NodeKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    pub(crate) fn traced(&self, id: u64, event: &str) {
        if self.config.is_traced(id) {
            trace!(target: "pedpoly::trace", node = id, "{event}");
        }
    }

    // =========================================================================
    // INTERNING
    // =========================================================================

    /// Return the canonical node for `payload`, creating it on a miss.
    pub(crate) fn intern(&mut self, kind: Kind, key: u64, payload: NodeKind) -> NodeRef {
        if let Some(existing) = self.lookup(kind, key, &payload) {
            self.stats.hits[kind.slot()] += 1;
            self.traced(existing.0, "intern hit");
            return existing;
        }
        self.stats.misses[kind.slot()] += 1;
        self.insert_new(kind, key, payload)
    }

    /// Find a node structurally equal to `payload` among the key's candidates.
    pub(crate) fn lookup(&mut self, kind: Kind, key: u64, payload: &NodeKind) -> Option<NodeRef> {
        let s = kind.slot();
        let (bucket, span) = self.stores[s].index.candidate_span(key);
        for pos in span {
            let slot = self.stores[s].index.slot_at(bucket, pos) as usize;
            let id = self.stores[s].nodes[slot].id;
            if self.stores[s].nodes[slot].kind.is_offline() {
                self.restore(NodeRef(id));
            }
            if same_structure(&self.stores[s].nodes[slot].kind, payload) {
                return Some(NodeRef(id));
            }
        }
        None
    }

    /// Append a node without looking for an equal one first.
    pub(crate) fn insert_new(&mut self, kind: Kind, key: u64, payload: NodeKind) -> NodeRef {
        let id = self.issue_id();
        payload.for_each_child(|c| self.get_mut(c).add_parent());
        let slot = self.stores[kind.slot()].push(Node::new(id, key, payload));
        self.locations.insert(id, Location { kind, slot });
        self.traced(id, "created");
        NodeRef(id)
    }

    /// Clear the pass-scoped `EVAL` bit everywhere.
    pub(crate) fn begin_pass(&mut self) {
        crate::parallel::clear_flag(&mut self.stores, NodeFlags::EVAL);
    }

    // =========================================================================
    // OVERFLOW
    // =========================================================================

    /// Move the term list of a large Sum or Product to the overflow store.
    ///
    /// Returns false when no overflow store is installed, the node is not a
    /// Sum/Product, or it has fewer terms than the configured threshold.
    /// The node keeps its id, key and slot; any later structural access
    /// brings the terms back.
    pub fn spill(&mut self, node: NodeRef) -> bool {
        if self.overflow.is_none() {
            return false;
        }
        let threshold = self.config.spill_threshold();
        let loc = self.locate(node);
        let block = match &self.get(node).kind {
            NodeKind::Sum(terms) if terms.len() >= threshold => {
                encode_pairs(terms.iter().map(|t| (t.coefficient, t.node.0)))
            }
            NodeKind::Product(factors) if factors.len() >= threshold => {
                encode_pairs(factors.iter().map(|f| (f64::from(f.exponent), f.node.0)))
            }
            _ => return false,
        };
        let len = block.len() / 2;
        let Some(store) = self.overflow.as_mut() else {
            return false;
        };
        let ticket = store.stash(block);
        self.get_mut(node).kind = NodeKind::Offline {
            ticket,
            kind: loc.kind,
            len,
        };
        self.stats.spilled += 1;
        self.traced(node.0, "spilled");
        true
    }

    /// Whether a node's terms currently sit in the overflow store.
    #[must_use]
    pub fn is_offline(&self, node: NodeRef) -> bool {
        self.get(node).kind.is_offline()
    }

    /// Bring an offline node's terms back into memory. No-op otherwise.
    pub fn restore(&mut self, node: NodeRef) {
        let NodeKind::Offline { ticket, kind, len } = self.get(node).kind else {
            return;
        };
        let block = self
            .overflow
            .as_mut()
            .and_then(|store| store.retrieve(ticket));
        let Some(block) = block else {
            integrity_violation(format_args!(
                "overflow ticket {} for node #{} cannot be retrieved",
                ticket.0, node.0
            ))
        };
        let restored = match kind {
            Kind::Sum => NodeKind::Sum(
                decode_pairs(&block)
                    .map(|(coefficient, id)| Term {
                        coefficient,
                        node: NodeRef(id),
                    })
                    .collect(),
            ),
            #[allow(
                clippy::cast_possible_truncation,
                reason = "Exponents were written from i32 values"
            )]
            Kind::Product => NodeKind::Product(
                decode_pairs(&block)
                    .map(|(exponent, id)| Factor {
                        exponent: exponent as i32,
                        node: NodeRef(id),
                    })
                    .collect(),
            ),
            other => integrity_violation(format_args!(
                "node #{} is offline with non-list kind {other}",
                node.0
            )),
        };
        if block.len() / 2 != len {
            integrity_violation(format_args!(
                "overflow block for node #{} holds {} pairs, expected {len}",
                node.0,
                block.len() / 2
            ));
        }
        if let Some(store) = self.overflow.as_mut() {
            store.release(ticket);
        }
        self.get_mut(node).kind = restored;
        self.stats.restored += 1;
        self.traced(node.0, "restored");
    }

    /// Hand a freed node's ticket back to the overflow store and return
    /// its child ids.
    pub(crate) fn release_offline(&mut self, payload: &NodeKind) -> Vec<NodeRef> {
        let NodeKind::Offline { ticket, .. } = payload else {
            return payload.children();
        };
        let children = self.peek_offline(*ticket);
        if let Some(store) = self.overflow.as_mut() {
            store.release(*ticket);
        }
        children
    }

    /// Child ids of any node. An offline node's block is read but the node
    /// stays offline.
    pub(crate) fn children_of(&mut self, node: NodeRef) -> Vec<NodeRef> {
        if let NodeKind::Offline { ticket, .. } = self.get(node).kind {
            return self.peek_offline(ticket);
        }
        self.get(node).kind.children()
    }

    fn peek_offline(&mut self, ticket: Ticket) -> Vec<NodeRef> {
        self.overflow
            .as_mut()
            .and_then(|store| store.retrieve(ticket))
            .map(|block| decode_pairs(&block).map(|(_, id)| NodeRef(id)).collect())
            .unwrap_or_default()
    }

    /// Next unused id. Ids are never handed out twice.
    pub(crate) fn issue_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn set_location(&mut self, id: u64, location: Option<Location>) {
        match location {
            Some(loc) => {
                self.locations.insert(id, loc);
            }
            None => {
                self.locations.remove(&id);
            }
        }
    }

    /// Give back id-map memory after a compaction freed most entries.
    pub(crate) fn shrink_locations(&mut self) {
        if self.locations.capacity() > 4 * self.locations.len().max(64) {
            self.locations.shrink_to_fit();
        }
    }
}

/// Structural equality between a stored payload and a candidate payload.
pub(crate) fn same_structure(a: &NodeKind, b: &NodeKind) -> bool {
    match (a, b) {
        (NodeKind::Constant(x), NodeKind::Constant(y)) => {
            ConstantParts::of(*x) == ConstantParts::of(*y)
        }
        (NodeKind::Variable(x), NodeKind::Variable(y)) => x.binding == y.binding,
        (NodeKind::Sum(x), NodeKind::Sum(y)) => {
            x.len() == y.len()
                && x.iter().zip(y).all(|(s, t)| {
                    s.node == t.node && s.coefficient.to_bits() == t.coefficient.to_bits()
                })
        }
        (NodeKind::Product(x), NodeKind::Product(y)) => x == y,
        (
            NodeKind::FunctionCall { name: n1, args: a1 },
            NodeKind::FunctionCall { name: n2, args: a2 },
        ) => n1 == n2 && a1 == a2,
        (NodeKind::External(x), NodeKind::External(y)) => x.name == y.name,
        _ => false,
    }
}
