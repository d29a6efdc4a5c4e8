//! Retention and compaction
//!
//! A node stays alive while it is held, kept, or reachable from a node that
//! is. Nothing is freed eagerly: [`Engine::compact`] sweeps every store in
//! one pass and renumbers the survivors.
//!
//! | operation            | survivors                                  |
//! |----------------------|--------------------------------------------|
//! | `free_polys`         | held, kept, and their descendants          |
//! | `free_kept_polys`    | held and their descendants (KEEP cleared)  |
//! | `compact(mask)`      | held, `flags & mask != 0`, descendants     |
//!
//! # Example
//! ```
//! use pedpoly::{Bindings, Engine};
//!
//! let mut engine = Engine::new();
//! let mut vars = Bindings::new();
//! let x = engine.make_variable("x", vars.double(1.0));
//! let y = engine.make_variable("y", vars.double(2.0));
//! let kept = engine.make_sum(&[(1.0, x), (1.0, y)], false);
//! let scratch = engine.make_product(&[(1, x), (1, y)], false);
//!
//! engine.keep(kept);
//! let stats = engine.free_polys();
//! assert!(engine.is_live(kept) && engine.is_live(x));
//! assert!(!engine.is_live(scratch));
//! assert_eq!(stats.freed, 1);
//! ```

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::core::engine::Location;
use crate::core::integrity_violation;
use crate::core::{Engine, Kind, NodeFlags, NodeRef};

/// What one compaction did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactStats {
    pub kept: usize,
    pub freed: usize,
    pub freed_by_kind: [usize; Kind::COUNT],
    /// Overflow tickets handed back for freed offline nodes.
    pub tickets_released: usize,
}

impl Engine {
    /// Mark `node` and all its descendants KEEP. Stops at nodes that are
    /// already marked, whose descendants are marked too.
    pub fn keep(&mut self, node: NodeRef) {
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            let entry = self.get_mut(n);
            if entry.flags.contains(NodeFlags::KEEP) {
                continue;
            }
            entry.flags.insert(NodeFlags::KEEP);
            self.traced(n.0, "kept");
            stack.extend(self.children_of(n));
        }
    }

    /// Increment the hold count of every node under `node`, once each.
    pub fn hold(&mut self, node: NodeRef) {
        for n in self.subtree(node) {
            self.get_mut(n).hold += 1;
            self.traced(n.0, "held");
        }
    }

    /// Undo one [`hold`](Self::hold) of `node`.
    ///
    /// # Panics
    ///
    /// Panics (after logging) if any node of the subtree is not held: that
    /// is an unbalanced hold/unhold pair in the caller.
    pub fn unhold(&mut self, node: NodeRef) {
        for n in self.subtree(node) {
            let entry = self.get_mut(n);
            if entry.hold == 0 {
                integrity_violation(format_args!(
                    "unhold of node #{} under #{} drops its hold count below zero",
                    n.0, node.0
                ));
            }
            entry.hold -= 1;
            self.traced(n.0, "released");
        }
    }

    /// Distinct nodes reachable from `root`, root included.
    fn subtree(&mut self, root: NodeRef) -> Vec<NodeRef> {
        let mut seen: FxHashSet<u64> = FxHashSet::default();
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(n) = stack.pop() {
            if !seen.insert(n.0) {
                continue;
            }
            // Locate before reading children so a freed handle fails here.
            let _ = self.locate(n);
            out.push(n);
            stack.extend(self.children_of(n));
        }
        out
    }

    /// Free every node that is not held, not flagged with a bit of
    /// `preserve`, and not reachable from a node that survives.
    ///
    /// Survivors move to fresh slots and keep their ids. Freed ids become
    /// invalid: resolving one afterwards is an integrity violation.
    pub fn compact(&mut self, preserve: NodeFlags) -> CompactStats {
        // EVAL doubles as the mark bit, so it cannot be a preserve bit.
        let preserve = preserve & !NodeFlags::EVAL;
        self.begin_pass();

        let mut stack = Vec::new();
        for store in &mut self.stores {
            for n in &mut store.nodes {
                if n.hold > 0 || n.flags.intersects(preserve) {
                    n.flags.insert(NodeFlags::EVAL);
                    stack.push(NodeRef(n.id));
                }
            }
        }
        while let Some(n) = stack.pop() {
            for c in self.children_of(n) {
                let child = self.get_mut(c);
                if !child.flags.contains(NodeFlags::EVAL) {
                    child.flags.insert(NodeFlags::EVAL);
                    stack.push(c);
                }
            }
        }

        let sweeps = crate::parallel::sweep_all(&mut self.stores);
        let mut stats = CompactStats::default();
        let mut freed = Vec::new();
        for (&kind, sweep) in Kind::ALL.iter().zip(sweeps) {
            stats.kept += sweep.moved.len();
            stats.freed_by_kind[kind.slot()] = sweep.freed.len();
            for (id, slot) in sweep.moved {
                self.set_location(id, Some(Location { kind, slot }));
            }
            for node in sweep.freed {
                self.set_location(node.id, None);
                self.traced(node.id, "freed");
                freed.push(node);
            }
        }

        self.shrink_locations();

        stats.freed = freed.len();
        for node in freed {
            if node.kind.is_offline() {
                stats.tickets_released += 1;
            }
            for c in self.release_offline(&node.kind) {
                if self.is_live(c) {
                    self.get_mut(c).remove_parent();
                }
            }
        }

        self.stats.compactions += 1;
        self.stats.freed += stats.freed as u64;
        debug!(
            target: "pedpoly::lifecycle",
            kept = stats.kept,
            freed = stats.freed,
            tickets = stats.tickets_released,
            preserve = preserve.bits(),
            "compaction finished"
        );
        stats
    }

    /// Light compaction: free everything not held or kept.
    pub fn free_polys(&mut self) -> CompactStats {
        self.compact(NodeFlags::KEEP)
    }

    /// Heavy compaction: free everything not held, then clear KEEP on the
    /// survivors and reset the discard counter.
    pub fn free_kept_polys(&mut self) -> CompactStats {
        let stats = self.compact(NodeFlags::NONE);
        crate::parallel::clear_flag(&mut self.stores, NodeFlags::KEEP);
        self.pending_discards = 0;
        stats
    }

    /// Drop the KEEP bit of `node` and count the discard. Once the
    /// configured threshold is reached a heavy compaction runs and its
    /// stats are returned.
    pub fn discard(&mut self, node: NodeRef) -> Option<CompactStats> {
        self.get_mut(node).flags.remove(NodeFlags::KEEP);
        self.traced(node.0, "discarded");
        self.pending_discards += 1;
        if self.pending_discards >= self.config().discard_threshold_value() {
            debug!(
                target: "pedpoly::lifecycle",
                pending = self.pending_discards,
                "discard threshold reached"
            );
            Some(self.free_kept_polys())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Bindings, EngineConfig, MemoryOverflow};

    fn chain(e: &mut Engine, b: &mut Bindings) -> (NodeRef, NodeRef, NodeRef) {
        let x = e.make_variable("x", b.double(2.0));
        let y = e.make_variable("y", b.double(3.0));
        let p = e.make_product(&[(1, x), (2, y)], false);
        (x, y, p)
    }

    #[test]
    fn test_hold_counts_each_node_once() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let (x, y, p) = chain(&mut e, &mut b);
        // x appears twice below s, but is counted once per hold.
        let s = e.make_sum(&[(1.0, p), (1.0, x)], false);
        e.hold(s);
        assert_eq!(e.get(x).hold_count(), 1);
        assert_eq!(e.get(y).hold_count(), 1);
        e.hold(p);
        assert_eq!(e.get(x).hold_count(), 2);
        e.unhold(s);
        assert_eq!(e.get(x).hold_count(), 1);
        assert_eq!(e.get(s).hold_count(), 0);
    }

    #[test]
    #[should_panic(expected = "below zero")]
    fn test_unhold_underflow_is_fatal() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let (_, _, p) = chain(&mut e, &mut b);
        e.unhold(p);
    }

    #[test]
    fn test_held_survives_and_is_renumbered() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let junk = e.make_constant(42.0);
        let (x, y, p) = chain(&mut e, &mut b);
        e.hold(p);
        let stats = e.free_polys();
        assert_eq!(stats.freed, 1);
        assert!(!e.is_live(junk));
        for n in [x, y, p] {
            assert!(e.is_live(n));
        }
        assert_eq!(e.slot_of(x), 0);
        assert_eq!(e.count(Kind::Constant), 0);

        e.unhold(p);
        let stats = e.free_polys();
        assert_eq!(stats.freed, 3);
        assert_eq!(e.node_count(), 0);
    }

    #[test]
    fn test_freed_parent_releases_child_reference() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let (x, _, p) = chain(&mut e, &mut b);
        let log = e.make_function_call("log", &[p]);
        e.keep(p);
        assert_eq!(e.get(p).parent_count(), 1);
        e.free_polys();
        assert!(!e.is_live(log));
        assert_eq!(e.get(p).parent_count(), 0);
        assert!(e.get(p).flags().contains(NodeFlags::TOP));
        assert!(e.is_live(x));
    }

    #[test]
    fn test_compaction_keeps_hash_consing_intact() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let (x, y, p) = chain(&mut e, &mut b);
        let _gone = e.make_sum(&[(1.0, x), (1.0, y)], false);
        e.keep(p);
        e.free_polys();
        // The survivor is still found after renumbering.
        assert_eq!(e.make_product(&[(2, y), (1, x)], false), p);
        // The freed sum is rebuilt with a fresh id.
        let again = e.make_sum(&[(1.0, x), (1.0, y)], false);
        assert!(again.id() > p.id());
    }

    #[test]
    fn test_nothing_to_free() {
        let mut e = Engine::new();
        let stats = e.free_polys();
        assert_eq!(stats, CompactStats::default());
        assert_eq!(e.stats().compactions, 1);
    }

    #[test]
    fn test_discard_threshold_triggers_heavy_compaction() {
        let mut e = Engine::with_config(EngineConfig::new().discard_threshold(2));
        let mut b = Bindings::new();
        let (x, y, p) = chain(&mut e, &mut b);
        e.keep(p);
        let s = e.make_sum(&[(1.0, x), (1.0, y)], false);
        e.keep(s);
        assert!(e.discard(s).is_none());
        assert_eq!(e.pending_discards(), 1);
        // p is still KEEP, but a heavy compaction ignores KEEP.
        let stats = e.discard(p).expect("threshold reached");
        assert_eq!(stats.freed, 4);
        assert_eq!(e.node_count(), 0);
        assert_eq!(e.pending_discards(), 0);
    }

    #[test]
    fn test_free_kept_clears_keep_on_held_survivors() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let (x, _, p) = chain(&mut e, &mut b);
        e.keep(p);
        e.hold(x);
        e.free_kept_polys();
        assert!(!e.is_live(p));
        assert!(e.is_live(x));
        assert!(!e.get(x).flags().contains(NodeFlags::KEEP));
    }

    #[test]
    fn test_offline_nodes_keep_children_and_release_tickets() {
        let mut e = Engine::with_config(EngineConfig::new().spill_min_terms(2));
        e.set_overflow(Box::new(MemoryOverflow::new()));
        let mut b = Bindings::new();
        let (x, y, _) = chain(&mut e, &mut b);
        let s = e.make_sum(&[(2.0, x), (3.0, y)], false);
        assert!(e.spill(s));

        e.keep(s);
        e.free_polys();
        assert!(e.is_live(x) && e.is_live(y));
        assert!(e.is_offline(s));

        e.discard(s);
        let stats = e.free_kept_polys();
        assert_eq!(stats.tickets_released, 1);
        assert!(!e.is_live(s));
    }

    #[test]
    #[should_panic(expected = "integrity violation")]
    fn test_freed_handle_is_poisoned() {
        let mut e = Engine::new();
        let c = e.make_constant(3.0);
        e.free_polys();
        let _ = e.get(c);
    }
}
