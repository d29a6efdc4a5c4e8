//! Secondary storage for large term lists.
//!
//! The engine can move the term list of a big Sum or Product out of memory
//! and keep only a [`Ticket`]. The store behind the ticket is a collaborator:
//! it is called synchronously and never re-entered.

use rustc_hash::FxHashMap;

/// Receipt for a stashed block of doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(pub u64);

/// "Hand me a ticket for a block of doubles / give it back / drop it."
pub trait OverflowStore: Send {
    /// Take ownership of `block` and return a ticket for it.
    fn stash(&mut self, block: Vec<f64>) -> Ticket;

    /// Return a copy of the block behind `ticket`, or `None` if unknown.
    fn retrieve(&mut self, ticket: Ticket) -> Option<Vec<f64>>;

    /// Forget the block behind `ticket`.
    fn release(&mut self, ticket: Ticket);
}

/// In-process overflow store, mostly useful for tests and small runs.
#[derive(Debug, Default)]
pub struct MemoryOverflow {
    blocks: FxHashMap<u64, Vec<f64>>,
    next: u64,
}

impl MemoryOverflow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks currently stashed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl OverflowStore for MemoryOverflow {
    fn stash(&mut self, block: Vec<f64>) -> Ticket {
        let ticket = Ticket(self.next);
        self.next += 1;
        self.blocks.insert(ticket.0, block);
        ticket
    }

    fn retrieve(&mut self, ticket: Ticket) -> Option<Vec<f64>> {
        self.blocks.get(&ticket.0).cloned()
    }

    fn release(&mut self, ticket: Ticket) {
        self.blocks.remove(&ticket.0);
    }
}

// =============================================================================
// BLOCK ENCODING
// =============================================================================
//
// A spilled list is a flat run of (weight, child id) pairs. Ids stay below
// 2^53 for any realistic run, so they round-trip through f64 exactly.

#[allow(
    clippy::cast_precision_loss,
    reason = "Node ids stay far below 2^53"
)]
pub(crate) fn encode_pairs(pairs: impl Iterator<Item = (f64, u64)>) -> Vec<f64> {
    let mut block = Vec::new();
    for (weight, id) in pairs {
        block.push(weight);
        block.push(id as f64);
    }
    block
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Decodes ids written by encode_pairs"
)]
pub(crate) fn decode_pairs(block: &[f64]) -> impl Iterator<Item = (f64, u64)> + '_ {
    block.chunks_exact(2).map(|pair| (pair[0], pair[1] as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_overflow_lifecycle() {
        let mut store = MemoryOverflow::new();
        let t = store.stash(vec![1.0, 2.0]);
        assert_eq!(store.retrieve(t), Some(vec![1.0, 2.0]));
        assert_eq!(store.len(), 1);
        store.release(t);
        assert!(store.retrieve(t).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_pair_encoding() {
        let block = encode_pairs([(0.5, 3_u64), (-2.0, 1 << 40)].into_iter());
        let back: Vec<_> = decode_pairs(&block).collect();
        assert_eq!(back, vec![(0.5, 3), (-2.0, 1 << 40)]);
    }
}
