//! Per-kind node arenas and their hash indices.
//!
//! Each [`Store`] is a dense `Vec<Node>` plus a [`HashIndex`]. The index maps
//! a structural key to candidate slots: the key picks a bucket by modulo,
//! each bucket is kept sorted by key, a binary search finds the run of equal
//! keys, and the caller scans that run for true structural equality.

use std::ops::Range;

use super::node::{Kind, Node, NodeFlags};
use super::integrity_violation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    key: u64,
    slot: u32,
}

/// Bucketed, sorted key index.
#[derive(Debug, Clone)]
pub(crate) struct HashIndex {
    buckets: Vec<Vec<Entry>>,
    len: usize,
    max_load: usize,
}

impl HashIndex {
    pub(crate) fn new(buckets: usize, max_load: usize) -> Self {
        Self {
            buckets: vec![Vec::new(); buckets.max(1)],
            len: 0,
            max_load: max_load.max(1),
        }
    }

    #[inline]
    fn bucket_of(&self, key: u64) -> usize {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "Result is below the bucket count, which is a usize"
        )]
        let b = (key % self.buckets.len() as u64) as usize;
        b
    }

    /// Slots whose key equals `key`, in insertion order.
    #[cfg(test)]
    pub(crate) fn candidates(&self, key: u64) -> impl Iterator<Item = u32> + '_ {
        let (b, span) = self.candidate_span(key);
        self.buckets[b][span].iter().map(|e| e.slot)
    }

    /// Bucket and position range of the run of entries equal to `key`.
    ///
    /// Positions stay valid until the index is next mutated.
    pub(crate) fn candidate_span(&self, key: u64) -> (usize, Range<usize>) {
        let b = self.bucket_of(key);
        let bucket = &self.buckets[b];
        let lo = bucket.partition_point(|e| e.key < key);
        let hi = lo + bucket[lo..].partition_point(|e| e.key == key);
        (b, lo..hi)
    }

    #[inline]
    pub(crate) fn slot_at(&self, bucket: usize, pos: usize) -> u32 {
        self.buckets[bucket][pos].slot
    }

    pub(crate) fn insert(&mut self, key: u64, slot: u32) {
        if self.len >= self.buckets.len() * self.max_load {
            self.grow();
        }
        let b = self.bucket_of(key);
        let bucket = &mut self.buckets[b];
        let pos = bucket.partition_point(|e| e.key <= key);
        bucket.insert(pos, Entry { key, slot });
        self.len += 1;
    }

    /// Remove the entry for `(key, slot)`. Returns false if it was missing.
    pub(crate) fn remove(&mut self, key: u64, slot: u32) -> bool {
        let b = self.bucket_of(key);
        let bucket = &mut self.buckets[b];
        let lo = bucket.partition_point(|e| e.key < key);
        let found = bucket[lo..]
            .iter()
            .take_while(|e| e.key == key)
            .position(|e| e.slot == slot);
        match found {
            Some(offset) => {
                bucket.remove(lo + offset);
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    fn grow(&mut self) {
        let new_count = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, vec![Vec::new(); new_count]);
        for entry in old.into_iter().flatten() {
            let b = self.bucket_of(entry.key);
            self.buckets[b].push(entry);
        }
        // Entries arrive bucket by bucket, so each new bucket needs a resort.
        for bucket in &mut self.buckets {
            bucket.sort_by_key(|e| e.key);
        }
    }

    /// Rewrite slots through `remap`, dropping entries that map to `None`.
    /// Returns the number of dropped entries.
    pub(crate) fn renumber(&mut self, remap: &[Option<u32>]) -> usize {
        let before = self.len;
        for bucket in &mut self.buckets {
            bucket.retain_mut(|e| match remap.get(e.slot as usize).copied().flatten() {
                Some(new_slot) => {
                    e.slot = new_slot;
                    true
                }
                None => false,
            });
        }
        self.len = self.buckets.iter().map(Vec::len).sum();
        before - self.len
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn heap_bytes(&self) -> usize {
        self.buckets.capacity() * std::mem::size_of::<Vec<Entry>>()
            + self
                .buckets
                .iter()
                .map(|b| b.capacity() * std::mem::size_of::<Entry>())
                .sum::<usize>()
    }
}

/// Outcome of sweeping one store.
#[derive(Debug, Default)]
pub(crate) struct Sweep {
    /// `(id, new_slot)` for every survivor.
    pub moved: Vec<(u64, u32)>,
    /// Nodes removed from the store, handed back for child release.
    pub freed: Vec<Node>,
}

/// Dense arena of one node kind.
#[derive(Debug, Clone)]
pub(crate) struct Store {
    pub(crate) kind: Kind,
    pub(crate) nodes: Vec<Node>,
    pub(crate) index: HashIndex,
}

impl Store {
    pub(crate) fn new(kind: Kind, capacity: usize, buckets: usize, max_load: usize) -> Self {
        Self {
            kind,
            nodes: Vec::with_capacity(capacity),
            index: HashIndex::new(buckets, max_load),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Append `node` and index it under its key.
    pub(crate) fn push(&mut self, node: Node) -> u32 {
        let Ok(slot) = u32::try_from(self.nodes.len()) else {
            integrity_violation(format_args!("{} store exceeded u32 slots", self.kind))
        };
        self.index.insert(node.key, slot);
        self.nodes.push(node);
        slot
    }

    /// Keep every node whose `EVAL` bit is set (the compaction mark), clear
    /// the mark on survivors, and renumber the index.
    pub(crate) fn sweep(&mut self) -> Sweep {
        let old = std::mem::take(&mut self.nodes);
        let survivors = old
            .iter()
            .filter(|n| n.flags.contains(NodeFlags::EVAL))
            .count();
        let mut remap = Vec::with_capacity(old.len());
        let mut sweep = Sweep {
            moved: Vec::with_capacity(survivors),
            freed: Vec::with_capacity(old.len() - survivors),
        };
        let mut kept = Vec::with_capacity(survivors);

        for mut node in old {
            if node.flags.contains(NodeFlags::EVAL) {
                node.flags.remove(NodeFlags::EVAL);
                #[allow(
                    clippy::cast_possible_truncation,
                    reason = "Survivors are a subset of slots that already fit in u32"
                )]
                let new_slot = kept.len() as u32;
                remap.push(Some(new_slot));
                sweep.moved.push((node.id, new_slot));
                kept.push(node);
            } else {
                remap.push(None);
                sweep.freed.push(node);
            }
        }

        self.nodes = kept;
        let dropped = self.index.renumber(&remap);
        if dropped != sweep.freed.len() {
            integrity_violation(format_args!(
                "{} store freed {} nodes but its index dropped {} entries",
                self.kind,
                sweep.freed.len(),
                dropped
            ));
        }
        sweep
    }

    pub(crate) fn heap_bytes(&self) -> usize {
        self.nodes.capacity() * std::mem::size_of::<Node>()
            + self.nodes.iter().map(Node::heap_bytes).sum::<usize>()
            + self.index.heap_bytes()
    }
}
