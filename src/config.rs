//! Engine configuration
//!
//! Provides a fluent interface for sizing the node stores and tuning the
//! lifecycle policies before an [`Engine`](crate::Engine) is created.
//!
//! # Example
//! ```
//! use pedpoly::{Engine, EngineConfig, Kind};
//!
//! let engine = Engine::with_config(
//!     EngineConfig::new()
//!         .capacity(Kind::Sum, 1 << 16)
//!         .buckets(Kind::Sum, 1 << 12)
//!         .discard_threshold(50_000)
//!         .trace_id(42),
//! );
//! assert_eq!(engine.config().discard_threshold_value(), 50_000);
//! ```

use rustc_hash::FxHashSet;

use crate::core::Kind;

/// Pending discards that trigger a heavy compaction.
pub const DEFAULT_DISCARD_THRESHOLD: usize = 100_000;

/// Average entries per hash bucket before the bucket array doubles.
pub const DEFAULT_MAX_BUCKET_LOAD: usize = 8;

/// Term count from which `Engine::spill` moves a term list out of memory.
pub const DEFAULT_SPILL_MIN_TERMS: usize = 64;

/// Initial store capacities, in nodes, per kind.
const DEFAULT_CAPACITY: [usize; Kind::COUNT] = [1024, 256, 4096, 4096, 64, 16];

/// Initial bucket counts, per kind.
const DEFAULT_BUCKETS: [usize; Kind::COUNT] = [1021, 127, 4093, 4093, 61, 13];

/// Sizing and policy knobs for an engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    capacity: [usize; Kind::COUNT],
    buckets: [usize; Kind::COUNT],
    max_bucket_load: usize,
    discard_threshold: usize,
    spill_min_terms: usize,
    trace_ids: FxHashSet<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            buckets: DEFAULT_BUCKETS,
            max_bucket_load: DEFAULT_MAX_BUCKET_LOAD,
            discard_threshold: DEFAULT_DISCARD_THRESHOLD,
            spill_min_terms: DEFAULT_SPILL_MIN_TERMS,
            trace_ids: FxHashSet::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial node capacity of one store.
    #[must_use]
    pub fn capacity(mut self, kind: Kind, nodes: usize) -> Self {
        self.capacity[kind.slot()] = nodes;
        self
    }

    /// Initial bucket count of one store's hash index. Zero is raised to one.
    #[must_use]
    pub fn buckets(mut self, kind: Kind, buckets: usize) -> Self {
        self.buckets[kind.slot()] = buckets.max(1);
        self
    }

    /// Average bucket occupancy that triggers bucket doubling.
    #[must_use]
    pub fn max_bucket_load(mut self, load: usize) -> Self {
        self.max_bucket_load = load.max(1);
        self
    }

    /// Number of `discard` calls batched before a heavy compaction.
    #[must_use]
    pub fn discard_threshold(mut self, threshold: usize) -> Self {
        self.discard_threshold = threshold.max(1);
        self
    }

    /// Minimum term count for `Engine::spill` to act.
    #[must_use]
    pub fn spill_min_terms(mut self, terms: usize) -> Self {
        self.spill_min_terms = terms;
        self
    }

    /// Emit `trace`-level events whenever the node with this id is created,
    /// reused, held, released or freed.
    #[must_use]
    pub fn trace_id(mut self, id: u64) -> Self {
        self.trace_ids.insert(id);
        self
    }

    /// Trace several ids at once.
    #[must_use]
    pub fn trace_ids(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.trace_ids.extend(ids);
        self
    }

    // Getters

    #[must_use]
    pub fn initial_capacity(&self, kind: Kind) -> usize {
        self.capacity[kind.slot()]
    }

    #[must_use]
    pub fn initial_buckets(&self, kind: Kind) -> usize {
        self.buckets[kind.slot()]
    }

    #[must_use]
    pub fn bucket_load(&self) -> usize {
        self.max_bucket_load
    }

    #[must_use]
    pub fn discard_threshold_value(&self) -> usize {
        self.discard_threshold
    }

    #[must_use]
    pub fn spill_threshold(&self) -> usize {
        self.spill_min_terms
    }

    #[inline]
    #[must_use]
    pub fn is_traced(&self, id: u64) -> bool {
        !self.trace_ids.is_empty() && self.trace_ids.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_configuration() {
        let config = EngineConfig::new()
            .capacity(Kind::Product, 10)
            .buckets(Kind::Product, 0)
            .discard_threshold(0)
            .trace_ids([3, 5]);
        assert_eq!(config.initial_capacity(Kind::Product), 10);
        assert_eq!(config.initial_buckets(Kind::Product), 1);
        assert_eq!(config.discard_threshold_value(), 1);
        assert!(config.is_traced(5));
        assert!(!config.is_traced(4));
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.discard_threshold_value(), DEFAULT_DISCARD_THRESHOLD);
        assert_eq!(config.bucket_load(), DEFAULT_MAX_BUCKET_LOAD);
        assert!(!config.is_traced(0));
    }
}
