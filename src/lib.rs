//! Hash-consed polynomial DAGs for pedigree likelihoods
//!
//! Pedigree likelihoods expand into millions of multiply/add operations
//! over allele and trait configurations, with massive structural
//! redundancy. This crate stores them as a DAG in which every distinct
//! subexpression exists exactly once, evaluates the DAG repeatedly under
//! changing variable values, and frees what the caller no longer needs.
//!
//! # Features
//! - Hash-consing with canonical Sum/Product forms (flattening, merging,
//!   constant folding, zero short-circuit)
//! - Memoized recursive evaluation and reusable flattened evaluation lists
//! - Hold/keep retention with sweep-and-compact garbage collection
//! - Overflow storage for very large term lists
//! - C source emission for a native backend
//! - Normal, Student's t and chi-squared distribution functions
//!
//! # Usage
//! ```
//! use pedpoly::{Bindings, Engine};
//!
//! let mut engine = Engine::new();
//! let mut vars = Bindings::new();
//! let p = engine.make_variable("p", vars.double(0.3));
//! let q = engine.make_variable("q", vars.double(0.7));
//!
//! // Hardy-Weinberg genotype frequencies p^2 + 2pq + q^2
//! let pp = engine.make_product(&[(2, p)], false);
//! let pq = engine.make_product(&[(1, p), (1, q)], false);
//! let qq = engine.make_product(&[(2, q)], false);
//! let total = engine.make_sum(&[(1.0, pp), (2.0, pq), (1.0, qq)], false);
//!
//! let value = engine.evaluate_recursive(total, &vars).unwrap();
//! assert!((value - 1.0).abs() < 1e-12);
//!
//! engine.keep(total);
//! engine.free_polys();
//! assert!(engine.is_live(pq));
//! ```
//!
//! # Logging
//!
//! The crate emits [`tracing`] events: `debug` for compactions (target
//! `pedpoly::lifecycle`), `trace` for ids listed in
//! [`EngineConfig::trace_ids`] (target `pedpoly::trace`), `warn` for
//! recoverable oddities, and `error` right before an integrity violation
//! panics (target `pedpoly::integrity`).

mod builder;
pub mod config;
pub mod core;
mod display;
mod error;
pub mod evaluator;
pub mod functions;
mod lifecycle;
pub mod math;
pub mod parallel;
pub mod traits;

#[cfg(test)]
mod tests;

// Re-export key types for easier usage
pub use config::EngineConfig;
pub use crate::core::{
    Binding, BindingKey, Bindings, ConstantParts, Engine, EngineStats, External, Factor, Kind,
    MemoryOverflow, Node, NodeFlags, NodeKind, NodeRef, OverflowStore, Term, Ticket, Variable,
};
pub use display::{KindUsage, MemoryUsage, SummaryTier};
pub use error::EvalError;
pub use evaluator::{
    CompiledPoly, EmittedSource, EvalList, ListBackend, NativeCompiler, Progress, emit_c,
};
pub use functions::allowed_functions;
pub use lifecycle::CompactStats;
pub use parallel::{evaluate_parallel, evaluate_points};
