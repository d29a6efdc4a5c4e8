//! Flattened evaluation lists
//!
//! An [`EvalList`] is the topological order of a root's non-constant
//! descendants, children first. Constants are folded in as immediate
//! operands. Every entry carries its own copy of the coefficients,
//! exponents and resolved function, so a list does not borrow the engine
//! and stays valid across compactions.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rustc_hash::FxHashMap;

use super::CompiledPoly;
use super::ops::{add_term, check, mul_factor, resolve};
use crate::core::{BindingKey, Bindings, Engine, Kind, NodeKind, NodeRef};
use crate::error::EvalError;
use crate::functions::registry::{FunctionDefinition, Registry};

/// Input of an entry: an earlier entry's result or an inlined constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Slot(u32),
    Const(f64),
}

/// What an entry computes.
#[derive(Clone)]
pub enum Op {
    Variable(BindingKey),
    /// `sum(coefficient * operand)` over `terms[range]`.
    Sum(Range<usize>),
    /// `prod(operand ^ exponent)` over `factors[range]`.
    Product(Range<usize>),
    Call {
        name: Arc<str>,
        /// `None` when the name is not on the allow-list; the pass fails
        /// when it reaches this entry.
        def: Option<&'static FunctionDefinition>,
        args: Range<usize>,
    },
    External(Arc<dyn CompiledPoly>),
}

impl std::fmt::Debug for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Op::Variable(k) => f.debug_tuple("Variable").field(k).finish(),
            Op::Sum(r) => f.debug_tuple("Sum").field(r).finish(),
            Op::Product(r) => f.debug_tuple("Product").field(r).finish(),
            Op::Call { name, args, .. } => f
                .debug_struct("Call")
                .field("name", name)
                .field("args", args)
                .finish_non_exhaustive(),
            Op::External(_) => f.write_str("External(..)"),
        }
    }
}

/// One list entry: a node id and how to compute it.
#[derive(Debug, Clone)]
pub struct Entry {
    pub id: u64,
    pub kind: Kind,
    pub op: Op,
}

/// Linearized evaluation order for one root.
#[derive(Debug, Clone)]
pub struct EvalList {
    root: NodeRef,
    root_kind: Kind,
    result: Operand,
    entries: Vec<Entry>,
    terms: Vec<(f64, Operand)>,
    factors: Vec<(i32, Operand)>,
    args: Vec<Operand>,
    values: Vec<f64>,
}

impl EvalList {
    #[must_use]
    pub fn root(&self) -> NodeRef {
        self.root
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of the entry computing node `id`, if any.
    #[must_use]
    pub fn position_of(&self, id: u64) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    /// Where the root's value comes from.
    #[must_use]
    pub fn result(&self) -> Operand {
        self.result
    }

    /// Sum terms of an entry.
    #[must_use]
    pub fn sum_terms(&self, range: &Range<usize>) -> &[(f64, Operand)] {
        &self.terms[range.clone()]
    }

    /// Product factors of an entry.
    #[must_use]
    pub fn product_factors(&self, range: &Range<usize>) -> &[(i32, Operand)] {
        &self.factors[range.clone()]
    }

    /// Call arguments of an entry.
    #[must_use]
    pub fn call_args(&self, range: &Range<usize>) -> &[Operand] {
        &self.args[range.clone()]
    }

    /// Evaluate the list with its internal scratch buffer.
    pub fn run(&mut self, bindings: &Bindings) -> Result<f64, EvalError> {
        let mut values = std::mem::take(&mut self.values);
        let out = self.evaluate_with(bindings, &mut values, None);
        self.values = values;
        out
    }

    /// Evaluate into a caller-provided buffer. Lets a shared list be run
    /// from several threads at once.
    pub fn evaluate_with(
        &self,
        bindings: &Bindings,
        values: &mut Vec<f64>,
        progress: Option<&Progress>,
    ) -> Result<f64, EvalError> {
        values.clear();
        values.reserve(self.entries.len());
        if let Some(p) = progress {
            p.start(self.entries.len());
        }
        for (i, entry) in self.entries.iter().enumerate() {
            let v = self.compute(entry, bindings, values)?;
            values.push(check(v, entry.id, entry.kind)?);
            if let Some(p) = progress {
                p.done.store(i + 1, Ordering::Relaxed);
            }
        }
        let result = operand(values, self.result);
        check(result, self.root.0, self.root_kind)
    }

    /// Like [`run`](Self::run), publishing the number of finished entries
    /// to `progress` as it goes.
    pub fn evaluate_observed(
        &mut self,
        bindings: &Bindings,
        progress: &Progress,
    ) -> Result<f64, EvalError> {
        let mut values = std::mem::take(&mut self.values);
        let out = self.evaluate_with(bindings, &mut values, Some(progress));
        self.values = values;
        out
    }

    fn compute(&self, entry: &Entry, bindings: &Bindings, values: &[f64]) -> Result<f64, EvalError> {
        let v = match &entry.op {
            Op::Variable(key) => bindings.value(*key),
            Op::Sum(range) => self.terms[range.clone()]
                .iter()
                .fold(0.0, |acc, &(c, o)| add_term(acc, c, operand(values, o))),
            Op::Product(range) => self.factors[range.clone()]
                .iter()
                .fold(1.0, |acc, &(e, o)| mul_factor(acc, e, operand(values, o))),
            Op::Call { name, def, args } => {
                let def = match def {
                    Some(def) if def.validate_arity(args.len()) => *def,
                    _ => resolve(name, entry.id, args.len())?,
                };
                let argv: Vec<f64> = self.args[args.clone()]
                    .iter()
                    .map(|&o| operand(values, o))
                    .collect();
                (def.eval)(&argv)
            }
            Op::External(evaluator) => evaluator.evaluate(bindings)?,
        };
        Ok(v)
    }
}

#[inline]
fn operand(values: &[f64], o: Operand) -> f64 {
    match o {
        Operand::Slot(i) => values[i as usize],
        Operand::Const(v) => v,
    }
}

/// Advisory progress of a running list evaluation.
///
/// Readers on other threads may poll it; the evaluator never checks it
/// for cancellation.
#[derive(Debug, Default)]
pub struct Progress {
    done: AtomicUsize,
    total: AtomicUsize,
}

impl Progress {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.done.store(0, Ordering::Relaxed);
    }

    #[must_use]
    pub fn done(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Finished share in `[0, 1]`; 1 for an empty list.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            1.0
        } else {
            #[allow(
                clippy::cast_precision_loss,
                reason = "Progress is approximate by nature"
            )]
            let f = self.done() as f64 / total as f64;
            f
        }
    }
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

impl Engine {
    /// Flatten the DAG under `root` into a dependency-ordered list.
    ///
    /// Each non-constant node appears exactly once, after all of its
    /// children. Offline nodes are restored on the way.
    pub fn build_eval_list(&mut self, root: NodeRef) -> EvalList {
        let mut list = EvalList {
            root,
            root_kind: self.kind_of(root),
            result: Operand::Const(0.0),
            entries: Vec::new(),
            terms: Vec::new(),
            factors: Vec::new(),
            args: Vec::new(),
            values: Vec::new(),
        };
        let mut placed: FxHashMap<u64, Operand> = FxHashMap::default();
        let mut stack: Vec<(NodeRef, bool)> = vec![(root, false)];

        while let Some((node, expanded)) = stack.pop() {
            if placed.contains_key(&node.0) {
                continue;
            }
            self.restore(node);
            if let NodeKind::Constant(v) = self.get(node).kind {
                placed.insert(node.0, Operand::Const(v));
                continue;
            }
            if !expanded {
                stack.push((node, true));
                // Reversed so children are placed in term order, matching
                // the order the recursive evaluator visits them.
                let children = self.get(node).kind.children();
                stack.extend(
                    children
                        .into_iter()
                        .rev()
                        .filter(|c| !placed.contains_key(&c.0))
                        .map(|c| (c, false)),
                );
                continue;
            }

            let at = |c: NodeRef| placed.get(&c.0).copied().unwrap_or(Operand::Const(f64::NAN));
            let op = match &self.get(node).kind {
                NodeKind::Variable(v) => Op::Variable(v.binding),
                NodeKind::Sum(terms) => {
                    let start = list.terms.len();
                    list.terms.extend(terms.iter().map(|t| (t.coefficient, at(t.node))));
                    Op::Sum(start..list.terms.len())
                }
                NodeKind::Product(factors) => {
                    let start = list.factors.len();
                    list.factors.extend(factors.iter().map(|f| (f.exponent, at(f.node))));
                    Op::Product(start..list.factors.len())
                }
                NodeKind::FunctionCall { name, args } => {
                    let start = list.args.len();
                    list.args.extend(args.iter().map(|&a| at(a)));
                    Op::Call {
                        name: Arc::clone(name),
                        def: Registry::get(name),
                        args: start..list.args.len(),
                    }
                }
                NodeKind::External(ext) => Op::External(Arc::clone(&ext.evaluator)),
                NodeKind::Constant(_) | NodeKind::Offline { .. } => {
                    crate::core::integrity_violation(format_args!(
                        "node #{} cannot be placed in an evaluation list",
                        node.0
                    ))
                }
            };
            #[allow(
                clippy::cast_possible_truncation,
                reason = "Lists are bounded by the node count, which fits in u32 slots"
            )]
            let slot = list.entries.len() as u32;
            placed.insert(node.0, Operand::Slot(slot));
            list.entries.push(Entry {
                id: node.0,
                kind: self.kind_of(node),
                op,
            });
        }

        list.result = placed.get(&root.0).copied().unwrap_or(Operand::Const(f64::NAN));
        list.values.reserve(list.entries.len());
        list
    }

    /// Evaluate a list built by [`build_eval_list`](Self::build_eval_list).
    ///
    /// The list is self-contained; this only fixes the calling convention
    /// next to [`evaluate_recursive`](Self::evaluate_recursive).
    #[allow(
        clippy::unused_self,
        reason = "Kept on the engine so both evaluation paths read the same"
    )]
    pub fn evaluate(&self, list: &mut EvalList, bindings: &Bindings) -> Result<f64, EvalError> {
        list.run(bindings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_precede_parents() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let x = e.make_variable("x", b.double(2.0));
        let y = e.make_variable("y", b.double(3.0));
        let xy = e.make_product(&[(1, x), (1, y)], false);
        let s = e.make_sum(&[(1.0, xy), (2.0, x)], false);
        let root = e.make_function_call("log", &[s]);

        let list = e.build_eval_list(root);
        assert_eq!(list.len(), 5);
        let pos = |n: NodeRef| list.position_of(n.id()).expect("placed");
        assert!(pos(x) < pos(xy));
        assert!(pos(y) < pos(xy));
        assert!(pos(xy) < pos(s));
        assert!(pos(s) < pos(root));
        assert_eq!(list.result(), Operand::Slot(4));
    }

    #[test]
    fn test_constants_are_inlined() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let x = e.make_variable("x", b.double(2.0));
        let five = e.make_constant(5.0);
        let s = e.make_sum(&[(1.0, x), (1.0, five)], false);
        let mut list = e.build_eval_list(s);
        assert!(list.position_of(five.id()).is_none());
        assert_eq!(list.run(&b), Ok(7.0));

        let mut alone = e.build_eval_list(five);
        assert!(alone.is_empty());
        assert_eq!(alone.run(&b), Ok(5.0));
    }

    #[test]
    fn test_progress_reaches_total() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let x = e.make_variable("x", b.double(4.0));
        let root = e.make_function_call("sqrt", &[x]);
        let mut list = e.build_eval_list(root);
        let progress = Progress::new();
        assert_eq!(list.evaluate_observed(&b, &progress), Ok(2.0));
        assert_eq!(progress.done(), 2);
        assert_eq!(progress.total(), 2);
        assert_eq!(progress.fraction(), 1.0);
    }

    #[test]
    fn test_unknown_function_fails_at_evaluation() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let x = e.make_variable("x", b.double(4.0));
        let root = e.make_function_call("lgamma", &[x]);
        let mut list = e.build_eval_list(root);
        assert_eq!(
            list.run(&b),
            Err(EvalError::UnknownFunction {
                name: "lgamma".into(),
                node: root.id(),
            })
        );
    }
}
