//! Numerical evaluation of polynomial DAGs.
//!
//! Two paths compute the same value:
//!
//! ```text
//!                 ┌──────────────────────┐
//!   root ───────> │ evaluate_recursive   │  memoized descent, EVAL bit + cached value
//!                 └──────────────────────┘
//!                 ┌──────────────────────┐    ┌──────────────┐
//!   root ───────> │ build_eval_list      │ -> │ evaluate     │  repeated linear passes
//!                 └──────────────────────┘    └──────────────┘
//!                                                   │
//!                                   ┌───────────────┼───────────────┐
//!                                   ▼               ▼               ▼
//!                             ┌──────────┐   ┌────────────┐   ┌──────────┐
//!                             │ observed │   │  parallel  │   │  emit_c  │
//!                             │(progress)│   │  (Rayon)   │   │ (native) │
//!                             └──────────┘   └────────────┘   └──────────┘
//! ```
//!
//! The recursive path suits one-off evaluation; the list path amortizes
//! the traversal when the same root is evaluated under many bindings, as
//! in likelihood maximization.
//!
//! # Example
//!
//! ```
//! use pedpoly::{Bindings, Engine};
//!
//! let mut engine = Engine::new();
//! let mut vars = Bindings::new();
//! let p = vars.double(0.25);
//! let x = engine.make_variable("p", p);
//! let sq = engine.make_product(&[(2, x)], false);
//! let one = engine.make_constant(1.0);
//! let root = engine.make_sum(&[(1.0, sq), (-1.0, one)], false);
//!
//! let direct = engine.evaluate_recursive(root, &vars).unwrap();
//! let mut list = engine.build_eval_list(root);
//! assert_eq!(engine.evaluate(&mut list, &vars).unwrap(), direct);
//!
//! vars.set(p, 0.5);
//! assert_eq!(engine.evaluate(&mut list, &vars).unwrap(), -0.75);
//! ```

mod codegen;
mod list;
pub(crate) mod ops;

pub use codegen::{EmittedSource, ListBackend, NativeCompiler, emit_c};
pub use list::{Entry, EvalList, Op, Operand, Progress};
pub use ops::pow_int;

use std::sync::Arc;

use crate::core::{Bindings, Engine, Kind, NodeFlags, NodeKind, NodeRef};
use crate::error::EvalError;

/// A loaded evaluator for one polynomial, typically native code produced
/// from [`emit_c`] output. External nodes call it during evaluation.
pub trait CompiledPoly: Send + Sync {
    /// Evaluate under the current bindings.
    fn evaluate(&self, bindings: &Bindings) -> Result<f64, EvalError>;
}

impl std::fmt::Debug for dyn CompiledPoly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CompiledPoly")
    }
}

impl Engine {
    /// Evaluate `root` by memoized recursive descent.
    ///
    /// Clears the pass-scoped `EVAL` bit first, so values cached by an
    /// earlier pass (under other bindings) are never reused.
    pub fn evaluate_recursive(&mut self, root: NodeRef, bindings: &Bindings) -> Result<f64, EvalError> {
        self.begin_pass();
        let value = self.eval_node(root, bindings)?;
        // Constants are not checked per node; a NaN root constant still fails.
        ops::check(value, root.0, self.kind_of(root))
    }

    fn eval_node(&mut self, node: NodeRef, bindings: &Bindings) -> Result<f64, EvalError> {
        let n = self.get(node);
        if n.flags.contains(NodeFlags::EVAL) {
            return Ok(n.value);
        }
        if let NodeKind::Constant(v) = n.kind {
            return Ok(v);
        }
        self.restore(node);

        let kind = self.kind_of(node);
        let value = match &self.get(node).kind {
            NodeKind::Variable(v) => bindings.value(v.binding),
            NodeKind::Sum(terms) => {
                let terms = terms.clone();
                let mut acc = 0.0;
                for t in terms {
                    let v = self.eval_node(t.node, bindings)?;
                    acc = ops::add_term(acc, t.coefficient, v);
                }
                acc
            }
            NodeKind::Product(factors) => {
                let factors = factors.clone();
                let mut acc = 1.0;
                for f in factors {
                    let v = self.eval_node(f.node, bindings)?;
                    acc = ops::mul_factor(acc, f.exponent, v);
                }
                acc
            }
            NodeKind::FunctionCall { name, args } => {
                let name = Arc::clone(name);
                let args = args.clone();
                let mut argv = Vec::with_capacity(args.len());
                for a in args {
                    argv.push(self.eval_node(a, bindings)?);
                }
                let def = ops::resolve(&name, node.0, argv.len())?;
                (def.eval)(&argv)
            }
            NodeKind::External(ext) => {
                let evaluator = Arc::clone(&ext.evaluator);
                evaluator.evaluate(bindings)?
            }
            NodeKind::Constant(v) => *v,
            NodeKind::Offline { .. } => crate::core::integrity_violation(format_args!(
                "node #{} still offline after restore",
                node.0
            )),
        };
        let value = ops::check(value, node.0, kind)?;

        let n = self.get_mut(node);
        n.value = value;
        n.flags.insert(NodeFlags::EVAL);
        Ok(value)
    }

    /// Value cached for `node` by the last recursive pass, if it was visited.
    #[must_use]
    pub fn cached_value(&self, node: NodeRef) -> Option<f64> {
        let n = self.get(node);
        n.flags.contains(NodeFlags::EVAL).then_some(n.value)
    }
}
