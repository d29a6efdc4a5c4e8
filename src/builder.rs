//! Construction entry points
//!
//! Every expression enters the engine through one of the `make_*` methods.
//! They normalize their input into a canonical form and then hash-cons it,
//! so building the same expression twice yields the same [`NodeRef`].
//!
//! # Normal forms
//!
//! - Sums never nest: a Sum term is spliced into the outer list, scaled by
//!   its coefficient.
//! - Constant terms fold into one scalar, stored as `scalar * 1.0` against
//!   a constant node holding exactly 1.0.
//! - Terms are sorted by child id and duplicates merged; zero coefficients
//!   (and zero exponents) disappear.
//! - A leading coefficient on a product is always a one-term Sum wrapping
//!   the Product, never part of the Product itself.
//!
//! # Example
//! ```
//! use pedpoly::{Bindings, Engine};
//!
//! let mut engine = Engine::new();
//! let mut vars = Bindings::new();
//! let x = engine.make_variable("x", vars.double(2.0));
//! let y = engine.make_variable("y", vars.double(3.0));
//!
//! let inner = engine.make_sum(&[(2.0, y)], false);
//! let a = engine.make_sum(&[(1.0, x), (1.0, inner)], false);
//! let b = engine.make_sum(&[(2.0, y), (1.0, x)], false);
//! assert_eq!(a, b);
//! ```

use std::sync::Arc;

use tracing::warn;

use crate::core::hash;
use crate::core::{
    BindingKey, Engine, External, Factor, Kind, NodeFlags, NodeKind, NodeRef, Term, Variable,
};
use crate::core::integrity_violation;
use crate::evaluator::CompiledPoly;
use crate::evaluator::ops::pow_int;
use crate::functions::registry::Registry;

impl Engine {
    /// Intern a constant.
    ///
    /// Values that agree to about nine significant digits share a node; the
    /// first value interned is the one the node keeps.
    pub fn make_constant(&mut self, value: f64) -> NodeRef {
        let value = if value == 0.0 { 0.0 } else { value };
        self.intern(
            Kind::Constant,
            hash::constant_key(value),
            NodeKind::Constant(value),
        )
    }

    /// Intern a variable bound to a caller-owned slot.
    ///
    /// Two variables are the same node iff they share a binding slot; the
    /// display name of the first one wins.
    pub fn make_variable(&mut self, name: &str, binding: BindingKey) -> NodeRef {
        self.intern(
            Kind::Variable,
            hash::variable_key(binding.identity()),
            NodeKind::Variable(Variable {
                binding,
                name: Arc::from(name),
            }),
        )
    }

    /// Build `sum(coefficient * term)`.
    ///
    /// With `first_term_replaceable` set, a first term that is a Sum with no
    /// parents, no hold and no keep flag gives up its slot and term buffer to
    /// the result (the accumulator pattern `acc = acc + t`). Its old handle is
    /// freed in that case, so only the returned handle may be used. If the
    /// first term does not pass those checks the flag is ignored.
    pub fn make_sum(&mut self, terms: &[(f64, NodeRef)], first_term_replaceable: bool) -> NodeRef {
        let mut scalar = 0.0;
        let mut flat: Vec<Term> = Vec::with_capacity(terms.len());

        for &(coefficient, node) in terms {
            if coefficient == 0.0 {
                continue;
            }
            self.restore(node);
            match &self.get(node).kind {
                NodeKind::Constant(v) => scalar += coefficient * v,
                NodeKind::Sum(inner) => {
                    for t in inner {
                        match self.constant_value(t.node) {
                            Some(v) => scalar += coefficient * t.coefficient * v,
                            None => flat.push(Term {
                                coefficient: coefficient * t.coefficient,
                                node: t.node,
                            }),
                        }
                    }
                }
                _ => flat.push(Term { coefficient, node }),
            }
        }

        let mut merged = canonical_terms(flat);
        match merged.as_slice() {
            [] => return self.make_constant(scalar),
            [only] if scalar == 0.0 && only.coefficient == 1.0 => return only.node,
            _ => {}
        }
        if scalar != 0.0 {
            let one = self.unit();
            let pos = merged.partition_point(|t| t.node < one);
            merged.insert(
                pos,
                Term {
                    coefficient: scalar,
                    node: one,
                },
            );
        }

        let key = hash::sum_key(&merged, |id| self.key_of(id));
        let reuse = first_term_replaceable
            && terms
                .first()
                .is_some_and(|&(_, first)| self.is_reusable(first, Kind::Sum));
        self.intern_or_reuse(
            Kind::Sum,
            key,
            NodeKind::Sum(merged),
            reuse.then(|| terms[0].1),
        )
    }

    /// Build `prod(term ^ exponent)`.
    ///
    /// Nested Products are flattened, coefficient-carrying one-term Sums are
    /// absorbed, constant factors fold into a scalar, and any zero factor
    /// yields the constant 0 (with a warning if its exponent is negative).
    /// A scalar other than 1
    /// ends up as the coefficient of a one-term Sum around the Product.
    pub fn make_product(
        &mut self,
        factors: &[(i32, NodeRef)],
        first_term_replaceable: bool,
    ) -> NodeRef {
        let mut scalar = 1.0;
        let mut flat: Vec<Factor> = Vec::with_capacity(factors.len());
        let mut pending: Vec<(i32, NodeRef)> = factors.iter().rev().copied().collect();
        let mut zero_factor = false;

        while let Some((exponent, node)) = pending.pop() {
            if exponent == 0 {
                continue;
            }
            self.restore(node);
            match &self.get(node).kind {
                NodeKind::Constant(v) => {
                    if *v == 0.0 {
                        if exponent < 0 {
                            warn!(node = node.0, exponent, "zero constant raised to a negative power");
                        }
                        zero_factor = true;
                        break;
                    }
                    scalar *= pow_int(*v, exponent);
                }
                NodeKind::Product(inner) => {
                    for f in inner {
                        flat.push(Factor {
                            exponent: combine_exponents(i32::checked_mul, exponent, f.exponent),
                            node: f.node,
                        });
                    }
                }
                NodeKind::Sum(terms) if terms.len() == 1 => {
                    scalar *= pow_int(terms[0].coefficient, exponent);
                    pending.push((exponent, terms[0].node));
                }
                _ => flat.push(Factor { exponent, node }),
            }
        }

        if zero_factor || scalar == 0.0 {
            return self.make_constant(0.0);
        }
        let merged = canonical_factors(flat);
        if merged.is_empty() {
            return self.make_constant(scalar);
        }
        let core = if merged.len() == 1 && merged[0].exponent == 1 {
            merged[0].node
        } else {
            let key = hash::product_key(&merged, |id| self.key_of(id));
            let reuse = first_term_replaceable
                && factors
                    .first()
                    .is_some_and(|&(_, first)| self.is_reusable(first, Kind::Product));
            self.intern_or_reuse(
                Kind::Product,
                key,
                NodeKind::Product(merged),
                reuse.then(|| factors[0].1),
            )
        };

        if scalar == 1.0 {
            core
        } else {
            self.make_sum(&[(scalar, core)], false)
        }
    }

    /// Intern a call to a named numeric routine.
    ///
    /// The name is checked against the allow-list only when the call is
    /// evaluated; an unknown name is logged here and fails there.
    pub fn make_function_call(&mut self, name: &str, args: &[NodeRef]) -> NodeRef {
        if Registry::get(name).is_none() {
            warn!(function = name, "function call to a name outside the allow-list");
        }
        let ids: Vec<u64> = args.iter().map(|a| a.0).collect();
        let key = hash::function_key(name, &ids, |id| self.key_of(id));
        self.intern(
            Kind::FunctionCall,
            key,
            NodeKind::FunctionCall {
                name: Arc::from(name),
                args: args.to_vec(),
            },
        )
    }

    /// Intern a node evaluated by a native backend. One node per name.
    pub fn make_external(&mut self, name: &str, evaluator: Arc<dyn CompiledPoly>) -> NodeRef {
        self.intern(
            Kind::External,
            hash::external_key(name),
            NodeKind::External(External {
                name: Arc::from(name),
                evaluator,
            }),
        )
    }

    /// The constant exactly 1.0, carrier of a Sum's folded scalar.
    ///
    /// Constants share nodes to about nine digits, so `make_constant(1.0)`
    /// may return a node holding a nearby value. This lookup insists on the
    /// exact bits and adds a second node under the same key if needed.
    pub(crate) fn unit(&mut self) -> NodeRef {
        let key = hash::constant_key(1.0);
        let s = Kind::Constant.slot();
        let (bucket, span) = self.stores[s].index.candidate_span(key);
        for pos in span {
            let node = &self.stores[s].nodes[self.stores[s].index.slot_at(bucket, pos) as usize];
            if matches!(node.kind, NodeKind::Constant(v) if v.to_bits() == 1.0_f64.to_bits()) {
                self.stats.hits[s] += 1;
                return NodeRef(node.id);
            }
        }
        self.stats.misses[s] += 1;
        self.insert_new(Kind::Constant, key, NodeKind::Constant(1.0))
    }

    // =========================================================================
    // IN-PLACE REUSE
    // =========================================================================

    /// A node may donate its slot when nothing else can observe it.
    fn is_reusable(&self, node: NodeRef, kind: Kind) -> bool {
        if !self.is_live(node) || self.kind_of(node) != kind {
            return false;
        }
        let n = self.get(node);
        n.parents == 0 && n.hold == 0 && !n.flags.contains(NodeFlags::KEEP)
    }

    fn intern_or_reuse(
        &mut self,
        kind: Kind,
        key: u64,
        payload: NodeKind,
        donor: Option<NodeRef>,
    ) -> NodeRef {
        if let Some(existing) = self.lookup(kind, key, &payload) {
            self.stats.hits[kind.slot()] += 1;
            self.traced(existing.0, "intern hit");
            return existing;
        }
        self.stats.misses[kind.slot()] += 1;
        match donor {
            Some(donor) => self.rebuild_in_place(donor, key, payload),
            None => self.insert_new(kind, key, payload),
        }
    }

    /// Give `donor`'s slot (and term buffer) a fresh id and new structure.
    fn rebuild_in_place(&mut self, donor: NodeRef, key: u64, payload: NodeKind) -> NodeRef {
        // A donor skipped for a zero coefficient may still be offline; its
        // children must be in memory to drop their parent counts.
        self.restore(donor);
        let loc = self.locate(donor);
        let s = loc.kind.slot();
        let slot = loc.slot as usize;

        let old_key = self.stores[s].nodes[slot].key;
        if !self.stores[s].index.remove(old_key, loc.slot) {
            integrity_violation(format_args!(
                "hash entry for node #{} missing from the {} index",
                donor.0, loc.kind
            ));
        }

        let old = std::mem::replace(&mut self.stores[s].nodes[slot].kind, NodeKind::Constant(0.0));
        for child in old.children() {
            self.get_mut(child).remove_parent();
        }
        let payload = match (old, payload) {
            (NodeKind::Sum(mut buf), NodeKind::Sum(new)) => {
                buf.clear();
                buf.extend_from_slice(&new);
                NodeKind::Sum(buf)
            }
            (NodeKind::Product(mut buf), NodeKind::Product(new)) => {
                buf.clear();
                buf.extend_from_slice(&new);
                NodeKind::Product(buf)
            }
            (_, new) => new,
        };
        payload.for_each_child(|c| self.get_mut(c).add_parent());

        let id = self.issue_id();
        self.set_location(donor.0, None);
        self.set_location(id, Some(loc));

        let node = &mut self.stores[s].nodes[slot];
        node.id = id;
        node.key = key;
        node.kind = payload;
        node.flags = NodeFlags::TOP;
        node.value = 0.0;
        self.stores[s].index.insert(key, loc.slot);

        self.stats.in_place += 1;
        self.traced(donor.0, "donated its slot");
        self.traced(id, "created in place");
        NodeRef(id)
    }
}

/// Sort by child id, merge duplicates, drop zero coefficients.
fn canonical_terms(mut terms: Vec<Term>) -> Vec<Term> {
    terms.sort_by_key(|t| t.node);
    let mut out: Vec<Term> = Vec::with_capacity(terms.len());
    for t in terms {
        match out.last_mut() {
            Some(last) if last.node == t.node => last.coefficient += t.coefficient,
            _ => out.push(t),
        }
    }
    out.retain(|t| t.coefficient != 0.0);
    out
}

/// Multiply or add two exponents. Overflowing `i32` is fatal: no factor
/// can be represented past that point.
fn combine_exponents(op: fn(i32, i32) -> Option<i32>, a: i32, b: i32) -> i32 {
    match op(a, b) {
        Some(e) => e,
        None => integrity_violation(format_args!(
            "combining exponents {a} and {b} overflows i32"
        )),
    }
}

/// Sort by child id, add exponents of duplicates, drop zero exponents.
fn canonical_factors(mut factors: Vec<Factor>) -> Vec<Factor> {
    factors.sort_by_key(|f| f.node);
    let mut out: Vec<Factor> = Vec::with_capacity(factors.len());
    for f in factors {
        match out.last_mut() {
            Some(last) if last.node == f.node => {
                last.exponent = combine_exponents(i32::checked_add, last.exponent, f.exponent);
            }
            _ => out.push(f),
        }
    }
    out.retain(|f| f.exponent != 0);
    out
}
