// Diagnostics: textual rendering, tiered summaries and memory estimates
use std::fmt::{self, Write as _};

use crate::core::{Engine, Kind, NodeKind, NodeRef};

/// How much of a node [`Engine::summary`] shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryTier {
    /// Kind, id and size: `sum #12 [4 terms]`.
    Brief,
    /// One level of structure, children as handles: `3*#4 + #7`.
    Shallow,
    /// The whole expression, as [`Engine::render`] prints it.
    Full,
}

/// Estimated heap use of one store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindUsage {
    pub nodes: usize,
    pub bytes: usize,
}

/// Estimated heap use of an engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    pub per_kind: [KindUsage; Kind::COUNT],
    /// The id-to-location map of live nodes.
    pub locations: usize,
}

impl MemoryUsage {
    #[must_use]
    pub fn total(&self) -> usize {
        self.per_kind.iter().map(|k| k.bytes).sum::<usize>() + self.locations
    }
}

impl fmt::Display for MemoryUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (kind, usage) in Kind::ALL.iter().zip(&self.per_kind) {
            writeln!(f, "{:<9} {:>10} nodes {:>12} bytes", kind.label(), usage.nodes, usage.bytes)?;
        }
        writeln!(f, "{:<9} {:>10}       {:>12} bytes", "ids", "", self.locations)?;
        write!(f, "{:<9} {:>10}       {:>12} bytes", "total", "", self.total())
    }
}

impl Engine {
    /// Render the expression under `node` as text.
    ///
    /// Shared subexpressions are printed at every use, so the output can be
    /// exponentially larger than the DAG; use [`summary`](Self::summary) on
    /// big nodes. Offline nodes print as a placeholder.
    #[must_use]
    pub fn render(&self, node: NodeRef) -> String {
        let mut out = String::new();
        self.render_into(node, &mut out);
        out
    }

    fn render_into(&self, node: NodeRef, out: &mut String) {
        match self.get(node).kind() {
            NodeKind::Constant(v) => out.push_str(&format_number(*v)),
            NodeKind::Variable(v) => out.push_str(&v.name),
            NodeKind::Sum(terms) => {
                for (i, t) in terms.iter().enumerate() {
                    let c = t.coefficient;
                    let is_one = self.constant_value(t.node) == Some(1.0);
                    if i > 0 {
                        out.push_str(if c < 0.0 { " - " } else { " + " });
                    } else if c < 0.0 {
                        out.push('-');
                    }
                    let mag = c.abs();
                    if is_one {
                        out.push_str(&format_number(mag));
                        continue;
                    }
                    if mag != 1.0 {
                        out.push_str(&format_number(mag));
                        out.push('*');
                    }
                    self.render_operand(t.node, out);
                }
            }
            NodeKind::Product(factors) => {
                for (i, f) in factors.iter().enumerate() {
                    if i > 0 {
                        out.push('*');
                    }
                    self.render_operand(f.node, out);
                    if f.exponent != 1 {
                        let _ = write!(out, "^{}", f.exponent);
                    }
                }
            }
            NodeKind::FunctionCall { name, args } => {
                out.push_str(name);
                out.push('(');
                for (i, &a) in args.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.render_into(a, out);
                }
                out.push(')');
            }
            NodeKind::External(ext) => {
                let _ = write!(out, "<{}>", ext.name);
            }
            NodeKind::Offline { kind, len, .. } => {
                let _ = write!(out, "[offline {kind} #{}: {len} terms]", node.0);
            }
        }
    }

    /// Render a Sum/Product operand, parenthesized when it is itself a
    /// multi-term expression.
    fn render_operand(&self, node: NodeRef, out: &mut String) {
        let wrap = match self.get(node).kind() {
            NodeKind::Sum(_) | NodeKind::Offline { .. } => true,
            NodeKind::Product(f) => f.len() > 1,
            _ => false,
        };
        if wrap {
            out.push('(');
            self.render_into(node, out);
            out.push(')');
        } else {
            self.render_into(node, out);
        }
    }

    /// A bounded-size description of `node`.
    #[must_use]
    pub fn summary(&self, node: NodeRef, tier: SummaryTier) -> String {
        let n = self.get(node);
        let kind = self.kind_of(node);
        match tier {
            SummaryTier::Full => self.render(node),
            SummaryTier::Brief => {
                let size = match n.kind() {
                    NodeKind::Sum(t) => format!(" [{} terms]", t.len()),
                    NodeKind::Product(f) => format!(" [{} factors]", f.len()),
                    NodeKind::FunctionCall { name, args } => format!(" [{name}/{}]", args.len()),
                    NodeKind::Offline { len, .. } => format!(" [{len} terms, offline]"),
                    NodeKind::Constant(v) => format!(" [{}]", format_number(*v)),
                    NodeKind::Variable(v) => format!(" [{}]", v.name),
                    NodeKind::External(e) => format!(" [{}]", e.name),
                };
                format!("{kind} {node}{size} hold={} parents={}", n.hold_count(), n.parent_count())
            }
            SummaryTier::Shallow => match n.kind() {
                NodeKind::Sum(terms) => terms
                    .iter()
                    .map(|t| format!("{}*{}", format_number(t.coefficient), t.node))
                    .collect::<Vec<_>>()
                    .join(" + "),
                NodeKind::Product(factors) => factors
                    .iter()
                    .map(|f| format!("{}^{}", f.node, f.exponent))
                    .collect::<Vec<_>>()
                    .join("*"),
                NodeKind::FunctionCall { name, args } => {
                    let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                    format!("{name}({})", args.join(", "))
                }
                _ => self.summary(node, SummaryTier::Brief),
            },
        }
    }

    /// Per-store node counts and estimated heap bytes.
    #[must_use]
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage {
            locations: self.locations.capacity()
                * std::mem::size_of::<(u64, crate::core::engine::Location)>(),
            ..MemoryUsage::default()
        };
        for (slot, store) in usage.per_kind.iter_mut().zip(&self.stores) {
            *slot = KindUsage {
                nodes: store.len(),
                bytes: store.heap_bytes(),
            };
        }
        usage
    }
}

/// Integers print without a fractional part; everything else as Rust prints it.
fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n == f64::INFINITY {
        "inf".to_owned()
    } else if n == f64::NEG_INFINITY {
        "-inf".to_owned()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "Checked integral and below 1e15"
        )]
        let i = n as i64;
        i.to_string()
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bindings;

    #[test]
    fn test_render_likelihood_term() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let p = e.make_variable("p", b.double(0.1));
        let q = e.make_variable("q", b.double(0.9));
        let pq = e.make_product(&[(2, p), (1, q)], false);
        let half = e.make_constant(0.5);
        let s = e.make_sum(&[(2.0, pq), (-1.0, q), (1.0, half)], false);
        assert_eq!(e.render(pq), "p^2*q");
        // Terms are in id order: q, pq, then the constant 1.
        assert_eq!(e.render(s), "-q + 2*(p^2*q) + 0.5");
        let f = e.make_function_call("log", &[s]);
        assert!(e.render(f).starts_with("log(-q"));
    }

    #[test]
    fn test_summary_tiers() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let x = e.make_variable("x", b.double(1.0));
        let y = e.make_variable("y", b.double(1.0));
        let s = e.make_sum(&[(3.0, x), (1.0, y)], false);
        assert_eq!(
            e.summary(s, SummaryTier::Brief),
            format!("sum {s} [2 terms] hold=0 parents=0")
        );
        assert_eq!(e.summary(s, SummaryTier::Shallow), format!("3*{x} + 1*{y}"));
        assert_eq!(e.summary(s, SummaryTier::Full), "3*x + y");
    }

    #[test]
    fn test_memory_usage_counts_nodes() {
        let mut e = Engine::new();
        let _ = e.make_constant(1.0);
        let _ = e.make_constant(2.0);
        let usage = e.memory_usage();
        assert_eq!(usage.per_kind[Kind::Constant.slot()].nodes, 2);
        assert!(usage.total() > 0);
        assert!(usage.to_string().contains("constant"));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.25), "-0.25");
        assert_eq!(format_number(f64::INFINITY), "inf");
    }
}
