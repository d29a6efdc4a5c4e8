//! C source emission for the native backend.
//!
//! [`emit_c`] renders an [`EvalList`] as one straight-line C function:
//!
//! ```c
//! double name(const double *vars) {
//!     double v[N];
//!     v[0] = vars[0];
//!     v[1] = 0.0 + 2e0 * v[0] + 1e0 * 3e0;
//!     return v[1];
//! }
//! ```
//!
//! Distribution functions are emitted as calls to `pedpoly_<name>` externs
//! that the collaborator links in; external nodes become calls to
//! `pedpoly_ext_<node id>(vars)`. Turning the text into a loaded
//! [`CompiledPoly`] is a [`NativeCompiler`]'s job; [`ListBackend`] is the
//! in-process stand-in.

use std::fmt::Write as _;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::CompiledPoly;
use super::list::{EvalList, Op, Operand};
use super::ops::resolve;
use crate::core::{BindingKey, Bindings};
use crate::error::EvalError;

/// Functions available from `<math.h>` under the same name.
const LIBM: [&str; 7] = ["log", "log10", "exp", "sqrt", "pow", "tanh", "atanh"];

/// Emitted C source and the layout of its `vars` argument.
#[derive(Debug, Clone)]
pub struct EmittedSource {
    pub function: String,
    pub source: String,
    /// `vars[i]` must hold the value bound to `variables[i]`.
    pub variables: Vec<BindingKey>,
    /// External evaluators the emitted code calls, by symbol.
    pub externals: Vec<(String, Arc<dyn CompiledPoly>)>,
}

impl EmittedSource {
    /// Fill the `vars` array from the current bindings.
    #[must_use]
    pub fn gather(&self, bindings: &Bindings) -> Vec<f64> {
        self.variables.iter().map(|&k| bindings.value(k)).collect()
    }
}

/// Turns emitted C into a callable evaluator (compile, link, load).
pub trait NativeCompiler {
    type Error: std::error::Error + Send + Sync + 'static;

    fn compile(&self, source: &EmittedSource) -> Result<Arc<dyn CompiledPoly>, Self::Error>;
}

/// `CompiledPoly` over an evaluation list, for hosts without a C toolchain
/// and for checking native output against.
#[derive(Debug, Clone)]
pub struct ListBackend {
    list: EvalList,
}

impl ListBackend {
    #[must_use]
    pub fn new(list: EvalList) -> Self {
        Self { list }
    }
}

impl CompiledPoly for ListBackend {
    fn evaluate(&self, bindings: &Bindings) -> Result<f64, EvalError> {
        let mut values = Vec::with_capacity(self.list.len());
        self.list.evaluate_with(bindings, &mut values, None)
    }
}

/// Render `list` as a C function named `name`.
///
/// Fails if the list calls a function outside the allow-list or with the
/// wrong number of arguments, since the C code could not be linked.
pub fn emit_c(list: &EvalList, name: &str) -> Result<EmittedSource, EvalError> {
    let mut body = String::new();
    let mut variables: Vec<BindingKey> = Vec::new();
    let mut var_index: FxHashMap<BindingKey, usize> = FxHashMap::default();
    let mut externs: Vec<String> = Vec::new();
    let mut externals: Vec<(String, Arc<dyn CompiledPoly>)> = Vec::new();

    for (i, entry) in list.entries().iter().enumerate() {
        let expr = match &entry.op {
            Op::Variable(key) => {
                let next = variables.len();
                let at = *var_index.entry(*key).or_insert_with(|| {
                    variables.push(*key);
                    next
                });
                format!("vars[{at}]")
            }
            Op::Sum(range) => {
                let mut s = String::from("0.0");
                for &(c, o) in list.sum_terms(range) {
                    let _ = write!(s, " + {} * {}", literal(c), operand(o));
                }
                s
            }
            Op::Product(range) => {
                let mut s = String::from("1.0");
                for &(e, o) in list.product_factors(range) {
                    let _ = write!(s, " * pedpoly_powi({}, {e})", operand(o));
                }
                s
            }
            Op::Call { name: fname, args, .. } => {
                let def = resolve(fname, entry.id, args.len())?;
                let symbol = if LIBM.contains(&def.name) {
                    def.name.to_owned()
                } else {
                    let symbol = format!("pedpoly_{}", def.name);
                    let params = vec!["double"; args.len()].join(", ");
                    push_unique(&mut externs, format!("extern double {symbol}({params});"));
                    symbol
                };
                let argv: Vec<String> = list.call_args(args).iter().map(|&o| operand(o)).collect();
                format!("{symbol}({})", argv.join(", "))
            }
            Op::External(evaluator) => {
                let symbol = format!("pedpoly_ext_{}", entry.id);
                push_unique(&mut externs, format!("extern double {symbol}(const double *vars);"));
                externals.push((symbol.clone(), Arc::clone(evaluator)));
                format!("{symbol}(vars)")
            }
        };
        let _ = writeln!(body, "    v[{i}] = {expr};");
    }

    let mut source = String::new();
    let _ = writeln!(source, "/* generated by pedpoly: root node #{} */", list.root().id());
    source.push_str("#include <math.h>\n\n");
    for decl in &externs {
        source.push_str(decl);
        source.push('\n');
    }
    source.push_str(POWI_HELPER);
    let _ = writeln!(source, "double {name}(const double *vars) {{");
    let _ = writeln!(source, "    double v[{}];", list.len().max(1));
    source.push_str(&body);
    let _ = writeln!(source, "    return {};", operand(list.result()));
    source.push_str("}\n");

    Ok(EmittedSource {
        function: name.to_owned(),
        source,
        variables,
        externals,
    })
}

const POWI_HELPER: &str = "
static inline double pedpoly_powi(double b, int e) {
    switch (e) {
    case 1: return b;
    case 2: return b * b;
    case 3: return b * b * b;
    case 4: { double s = b * b; return s * s; }
    default: return pow(b, (double)e);
    }
}

";

fn push_unique(decls: &mut Vec<String>, decl: String) {
    if !decls.contains(&decl) {
        decls.push(decl);
    }
}

fn operand(o: Operand) -> String {
    match o {
        Operand::Slot(i) => format!("v[{i}]"),
        Operand::Const(c) => literal(c),
    }
}

/// A C double literal that round-trips `v`.
fn literal(v: f64) -> String {
    if v.is_nan() {
        "NAN".to_owned()
    } else if v == f64::INFINITY {
        "INFINITY".to_owned()
    } else if v == f64::NEG_INFINITY {
        "(-INFINITY)".to_owned()
    } else {
        format!("{v:e}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Engine;

    #[test]
    fn test_literals() {
        assert_eq!(literal(2.0), "2e0");
        assert_eq!(literal(-0.125), "-1.25e-1");
        assert_eq!(literal(f64::NEG_INFINITY), "(-INFINITY)");
    }

    #[test]
    fn test_emit_layout() {
        let mut e = Engine::new();
        let mut b = crate::Bindings::new();
        let kx = b.double(2.0);
        let x = e.make_variable("x", kx);
        let sq = e.make_product(&[(2, x)], false);
        let root = e.make_function_call("normal_cdf", &[sq]);
        let list = e.build_eval_list(root);

        let out = emit_c(&list, "lik").expect("emits");
        assert_eq!(out.variables, vec![kx]);
        assert_eq!(out.gather(&b), vec![2.0]);
        assert!(out.source.contains("double lik(const double *vars) {"));
        assert!(out.source.contains("extern double pedpoly_normal_cdf(double);"));
        assert!(out.source.contains("v[1] = 1.0 * pedpoly_powi(v[0], 2);"));
        assert!(out.source.contains("return v[2];"));
    }

    #[test]
    fn test_emit_rejects_unknown_function() {
        let mut e = Engine::new();
        let mut b = crate::Bindings::new();
        let x = e.make_variable("x", b.double(2.0));
        let root = e.make_function_call("digamma", &[x]);
        let list = e.build_eval_list(root);
        assert!(matches!(
            emit_c(&list, "f"),
            Err(EvalError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_list_backend_matches_list() {
        let mut e = Engine::new();
        let mut b = crate::Bindings::new();
        let x = e.make_variable("x", b.double(0.3));
        let y = e.make_variable("y", b.double(0.7));
        let xy = e.make_product(&[(1, x), (3, y)], false);
        let root = e.make_sum(&[(0.5, xy), (2.0, x)], false);
        let mut list = e.build_eval_list(root);
        let expected = list.run(&b).expect("finite");
        let backend = Arc::new(ListBackend::new(list));
        let ext = e.make_external("lik", backend);
        assert_eq!(e.evaluate_recursive(ext, &b), Ok(expected));
    }
}
