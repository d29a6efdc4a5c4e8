//! Arithmetic shared by the recursive and list evaluators.
//!
//! Both paths fold terms in canonical (child id) order through these
//! helpers, which is what makes their results bit-identical.

use tracing::error;

use crate::core::Kind;
use crate::error::EvalError;
use crate::functions::registry::{FunctionDefinition, Registry};

/// `base ^ exponent` with small positive exponents unrolled.
#[inline]
#[must_use]
pub fn pow_int(base: f64, exponent: i32) -> f64 {
    match exponent {
        1 => base,
        2 => base * base,
        3 => base * base * base,
        4 => {
            let sq = base * base;
            sq * sq
        }
        _ => base.powi(exponent),
    }
}

/// One step of a Sum fold.
#[inline]
pub(crate) fn add_term(acc: f64, coefficient: f64, value: f64) -> f64 {
    acc + coefficient * value
}

/// One step of a Product fold.
#[inline]
pub(crate) fn mul_factor(acc: f64, exponent: i32, value: f64) -> f64 {
    acc * pow_int(value, exponent)
}

/// Look up `name` and check the argument count.
pub(crate) fn resolve(
    name: &str,
    node: u64,
    args: usize,
) -> Result<&'static FunctionDefinition, EvalError> {
    let Some(def) = Registry::get(name) else {
        return Err(report(EvalError::UnknownFunction {
            name: name.to_owned(),
            node,
        }));
    };
    if !def.validate_arity(args) {
        return Err(report(EvalError::Arity {
            name: name.to_owned(),
            node,
            expected: def.arity_label(),
            got: args,
        }));
    }
    Ok(def)
}

/// Fail the pass if a node produced NaN.
#[inline]
pub(crate) fn check(value: f64, node: u64, kind: Kind) -> Result<f64, EvalError> {
    if value.is_nan() {
        Err(report(EvalError::NotANumber { node, kind }))
    } else {
        Ok(value)
    }
}

#[cold]
fn report(err: EvalError) -> EvalError {
    error!(node = err.node(), "{err}");
    err
}
