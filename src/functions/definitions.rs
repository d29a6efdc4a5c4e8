//! The function allow-list
//!
//! Elementary functions map straight onto `f64` methods; the distribution
//! functions delegate to [`crate::math`]. Degrees of freedom for `t_*` and
//! `chisq_*` are the second argument.

use super::registry::FunctionDefinition;
use crate::math;

/// Return all function definitions for populating the registry
pub(crate) fn all_definitions() -> Vec<FunctionDefinition> {
    vec![
        // Elementary
        FunctionDefinition {
            name: "log",
            arity: 1..=1,
            eval: |args| args[0].ln(),
        },
        FunctionDefinition {
            name: "log10",
            arity: 1..=1,
            eval: |args| args[0].log10(),
        },
        FunctionDefinition {
            name: "exp",
            arity: 1..=1,
            eval: |args| args[0].exp(),
        },
        FunctionDefinition {
            name: "sqrt",
            arity: 1..=1,
            eval: |args| args[0].sqrt(),
        },
        FunctionDefinition {
            name: "pow",
            arity: 2..=2,
            eval: |args| args[0].powf(args[1]),
        },
        FunctionDefinition {
            name: "tanh",
            arity: 1..=1,
            eval: |args| args[0].tanh(),
        },
        FunctionDefinition {
            name: "atanh",
            arity: 1..=1,
            eval: |args| args[0].atanh(),
        },
        // Standard normal
        FunctionDefinition {
            name: "normal_pdf",
            arity: 1..=1,
            eval: |args| math::normal_pdf(args[0]),
        },
        FunctionDefinition {
            name: "normal_cdf",
            arity: 1..=1,
            eval: |args| math::normal_cdf(args[0]),
        },
        FunctionDefinition {
            name: "normal_sf",
            arity: 1..=1,
            eval: |args| math::normal_sf(args[0]),
        },
        // Student's t (x, degrees of freedom)
        FunctionDefinition {
            name: "t_pdf",
            arity: 2..=2,
            eval: |args| math::t_pdf(args[0], args[1]),
        },
        FunctionDefinition {
            name: "t_cdf",
            arity: 2..=2,
            eval: |args| math::t_cdf(args[0], args[1]),
        },
        FunctionDefinition {
            name: "t_sf",
            arity: 2..=2,
            eval: |args| math::t_sf(args[0], args[1]),
        },
        // Chi-squared (x, degrees of freedom)
        FunctionDefinition {
            name: "chisq_pdf",
            arity: 2..=2,
            eval: |args| math::chisq_pdf(args[0], args[1]),
        },
        FunctionDefinition {
            name: "chisq_cdf",
            arity: 2..=2,
            eval: |args| math::chisq_cdf(args[0], args[1]),
        },
        FunctionDefinition {
            name: "chisq_sf",
            arity: 2..=2,
            eval: |args| math::chisq_sf(args[0], args[1]),
        },
    ]
}
