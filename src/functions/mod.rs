//! Function registry
//!
//! A single source of truth for the numeric routines a function-call node
//! may name. Names outside the registry are accepted at construction and
//! rejected when the node is evaluated.

pub(crate) mod definitions;
pub(crate) mod registry;

/// Names a function-call node may use, sorted.
#[must_use]
pub fn allowed_functions() -> Vec<&'static str> {
    registry::Registry::names()
}
