use thiserror::Error;

use crate::core::Kind;

/// Errors that abort an evaluation pass.
///
/// A likelihood with one undefined term cannot be trusted, so every variant
/// stops the pass; there is no partial result. Structural integrity
/// violations are not represented here: they panic.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    /// A function call names something outside the allow-list.
    #[error("unknown function '{name}' in node #{node}")]
    UnknownFunction { name: String, node: u64 },

    /// A known function called with the wrong number of arguments.
    #[error("function '{name}' in node #{node} takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        node: u64,
        expected: String,
        got: usize,
    },

    /// A node evaluated to NaN.
    #[error("{kind} node #{node} evaluated to NaN")]
    NotANumber { node: u64, kind: Kind },
}

impl EvalError {
    /// Id of the node that failed.
    #[must_use]
    pub fn node(&self) -> u64 {
        match self {
            EvalError::UnknownFunction { node, .. }
            | EvalError::Arity { node, .. }
            | EvalError::NotANumber { node, .. } => *node,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e = EvalError::NotANumber {
            node: 7,
            kind: Kind::Product,
        };
        assert_eq!(e.to_string(), "product node #7 evaluated to NaN");
        assert_eq!(e.node(), 7);

        let e = EvalError::UnknownFunction {
            name: "gamma".into(),
            node: 3,
        };
        assert_eq!(e.to_string(), "unknown function 'gamma' in node #3");
    }
}
