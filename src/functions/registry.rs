use rustc_hash::FxHashMap;
use std::ops::RangeInclusive;
use std::sync::OnceLock;

/// A numeric routine callable from a function-call node.
#[derive(Clone)]
pub(crate) struct FunctionDefinition {
    /// Name as written in `make_function_call` (e.g., "log", "chisq_sf")
    pub name: &'static str,

    /// Acceptable argument count (arity)
    pub arity: RangeInclusive<usize>,

    /// Numerical evaluation. Domain errors come back as NaN.
    pub eval: fn(&[f64]) -> f64,
}

impl FunctionDefinition {
    pub(crate) fn validate_arity(&self, args: usize) -> bool {
        self.arity.contains(&args)
    }

    /// Arity as shown in error messages: `2` or `1..=3`.
    pub(crate) fn arity_label(&self) -> String {
        if self.arity.start() == self.arity.end() {
            self.arity.start().to_string()
        } else {
            format!("{}..={}", self.arity.start(), self.arity.end())
        }
    }
}

impl std::fmt::Debug for FunctionDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Static registry storing the allow-list
static REGISTRY: OnceLock<FxHashMap<&'static str, FunctionDefinition>> = OnceLock::new();

fn init_registry() -> FxHashMap<&'static str, FunctionDefinition> {
    let defs = crate::functions::definitions::all_definitions();
    let mut map = FxHashMap::with_capacity_and_hasher(defs.len(), Default::default());
    for def in defs {
        map.insert(def.name, def);
    }
    map
}

/// Central lookup for function-call evaluation
pub(crate) struct Registry;

impl Registry {
    /// Get a function definition by name - O(1) lookup
    pub(crate) fn get(name: &str) -> Option<&'static FunctionDefinition> {
        REGISTRY.get_or_init(init_registry).get(name)
    }

    /// Names on the allow-list, sorted.
    pub(crate) fn names() -> Vec<&'static str> {
        let mut names: Vec<_> = REGISTRY.get_or_init(init_registry).keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_arity() {
        let pow = Registry::get("pow").expect("pow is registered");
        assert!(pow.validate_arity(2));
        assert!(!pow.validate_arity(1));
        assert_eq!(pow.arity_label(), "2");
        assert!(Registry::get("gamma").is_none());
    }

    #[test]
    fn test_allow_list_is_complete() {
        assert_eq!(
            Registry::names(),
            vec![
                "atanh", "chisq_cdf", "chisq_pdf", "chisq_sf", "exp", "log", "log10",
                "normal_cdf", "normal_pdf", "normal_sf", "pow", "sqrt", "t_cdf", "t_pdf",
                "t_sf", "tanh",
            ]
        );
    }
}
