//! Fork-join helpers using Rayon
//!
//! Flag clearing, per-kind sweeping and batch evaluation fan out over
//! Rayon's pool when the `parallel` feature is on (the default) and fall
//! back to plain loops otherwise, with identical results.
//!
//! ```toml
//! pedpoly = { version = "0.4", default-features = false }  # sequential only
//! ```

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::core::store::{Store, Sweep};
use crate::core::{Bindings, NodeFlags};
use crate::error::EvalError;
use crate::evaluator::EvalList;

/// Clear `flag` on every node of every store.
pub(crate) fn clear_flag(stores: &mut [Store], flag: NodeFlags) {
    #[cfg(feature = "parallel")]
    stores
        .par_iter_mut()
        .for_each(|s| s.nodes.par_iter_mut().for_each(|n| n.flags.remove(flag)));

    #[cfg(not(feature = "parallel"))]
    for n in stores.iter_mut().flat_map(|s| s.nodes.iter_mut()) {
        n.flags.remove(flag);
    }
}

/// Sweep each store, one task per kind.
pub(crate) fn sweep_all(stores: &mut [Store]) -> Vec<Sweep> {
    #[cfg(feature = "parallel")]
    {
        stores.par_iter_mut().map(Store::sweep).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        stores.iter_mut().map(Store::sweep).collect()
    }
}

/// Evaluate independent lists under the same bindings.
///
/// Results come back in input order; one list failing does not stop the
/// others.
///
/// # Example
/// ```
/// use pedpoly::{Bindings, Engine, parallel::evaluate_parallel};
///
/// let mut engine = Engine::new();
/// let mut vars = Bindings::new();
/// let x = engine.make_variable("x", vars.double(3.0));
/// let sq = engine.make_product(&[(2, x)], false);
/// let cube = engine.make_product(&[(3, x)], false);
///
/// let mut lists = vec![engine.build_eval_list(sq), engine.build_eval_list(cube)];
/// let out = evaluate_parallel(&mut lists, &vars);
/// assert_eq!(out, vec![Ok(9.0), Ok(27.0)]);
/// ```
pub fn evaluate_parallel(lists: &mut [EvalList], bindings: &Bindings) -> Vec<Result<f64, EvalError>> {
    #[cfg(feature = "parallel")]
    {
        lists.par_iter_mut().map(|l| l.run(bindings)).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        lists.iter_mut().map(|l| l.run(bindings)).collect()
    }
}

/// Evaluate one list at many points (for example a likelihood grid),
/// each with its own bindings table.
pub fn evaluate_points(list: &EvalList, points: &[Bindings]) -> Vec<Result<f64, EvalError>> {
    #[cfg(feature = "parallel")]
    {
        points
            .par_iter()
            .map_init(Vec::new, |scratch, b| list.evaluate_with(b, scratch, None))
            .collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        let mut scratch = Vec::new();
        points
            .iter()
            .map(|b| list.evaluate_with(b, &mut scratch, None))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Engine;

    #[test]
    fn test_points_match_sequential_runs() {
        let mut e = Engine::new();
        let mut base = Bindings::new();
        let k = base.double(0.0);
        let x = e.make_variable("x", k);
        let root = e.make_function_call("normal_cdf", &[x]);
        let mut list = e.build_eval_list(root);

        let points: Vec<Bindings> = (0..16)
            .map(|i| {
                let mut b = base.clone();
                b.set(k, f64::from(i) * 0.25 - 2.0);
                b
            })
            .collect();
        let batch = evaluate_points(&list, &points);
        for (b, got) in points.iter().zip(batch) {
            assert_eq!(got, list.run(b));
        }
    }

    #[test]
    fn test_clear_flag_everywhere() {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let x = e.make_variable("x", b.double(1.0));
        let s = e.make_sum(&[(2.0, x)], false);
        e.evaluate_recursive(s, &b).expect("finite");
        assert!(e.cached_value(x).is_some());
        clear_flag(&mut e.stores, NodeFlags::EVAL);
        assert!(e.cached_value(x).is_none());
        assert!(e.cached_value(s).is_none());
    }
}
