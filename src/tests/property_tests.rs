//! Property-Based Testing
//!
//! Uses quickcheck on randomly generated DAG programs to check:
//! - Dual-path equivalence (recursive vs. list evaluation, bit for bit)
//! - Evaluation list validity (each node once, children first)
//! - Hash-consing idempotence (rebuilding a program yields the same nodes)
//! - Compaction preserves values of retained roots

use quickcheck::{Arbitrary, Gen, QuickCheck, TestResult};

use crate::evaluator::Operand;
use crate::{Bindings, Engine, EvalError, NodeRef};

// ============================================================
// PART 1: PROGRAM GENERATOR
// ============================================================

const UNARY: [&str; 5] = ["exp", "log", "sqrt", "tanh", "normal_cdf"];

/// One construction step. Indices refer to earlier results, modulo the
/// number of results available so far.
#[derive(Debug, Clone)]
enum Step {
    Const(i8),
    Sum(Vec<(i8, usize)>),
    Product(Vec<(i8, usize)>),
    Call(usize, usize),
    Pow(usize, usize),
}

#[derive(Debug, Clone)]
struct Program {
    vars: Vec<i8>,
    steps: Vec<Step>,
}

impl Arbitrary for Program {
    fn arbitrary(g: &mut Gen) -> Self {
        let nvars = 1 + usize::arbitrary(g) % 4;
        let nsteps = 1 + usize::arbitrary(g) % g.size().clamp(1, 24);
        let vars = (0..nvars).map(|_| i8::arbitrary(g)).collect();
        let mut steps = Vec::with_capacity(nsteps);
        for _ in 0..nsteps {
            let pairs = |g: &mut Gen| {
                let n = 1 + usize::arbitrary(g) % 4;
                (0..n)
                    .map(|_| (i8::arbitrary(g), usize::arbitrary(g)))
                    .collect::<Vec<_>>()
            };
            let step = match u8::arbitrary(g) % 10 {
                0 => Step::Const(i8::arbitrary(g)),
                1..=3 => Step::Sum(pairs(g)),
                4..=6 => Step::Product(pairs(g)),
                7 | 8 => Step::Call(usize::arbitrary(g), usize::arbitrary(g)),
                _ => Step::Pow(usize::arbitrary(g), usize::arbitrary(g)),
            };
            steps.push(step);
        }
        Program { vars, steps }
    }
}

/// Build `program` into `engine`, returning every intermediate handle.
/// The last handle is the root.
fn build(engine: &mut Engine, bindings: &mut Bindings, program: &Program) -> Vec<NodeRef> {
    let mut nodes: Vec<NodeRef> = program
        .vars
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let key = bindings.double(f64::from(v) / 32.0);
            engine.make_variable(&format!("v{i}"), key)
        })
        .collect();
    build_steps(engine, program, &mut nodes);
    nodes
}

fn build_steps(engine: &mut Engine, program: &Program, nodes: &mut Vec<NodeRef>) {
    for step in &program.steps {
        let pick = |i: usize| nodes[i % nodes.len()];
        let node = match step {
            Step::Const(c) => engine.make_constant(f64::from(*c) / 4.0),
            Step::Sum(terms) => {
                let terms: Vec<(f64, NodeRef)> = terms
                    .iter()
                    .map(|&(c, i)| (f64::from(c) / 8.0, pick(i)))
                    .collect();
                engine.make_sum(&terms, false)
            }
            Step::Product(factors) => {
                let factors: Vec<(i32, NodeRef)> = factors
                    .iter()
                    .map(|&(e, i)| (i32::from(e % 4), pick(i)))
                    .collect();
                engine.make_product(&factors, false)
            }
            Step::Call(f, i) => engine.make_function_call(UNARY[f % UNARY.len()], &[pick(*i)]),
            Step::Pow(a, b) => engine.make_function_call("pow", &[pick(*a), pick(*b)]),
        };
        nodes.push(node);
    }
}

fn same_outcome(a: &Result<f64, EvalError>, b: &Result<f64, EvalError>) -> bool {
    match (a, b) {
        (Ok(x), Ok(y)) => x.to_bits() == y.to_bits(),
        (Err(x), Err(y)) => x == y,
        _ => false,
    }
}

// ============================================================
// PART 2: PROPERTIES
// ============================================================

#[test]
fn test_dual_path_equivalence() {
    fn prop(program: Program) -> TestResult {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let nodes = build(&mut e, &mut b, &program);
        let Some(&root) = nodes.last() else {
            return TestResult::discard();
        };
        let recursive = e.evaluate_recursive(root, &b);
        let mut list = e.build_eval_list(root);
        let listed = e.evaluate(&mut list, &b);
        TestResult::from_bool(same_outcome(&recursive, &listed))
    }
    QuickCheck::new()
        .tests(500)
        .quickcheck(prop as fn(Program) -> TestResult);
}

#[test]
fn test_eval_list_validity() {
    fn prop(program: Program) -> bool {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let nodes = build(&mut e, &mut b, &program);
        let root = nodes[nodes.len() - 1];
        let list = e.build_eval_list(root);

        let mut seen = std::collections::HashSet::new();
        for (pos, entry) in list.entries().iter().enumerate() {
            if !seen.insert(entry.id) {
                return false;
            }
            let operands: Vec<Operand> = match &entry.op {
                crate::evaluator::Op::Sum(r) => list.sum_terms(r).iter().map(|t| t.1).collect(),
                crate::evaluator::Op::Product(r) => {
                    list.product_factors(r).iter().map(|f| f.1).collect()
                }
                crate::evaluator::Op::Call { args, .. } => list.call_args(args).to_vec(),
                _ => Vec::new(),
            };
            let ordered = operands.iter().all(|o| match o {
                Operand::Slot(s) => (*s as usize) < pos,
                Operand::Const(_) => true,
            });
            if !ordered {
                return false;
            }
        }
        // Every non-constant descendant is present.
        nodes
            .iter()
            .filter(|n| e.constant_value(**n).is_none())
            .filter(|n| reaches(&e, root, **n))
            .all(|n| list.position_of(n.id()).is_some())
    }
    QuickCheck::new()
        .tests(300)
        .quickcheck(prop as fn(Program) -> bool);
}

fn reaches(e: &Engine, from: NodeRef, target: NodeRef) -> bool {
    let mut stack = vec![from];
    let mut seen = std::collections::HashSet::new();
    while let Some(n) = stack.pop() {
        if n == target {
            return true;
        }
        if seen.insert(n) {
            stack.extend(e.get(n).kind().children());
        }
    }
    false
}

#[test]
fn test_rebuild_is_idempotent() {
    fn prop(program: Program) -> bool {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let first = build(&mut e, &mut b, &program);
        let count = e.node_count();

        // Same variables, same steps: every handle must come back unchanged.
        let mut second: Vec<NodeRef> = first[..program.vars.len()].to_vec();
        build_steps(&mut e, &program, &mut second);
        second == first && e.node_count() == count
    }
    QuickCheck::new()
        .tests(300)
        .quickcheck(prop as fn(Program) -> bool);
}

#[test]
fn test_compaction_preserves_kept_values() {
    fn prop(program: Program) -> TestResult {
        let mut e = Engine::new();
        let mut b = Bindings::new();
        let nodes = build(&mut e, &mut b, &program);
        let root = nodes[nodes.len() - 1];
        let Ok(before) = e.evaluate_recursive(root, &b) else {
            return TestResult::discard();
        };
        e.hold(root);
        e.compact(crate::NodeFlags::NONE);
        let after = e.evaluate_recursive(root, &b);
        e.unhold(root);
        TestResult::from_bool(after.is_ok_and(|v| v.to_bits() == before.to_bits()))
    }
    QuickCheck::new()
        .tests(200)
        .quickcheck(prop as fn(Program) -> TestResult);
}
