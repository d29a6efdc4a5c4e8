//! Likelihood Polynomial Benchmark
//!
//! Builds a peeling-style likelihood over a chain of nuclear families and
//! measures construction, both evaluation paths, and compaction.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use pedpoly::{Bindings, Engine, NodeFlags, NodeRef, evaluate_parallel};

// =============================================================================
// Pedigree Generator
// =============================================================================

struct Model {
    bindings: Bindings,
    p: NodeRef,
    q: NodeRef,
    penetrance: [NodeRef; 3],
}

fn model(engine: &mut Engine) -> Model {
    let mut bindings = Bindings::new();
    let p = engine.make_variable("p", bindings.double(0.05));
    let q = engine.make_variable("q", bindings.double(0.95));
    let penetrance = [
        engine.make_variable("f0", bindings.double(0.01)),
        engine.make_variable("f1", bindings.double(0.4)),
        engine.make_variable("f2", bindings.double(0.9)),
    ];
    Model {
        bindings,
        p,
        q,
        penetrance,
    }
}

/// Genotype frequencies under Hardy-Weinberg: q^2, 2pq, p^2.
fn founders(e: &mut Engine, m: &Model) -> [NodeRef; 3] {
    [
        e.make_product(&[(2, m.q)], false),
        {
            let pq = e.make_product(&[(1, m.p), (1, m.q)], false);
            e.make_sum(&[(2.0, pq)], false)
        },
        e.make_product(&[(2, m.p)], false),
    ]
}

/// Mendelian transmission probability of child genotype `c` from parents
/// `f` and `m`, genotypes counted in copies of the disease allele.
fn transmission(f: usize, m: usize, c: usize) -> f64 {
    let pass = |g: usize| [0.0, 0.5, 1.0][g];
    let (a, b) = (pass(f), pass(m));
    match c {
        0 => (1.0 - a) * (1.0 - b),
        1 => a * (1.0 - b) + (1.0 - a) * b,
        _ => a * b,
    }
}

/// Peel `generations` nuclear families, each passing its child's genotype
/// distribution down as the next father.
fn pedigree(e: &mut Engine, m: &Model, generations: usize, children: i32) -> NodeRef {
    let mut father = founders(e, m);
    for _ in 0..generations {
        let mother = founders(e, m);
        let mut next = [father[0]; 3];
        for (c, slot) in next.iter_mut().enumerate() {
            let mut terms = Vec::with_capacity(9);
            for f in 0..3 {
                for g in 0..3 {
                    let w = transmission(f, g, c);
                    if w == 0.0 {
                        continue;
                    }
                    let pair = e.make_product(&[(1, father[f]), (1, mother[g])], false);
                    let sibs =
                        e.make_product(&[(1, pair), (children, m.penetrance[c])], false);
                    terms.push((w, sibs));
                }
            }
            *slot = e.make_sum(&terms, false);
        }
        father = next;
    }
    e.make_sum(&[(1.0, father[0]), (1.0, father[1]), (1.0, father[2])], false)
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for generations in [4, 16, 64] {
        group.bench_with_input(
            BenchmarkId::from_parameter(generations),
            &generations,
            |b, &n| {
                b.iter(|| {
                    let mut e = Engine::new();
                    let m = model(&mut e);
                    black_box(pedigree(&mut e, &m, n, 3))
                });
            },
        );
    }
    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let mut e = Engine::new();
    let m = model(&mut e);
    let root = pedigree(&mut e, &m, 64, 3);
    let mut list = e.build_eval_list(root);

    let mut group = c.benchmark_group("evaluate_64");
    group.bench_function("recursive", |b| {
        b.iter(|| e.evaluate_recursive(black_box(root), black_box(&m.bindings)))
    });
    group.bench_function("list", |b| {
        b.iter(|| list.run(black_box(&m.bindings)))
    });
    group.bench_function("build_list", |b| b.iter(|| e.build_eval_list(black_box(root))));

    let mut lists: Vec<_> = (0..8).map(|_| list.clone()).collect();
    group.bench_function("parallel_8", |b| {
        b.iter(|| evaluate_parallel(black_box(&mut lists), black_box(&m.bindings)))
    });
    group.finish();
}

fn bench_compact(c: &mut Criterion) {
    c.bench_function("compact/hold_half", |b| {
        b.iter_batched(
            || {
                let mut e = Engine::new();
                let m = model(&mut e);
                let kept = pedigree(&mut e, &m, 32, 3);
                let _scratch = pedigree(&mut e, &m, 64, 4);
                e.hold(kept);
                e
            },
            |mut e| black_box(e.compact(NodeFlags::NONE)),
            criterion::BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, bench_build, bench_evaluate, bench_compact);
criterion_main!(benches);
