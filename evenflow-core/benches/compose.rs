//! Benchmark: Flow Composition and Invocation
//!
//! Measures graph validation plus stage planning, and the per-invocation
//! overhead of the staged executor.
//! Run: cargo bench --bench compose

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use evenflow_core::{compose, Bindings, Node, StepError};

fn add_inputs(output: String, inputs: Vec<String>) -> Node<u64> {
    let names = inputs.clone();
    Node::new(output, inputs, move |b: &Bindings<u64>| {
        let mut total = 1u64;
        for name in &names {
            total = total.wrapping_add(*b.require(name)?);
        }
        Ok::<_, StepError>(total)
    })
}

/// Generate a linear chain (s -> n0 -> n1 -> ...)
fn linear(size: usize) -> Vec<Node<u64>> {
    (0..size)
        .map(|i| {
            let input = if i == 0 { "s".to_string() } else { format!("n{}", i - 1) };
            add_inputs(format!("n{i}"), vec![input])
        })
        .collect()
}

/// Generate a fan: s -> (m0 .. mN) -> sink
fn fan(width: usize) -> Vec<Node<u64>> {
    let mut nodes: Vec<Node<u64>> = (0..width)
        .map(|i| add_inputs(format!("m{i}"), vec!["s".to_string()]))
        .collect();
    nodes.push(add_inputs(
        "sink".to_string(),
        (0..width).map(|i| format!("m{i}")).collect(),
    ));
    nodes
}

/// Generate stacked diamonds, each layer joining two branches.
fn ladder(layers: usize) -> Vec<Node<u64>> {
    let mut nodes = Vec::new();
    let mut previous = "s".to_string();
    for layer in 0..layers {
        let left = format!("l{layer}");
        let right = format!("r{layer}");
        let join = format!("j{layer}");
        nodes.push(add_inputs(left.clone(), vec![previous.clone()]));
        nodes.push(add_inputs(right.clone(), vec![previous.clone()]));
        nodes.push(add_inputs(join.clone(), vec![left, right]));
        previous = join;
    }
    nodes
}

fn bench_compose(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose");

    for size in [10, 100, 500] {
        let chain = linear(size);
        group.bench_with_input(BenchmarkId::new("linear", size), &chain, |b, nodes| {
            b.iter(|| compose(black_box(nodes.clone())).unwrap())
        });

        let wide = fan(size);
        group.bench_with_input(BenchmarkId::new("fan", size), &wide, |b, nodes| {
            b.iter(|| compose(black_box(nodes.clone())).unwrap())
        });

        let stacked = ladder(size / 3);
        group.bench_with_input(BenchmarkId::new("ladder", size), &stacked, |b, nodes| {
            b.iter(|| compose(black_box(nodes.clone())).unwrap())
        });
    }

    group.finish();
}

fn bench_invoke(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("invoke");

    for size in [10, 100] {
        let chain = compose(linear(size)).unwrap();
        group.bench_with_input(BenchmarkId::new("linear", size), &chain, |b, flow| {
            b.to_async(&runtime)
                .iter(|| async { flow.invoke_positional([black_box(1)]).await.unwrap() })
        });

        let wide = compose(fan(size)).unwrap();
        group.bench_with_input(BenchmarkId::new("fan", size), &wide, |b, flow| {
            b.to_async(&runtime)
                .iter(|| async { flow.invoke_positional([black_box(1)]).await.unwrap() })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compose, bench_invoke);
criterion_main!(benches);
