//! Generator Runtime Benchmarks
//!
//! Measures the cost of suspending and resuming generators.
//!
//! # Key Metrics
//!
//! - Resume cost per plain yield, with few and many live locals
//! - Per-level overhead of `yield from` forwarding
//! - Lowering time for a generator body

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use relay_compiler::ast::{CmpOp, Expr, FunctionDef, Module, Stmt};
use relay_compiler::{CompilerConfig, lower_function};
use relay_core::{IterResult, Value};
use relay_vm::{GeneratorObject, VirtualMachine};

/// `def count(n): i = 0; while i < n: yield i; i = i + 1`
fn count_def() -> FunctionDef {
    FunctionDef::new(
        "count",
        &["n"],
        vec![
            Stmt::assign("i", Expr::int(0)),
            Stmt::while_loop(
                Expr::compare(CmpOp::Lt, Expr::name("i"), Expr::name("n")),
                vec![
                    Stmt::expr(Expr::yield_value(Expr::name("i"))),
                    Stmt::assign("i", Expr::add(Expr::name("i"), Expr::int(1))),
                ],
            ),
        ],
    )
}

/// `wide_<extra>`: like `count`, with `extra` more locals carried across
/// every yield.
fn wide_def(extra: usize) -> FunctionDef {
    let names: Vec<String> = (0..extra).map(|k| format!("v{}", k)).collect();
    let mut body: Vec<Stmt> = names
        .iter()
        .map(|name| Stmt::assign(name, Expr::int(1)))
        .collect();
    let mut loop_body = vec![Stmt::expr(Expr::yield_value(Expr::name("i")))];
    for name in &names {
        loop_body.push(Stmt::assign(name, Expr::add(Expr::name(name), Expr::int(1))));
    }
    loop_body.push(Stmt::assign("i", Expr::add(Expr::name("i"), Expr::int(1))));
    body.push(Stmt::assign("i", Expr::int(0)));
    body.push(Stmt::while_loop(
        Expr::compare(CmpOp::Lt, Expr::name("i"), Expr::name("n")),
        loop_body,
    ));
    FunctionDef::new(&format!("wide_{}", extra), &["n"], body)
}

/// `def chain(n): if n == 0: yield from count(LIMIT); return; yield from chain(n - 1)`
fn chain_def(limit: i64) -> FunctionDef {
    FunctionDef::new(
        "chain",
        &["n"],
        vec![
            Stmt::if_else(
                Expr::compare(CmpOp::Eq, Expr::name("n"), Expr::int(0)),
                vec![
                    Stmt::expr(Expr::yield_from(Expr::call("count", vec![Expr::int(limit)]))),
                    Stmt::return_none(),
                ],
                vec![],
            ),
            Stmt::expr(Expr::yield_from(Expr::call(
                "chain",
                vec![Expr::sub(Expr::name("n"), Expr::int(1))],
            ))),
        ],
    )
}

fn drain(g: &GeneratorObject) -> usize {
    let mut n = 0;
    while let Ok(IterResult::Yielded(v)) = g.advance() {
        black_box(v);
        n += 1;
    }
    n
}

fn load(functions: Vec<FunctionDef>) -> VirtualMachine {
    let mut vm = VirtualMachine::default();
    vm.load(&Module::new(functions)).expect("bench module compiles");
    vm
}

// =============================================================================
// Resume Benchmarks
// =============================================================================

fn bench_resume(c: &mut Criterion) {
    let mut group = c.benchmark_group("resume");
    let vm = load(vec![count_def(), wide_def(4), wide_def(16)]);

    group.bench_function("count_1000", |b| {
        b.iter(|| {
            let g = vm.generator("count", vec![Value::Int(1000)]).unwrap();
            black_box(drain(&g))
        })
    });

    for extra in [4, 16] {
        let name = format!("wide_{}", extra);
        group.bench_function(BenchmarkId::new("live_locals", extra), |b| {
            b.iter(|| {
                let g = vm.generator(&name, vec![Value::Int(1000)]).unwrap();
                black_box(drain(&g))
            })
        });
    }

    group.finish();
}

// =============================================================================
// Delegation Benchmarks
// =============================================================================

fn bench_delegation(c: &mut Criterion) {
    let mut group = c.benchmark_group("delegation");
    let vm = load(vec![count_def(), chain_def(100)]);

    for depth in [1i64, 4, 16] {
        group.bench_with_input(BenchmarkId::new("chain_depth", depth), &depth, |b, &depth| {
            b.iter(|| {
                let g = vm.generator("chain", vec![Value::Int(depth)]).unwrap();
                black_box(drain(&g))
            })
        });
    }

    group.finish();
}

// =============================================================================
// Lowering Benchmarks
// =============================================================================

fn bench_lowering(c: &mut Criterion) {
    let config = CompilerConfig::default();
    let def = wide_def(16);
    c.bench_function("lower_wide_16", |b| {
        b.iter(|| black_box(lower_function(black_box(&def), &config).unwrap()))
    });
}

criterion_group!(benches, bench_resume, bench_delegation, bench_lowering);
criterion_main!(benches);
