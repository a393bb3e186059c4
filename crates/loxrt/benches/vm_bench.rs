//! Virtual machine performance benchmarks.
//!
//! Establishes baselines for the hot paths most likely to regress: plain
//! arithmetic, function calls, closures/upvalues, and method dispatch.
//!
//! Run with: cargo bench --bench vm_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use loxrt::{GcConfig, Vm};

fn run(source: &str) {
    let mut vm = Vm::with_config(GcConfig::default());
    let _ = vm.interpret(black_box(source));
}

fn bench_arithmetic_loop(c: &mut Criterion) {
    c.bench_function("arithmetic_loop_10k", |b| {
        let code = r#"
            var sum = 0;
            for (var i = 0; i < 10000; i = i + 1) {
                sum = sum + (i * 2) - (i / 2);
            }
        "#;
        b.iter(|| run(code));
    });
}

fn bench_function_calls(c: &mut Criterion) {
    c.bench_function("function_calls_10k", |b| {
        let code = r#"
            fun add(a, b) { return a + b; }
            var sum = 0;
            for (var i = 0; i < 10000; i = i + 1) {
                sum = add(sum, i);
            }
        "#;
        b.iter(|| run(code));
    });
}

fn bench_closures(c: &mut Criterion) {
    c.bench_function("closure_counter_10k", |b| {
        let code = r#"
            fun makeCounter() {
                var count = 0;
                fun increment() {
                    count = count + 1;
                    return count;
                }
                return increment;
            }
            var counter = makeCounter();
            for (var i = 0; i < 10000; i = i + 1) {
                counter();
            }
        "#;
        b.iter(|| run(code));
    });
}

fn bench_method_dispatch(c: &mut Criterion) {
    c.bench_function("method_dispatch_10k", |b| {
        let code = r#"
            class Counter {
                init() { this.count = 0; }
                bump() { this.count = this.count + 1; }
            }
            var counter = Counter();
            for (var i = 0; i < 10000; i = i + 1) {
                counter.bump();
            }
        "#;
        b.iter(|| run(code));
    });
}

fn bench_string_concatenation(c: &mut Criterion) {
    c.bench_function("string_concat_1k", |b| {
        let code = r#"
            var s = "";
            for (var i = 0; i < 1000; i = i + 1) {
                s = s + "x";
            }
        "#;
        b.iter(|| run(code));
    });
}

criterion_group!(
    vm_benches,
    bench_arithmetic_loop,
    bench_function_calls,
    bench_closures,
    bench_method_dispatch,
    bench_string_concatenation
);
criterion_main!(vm_benches);
