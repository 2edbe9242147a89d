use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dpc::scope::{CompilationConfig, Target};
use std::fmt::Write;

// ── Sample TIR modules ──────────────────────────────────────────────────────

const SIMPLE_MODULE: &str = r#"
def @main(%x: Tensor, %y: Tensor) -> Tensor {
  add(%x, on_device(%y, scope=gpu))
}
"#;

const MEDIUM_MODULE: &str = r#"
type List { Cons(Tensor, List), Nil }

def @scale(%l: List, %g: Tensor) -> List {
  match (%l) {
    Cons(%h, %t) => Cons(multiply(%h, %g), @scale(%t, %g)),
    Nil => Nil(),
  }
}

def @main(%x: Tensor, %y: Tensor) -> Tensor {
  let %a = on_device(multiply(%x, %x), scope=gpu);
  let %b = negative(on_device(%a, scope=gpu));
  let %l = Cons(%b, Cons(%y, Nil()));
  match (@scale(%l, %b)) {
    Cons(%h, %t) => %h,
    Nil => 0,
  }
}
"#;

/// A deep let chain exercising the iterative chain handling.
fn deep_let_module(depth: usize) -> String {
    let mut source = String::from("def @main(%x: Tensor) -> Tensor {\n");
    let mut prev = "%x".to_string();
    for i in 0..depth {
        let _ = writeln!(source, "  let %v{} = exp({});", i, prev);
        prev = format!("%v{}", i);
    }
    let _ = writeln!(source, "  {}", prev);
    source.push_str("}\n");
    source
}

fn bench_config() -> CompilationConfig {
    CompilationConfig::new(
        vec![Target::new("cpu", "llvm"), Target::new("gpu", "cuda")],
        "cpu",
        "cpu",
    )
    .unwrap()
}

fn compile_and_plan(source: &str, config: &CompilationConfig) -> dpc::ir::Module {
    let parsed = dpc::parser::parse(source);
    assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
    let resolved = dpc::resolve::resolve(&parsed.program.unwrap(), config);
    assert!(resolved.diagnostics.is_empty());
    let mut module = resolved.module;
    let diags = dpc::types::check(&mut module);
    assert!(diags.is_empty());
    let result = dpc::plan::plan(&module, config);
    assert!(result.diagnostics.is_empty());
    result.planned.unwrap()
}

fn bench_parse(c: &mut Criterion) {
    c.bench_function("parse_medium", |b| {
        b.iter(|| dpc::parser::parse(black_box(MEDIUM_MODULE)))
    });
}

fn bench_plan(c: &mut Criterion) {
    let config = bench_config();
    c.bench_function("plan_simple", |b| {
        b.iter(|| compile_and_plan(black_box(SIMPLE_MODULE), &config))
    });
    c.bench_function("plan_medium", |b| {
        b.iter(|| compile_and_plan(black_box(MEDIUM_MODULE), &config))
    });
}

fn bench_deep_lets(c: &mut Criterion) {
    let config = bench_config();
    let source = deep_let_module(2_000);
    c.bench_function("plan_deep_let_chain_2000", |b| {
        b.iter(|| compile_and_plan(black_box(&source), &config))
    });
}

criterion_group!(benches, bench_parse, bench_plan, bench_deep_lets);
criterion_main!(benches);
