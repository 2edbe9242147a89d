// Integration tests for the device planner's observable guarantees.
//
// Each test drives the library API end to end (parse → resolve → typecheck
// → plan) on a textual module and checks the planner's output contract:
// scope attributes on every function, copies only at genuine transitions,
// annotation placement rules, idempotence, and determinism.

use dpc::diag::codes;
use dpc::id::ExprId;
use dpc::ir::{device_copy_props, module_eq, on_device_props, ExprKind, FnAttrs, Module};
use dpc::plan::plan;
use dpc::print::print_module;
use dpc::scope::{CompilationConfig, Scope, Target};

// ── Helpers ─────────────────────────────────────────────────────────────────

fn config(default: &str) -> CompilationConfig {
    CompilationConfig::new(
        vec![Target::new("cpu", "llvm"), Target::new("gpu", "cuda")],
        "cpu",
        default,
    )
    .unwrap()
}

fn build(source: &str, config: &CompilationConfig) -> Module {
    let parsed = dpc::parser::parse(source);
    assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
    let resolved = dpc::resolve::resolve(&parsed.program.unwrap(), config);
    assert!(
        resolved.diagnostics.is_empty(),
        "resolve errors: {:?}",
        resolved.diagnostics
    );
    let mut module = resolved.module;
    let diags = dpc::types::check(&mut module);
    assert!(diags.is_empty(), "type errors: {:?}", diags);
    module
}

fn plan_ok(source: &str, config: &CompilationConfig) -> Module {
    let module = build(source, config);
    let result = plan(&module, config);
    assert!(
        result.diagnostics.is_empty(),
        "plan errors: {:?}",
        result.diagnostics
    );
    result.planned.unwrap()
}

/// Every expression reachable from the defs, paired with whether an
/// on_device call at that position is allowed by the output contract
/// (let-bound RHS, call argument, device_copy argument).
fn walk_with_positions(module: &Module) -> Vec<(ExprId, bool)> {
    let mut out = Vec::new();
    let mut stack: Vec<(ExprId, bool)> = module
        .defs
        .iter()
        .map(|(_, d)| (*d, false))
        .collect();
    while let Some((e, annotation_ok)) = stack.pop() {
        out.push((e, annotation_ok));
        match module.arena.kind(e) {
            ExprKind::Var { .. }
            | ExprKind::Global { .. }
            | ExprKind::Constant { .. }
            | ExprKind::OpRef(_)
            | ExprKind::CtorRef(_) => {}
            ExprKind::Tuple { fields } => {
                stack.extend(fields.iter().map(|f| (*f, false)));
            }
            ExprKind::Proj { tuple, .. } => stack.push((*tuple, false)),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                stack.push((*cond, false));
                stack.push((*then_branch, false));
                stack.push((*else_branch, false));
            }
            ExprKind::Let { var, value, body } => {
                stack.push((*var, false));
                stack.push((*value, true));
                stack.push((*body, false));
            }
            ExprKind::Function { body, .. } => stack.push((*body, false)),
            ExprKind::Call { op, args, .. } => {
                stack.push((*op, false));
                stack.extend(args.iter().map(|a| (*a, true)));
            }
            ExprKind::Match { scrutinee, clauses } => {
                stack.push((*scrutinee, false));
                stack.extend(clauses.iter().map(|c| (c.rhs, false)));
            }
            ExprKind::RefCreate { value } => stack.push((*value, false)),
            ExprKind::RefRead { source } => stack.push((*source, false)),
            ExprKind::RefWrite { target, value } => {
                stack.push((*target, false));
                stack.push((*value, false));
            }
        }
    }
    out
}

fn fn_attrs(module: &Module, def: &str) -> FnAttrs {
    match module.arena.kind(module.def(def).unwrap()) {
        ExprKind::Function { attrs, .. } => attrs.clone(),
        _ => panic!("expected function"),
    }
}

/// Output-contract checks shared by most tests: every function carries
/// scope attributes; no on_device on a variable/global or outside the
/// allowed positions; no no-op device_copy.
fn check_output_contract(module: &Module, config: &CompilationConfig) {
    for (name, _) in &module.defs {
        let attrs = fn_attrs(module, name);
        assert!(
            attrs.param_scopes.is_some() && attrs.result_scope.is_some(),
            "def @{} is missing scope attributes",
            name
        );
    }
    for (e, annotation_ok) in walk_with_positions(module) {
        if let Some((body, _)) = on_device_props(&module.arena, e) {
            assert!(
                annotation_ok,
                "on_device in a disallowed position:\n{}",
                print_module(module)
            );
            assert!(
                !matches!(
                    module.arena.kind(body),
                    ExprKind::Var { .. } | ExprKind::Global { .. }
                ),
                "on_device wraps a variable or global:\n{}",
                print_module(module)
            );
        }
        if let Some((_, props)) = device_copy_props(&module.arena, e) {
            assert!(
                !config.scope_eq(&props.src, &props.dst),
                "no-op device_copy survived:\n{}",
                print_module(module)
            );
        }
    }
}

// ── Scenario 1: pure propagation ────────────────────────────────────────────

#[test]
fn scenario_pure_propagation() {
    let config = config("gpu");
    let planned = plan_ok(
        "def @main(%x: Tensor, %y: Tensor) -> Tensor { add(%x, on_device(%y, scope=gpu)) }",
        &config,
    );
    let gpu = config.canonical(&Scope::for_device("gpu"));
    let attrs = fn_attrs(&planned, "main");
    assert_eq!(attrs.param_scopes, Some(vec![gpu.clone(), gpu.clone()]));
    assert_eq!(attrs.result_scope, Some(gpu));
    check_output_contract(&planned, &config);
}

// ── Scenario 2: let-bound override with a copy at the annotated use ─────────

#[test]
fn scenario_let_bound_override() {
    let config = config("cpu");
    let planned = plan_ok(
        "def @main(%x: Tensor) -> Tensor {\n\
           let %a = on_device(exp(%x), scope=gpu);\n\
           negative(on_device(%a, scope=gpu))\n\
         }",
        &config,
    );
    let cpu = config.canonical(&Scope::for_device("cpu"));
    let gpu = config.canonical(&Scope::for_device("gpu"));
    let attrs = fn_attrs(&planned, "main");
    assert_eq!(attrs.result_scope, Some(cpu.clone()));
    assert_eq!(attrs.param_scopes, Some(vec![gpu.clone()]));

    // One copy gpu→cpu at the use of %a; the let RHS keeps a fixed wrapper.
    let copies: Vec<ExprId> = walk_with_positions(&planned)
        .into_iter()
        .map(|(e, _)| e)
        .filter(|e| device_copy_props(&planned.arena, *e).is_some())
        .collect();
    assert_eq!(copies.len(), 1);
    let (_, props) = device_copy_props(&planned.arena, copies[0]).unwrap();
    assert_eq!(config.canonical(&props.src), gpu);
    assert_eq!(config.canonical(&props.dst), cpu);
    check_output_contract(&planned, &config);
}

// ── Scenario 3: projection push-down ────────────────────────────────────────

#[test]
fn scenario_projection_pushdown() {
    let config = config("cpu");
    let planned = plan_ok(
        "def @main(%x: Tensor, %y: Tensor) -> Tensor {\n\
           negative(on_device((%x, %y), scope=gpu).0)\n\
         }",
        &config,
    );
    // The copy moves the projection, not the whole tuple.
    let copies: Vec<ExprId> = walk_with_positions(&planned)
        .into_iter()
        .map(|(e, _)| e)
        .filter(|e| device_copy_props(&planned.arena, *e).is_some())
        .collect();
    assert_eq!(copies.len(), 1);
    let (copied, _) = device_copy_props(&planned.arena, copies[0]).unwrap();
    let (inner, _) = on_device_props(&planned.arena, copied).unwrap();
    assert!(matches!(
        planned.arena.kind(inner),
        ExprKind::Proj { index: 0, .. }
    ));
    check_output_contract(&planned, &config);
}

// ── Scenario 4: higher-order propagation ────────────────────────────────────

#[test]
fn scenario_higher_order_propagation() {
    let config = config("gpu");
    let planned = plan_ok(
        "def @main(%a: Tensor, %b: Tensor) -> Tensor {\n\
           let %f = fn (%x: Tensor, %y: Tensor) { add(%x, on_device(%y, scope=gpu)) };\n\
           let %g = fn (%h: fn(Tensor, Tensor) -> Tensor, %z: Tensor) { %h(%z, %z) };\n\
           %g(%f, %b)\n\
         }",
        &config,
    );
    let gpu = config.canonical(&Scope::for_device("gpu"));
    let attrs = fn_attrs(&planned, "main");
    assert_eq!(attrs.param_scopes, Some(vec![gpu.clone(), gpu.clone()]));
    assert_eq!(attrs.result_scope, Some(gpu));
    check_output_contract(&planned, &config);
}

// ── Scenario 5: inconsistent annotations ────────────────────────────────────

#[test]
fn scenario_inconsistent_annotations() {
    let config = config("cpu");
    let module = build(
        "def @main(%x: Tensor) -> Tensor {\n\
           let %a = on_device(exp(%x), scope=cpu);\n\
           on_device(%a, scope=gpu, fixed=true)\n\
         }",
        &config,
    );
    let result = plan(&module, &config);
    assert!(result.planned.is_none());
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].code, Some(codes::E0801));
    let message = &result.diagnostics[0].message;
    assert!(message.contains("cpu") && message.contains("gpu"), "{message}");
}

// ── Scenario 6 / P5: idempotence ────────────────────────────────────────────

#[test]
fn scenario_idempotence() {
    let config = config("cpu");
    let sources = [
        "def @main(%x: Tensor) -> Tensor {\n\
           let %a = on_device(exp(%x), scope=gpu);\n\
           negative(on_device(%a, scope=gpu))\n\
         }",
        "def @main(%x: Tensor, %y: Tensor) -> Tensor {\n\
           negative(on_device((%x, %y), scope=gpu).0)\n\
         }",
        "type List { Cons(Tensor, List), Nil }\n\
         def @sum(%l: List) -> Tensor {\n\
           match (%l) { Cons(%h, %t) => add(%h, @sum(%t)), Nil => 0 }\n\
         }",
        "def @main(%x: Tensor, %c: Tensor) -> Tensor {\n\
           let %r = ref(on_device(%x, scope=gpu, fixed=true));\n\
           if (equal(%c, %c)) { ref_read(%r) } else { on_device(%x, scope=gpu, fixed=true) }\n\
         }",
        "def @main(%a: Tensor, %b: Tensor) -> Tensor {\n\
           let %f = fn (%x: Tensor, %y: Tensor) { add(%x, on_device(%y, scope=gpu)) };\n\
           let %g = fn (%h: fn(Tensor, Tensor) -> Tensor, %z: Tensor) { %h(%z, %z) };\n\
           %g(%f, %b)\n\
         }",
    ];
    for source in sources {
        let planned = plan_ok(source, &config);
        let result = plan(&planned, &config);
        assert!(
            result.diagnostics.is_empty(),
            "replan of {:?} failed: {:?}",
            source,
            result.diagnostics
        );
        let replanned = result.planned.unwrap();
        assert!(
            module_eq(&planned, &replanned),
            "planning its own output changed the module.\nfirst:\n{}\nsecond:\n{}",
            print_module(&planned),
            print_module(&replanned)
        );
    }
}

// ── P2: calls agree with callee signatures across defs ──────────────────────

#[test]
fn cross_function_calls_agree_on_placement() {
    let config = config("cpu");
    let planned = plan_ok(
        "def @on_gpu(%x: Tensor) -> Tensor { on_device(exp(%x), scope=gpu, fixed=true) }\n\
         def @main(%x: Tensor) -> Tensor {\n\
           negative(on_device(@on_gpu(on_device(%x, scope=gpu, fixed=true)), scope=gpu))\n\
         }",
        &config,
    );
    let gpu = config.canonical(&Scope::for_device("gpu"));
    let callee_attrs = fn_attrs(&planned, "on_gpu");
    assert_eq!(callee_attrs.result_scope, Some(gpu.clone()));
    assert_eq!(callee_attrs.param_scopes, Some(vec![gpu.clone()]));
    // @main's parameter is pinned gpu by the call argument's annotation.
    let main_attrs = fn_attrs(&planned, "main");
    assert_eq!(main_attrs.param_scopes, Some(vec![gpu]));
    check_output_contract(&planned, &config);
}

// ── P6: primitives are device-polymorphic per call site ─────────────────────

#[test]
fn primitive_calls_take_their_scope_per_call_site() {
    let config = config("cpu");
    let planned = plan_ok(
        "def @cpu_side(%x: Tensor) -> Tensor { exp(%x) }\n\
         def @gpu_side(%x: Tensor) -> Tensor { on_device(exp(%x), scope=gpu, fixed=true) }",
        &config,
    );
    let cpu = config.canonical(&Scope::for_device("cpu"));
    let gpu = config.canonical(&Scope::for_device("gpu"));
    assert_eq!(fn_attrs(&planned, "cpu_side").result_scope, Some(cpu));
    assert_eq!(fn_attrs(&planned, "gpu_side").result_scope, Some(gpu));
    check_output_contract(&planned, &config);
}

// ── P7: shape and memory dialect pinning ────────────────────────────────────

#[test]
fn memory_dialect_pins_shape_arguments_to_host() {
    // Observed through the domain store: plan via the phases and read the
    // scopes the analysis assigned.
    let config = config("gpu");
    let module = build(
        "def @main(%x: Tensor) -> Tensor {\n\
           let %st = alloc_storage(shape_of(%x), shape_of(%x));\n\
           alloc_tensor(%st, shape_of(%x), shape_of(%x))\n\
         }",
        &config,
    );
    let normalized = dpc::normalize::normalize(&module);
    let mut domains = dpc::analyze::analyze(&normalized, &config).expect("analysis failed");
    dpc::defaults::default_domains(&normalized, &mut domains);

    let host = config.host_scope();
    let gpu = config.canonical(&Scope::for_device("gpu"));
    let ExprKind::Function { body, .. } =
        normalized.arena.kind(normalized.def("main").unwrap()).clone()
    else {
        panic!("expected function");
    };
    let ExprKind::Let { var, value, body } = normalized.arena.kind(body).clone() else {
        panic!("expected let");
    };
    // alloc_storage's size/alignment (shape_of results) live on the host.
    let ExprKind::Call { args, .. } = normalized.arena.kind(value).clone() else {
        panic!("expected call");
    };
    for arg in &args {
        let d = domains.lookup_expr(*arg).unwrap();
        assert_eq!(domains.result_scope(d), host);
    }
    // The storage itself follows the tensor it backs (default: gpu).
    let storage = domains.lookup_expr(var).unwrap();
    assert_eq!(domains.result_scope(storage), gpu);
    // alloc_tensor: storage arg shares the result scope; shapes on host.
    let ExprKind::Call { args, .. } = normalized.arena.kind(body).clone() else {
        panic!("expected call");
    };
    let storage_arg = domains.lookup_expr(args[0]).unwrap();
    assert_eq!(domains.result_scope(storage_arg), gpu);
    for arg in &args[1..] {
        let d = domains.lookup_expr(*arg).unwrap();
        assert_eq!(domains.result_scope(d), host);
    }
}

// ── P8: determinism ─────────────────────────────────────────────────────────

#[test]
fn planning_is_a_pure_function_of_module_and_config() {
    let config = config("cpu");
    let source = "type Pair { MkPair(Tensor, Tensor) }\n\
         def @main(%x: Tensor, %y: Tensor) -> Tensor {\n\
           let %p = MkPair(%x, on_device(%y, scope=gpu, fixed=true));\n\
           match (%p) { MkPair(%a, %b) => add(%a, %b), _ => 0 }\n\
         }";
    let first = plan_ok(source, &config);
    let second = plan_ok(source, &config);
    assert_eq!(print_module(&first), print_module(&second));
}

// ── Ref cells participate like any first-order value ────────────────────────

#[test]
fn refs_collapse_their_contents() {
    let config = config("cpu");
    let planned = plan_ok(
        "def @main(%x: Tensor) -> Tensor {\n\
           let %r = ref(on_device(%x, scope=gpu, fixed=true));\n\
           let %w = ref_write(%r, on_device(exp(%x), scope=gpu, fixed=true));\n\
           ref_read(%r)\n\
         }",
        &config,
    );
    let gpu = config.canonical(&Scope::for_device("gpu"));
    // The ref cell lives on gpu, so reading it yields a gpu value and the
    // function result follows.
    assert_eq!(fn_attrs(&planned, "main").result_scope, Some(gpu));
    check_output_contract(&planned, &config);
}
