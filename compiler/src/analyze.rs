// analyze.rs — Phase 1: collect the scope constraint system
//
// Walks every sub-expression of every def, allocating device domains on
// demand and unifying them according to the expression form. Constraints
// flow from on_device / device_copy calls, the operator table's placement
// shapes, and any param_scopes/result_scope attributes left by an earlier
// planner run. Some domains may remain free; the defaulter fills them.
//
// Collapse rule: tuples, projections, refs, ADT scrutinees, and branch
// conditions erase function identity, so a function value reaching one of
// those positions has its whole signature collapsed to a single scope.
//
// Preconditions: normalized, type-checked module.
// Postconditions: every sub-expression of every non-primitive def has a
//   domain; every call's callee domain is unified with the domain implied
//   by its arguments and context.
// Failure modes: scope conflicts produce a fatal `Diagnostic` (E0801 for
//   calls and general flows, E0802 for function attribute conflicts).
// Side effects: none outside the returned store.

use crate::ast::Span;
use crate::diag::{codes, DiagCode, DiagLevel, Diagnostic};
use crate::domains::{DeviceDomains, UnifyError};
use crate::id::{DomainId, ExprId};
use crate::ir::{ExprKind, Module, Pattern};
use crate::print;
use crate::scope::CompilationConfig;

/// Collect all scope constraints for the module.
pub fn analyze(module: &Module, config: &CompilationConfig) -> Result<DeviceDomains, Diagnostic> {
    let mut analyzer = Analyzer {
        module,
        domains: DeviceDomains::new(config),
    };
    for (name, def) in &module.defs {
        let global = module.globals[name];
        analyzer.unify_exact(global, *def)?;
        analyzer.visit(*def)?;
    }
    Ok(analyzer.domains)
}

struct Analyzer<'m> {
    module: &'m Module,
    domains: DeviceDomains,
}

impl<'m> Analyzer<'m> {
    fn visit(&mut self, e: ExprId) -> Result<(), Diagnostic> {
        match self.module.arena.kind(e).clone() {
            ExprKind::Var { .. } | ExprKind::Global { .. } | ExprKind::Constant { .. } => {
                self.domains.domain_for(&self.module.arena, e);
                Ok(())
            }
            // Operators and constructors take their domains at call sites.
            ExprKind::OpRef(_) | ExprKind::CtorRef(_) => Ok(()),
            ExprKind::Tuple { fields } => {
                for field in fields {
                    self.unify_collapsed(e, field)?;
                    self.visit(field)?;
                }
                Ok(())
            }
            ExprKind::Proj { tuple, .. } => {
                self.unify_collapsed(tuple, e)?;
                self.visit(tuple)
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.unify_collapsed(cond, e)?;
                self.unify_exact(then_branch, e)?;
                self.unify_exact(else_branch, e)?;
                self.visit(cond)?;
                self.visit(then_branch)?;
                self.visit(else_branch)
            }
            ExprKind::Let { .. } => self.visit_let_chain(e),
            ExprKind::Function { .. } => self.visit_function(e),
            ExprKind::Call { .. } => self.visit_call(e),
            ExprKind::Match { scrutinee, clauses } => {
                self.unify_collapsed(scrutinee, e)?;
                for clause in &clauses {
                    self.unify_pattern_vars(&clause.pattern, scrutinee)?;
                    self.unify_exact(clause.rhs, e)?;
                    self.visit(clause.rhs)?;
                }
                self.visit(scrutinee)
            }
            ExprKind::RefCreate { value } => {
                self.unify_collapsed(e, value)?;
                self.visit(value)
            }
            ExprKind::RefRead { source } => {
                self.unify_collapsed(source, e)?;
                self.visit(source)
            }
            ExprKind::RefWrite { target, value } => {
                self.unify_collapsed(target, value)?;
                self.unify_collapsed(e, value)?;
                self.visit(target)?;
                self.visit(value)
            }
        }
    }

    /// Iterative let-chain walk: the binding matches its value, the let
    /// matches its body, all the way down.
    fn visit_let_chain(&mut self, e: ExprId) -> Result<(), Diagnostic> {
        let mut cur = e;
        while let ExprKind::Let { var, value, body } = self.module.arena.kind(cur).clone() {
            self.unify_exact(var, value)?;
            self.unify_exact(cur, body)?;
            self.visit(var)?;
            self.visit(value)?;
            cur = body;
        }
        self.visit(cur)
    }

    fn visit_function(&mut self, f: ExprId) -> Result<(), Diagnostic> {
        let ExprKind::Function {
            params,
            body,
            attrs,
            ..
        } = self.module.arena.kind(f).clone()
        else {
            unreachable!()
        };
        // Fused primitive functions are opaque; their signature is
        // established by the enclosing call sites.
        if attrs.primitive {
            return Ok(());
        }

        let fd = self.domains.domain_for(&self.module.arena, f);
        assert_eq!(
            self.domains.arity(fd),
            params.len(),
            "internal: function domain arity does not match the parameter list"
        );

        // The body domain must match the function result domain.
        let body_domain = self.domains.domain_for(&self.module.arena, body);
        let result_domain = self.domains.result(fd);
        self.unify_domains(body_domain, result_domain, body, codes::E0801)?;

        for (i, param) in params.iter().enumerate() {
            let param_domain = self.domains.domain_for(&self.module.arena, *param);
            let slot = self.domains.param(fd, i);
            self.unify_domains(param_domain, slot, *param, codes::E0801)?;
        }

        // Attributes from an earlier planner run further constrain the
        // function's domain (this is what makes re-runs idempotent).
        if attrs.result_scope.is_some() || attrs.param_scopes.is_some() {
            let mut param_domains = Vec::with_capacity(params.len());
            for (i, param) in params.iter().enumerate() {
                let ty = self.module.arena.ty_of(*param);
                let d = match attrs.param_scopes.as_ref().and_then(|s| s.get(i)) {
                    Some(scope) => self.domains.for_scope(&self.module.arena, ty, scope),
                    None => self.domains.for_type(&self.module.arena, ty),
                };
                param_domains.push(d);
            }
            let body_ty = self.module.arena.ty_of(body);
            let result = match &attrs.result_scope {
                Some(scope) => self.domains.for_scope(&self.module.arena, body_ty, scope),
                None => self.domains.for_type(&self.module.arena, body_ty),
            };
            let annotation = self.domains.make_higher_order(param_domains, result);
            if self.domains.unify_or_null(fd, annotation).is_none() {
                let fd_dump = self.domains.describe(fd);
                let annotation_dump = self.domains.describe(annotation);
                return Err(self.fatal(
                    codes::E0802,
                    self.module.arena.span_of(f),
                    format!(
                        "function scopes {} are incompatible with its scope attributes {}",
                        fd_dump, annotation_dump
                    ),
                    f,
                ));
            }
        }

        self.visit(body)
    }

    fn visit_call(&mut self, call: ExprId) -> Result<(), Diagnostic> {
        let ExprKind::Call { op, args, .. } = self.module.arena.kind(call).clone() else {
            unreachable!()
        };
        match self.module.arena.kind(op) {
            ExprKind::OpRef(_) | ExprKind::CtorRef(_) => {}
            _ => self.visit(op)?,
        }

        let fd = self.domains.domain_for_callee(&self.module.arena, call);
        assert_eq!(
            self.domains.arity(fd),
            args.len(),
            "internal: callee domain arity does not match the call"
        );

        // Build the domain the call site implies, visiting each argument's
        // subtree as its domain is allocated.
        let mut arg_domains = Vec::with_capacity(args.len());
        for arg in &args {
            arg_domains.push(self.domains.domain_for(&self.module.arena, *arg));
            self.visit(*arg)?;
        }
        let call_domain = self.domains.domain_for(&self.module.arena, call);
        let implied = self.domains.make_higher_order(arg_domains, call_domain);

        if self.domains.unify_or_null(fd, implied).is_none() {
            let fd_dump = self.domains.describe(fd);
            let implied_dump = self.domains.describe(implied);
            return Err(self.fatal(
                codes::E0801,
                self.module.arena.span_of(call),
                format!(
                    "callee scopes {} do not match the scopes implied by the call {}",
                    fd_dump, implied_dump
                ),
                call,
            ));
        }
        Ok(())
    }

    fn unify_pattern_vars(
        &mut self,
        pattern: &Pattern,
        scrutinee: ExprId,
    ) -> Result<(), Diagnostic> {
        match pattern {
            Pattern::Wildcard => Ok(()),
            Pattern::Var(var) => {
                self.unify_collapsed(scrutinee, *var)?;
                Ok(())
            }
            Pattern::Ctor { fields, .. } => {
                for field in fields {
                    self.unify_pattern_vars(field, scrutinee)?;
                }
                Ok(())
            }
            Pattern::Tuple(fields) => {
                for field in fields {
                    self.unify_pattern_vars(field, scrutinee)?;
                }
                Ok(())
            }
        }
    }

    // ── Unification with diagnostics ────────────────────────────────────────

    fn unify_exact(&mut self, a: ExprId, b: ExprId) -> Result<(), Diagnostic> {
        self.domains
            .unify_exprs_exact(&self.module.arena, a, b)
            .map_err(|err| self.scope_conflict(err, b))
    }

    fn unify_collapsed(&mut self, a: ExprId, b: ExprId) -> Result<(), Diagnostic> {
        self.domains
            .unify_exprs_collapsed(&self.module.arena, a, b)
            .map_err(|err| self.scope_conflict(err, b))
    }

    fn unify_domains(
        &mut self,
        a: DomainId,
        b: DomainId,
        at: ExprId,
        code: DiagCode,
    ) -> Result<(), Diagnostic> {
        match self.domains.unify(a, b) {
            Ok(_) => Ok(()),
            Err(err) => Err(self.fatal(
                code,
                self.module.arena.span_of(at),
                format!(
                    "execution scope {} does not agree with scope {}",
                    err.lhs, err.rhs
                ),
                at,
            )),
        }
    }

    fn scope_conflict(&self, err: UnifyError, at: ExprId) -> Diagnostic {
        self.fatal(
            codes::E0801,
            self.module.arena.span_of(at),
            format!(
                "execution scope {} does not agree with scope {}",
                err.lhs, err.rhs
            ),
            at,
        )
    }

    fn fatal(&self, code: DiagCode, span: Span, message: String, at: ExprId) -> Diagnostic {
        Diagnostic::new(DiagLevel::Error, span, message)
            .with_code(code)
            .with_hint(format!(
                "while planning `{}`",
                print::expr_to_string(self.module, at)
            ))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::test_config;
    use crate::normalize;
    use crate::parser;
    use crate::resolve;
    use crate::scope::Scope;
    use crate::types;

    fn build(source: &str) -> Module {
        let parsed = parser::parse(source);
        assert!(parsed.errors.is_empty(), "parse errors: {:?}", parsed.errors);
        let resolved = resolve::resolve(&parsed.program.unwrap(), &test_config());
        assert!(
            resolved.diagnostics.is_empty(),
            "resolve errors: {:?}",
            resolved.diagnostics
        );
        let mut module = resolved.module;
        let diags = types::check(&mut module);
        assert!(diags.is_empty(), "type errors: {:?}", diags);
        normalize::normalize(&module)
    }

    fn analyzed(source: &str) -> (Module, DeviceDomains) {
        let module = build(source);
        let domains = analyze(&module, &test_config()).expect("analysis failed");
        (module, domains)
    }

    fn param_scope(
        module: &Module,
        domains: &mut DeviceDomains,
        def: &str,
        index: usize,
    ) -> Scope {
        let f = module.def(def).unwrap();
        let fd = domains.lookup_expr(f).unwrap();
        let p = domains.param(fd, index);
        domains.result_scope(p)
    }

    #[test]
    fn annotation_pins_the_annotated_argument() {
        let (module, mut domains) = analyzed(
            "def @f(%x: Tensor, %y: Tensor) -> Tensor { add(%x, on_device(%y, scope=gpu)) }",
        );
        let gpu = domains.config().canonical(&Scope::for_device("gpu"));
        // Unfixed on_device pins its argument only; the add call (and with
        // it %x and the result, since add is homogeneous) stays free for
        // the defaulter.
        assert_eq!(param_scope(&module, &mut domains, "f", 1), gpu);
        assert!(param_scope(&module, &mut domains, "f", 0).is_fully_unconstrained());
        let f = module.def("f").unwrap();
        let fd = domains.lookup_expr(f).unwrap();
        assert!(domains.result_scope(fd).is_fully_unconstrained());
    }

    #[test]
    fn constraints_flow_through_higher_order_calls() {
        let (module, mut domains) = analyzed(
            "def @main(%a: Tensor, %b: Tensor) -> Tensor {\n\
               let %f = fn (%x: Tensor, %y: Tensor) { add(%x, on_device(%y, scope=gpu)) };\n\
               let %g = fn (%h: fn(Tensor, Tensor) -> Tensor, %z: Tensor) { %h(%z, %z) };\n\
               %g(%f, %b)\n\
             }",
        );
        let gpu = domains.config().canonical(&Scope::for_device("gpu"));
        // %b flows into %f's gpu-pinned parameter through %g.
        assert_eq!(param_scope(&module, &mut domains, "main", 1), gpu);
    }

    #[test]
    fn shape_dialect_pins_shapes_to_host() {
        let (module, mut domains) = analyzed(
            "def @f(%x: Tensor) -> Tensor { reshape_tensor(on_device(%x, scope=gpu), shape_of(%x)) }",
        );
        let cpu = domains.config().host_scope();
        let gpu = domains.config().canonical(&Scope::for_device("gpu"));
        // The annotation pins the parameter; the shape lives on the host.
        // (shape_of's tensor argument is free, so %x keeps its gpu pin.)
        assert_eq!(param_scope(&module, &mut domains, "f", 0), gpu);
        let f = module.def("f").unwrap();
        let ExprKind::Function { body, .. } = module.arena.kind(f) else {
            panic!("expected function");
        };
        let ExprKind::Call { args, .. } = module.arena.kind(*body) else {
            panic!("expected call");
        };
        let shape_domain = domains.lookup_expr(args[1]).unwrap();
        assert_eq!(domains.result_scope(shape_domain), cpu);
    }

    #[test]
    fn conflicting_annotations_are_fatal() {
        let module = build(
            "def @f(%x: Tensor) -> Tensor {\n\
               let %a = on_device(exp(%x), scope=cpu);\n\
               on_device(%a, scope=gpu, fixed=true)\n\
             }",
        );
        let err = analyze(&module, &test_config()).unwrap_err();
        assert_eq!(err.code, Some(codes::E0801));
        assert!(err.message.contains("cpu"), "message: {}", err.message);
        assert!(err.message.contains("gpu"), "message: {}", err.message);
    }

    #[test]
    fn function_attributes_from_earlier_run_are_respected() {
        let (module, mut domains) = analyzed(
            "def @f(%x: Tensor) -> Tensor attrs(param_scopes=[gpu], result_scope=cpu) { copy(%x) }",
        );
        let gpu = domains.config().canonical(&Scope::for_device("gpu"));
        assert_eq!(param_scope(&module, &mut domains, "f", 0), gpu);
    }

    #[test]
    fn conflicting_function_attributes_are_fatal() {
        let module = build(
            "def @f(%x: Tensor) -> Tensor attrs(param_scopes=[cpu], result_scope=cpu) {\n\
               on_device(%x, scope=gpu, fixed=true)\n\
             }",
        );
        let err = analyze(&module, &test_config()).unwrap_err();
        assert_eq!(err.code, Some(codes::E0802));
    }

    #[test]
    fn functions_in_tuples_collapse_to_the_tuple_scope() {
        let (module, mut domains) = analyzed(
            "def @f(%x: Tensor) -> Tensor {\n\
               let %t = on_device((fn (%y: Tensor) { %y }, %x), scope=gpu);\n\
               %x\n\
             }",
        );
        let gpu = domains.config().canonical(&Scope::for_device("gpu"));
        // The tuple is on gpu, so the inner function's whole signature is too.
        let f = module.def("f").unwrap();
        let ExprKind::Function { body, .. } = module.arena.kind(f) else {
            panic!("expected function");
        };
        let ExprKind::Let { value, .. } = module.arena.kind(*body) else {
            panic!("expected let");
        };
        let (tuple, _) = crate::ir::on_device_props(&module.arena, *value).unwrap();
        let ExprKind::Tuple { fields } = module.arena.kind(tuple) else {
            panic!("expected tuple");
        };
        let inner = domains.lookup_expr(fields[0]).unwrap();
        let inner_param = domains.param(inner, 0);
        assert_eq!(domains.result_scope(inner_param), gpu);
    }

    #[test]
    fn primitive_functions_are_skipped() {
        let (module, mut domains) = analyzed(
            "def @fused(%x: Tensor) -> Tensor attrs(primitive) { exp(%x) }\n\
             def @f(%x: Tensor) -> Tensor { @fused(on_device(%x, scope=gpu)) }",
        );
        // The call site still constrains the fused function's domain.
        let gpu = domains.config().canonical(&Scope::for_device("gpu"));
        assert_eq!(param_scope(&module, &mut domains, "fused", 0), gpu);
        // But nothing inside the fused body was analyzed.
        let fused = module.def("fused").unwrap();
        let ExprKind::Function { body, .. } = module.arena.kind(fused) else {
            panic!("expected function");
        };
        assert!(domains.lookup_expr(*body).is_none());
    }
}
