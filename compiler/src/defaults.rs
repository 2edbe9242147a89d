// defaults.rs — Phase 2: fill still-free domains
//
// A second pre-order traversal that assigns the global default scope to
// anything the constraint system left open, with local heuristics to avoid
// needless copies:
//
//   - a function's result defaults first, then its parameters pull toward
//     that (now fixed) result scope;
//   - an under-constrained callee gets the same result-then-params
//     treatment (possible for primitive calls with no context constraint);
//   - a let-bound variable defaults to the scope of the overall let.
//
// The defaulter only writes to unconstrained leaves, so it can never
// introduce a conflict.
//
// Preconditions: analysis completed on the same module and store.
// Postconditions: every domain reachable from a visited expression is
//   fully constrained.
// Failure modes: none (internal invariant panics only).
// Side effects: mutates the domain store in place.

use crate::domains::DeviceDomains;
use crate::id::ExprId;
use crate::ir::{ExprKind, Module};

/// Fill every still-free domain in the module.
pub fn default_domains(module: &Module, domains: &mut DeviceDomains) {
    let mut defaulter = Defaulter { module, domains };
    for (_, def) in &module.defs {
        defaulter.visit(*def);
    }
}

struct Defaulter<'m, 'd> {
    module: &'m Module,
    domains: &'d mut DeviceDomains,
}

impl<'m, 'd> Defaulter<'m, 'd> {
    fn visit(&mut self, e: ExprId) {
        match self.module.arena.kind(e).clone() {
            ExprKind::Var { .. }
            | ExprKind::Global { .. }
            | ExprKind::Constant { .. }
            | ExprKind::OpRef(_)
            | ExprKind::CtorRef(_) => {}
            ExprKind::Tuple { fields } => {
                for field in fields {
                    self.visit(field);
                }
            }
            ExprKind::Proj { tuple, .. } => self.visit(tuple),
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.visit(cond);
                self.visit(then_branch);
                self.visit(else_branch);
            }
            ExprKind::Let { .. } => self.visit_let_chain(e),
            ExprKind::Function { body, attrs, .. } => {
                if attrs.primitive {
                    return;
                }
                let fd = self.domains.domain_for(&self.module.arena, e);
                if !self.domains.is_fully_constrained(fd) {
                    let default = self.domains.config().default_scope();
                    self.domains.set_result_default_then_params(fd, &default);
                }
                self.visit(body);
            }
            ExprKind::Call { op, args, .. } => {
                let fd = self.domains.domain_for_callee(&self.module.arena, e);
                if !self.domains.is_fully_constrained(fd) {
                    // Calls to defs were handled with their function; this
                    // forces free primitive callees to a concrete scope.
                    let default = self.domains.config().default_scope();
                    self.domains.set_result_default_then_params(fd, &default);
                }
                match self.module.arena.kind(op) {
                    ExprKind::OpRef(_) | ExprKind::CtorRef(_) => {}
                    _ => self.visit(op),
                }
                for arg in args {
                    self.visit(arg);
                }
            }
            ExprKind::Match { scrutinee, clauses } => {
                self.visit(scrutinee);
                for clause in clauses {
                    self.visit(clause.rhs);
                }
            }
            ExprKind::RefCreate { value } => self.visit(value),
            ExprKind::RefRead { source } => self.visit(source),
            ExprKind::RefWrite { target, value } => {
                self.visit(target);
                self.visit(value);
            }
        }
    }

    /// If a let-bound variable is still free, pull it to the scope of the
    /// overall let rather than the global default.
    fn visit_let_chain(&mut self, e: ExprId) {
        let mut cur = e;
        while let ExprKind::Let { var, value, body } = self.module.arena.kind(cur).clone() {
            let let_domain = self.domains.domain_for(&self.module.arena, cur);
            let let_scope = self.domains.result_scope(let_domain);
            assert!(
                !let_scope.is_fully_unconstrained(),
                "internal: let scope still unconstrained while defaulting"
            );
            let var_domain = self.domains.domain_for(&self.module.arena, var);
            if !self.domains.is_fully_constrained(var_domain) {
                self.domains.set_default(var_domain, &let_scope);
            }
            self.visit(value);
            cur = body;
        }
        self.visit(cur);
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze;
    use crate::domains::test_config;
    use crate::normalize;
    use crate::parser;
    use crate::resolve;
    use crate::scope::Scope;
    use crate::types;

    fn defaulted(source: &str) -> (Module, DeviceDomains) {
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
        let module = normalize::normalize(&module);
        let mut domains = analyze::analyze(&module, &test_config()).expect("analysis failed");
        default_domains(&module, &mut domains);
        (module, domains)
    }

    #[test]
    fn free_function_defaults_to_the_default_scope() {
        let (module, mut domains) =
            defaulted("def @f(%x: Tensor, %y: Tensor) -> Tensor { add(%x, %y) }");
        let cpu = domains.config().default_scope();
        let f = module.def("f").unwrap();
        let fd = domains.lookup_expr(f).unwrap();
        assert!(domains.is_fully_constrained(fd));
        assert_eq!(domains.result_scope(fd), cpu);
        let p0 = domains.param(fd, 0);
        assert_eq!(domains.result_scope(p0), cpu);
    }

    #[test]
    fn constrained_result_pulls_free_params() {
        // The fixed body annotation pins the result to gpu; the defaulter
        // then pulls the unconstrained parameter to gpu, not to the default.
        let (module, mut domains) = defaulted(
            "def @f(%x: Tensor) -> Tensor { on_device(copy(%x), scope=gpu, fixed=true) }",
        );
        let gpu = domains.config().canonical(&Scope::for_device("gpu"));
        let f = module.def("f").unwrap();
        let fd = domains.lookup_expr(f).unwrap();
        assert_eq!(domains.result_scope(fd), gpu);
        let p0 = domains.param(fd, 0);
        assert_eq!(domains.result_scope(p0), gpu);
    }

    #[test]
    fn let_bound_variable_defaults_to_the_let_scope() {
        let (module, mut domains) = defaulted(
            "def @f(%x: Tensor) -> Tensor {\n\
               let %a = copy(%x);\n\
               on_device(add(%a, %a), scope=gpu, fixed=true)\n\
             }",
        );
        let gpu = domains.config().canonical(&Scope::for_device("gpu"));
        let f = module.def("f").unwrap();
        let ExprKind::Function { body, .. } = module.arena.kind(f) else {
            panic!("expected function");
        };
        let ExprKind::Let { var, .. } = module.arena.kind(*body) else {
            panic!("expected let");
        };
        let var_domain = domains.lookup_expr(*var).unwrap();
        assert_eq!(domains.result_scope(var_domain), gpu);
    }

    #[test]
    fn everything_is_fully_constrained_after_defaulting() {
        let (module, mut domains) = defaulted(
            "def @f(%x: Tensor, %y: Tensor) -> Tensor {\n\
               let %t = (%x, on_device(%y, scope=gpu, fixed=true));\n\
               let %s = %t.1;\n\
               if (equal(%s, %x)) { %s } else { %x }\n\
             }",
        );
        for (_, def) in &module.defs {
            let fd = domains.lookup_expr(*def).unwrap();
            assert!(domains.is_fully_constrained(fd));
        }
    }
}
