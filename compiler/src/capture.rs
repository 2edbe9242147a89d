// capture.rs — Phase 3: reify the analysis into a rewritten module
//
// Produces a fresh module in which:
//   - every function carries param_scopes/result_scope attributes;
//   - obsolete on_device calls are elided, no-op device_copy calls removed;
//   - a device_copy (with a pedantic on_device on its argument) sits at
//     every genuine scope transition;
//   - an on_device marks every place where an expression's scope differs
//     from its lexical context, so downstream passes recover scopes from
//     the nearest enclosing annotation or function attribute alone.
//
// The heart is `visit_child`, which reconciles three scopes for each child:
// the lexical scope its context advertises, the scope its parent expects it
// to produce, and the scope the analysis assigned to it.
//
// Preconditions: analysis + defaulting completed; every domain fully
//   constrained.
// Postconditions: lexical recoverability holds on the output; on_device
//   never wraps a variable or global.
// Failure modes: none (internal invariant panics only).
// Side effects: reads representatives from the store; never unifies.

use crate::id::ExprId;
use crate::ir::{
    device_copy_props, on_device_props, Arena, Clause, ExprKind, FnAttrs, Module,
};
use crate::domains::DeviceDomains;
use crate::scope::Scope;

/// Rewrite the module so every scope is lexically recoverable.
pub fn capture(module: &Module, domains: &mut DeviceDomains) -> Module {
    let mut capturer = Capturer {
        src: module,
        domains,
        arena: module.arena.clone(),
    };
    let defs = module
        .defs
        .iter()
        .map(|(name, def)| (name.clone(), capturer.rewrite(*def)))
        .collect();
    Module {
        arena: capturer.arena,
        adts: module.adts.clone(),
        ctors: module.ctors.clone(),
        defs,
        globals: module.globals.clone(),
    }
}

struct Capturer<'m, 'd> {
    src: &'m Module,
    domains: &'d mut DeviceDomains,
    arena: Arena,
}

impl<'m, 'd> Capturer<'m, 'd> {
    /// The scope the analysis assigned to `e`, seen through any residual
    /// on_device wrapper (mimicking how those wrappers are elided below).
    fn get_scope(&mut self, e: ExprId) -> Scope {
        let mut true_expr = e;
        while let Some((body, _)) = on_device_props(&self.arena, true_expr) {
            true_expr = body;
        }
        let d = self
            .domains
            .lookup_expr(true_expr)
            .expect("internal: no domain for expression");
        let scope = self.domains.result_scope(d);
        let scope = self.domains.config().canonical(&scope);
        assert!(
            !scope.is_fully_unconstrained(),
            "internal: no scope was determined for expression"
        );
        scope
    }

    fn scope_eq(&self, a: &Scope, b: &Scope) -> bool {
        self.domains.config().scope_eq(a, b)
    }

    /// Wrap in on_device unless the wrap would be redundant: unconstrained
    /// scope, a variable/global (their scopes are tracked through bindings
    /// and attributes), an operator/constructor, or an identical wrapper.
    fn maybe_on_device(&mut self, e: ExprId, scope: &Scope, is_fixed: bool) -> ExprId {
        if scope.is_fully_unconstrained() {
            return e;
        }
        match self.arena.kind(e) {
            ExprKind::Var { .. }
            | ExprKind::Global { .. }
            | ExprKind::OpRef(_)
            | ExprKind::CtorRef(_) => return e,
            _ => {}
        }
        if let Some((_, props)) = on_device_props(&self.arena, e) {
            if props.is_fixed == is_fixed
                && self.scope_eq(&self.domains.config().canonical(&props.scope), scope)
            {
                return e;
            }
        }
        self.arena.on_device(e, scope.clone(), is_fixed)
    }

    /// Reconcile `child_scope` with the scope the parent expects and the
    /// scope the lexical context advertises. Wraps in
    /// `device_copy(on_device(child, ...), ...)` for a real transition and
    /// in `on_device(...)` where expectation and lexical context differ.
    fn visit_child(
        &mut self,
        lexical: &Scope,
        expected: &Scope,
        child_scope: &Scope,
        child: ExprId,
    ) -> ExprId {
        assert!(
            !lexical.is_fully_unconstrained() && !expected.is_fully_unconstrained(),
            "internal: visit_child needs constrained context scopes"
        );
        // Operators and constructors are device-polymorphic; they are never
        // wrapped and can take a different scope at each call site.
        if matches!(
            self.arena.kind(child),
            ExprKind::OpRef(_) | ExprKind::CtorRef(_)
        ) {
            return child;
        }
        let mut result = self.rewrite(child);
        if !self.scope_eq(child_scope, expected) {
            result = self.maybe_on_device(result, child_scope, true);
            result = self
                .arena
                .device_copy(result, child_scope.clone(), expected.clone());
        }
        if !self.scope_eq(expected, lexical) {
            result = self.maybe_on_device(result, expected, true);
        }
        result
    }

    /// Common case: the child is expected on the same scope as the parent.
    fn visit_child_default(&mut self, parent: ExprId, child: ExprId) -> ExprId {
        let expected = self.get_scope(parent);
        let child_scope = self.get_scope(child);
        self.visit_child(&expected.clone(), &expected, &child_scope, child)
    }

    fn rewrite(&mut self, e: ExprId) -> ExprId {
        match self.arena.kind(e).clone() {
            ExprKind::Var { .. }
            | ExprKind::Global { .. }
            | ExprKind::Constant { .. }
            | ExprKind::OpRef(_)
            | ExprKind::CtorRef(_) => e,
            ExprKind::Tuple { fields } => {
                let new_fields: Vec<ExprId> = fields
                    .iter()
                    .map(|f| self.visit_child_default(e, *f))
                    .collect();
                if new_fields == fields {
                    e
                } else {
                    self.arena.push_expr(
                        ExprKind::Tuple { fields: new_fields },
                        self.arena.ty_of(e),
                        self.arena.span_of(e),
                    )
                }
            }
            ExprKind::Proj { tuple, index } => {
                let new_tuple = self.visit_child_default(e, tuple);
                if new_tuple == tuple {
                    e
                } else {
                    self.arena.push_expr(
                        ExprKind::Proj {
                            tuple: new_tuple,
                            index,
                        },
                        self.arena.ty_of(e),
                        self.arena.span_of(e),
                    )
                }
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let new_cond = self.visit_child_default(e, cond);
                let new_then = self.visit_child_default(e, then_branch);
                let new_else = self.visit_child_default(e, else_branch);
                if (new_cond, new_then, new_else) == (cond, then_branch, else_branch) {
                    e
                } else {
                    self.arena.push_expr(
                        ExprKind::If {
                            cond: new_cond,
                            then_branch: new_then,
                            else_branch: new_else,
                        },
                        self.arena.ty_of(e),
                        self.arena.span_of(e),
                    )
                }
            }
            ExprKind::Match { scrutinee, clauses } => {
                let new_scrutinee = self.visit_child_default(e, scrutinee);
                let new_clauses: Vec<Clause> = clauses
                    .iter()
                    .map(|clause| Clause {
                        pattern: clause.pattern.clone(),
                        rhs: self.visit_child_default(e, clause.rhs),
                    })
                    .collect();
                let unchanged = new_scrutinee == scrutinee
                    && new_clauses
                        .iter()
                        .zip(&clauses)
                        .all(|(new, old)| new.rhs == old.rhs);
                if unchanged {
                    e
                } else {
                    self.arena.push_expr(
                        ExprKind::Match {
                            scrutinee: new_scrutinee,
                            clauses: new_clauses,
                        },
                        self.arena.ty_of(e),
                        self.arena.span_of(e),
                    )
                }
            }
            ExprKind::RefCreate { value } => {
                let new_value = self.visit_child_default(e, value);
                if new_value == value {
                    e
                } else {
                    self.arena.push_expr(
                        ExprKind::RefCreate { value: new_value },
                        self.arena.ty_of(e),
                        self.arena.span_of(e),
                    )
                }
            }
            ExprKind::RefRead { source } => {
                let new_source = self.visit_child_default(e, source);
                if new_source == source {
                    e
                } else {
                    self.arena.push_expr(
                        ExprKind::RefRead { source: new_source },
                        self.arena.ty_of(e),
                        self.arena.span_of(e),
                    )
                }
            }
            ExprKind::RefWrite { target, value } => {
                let new_target = self.visit_child_default(e, target);
                let new_value = self.visit_child_default(e, value);
                if (new_target, new_value) == (target, value) {
                    e
                } else {
                    self.arena.push_expr(
                        ExprKind::RefWrite {
                            target: new_target,
                            value: new_value,
                        },
                        self.arena.ty_of(e),
                        self.arena.span_of(e),
                    )
                }
            }
            ExprKind::Function { .. } => self.rewrite_function(e),
            ExprKind::Let { .. } => self.rewrite_let_chain(e),
            ExprKind::Call { .. } => self.rewrite_call(e),
        }
    }

    fn rewrite_function(&mut self, f: ExprId) -> ExprId {
        let ExprKind::Function {
            params,
            ret_ty,
            body,
            attrs,
        } = self.arena.kind(f).clone()
        else {
            unreachable!()
        };
        if attrs.primitive {
            return f;
        }
        let fd = self
            .domains
            .lookup_expr(f)
            .expect("internal: no domain for function");
        assert_eq!(
            self.domains.arity(fd),
            params.len(),
            "internal: function domain arity does not match the parameter list"
        );
        let result_scope = {
            let scope = self.domains.result_scope(fd);
            let scope = self.domains.config().canonical(&scope);
            assert!(!scope.is_fully_unconstrained(), "internal: free result scope");
            scope
        };
        let mut param_scopes = Vec::with_capacity(params.len());
        for i in 0..params.len() {
            let p = self.domains.param(fd, i);
            let scope = self.domains.result_scope(p);
            let scope = self.domains.config().canonical(&scope);
            assert!(
                !scope.is_fully_unconstrained(),
                "internal: free parameter scope"
            );
            param_scopes.push(scope);
        }

        let body_scope = self.get_scope(body);
        let new_body = self.visit_child(&result_scope.clone(), &result_scope, &body_scope, body);
        let new_attrs = FnAttrs {
            primitive: false,
            param_scopes: Some(param_scopes),
            result_scope: Some(result_scope),
        };
        if new_body == body && new_attrs == attrs {
            f
        } else {
            self.arena.push_expr(
                ExprKind::Function {
                    params,
                    ret_ty,
                    body: new_body,
                    attrs: new_attrs,
                },
                self.arena.ty_of(f),
                self.arena.span_of(f),
            )
        }
    }

    fn rewrite_call(&mut self, call: ExprId) -> ExprId {
        let ExprKind::Call { op, args, attrs } = self.arena.kind(call).clone() else {
            unreachable!()
        };

        // The original annotations have done their job; elide them. The
        // surrounding visit_child re-inserts wrappers where still needed.
        if let Some((body, _)) = on_device_props(&self.arena, call) {
            return self.rewrite(body);
        }

        if let Some((body, props)) = device_copy_props(&self.arena, call) {
            let src = self.domains.config().canonical(&props.src);
            let dst = self.domains.config().canonical(&props.dst);
            let call_scope = self.get_scope(call);
            assert!(
                self.scope_eq(&call_scope, &dst),
                "internal: device_copy result scope disagrees with its dst"
            );
            if self.scope_eq(&src, &dst) {
                // A no-op copy; pinch it out.
                return self.rewrite(body);
            }
            return self.visit_child(&dst.clone(), &dst, &src, body);
        }

        let call_scope = self.get_scope(call);
        let fd = self.domains.domain_for_callee(&self.src.arena, call);
        assert_eq!(
            self.domains.arity(fd),
            args.len(),
            "internal: callee domain arity does not match the call"
        );
        let result_scope = {
            let scope = self.domains.result_scope(fd);
            self.domains.config().canonical(&scope)
        };

        // The callee executes with the call; a closure lives with its result.
        let new_op = self.visit_child(&call_scope.clone(), &call_scope, &result_scope, op);

        let mut new_args = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let param_scope = {
                let p = self.domains.param(fd, i);
                let scope = self.domains.result_scope(p);
                let scope = self.domains.config().canonical(&scope);
                assert!(
                    !scope.is_fully_unconstrained(),
                    "internal: free parameter scope at call site"
                );
                scope
            };
            let arg_scope = self.get_scope(*arg);
            new_args.push(self.visit_child(&call_scope.clone(), &param_scope, &arg_scope, *arg));
        }

        if new_op == op && new_args == args {
            call
        } else {
            self.arena.push_expr(
                ExprKind::Call {
                    op: new_op,
                    args: new_args,
                    attrs,
                },
                self.arena.ty_of(call),
                self.arena.span_of(call),
            )
        }
    }

    /// Walk a chain of lets that agree on their scope; break the chain at
    /// the first inner let whose scope differs (that transition is handled
    /// by visit_child on the remainder).
    fn rewrite_let_chain(&mut self, e: ExprId) -> ExprId {
        let let_scope = self.get_scope(e);
        let mut bindings = Vec::new();
        let mut changed = false;
        let mut cur = e;
        while let ExprKind::Let { var, value, body } = self.arena.kind(cur).clone() {
            let cur_scope = self.get_scope(cur);
            if !self.scope_eq(&cur_scope, &let_scope) {
                break;
            }
            let var_scope = self.get_scope(var);
            let value_scope = self.get_scope(value);
            let new_value = self.visit_child(&let_scope, &var_scope, &value_scope, value);
            changed |= new_value != value;
            bindings.push((var, new_value, self.arena.ty_of(cur), self.arena.span_of(cur)));
            cur = body;
        }
        let tail_scope = self.get_scope(cur);
        let new_body = self.visit_child(&let_scope.clone(), &let_scope, &tail_scope, cur);
        changed |= new_body != cur;
        if !changed {
            return e;
        }
        let mut result = new_body;
        for (var, value, ty, span) in bindings.into_iter().rev() {
            result = self
                .arena
                .push_expr(ExprKind::Let { var, value, body: result }, ty, span);
        }
        result
    }
}
