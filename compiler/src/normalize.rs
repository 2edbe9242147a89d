// normalize.rs — Phase 0: canonicalize on_device annotations
//
// Three structural rewrites, applied bottom-up:
//
//   let %x = on_device(e, scope=d)      ==> let %x = on_device(e, scope=d, fixed=true)
//   fn(%x) { on_device(e, scope=d) }    ==> fn(%x) { on_device(e, scope=d, fixed=true) }
//   on_device(e, scope=d).i             ==> on_device(e.i, scope=d)
//
// Fixing let-bound and function-body annotations removes a degree of
// freedom that would otherwise let a needless copy sneak in between the
// annotated value and its binding. Pushing projections through unfixed
// annotations means a later copy moves the projection, not the whole tuple.
// Already-fixed annotations pass through unchanged, keeping the rewrite
// idempotent.
//
// Preconditions: resolved, type-checked module.
// Postconditions: no unfixed on_device directly under a let binding or a
//   function body; no projection directly over an unfixed on_device.
// Failure modes: none.
// Side effects: none (returns a fresh module).

use crate::id::ExprId;
use crate::ir::{on_device_props, Arena, Clause, ExprKind, Module};

/// Apply the Phase 0 rewrites to every def of the module.
pub fn normalize(module: &Module) -> Module {
    let mut normalizer = Normalizer {
        arena: module.arena.clone(),
    };
    let defs = module
        .defs
        .iter()
        .map(|(name, def)| (name.clone(), normalizer.rewrite(*def)))
        .collect();
    Module {
        arena: normalizer.arena,
        adts: module.adts.clone(),
        ctors: module.ctors.clone(),
        defs,
        globals: module.globals.clone(),
    }
}

struct Normalizer {
    arena: Arena,
}

impl Normalizer {
    fn rewrite(&mut self, e: ExprId) -> ExprId {
        match self.arena.kind(e).clone() {
            ExprKind::Var { .. }
            | ExprKind::Global { .. }
            | ExprKind::Constant { .. }
            | ExprKind::OpRef(_)
            | ExprKind::CtorRef(_) => e,
            ExprKind::Proj { tuple, index } => {
                let new_tuple = self.rewrite(tuple);
                // Push the projection through an unfixed annotation so a
                // later copy moves e.i rather than all of e.
                if let Some((body, props)) = on_device_props(&self.arena, new_tuple) {
                    if !props.is_fixed {
                        let proj = self.arena.push_expr(
                            ExprKind::Proj { tuple: body, index },
                            self.arena.ty_of(e),
                            self.arena.span_of(e),
                        );
                        return self.arena.on_device(proj, props.scope, false);
                    }
                }
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
            ExprKind::Let { .. } => self.rewrite_let_chain(e),
            ExprKind::Function {
                params,
                ret_ty,
                body,
                attrs,
            } => {
                let mut new_body = self.rewrite(body);
                new_body = self.fix_annotation(new_body);
                if new_body == body {
                    e
                } else {
                    self.arena.push_expr(
                        ExprKind::Function {
                            params,
                            ret_ty,
                            body: new_body,
                            attrs,
                        },
                        self.arena.ty_of(e),
                        self.arena.span_of(e),
                    )
                }
            }
            ExprKind::Call { op, args, attrs } => {
                let new_args: Vec<ExprId> = args.iter().map(|a| self.rewrite(*a)).collect();
                if new_args == args {
                    e
                } else {
                    self.arena.push_expr(
                        ExprKind::Call {
                            op,
                            args: new_args,
                            attrs,
                        },
                        self.arena.ty_of(e),
                        self.arena.span_of(e),
                    )
                }
            }
            ExprKind::Tuple { fields } => {
                let new_fields: Vec<ExprId> = fields.iter().map(|f| self.rewrite(*f)).collect();
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
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let new_cond = self.rewrite(cond);
                let new_then = self.rewrite(then_branch);
                let new_else = self.rewrite(else_branch);
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
                let new_scrutinee = self.rewrite(scrutinee);
                let new_clauses: Vec<Clause> = clauses
                    .iter()
                    .map(|clause| Clause {
                        pattern: clause.pattern.clone(),
                        rhs: self.rewrite(clause.rhs),
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
                let new_value = self.rewrite(value);
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
                let new_source = self.rewrite(source);
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
                let new_target = self.rewrite(target);
                let new_value = self.rewrite(value);
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
        }
    }

    /// Iterative let-chain rewrite: fix annotations on every binding value.
    fn rewrite_let_chain(&mut self, e: ExprId) -> ExprId {
        let mut bindings = Vec::new();
        let mut changed = false;
        let mut cur = e;
        while let ExprKind::Let { var, value, body } = self.arena.kind(cur).clone() {
            let mut new_value = self.rewrite(value);
            new_value = self.fix_annotation(new_value);
            changed |= new_value != value;
            bindings.push((var, new_value, self.arena.ty_of(cur), self.arena.span_of(cur)));
            cur = body;
        }
        let new_body = self.rewrite(cur);
        changed |= new_body != cur;
        if !changed {
            return e;
        }
        let mut result = new_body;
        for (var, value, ty, span) in bindings.into_iter().rev() {
            result = self.arena.push_expr(ExprKind::Let { var, value, body: result }, ty, span);
        }
        result
    }

    /// Rewrap an unfixed annotation as fixed. Fixed annotations and
    /// everything else pass through.
    fn fix_annotation(&mut self, e: ExprId) -> ExprId {
        match on_device_props(&self.arena, e) {
            Some((body, props)) if !props.is_fixed => {
                self.arena.on_device(body, props.scope, true)
            }
            _ => e,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
