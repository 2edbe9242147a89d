// types.rs — Checked-type propagation over the IR
//
// Fills in the checked type of every expression node. Parameter and def
// return types are annotated in the source; everything else is derived
// structurally. The planner relies on checked types in exactly one way:
// a function-typed expression gets a higher-order domain skeleton matching
// its arity, so the propagation must be right about Fn types and their
// shapes, and is deliberately lenient about everything else.
//
// Preconditions: module produced by resolve (names interned).
// Postconditions: every function-typed node has a `Fn` checked type whose
//   arity matches its use sites, or an arity diagnostic was emitted.
// Failure modes: arity mismatches, calls to non-functions, out-of-bounds
//   projections produce `Diagnostic` entries. Checking continues past errors.
// Side effects: backfills `ty` fields in the module's arena.

use crate::ast::Span;
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::id::{ExprId, TypeId};
use crate::ir::{Arena, ExprKind, Module, Pattern, Type};
use crate::ops::{self, OpResult};

/// Propagate checked types through every def of the module.
pub fn check(module: &mut Module) -> Vec<Diagnostic> {
    let mut checker = Checker {
        module,
        diagnostics: Vec::new(),
    };
    let defs: Vec<ExprId> = checker.module.defs.iter().map(|(_, id)| *id).collect();
    for def in defs {
        checker.infer(def);
    }
    checker.diagnostics
}

struct Checker<'m> {
    module: &'m mut Module,
    diagnostics: Vec<Diagnostic>,
}

impl<'m> Checker<'m> {
    fn infer(&mut self, e: ExprId) -> TypeId {
        let kind = self.module.arena.kind(e).clone();
        let ty = match kind {
            // Binders set variable types; occurrences just read them.
            ExprKind::Var { .. } | ExprKind::Global { .. } => self.module.arena.ty_of(e),
            ExprKind::Constant { .. } => Arena::TENSOR,
            ExprKind::OpRef(_) | ExprKind::CtorRef(_) => Arena::UNKNOWN,
            ExprKind::Tuple { fields } => {
                let field_tys = fields.iter().map(|f| self.infer(*f)).collect();
                self.module.arena.push_type(Type::Tuple(field_tys))
            }
            ExprKind::Proj { tuple, index } => {
                let tuple_ty = self.infer(tuple);
                match self.module.arena.ty(tuple_ty).clone() {
                    Type::Tuple(fields) => match fields.get(index) {
                        Some(&field) => field,
                        None => {
                            self.error(
                                codes::E0202,
                                self.module.arena.span_of(e),
                                format!(
                                    "projection index {} out of bounds for a {}-tuple",
                                    index,
                                    fields.len()
                                ),
                            );
                            Arena::UNKNOWN
                        }
                    },
                    _ => Arena::UNKNOWN,
                }
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.infer(cond);
                let then_ty = self.infer(then_branch);
                let else_ty = self.infer(else_branch);
                if matches!(self.module.arena.ty(then_ty), Type::Unknown) {
                    else_ty
                } else {
                    then_ty
                }
            }
            ExprKind::Let { .. } => return self.infer_let_chain(e),
            ExprKind::Function { .. } => return self.infer_function(e),
            ExprKind::Call { op, args, .. } => self.infer_call(e, op, &args),
            ExprKind::Match { scrutinee, clauses } => {
                let scrutinee_ty = self.infer(scrutinee);
                let mut result = Arena::UNKNOWN;
                for clause in &clauses {
                    self.bind_pattern(&clause.pattern, scrutinee_ty);
                    let rhs_ty = self.infer(clause.rhs);
                    if matches!(self.module.arena.ty(result), Type::Unknown) {
                        result = rhs_ty;
                    }
                }
                result
            }
            ExprKind::RefCreate { value } => {
                let value_ty = self.infer(value);
                self.module.arena.push_type(Type::Ref(value_ty))
            }
            ExprKind::RefRead { source } => {
                let source_ty = self.infer(source);
                match self.module.arena.ty(source_ty) {
                    Type::Ref(inner) => *inner,
                    _ => Arena::UNKNOWN,
                }
            }
            ExprKind::RefWrite { target, value } => {
                self.infer(target);
                self.infer(value);
                self.module.arena.push_type(Type::Tuple(Vec::new()))
            }
        };
        self.module.arena.set_ty(e, ty);
        ty
    }

    /// Iterative let-chain typing: each binding takes its value's type unless
    /// annotated; every let node in the chain types as the final body.
    fn infer_let_chain(&mut self, e: ExprId) -> TypeId {
        let mut chain = Vec::new();
        let mut cur = e;
        while let ExprKind::Let { var, value, body } = self.module.arena.kind(cur).clone() {
            let value_ty = self.infer(value);
            if matches!(self.module.arena.ty(self.module.arena.ty_of(var)), Type::Unknown) {
                self.module.arena.set_ty(var, value_ty);
            }
            chain.push(cur);
            cur = body;
        }
        let result = self.infer(cur);
        for let_node in chain {
            self.module.arena.set_ty(let_node, result);
        }
        result
    }

    fn infer_function(&mut self, e: ExprId) -> TypeId {
        let ExprKind::Function {
            params,
            ret_ty,
            body,
            ..
        } = self.module.arena.kind(e).clone()
        else {
            unreachable!()
        };
        let body_ty = self.infer(body);
        let ret = if matches!(self.module.arena.ty(ret_ty), Type::Unknown) {
            self.module.arena.set_fn_ret_ty(e, body_ty);
            body_ty
        } else {
            ret_ty
        };
        if matches!(
            self.module.arena.ty(self.module.arena.ty_of(e)),
            Type::Unknown
        ) {
            let param_tys = params
                .iter()
                .map(|p| self.module.arena.ty_of(*p))
                .collect();
            let fn_ty = self.module.arena.push_type(Type::Fn {
                params: param_tys,
                ret,
            });
            self.module.arena.set_ty(e, fn_ty);
        }
        self.module.arena.ty_of(e)
    }

    fn infer_call(&mut self, call: ExprId, op: ExprId, args: &[ExprId]) -> TypeId {
        let arg_tys: Vec<TypeId> = args.iter().map(|a| self.infer(*a)).collect();
        let span = self.module.arena.span_of(call);
        match self.module.arena.kind(op).clone() {
            ExprKind::OpRef(op_id) => {
                let def = ops::def(op_id);
                if args.len() != def.arity {
                    self.arity_error(span, def.name, def.arity, args.len());
                }
                match def.result {
                    OpResult::Tensor => Arena::TENSOR,
                    OpResult::Shape => Arena::SHAPE,
                    OpResult::Storage => Arena::STORAGE,
                    OpResult::SameAsArg0 => {
                        arg_tys.first().copied().unwrap_or(Arena::UNKNOWN)
                    }
                }
            }
            ExprKind::CtorRef(ctor_id) => {
                let ctor = self.module.ctor(ctor_id).clone();
                if args.len() != ctor.fields.len() {
                    self.arity_error(span, &ctor.name, ctor.fields.len(), args.len());
                }
                self.module.arena.push_type(Type::Adt(ctor.adt))
            }
            _ => {
                let callee_ty = self.infer(op);
                match self.module.arena.ty(callee_ty).clone() {
                    Type::Fn { params, ret } => {
                        if args.len() != params.len() {
                            self.arity_error(span, "function", params.len(), args.len());
                        }
                        ret
                    }
                    Type::Unknown => Arena::UNKNOWN,
                    _ => {
                        self.error(
                            codes::E0201,
                            span,
                            "called expression is not a function".to_string(),
                        );
                        Arena::UNKNOWN
                    }
                }
            }
        }
    }

    fn bind_pattern(&mut self, pattern: &Pattern, scrutinee_ty: TypeId) {
        match pattern {
            Pattern::Wildcard => {}
            Pattern::Var(var) => {
                let var = *var;
                if matches!(
                    self.module.arena.ty(self.module.arena.ty_of(var)),
                    Type::Unknown
                ) {
                    self.module.arena.set_ty(var, scrutinee_ty);
                }
            }
            Pattern::Ctor { ctor, fields } => {
                let field_tys = self.module.ctor(*ctor).fields.clone();
                for (field, field_ty) in fields.iter().zip(field_tys) {
                    self.bind_pattern(field, field_ty);
                }
            }
            Pattern::Tuple(fields) => {
                let field_tys = match self.module.arena.ty(scrutinee_ty) {
                    Type::Tuple(tys) => tys.clone(),
                    _ => vec![Arena::UNKNOWN; fields.len()],
                };
                for (field, field_ty) in fields.iter().zip(field_tys) {
                    self.bind_pattern(field, field_ty);
                }
            }
        }
    }

    fn arity_error(&mut self, span: Span, name: &str, expected: usize, found: usize) {
        self.error(
            codes::E0200,
            span,
            format!(
                "'{}' expects {} argument(s) but the call supplies {}",
                name, expected, found
            ),
        );
    }

    fn error(&mut self, code: crate::diag::DiagCode, span: Span, message: String) {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Error, span, message).with_code(code));
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
