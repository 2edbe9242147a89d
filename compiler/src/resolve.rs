// resolve.rs — Name resolution for dpc AST
//
// Walks the parsed AST and builds the arena IR: variable occurrences are
// interned to their binder's node, globals to one shared node per name,
// operator names against the operator table, and constructor names against
// the module's type definitions. Scope literals are checked against the
// compilation config's targets.
//
// Preconditions: `program` is a well-formed AST from the parser.
// Postconditions: returns a module plus all accumulated diagnostics.
// Failure modes: unknown names, duplicate definitions, bare operator or
//                constructor references produce `Diagnostic` entries.
//                Resolution continues past errors.
// Side effects: none.

use std::collections::HashMap;

use crate::ast::{self, ExprAst, ExprAstKind, PatternAst, PatternAstKind, Program, ScopeAst};
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::id::{AdtId, CtorId, ExprId, TypeId};
use crate::ir::{
    AdtDef, Arena, CallAttrs, Clause, CtorDef, ExprKind, FnAttrs, Module, Pattern, Type,
};
use crate::ops;
use crate::scope::{CompilationConfig, Scope};

// ── Public types ────────────────────────────────────────────────────────────

/// Result of name resolution. The module is always produced; it is only
/// meaningful when no error-level diagnostics were emitted.
#[derive(Debug)]
pub struct ResolveResult {
    pub module: Module,
    pub diagnostics: Vec<Diagnostic>,
}

/// Resolve a parsed program against a compilation config.
pub fn resolve(program: &Program, config: &CompilationConfig) -> ResolveResult {
    let mut resolver = Resolver {
        config,
        arena: Arena::new(),
        adts: Vec::new(),
        ctors: Vec::new(),
        adt_index: HashMap::new(),
        ctor_index: HashMap::new(),
        globals: HashMap::new(),
        locals: Vec::new(),
        diagnostics: Vec::new(),
    };
    let module = resolver.run(program);
    ResolveResult {
        module,
        diagnostics: resolver.diagnostics,
    }
}

// ── Resolver ────────────────────────────────────────────────────────────────

struct Resolver<'c> {
    config: &'c CompilationConfig,
    arena: Arena,
    adts: Vec<AdtDef>,
    ctors: Vec<CtorDef>,
    adt_index: HashMap<String, AdtId>,
    ctor_index: HashMap<String, CtorId>,
    globals: HashMap<String, ExprId>,
    /// Lexical variable stack; lookup scans from the back so shadowing works.
    locals: Vec<(String, ExprId)>,
    diagnostics: Vec<Diagnostic>,
}

impl<'c> Resolver<'c> {
    fn run(&mut self, program: &Program) -> Module {
        // ADT names first, so constructor fields can reference any ADT.
        for item in &program.items {
            if let ast::Item::TypeDef(type_def) = item {
                if self.adt_index.contains_key(&type_def.name.name) {
                    self.error(
                        codes::E0101,
                        type_def.name.span,
                        format!("duplicate type definition '{}'", type_def.name.name),
                    );
                    continue;
                }
                let id = AdtId(self.adts.len() as u32);
                self.adt_index.insert(type_def.name.name.clone(), id);
                self.adts.push(AdtDef {
                    name: type_def.name.name.clone(),
                    ctors: Vec::new(),
                });
            }
        }
        for item in &program.items {
            if let ast::Item::TypeDef(type_def) = item {
                let Some(&adt_id) = self.adt_index.get(&type_def.name.name) else {
                    continue;
                };
                for ctor in &type_def.ctors {
                    if self.ctor_index.contains_key(&ctor.name.name) {
                        self.error(
                            codes::E0101,
                            ctor.name.span,
                            format!("duplicate constructor '{}'", ctor.name.name),
                        );
                        continue;
                    }
                    let fields = ctor.fields.iter().map(|t| self.lower_type(t)).collect();
                    let ctor_id = CtorId(self.ctors.len() as u32);
                    self.ctor_index.insert(ctor.name.name.clone(), ctor_id);
                    self.ctors.push(CtorDef {
                        name: ctor.name.name.clone(),
                        adt: adt_id,
                        fields,
                    });
                    self.adts[adt_id.0 as usize].ctors.push(ctor_id);
                }
            }
        }

        // Global nodes next, so bodies can reference any def (incl. forward).
        for item in &program.items {
            if let ast::Item::Def(def) = item {
                if self.globals.contains_key(&def.name.name) {
                    self.error(
                        codes::E0101,
                        def.name.span,
                        format!("duplicate def '@{}'", def.name.name),
                    );
                    continue;
                }
                let param_tys: Vec<TypeId> =
                    def.params.iter().map(|p| self.lower_type(&p.ty)).collect();
                let ret_ty = self.lower_type(&def.ret);
                let fn_ty = self.arena.push_type(Type::Fn {
                    params: param_tys,
                    ret: ret_ty,
                });
                let node = self.arena.push_expr(
                    ExprKind::Global {
                        name: def.name.name.clone(),
                    },
                    fn_ty,
                    def.name.span,
                );
                self.globals.insert(def.name.name.clone(), node);
            }
        }

        // Def bodies last.
        let mut defs = Vec::new();
        for item in &program.items {
            if let ast::Item::Def(def) = item {
                let function = self.lower_def(def);
                defs.push((def.name.name.clone(), function));
            }
        }

        Module {
            arena: std::mem::take(&mut self.arena),
            adts: std::mem::take(&mut self.adts),
            ctors: std::mem::take(&mut self.ctors),
            defs,
            globals: std::mem::take(&mut self.globals),
        }
    }

    fn lower_def(&mut self, def: &ast::DefItem) -> ExprId {
        let depth = self.locals.len();
        let mut params = Vec::new();
        let mut param_tys = Vec::new();
        for param in &def.params {
            let ty = self.lower_type(&param.ty);
            let node = self.arena.push_expr(
                ExprKind::Var {
                    name: param.name.name.clone(),
                },
                ty,
                param.name.span,
            );
            self.locals.push((param.name.name.clone(), node));
            params.push(node);
            param_tys.push(ty);
        }
        let ret_ty = self.lower_type(&def.ret);
        let attrs = self.lower_attrs(def.attrs.as_ref(), def.params.len(), def.span);
        let body = self.lower_expr(&def.body);
        self.locals.truncate(depth);

        let fn_ty = self.arena.push_type(Type::Fn {
            params: param_tys,
            ret: ret_ty,
        });
        self.arena.push_expr(
            ExprKind::Function {
                params,
                ret_ty,
                body,
                attrs,
            },
            fn_ty,
            def.span,
        )
    }

    fn lower_attrs(
        &mut self,
        attrs: Option<&ast::AttrsAst>,
        param_count: usize,
        span: ast::Span,
    ) -> FnAttrs {
        let Some(attrs) = attrs else {
            return FnAttrs::default();
        };
        let param_scopes = attrs.param_scopes.as_ref().map(|scopes| {
            if scopes.len() != param_count {
                self.error(
                    codes::E0200,
                    span,
                    format!(
                        "param_scopes lists {} scopes but the function has {} parameters",
                        scopes.len(),
                        param_count
                    ),
                );
            }
            scopes.iter().map(|s| self.lower_scope(s)).collect()
        });
        let result_scope = attrs.result_scope.as_ref().map(|s| self.lower_scope(s));
        FnAttrs {
            primitive: attrs.primitive,
            param_scopes,
            result_scope,
        }
    }

    fn lower_scope(&mut self, scope: &ScopeAst) -> Scope {
        if !self.config.known_device(&scope.device.name) {
            self.error(
                codes::E0102,
                scope.device.span,
                format!("no target configured for device '{}'", scope.device.name),
            );
        }
        Scope {
            device: Some(scope.device.name.clone()),
            target: None,
            memory: scope.memory.as_ref().map(|m| m.name.clone()),
        }
    }

    fn lower_type(&mut self, ty: &ast::TypeAst) -> TypeId {
        match &ty.kind {
            ast::TypeAstKind::Tensor => Arena::TENSOR,
            ast::TypeAstKind::Shape => Arena::SHAPE,
            ast::TypeAstKind::Storage => Arena::STORAGE,
            ast::TypeAstKind::Named(name) => match self.adt_index.get(name) {
                Some(&adt) => self.arena.push_type(Type::Adt(adt)),
                None => {
                    self.error(codes::E0100, ty.span, format!("unknown type '{}'", name));
                    Arena::UNKNOWN
                }
            },
            ast::TypeAstKind::Tuple(fields) => {
                let fields = fields.iter().map(|t| self.lower_type(t)).collect();
                self.arena.push_type(Type::Tuple(fields))
            }
            ast::TypeAstKind::Fn { params, ret } => {
                let params = params.iter().map(|t| self.lower_type(t)).collect();
                let ret = self.lower_type(ret);
                self.arena.push_type(Type::Fn { params, ret })
            }
            ast::TypeAstKind::Ref(inner) => {
                let inner = self.lower_type(inner);
                self.arena.push_type(Type::Ref(inner))
            }
        }
    }

    fn lower_expr(&mut self, expr: &ExprAst) -> ExprId {
        match &expr.kind {
            ExprAstKind::Var(name) => self.lookup_var(name, expr.span),
            ExprAstKind::Global(name) => match self.globals.get(name) {
                Some(&node) => node,
                None => {
                    self.error(
                        codes::E0100,
                        expr.span,
                        format!("unknown global '@{}'", name),
                    );
                    self.arena.push_expr(
                        ExprKind::Global { name: name.clone() },
                        Arena::UNKNOWN,
                        expr.span,
                    )
                }
            },
            ExprAstKind::Constant(value) => self.arena.push_expr(
                ExprKind::Constant { value: *value },
                Arena::TENSOR,
                expr.span,
            ),
            ExprAstKind::Name(name) => {
                // A bare operator/constructor is only meaningful as a callee.
                let code = if ops::lookup(name).is_some() || self.ctor_index.contains_key(name) {
                    codes::E0103
                } else {
                    codes::E0100
                };
                self.error(
                    code,
                    expr.span,
                    format!("'{}' cannot be used outside call position", name),
                );
                self.arena
                    .push_expr(ExprKind::Constant { value: 0.0 }, Arena::UNKNOWN, expr.span)
            }
            ExprAstKind::Tuple(fields) => {
                let fields = fields.iter().map(|f| self.lower_expr(f)).collect();
                self.arena
                    .push_expr(ExprKind::Tuple { fields }, Arena::UNKNOWN, expr.span)
            }
            ExprAstKind::Proj { tuple, index } => {
                let tuple = self.lower_expr(tuple);
                self.arena.push_expr(
                    ExprKind::Proj {
                        tuple,
                        index: *index,
                    },
                    Arena::UNKNOWN,
                    expr.span,
                )
            }
            ExprAstKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.lower_expr(cond);
                let then_branch = self.lower_expr(then_branch);
                let else_branch = self.lower_expr(else_branch);
                self.arena.push_expr(
                    ExprKind::If {
                        cond,
                        then_branch,
                        else_branch,
                    },
                    Arena::UNKNOWN,
                    expr.span,
                )
            }
            ExprAstKind::Let { .. } => self.lower_let_chain(expr),
            ExprAstKind::Fn {
                params,
                ret,
                attrs,
                body,
            } => {
                let depth = self.locals.len();
                let mut param_nodes = Vec::new();
                for param in params {
                    let ty = self.lower_type(&param.ty);
                    let node = self.arena.push_expr(
                        ExprKind::Var {
                            name: param.name.name.clone(),
                        },
                        ty,
                        param.name.span,
                    );
                    self.locals.push((param.name.name.clone(), node));
                    param_nodes.push(node);
                }
                let ret_ty = match ret {
                    Some(ty) => self.lower_type(ty),
                    None => Arena::UNKNOWN,
                };
                let attrs = self.lower_attrs(attrs.as_ref(), params.len(), expr.span);
                let body = self.lower_expr(body);
                self.locals.truncate(depth);
                self.arena.push_expr(
                    ExprKind::Function {
                        params: param_nodes,
                        ret_ty,
                        body,
                        attrs,
                    },
                    Arena::UNKNOWN,
                    expr.span,
                )
            }
            ExprAstKind::Call { callee, args } => {
                let op = self.lower_callee(callee);
                let args = args.iter().map(|a| self.lower_expr(a)).collect();
                self.arena.push_expr(
                    ExprKind::Call {
                        op,
                        args,
                        attrs: CallAttrs::None,
                    },
                    Arena::UNKNOWN,
                    expr.span,
                )
            }
            ExprAstKind::OnDevice { body, scope, fixed } => {
                let body = self.lower_expr(body);
                let scope = self.lower_scope(scope);
                self.arena.on_device(body, scope, *fixed)
            }
            ExprAstKind::DeviceCopy { body, src, dst } => {
                let body = self.lower_expr(body);
                let src = self.lower_scope(src);
                let dst = self.lower_scope(dst);
                self.arena.device_copy(body, src, dst)
            }
            ExprAstKind::Ref(value) => {
                let value = self.lower_expr(value);
                self.arena
                    .push_expr(ExprKind::RefCreate { value }, Arena::UNKNOWN, expr.span)
            }
            ExprAstKind::RefRead(source) => {
                let source = self.lower_expr(source);
                self.arena
                    .push_expr(ExprKind::RefRead { source }, Arena::UNKNOWN, expr.span)
            }
            ExprAstKind::RefWrite { target, value } => {
                let target = self.lower_expr(target);
                let value = self.lower_expr(value);
                self.arena.push_expr(
                    ExprKind::RefWrite { target, value },
                    Arena::UNKNOWN,
                    expr.span,
                )
            }
            ExprAstKind::Match { scrutinee, clauses } => {
                let scrutinee = self.lower_expr(scrutinee);
                let clauses = clauses
                    .iter()
                    .map(|clause| {
                        let depth = self.locals.len();
                        let pattern = self.lower_pattern(&clause.pattern);
                        let rhs = self.lower_expr(&clause.rhs);
                        self.locals.truncate(depth);
                        Clause { pattern, rhs }
                    })
                    .collect();
                self.arena.push_expr(
                    ExprKind::Match { scrutinee, clauses },
                    Arena::UNKNOWN,
                    expr.span,
                )
            }
        }
    }

    /// Lower a let chain iteratively so deep chains cannot exhaust the stack.
    fn lower_let_chain(&mut self, expr: &ExprAst) -> ExprId {
        let depth = self.locals.len();
        let mut bindings = Vec::new();
        let mut cur = expr;
        while let ExprAstKind::Let {
            var,
            ty,
            value,
            body,
        } = &cur.kind
        {
            let value_id = self.lower_expr(value);
            let var_ty = match ty {
                Some(ty) => self.lower_type(ty),
                None => Arena::UNKNOWN,
            };
            let var_id = self.arena.push_expr(
                ExprKind::Var {
                    name: var.name.clone(),
                },
                var_ty,
                var.span,
            );
            self.locals.push((var.name.clone(), var_id));
            bindings.push((var_id, value_id, cur.span));
            cur = body;
        }
        let mut result = self.lower_expr(cur);
        self.locals.truncate(depth);
        for (var, value, span) in bindings.into_iter().rev() {
            result = self.arena.push_expr(
                ExprKind::Let {
                    var,
                    value,
                    body: result,
                },
                Arena::UNKNOWN,
                span,
            );
        }
        result
    }

    fn lower_callee(&mut self, callee: &ExprAst) -> ExprId {
        if let ExprAstKind::Name(name) = &callee.kind {
            if let Some(op) = ops::lookup(name) {
                return self
                    .arena
                    .push_expr(ExprKind::OpRef(op), Arena::UNKNOWN, callee.span);
            }
            if let Some(&ctor) = self.ctor_index.get(name) {
                return self
                    .arena
                    .push_expr(ExprKind::CtorRef(ctor), Arena::UNKNOWN, callee.span);
            }
            self.error(
                codes::E0100,
                callee.span,
                format!("unknown operator or constructor '{}'", name),
            );
            return self
                .arena
                .push_expr(ExprKind::Constant { value: 0.0 }, Arena::UNKNOWN, callee.span);
        }
        self.lower_expr(callee)
    }

    fn lower_pattern(&mut self, pattern: &PatternAst) -> Pattern {
        match &pattern.kind {
            PatternAstKind::Wildcard => Pattern::Wildcard,
            PatternAstKind::Var(name) => {
                let node = self.arena.push_expr(
                    ExprKind::Var { name: name.clone() },
                    Arena::UNKNOWN,
                    pattern.span,
                );
                self.locals.push((name.clone(), node));
                Pattern::Var(node)
            }
            PatternAstKind::Ctor { name, fields } => {
                let ctor = match self.ctor_index.get(name) {
                    Some(&ctor) => ctor,
                    None => {
                        self.error(
                            codes::E0100,
                            pattern.span,
                            format!("unknown constructor '{}'", name),
                        );
                        CtorId(0)
                    }
                };
                let fields = fields.iter().map(|f| self.lower_pattern(f)).collect();
                Pattern::Ctor { ctor, fields }
            }
            PatternAstKind::Tuple(fields) => {
                let fields = fields.iter().map(|f| self.lower_pattern(f)).collect();
                Pattern::Tuple(fields)
            }
        }
    }

    fn lookup_var(&mut self, name: &str, span: ast::Span) -> ExprId {
        for (local_name, node) in self.locals.iter().rev() {
            if local_name == name {
                return *node;
            }
        }
        self.error(codes::E0100, span, format!("unknown variable '%{}'", name));
        self.arena.push_expr(
            ExprKind::Var {
                name: name.to_string(),
            },
            Arena::UNKNOWN,
            span,
        )
    }

    fn error(&mut self, code: crate::diag::DiagCode, span: ast::Span, message: String) {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Error, span, message).with_code(code));
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
