// ir.rs — Arena-allocated tensor-program IR
//
// The IR the planner operates on: an expression tree held in a per-module
// arena, addressed by stable `ExprId` handles. Variables and globals are
// interned — every occurrence of a binding shares one node — so reference
// identity is exactly ExprId equality, which is what the planner's domain
// map is keyed on.
//
// Rewriting phases are purely functional: they clone the arena and append
// fresh nodes, never mutating existing ones (other than checked-type
// backfill during type propagation).
//
// Preconditions: nodes are created through `Arena` so ids stay dense.
// Postconditions: `module_eq` compares modules structurally, ignoring spans
//   and arena layout.
// Failure modes: out-of-range ids panic (planner bug, not user input).
// Side effects: none.

use std::collections::HashMap;

use crate::ast::Span;
use crate::id::{AdtId, CtorId, ExprId, OpId, TypeId};
use crate::ops;
use crate::scope::Scope;

// ── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Tensor,
    Shape,
    Storage,
    Tuple(Vec<TypeId>),
    Fn { params: Vec<TypeId>, ret: TypeId },
    Ref(TypeId),
    Adt(AdtId),
    /// Not yet determined by type propagation.
    Unknown,
}

// ── Expressions ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: TypeId,
    pub span: Span,
}

/// Function attributes. The planner writes `param_scopes`/`result_scope`;
/// `primitive` marks an already-fused function treated as a black box.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FnAttrs {
    pub primitive: bool,
    pub param_scopes: Option<Vec<Scope>>,
    pub result_scope: Option<Scope>,
}

/// Attributes of an `on_device` annotation call.
#[derive(Debug, Clone, PartialEq)]
pub struct OnDeviceAttrs {
    pub scope: Scope,
    /// When set, the annotation constrains its result as well as its argument.
    pub is_fixed: bool,
}

/// Attributes of a `device_copy` call.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCopyAttrs {
    pub src: Scope,
    pub dst: Scope,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallAttrs {
    None,
    OnDevice(OnDeviceAttrs),
    DeviceCopy(DeviceCopyAttrs),
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// A variable binding. Occurrences share the binder's node.
    Var { name: String },
    /// A reference to a module-level def. One node per global name.
    Global { name: String },
    Constant { value: f64 },
    /// A primitive operator in callee position.
    OpRef(OpId),
    /// An ADT constructor in callee position.
    CtorRef(CtorId),
    Tuple { fields: Vec<ExprId> },
    Proj { tuple: ExprId, index: usize },
    If { cond: ExprId, then_branch: ExprId, else_branch: ExprId },
    Let { var: ExprId, value: ExprId, body: ExprId },
    Function { params: Vec<ExprId>, ret_ty: TypeId, body: ExprId, attrs: FnAttrs },
    Call { op: ExprId, args: Vec<ExprId>, attrs: CallAttrs },
    Match { scrutinee: ExprId, clauses: Vec<Clause> },
    RefCreate { value: ExprId },
    RefRead { source: ExprId },
    RefWrite { target: ExprId, value: ExprId },
}

#[derive(Debug, Clone)]
pub struct Clause {
    pub pattern: Pattern,
    pub rhs: ExprId,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Wildcard,
    /// Binds a fresh variable node; occurrences in the clause rhs share it.
    Var(ExprId),
    Ctor { ctor: CtorId, fields: Vec<Pattern> },
    Tuple(Vec<Pattern>),
}

// ── ADT definitions ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct AdtDef {
    pub name: String,
    pub ctors: Vec<CtorId>,
}

#[derive(Debug, Clone)]
pub struct CtorDef {
    pub name: String,
    pub adt: AdtId,
    pub fields: Vec<TypeId>,
}

// ── Arena ───────────────────────────────────────────────────────────────────

/// Expression and type storage for one module.
///
/// The first few type slots are pre-interned so the common scalar types can
/// be referenced without a push.
#[derive(Debug, Clone)]
pub struct Arena {
    exprs: Vec<Expr>,
    types: Vec<Type>,
}

impl Arena {
    pub const TENSOR: TypeId = TypeId(0);
    pub const SHAPE: TypeId = TypeId(1);
    pub const STORAGE: TypeId = TypeId(2);
    pub const UNKNOWN: TypeId = TypeId(3);

    pub fn new() -> Self {
        Self {
            exprs: Vec::new(),
            types: vec![Type::Tensor, Type::Shape, Type::Storage, Type::Unknown],
        }
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.0 as usize]
    }

    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.expr(id).kind
    }

    pub fn ty_of(&self, id: ExprId) -> TypeId {
        self.expr(id).ty
    }

    pub fn ty(&self, id: TypeId) -> &Type {
        &self.types[id.0 as usize]
    }

    pub fn span_of(&self, id: ExprId) -> Span {
        self.expr(id).span
    }

    pub fn push_expr(&mut self, kind: ExprKind, ty: TypeId, span: Span) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(Expr { kind, ty, span });
        id
    }

    pub fn push_type(&mut self, ty: Type) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(ty);
        id
    }

    /// Backfill a checked type (type propagation only).
    pub fn set_ty(&mut self, id: ExprId, ty: TypeId) {
        self.exprs[id.0 as usize].ty = ty;
    }

    /// Backfill a function literal's return type (type propagation only).
    pub fn set_fn_ret_ty(&mut self, id: ExprId, ret: TypeId) {
        match &mut self.exprs[id.0 as usize].kind {
            ExprKind::Function { ret_ty, .. } => *ret_ty = ret,
            _ => panic!("internal: set_fn_ret_ty on a non-function node"),
        }
    }

    /// Build an `on_device(body, scope=..., fixed=...)` annotation call.
    pub fn on_device(&mut self, body: ExprId, scope: Scope, is_fixed: bool) -> ExprId {
        let span = self.span_of(body);
        let ty = self.ty_of(body);
        let op = self.push_expr(ExprKind::OpRef(ops::on_device_op()), Self::UNKNOWN, span);
        self.push_expr(
            ExprKind::Call {
                op,
                args: vec![body],
                attrs: CallAttrs::OnDevice(OnDeviceAttrs { scope, is_fixed }),
            },
            ty,
            span,
        )
    }

    /// Build a `device_copy(body, src=..., dst=...)` call.
    pub fn device_copy(&mut self, body: ExprId, src: Scope, dst: Scope) -> ExprId {
        let span = self.span_of(body);
        let ty = self.ty_of(body);
        let op = self.push_expr(ExprKind::OpRef(ops::device_copy_op()), Self::UNKNOWN, span);
        self.push_expr(
            ExprKind::Call {
                op,
                args: vec![body],
                attrs: CallAttrs::DeviceCopy(DeviceCopyAttrs { src, dst }),
            },
            ty,
            span,
        )
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

// ── Module ──────────────────────────────────────────────────────────────────

/// A module: ADT definitions plus global defs, in source order.
#[derive(Debug, Clone)]
pub struct Module {
    pub arena: Arena,
    pub adts: Vec<AdtDef>,
    pub ctors: Vec<CtorDef>,
    /// Global name → def body (always a `Function` node), in source order.
    pub defs: Vec<(String, ExprId)>,
    /// Global name → the shared `Global` reference node.
    pub globals: HashMap<String, ExprId>,
}

impl Module {
    pub fn ctor(&self, id: CtorId) -> &CtorDef {
        &self.ctors[id.0 as usize]
    }

    pub fn adt(&self, id: AdtId) -> &AdtDef {
        &self.adts[id.0 as usize]
    }

    pub fn def(&self, name: &str) -> Option<ExprId> {
        self.defs
            .iter()
            .find(|(def_name, _)| def_name == name)
            .map(|(_, id)| *id)
    }
}

// ── Annotation introspection ────────────────────────────────────────────────

/// If `expr` is an `on_device` call, return its body and attributes.
pub fn on_device_props(arena: &Arena, expr: ExprId) -> Option<(ExprId, OnDeviceAttrs)> {
    if let ExprKind::Call { args, attrs: CallAttrs::OnDevice(props), .. } = arena.kind(expr) {
        Some((args[0], props.clone()))
    } else {
        None
    }
}

/// If `expr` is a `device_copy` call, return its body and attributes.
pub fn device_copy_props(arena: &Arena, expr: ExprId) -> Option<(ExprId, DeviceCopyAttrs)> {
    if let ExprKind::Call { args, attrs: CallAttrs::DeviceCopy(props), .. } = arena.kind(expr) {
        Some((args[0], props.clone()))
    } else {
        None
    }
}

// ── Structural equality ─────────────────────────────────────────────────────

/// Structural module equality: same ADTs, same defs in the same order, and
/// structurally equal bodies. Ignores spans, checked types, and arena layout,
/// so it is stable across rewrites and print/parse round trips.
pub fn module_eq(a: &Module, b: &Module) -> bool {
    if a.defs.len() != b.defs.len() || a.adts.len() != b.adts.len() {
        return false;
    }
    for (adt_a, adt_b) in a.adts.iter().zip(&b.adts) {
        if adt_a.name != adt_b.name || adt_a.ctors.len() != adt_b.ctors.len() {
            return false;
        }
    }
    let mut vars = HashMap::new();
    a.defs.iter().zip(&b.defs).all(|((name_a, def_a), (name_b, def_b))| {
        name_a == name_b && expr_eq_inner(a, *def_a, b, *def_b, &mut vars)
    })
}

/// Structural expression equality (see `module_eq`).
pub fn expr_eq(a: &Module, ea: ExprId, b: &Module, eb: ExprId) -> bool {
    expr_eq_inner(a, ea, b, eb, &mut HashMap::new())
}

fn expr_eq_inner(
    a: &Module,
    mut ea: ExprId,
    b: &Module,
    mut eb: ExprId,
    vars: &mut HashMap<ExprId, ExprId>,
) -> bool {
    use ExprKind::*;
    // Unwind let chains iteratively so deep chains cannot exhaust the stack.
    loop {
        match (a.arena.kind(ea), b.arena.kind(eb)) {
            (
                Let { var: va, value: la, body: ba },
                Let { var: vb, value: lb, body: bb },
            ) => {
                vars.insert(*va, *vb);
                if !var_eq(a, *va, b, *vb, vars) || !expr_eq_inner(a, *la, b, *lb, vars) {
                    return false;
                }
                ea = *ba;
                eb = *bb;
            }
            _ => break,
        }
    }
    match (a.arena.kind(ea), b.arena.kind(eb)) {
        (Var { .. }, Var { .. }) => var_eq(a, ea, b, eb, vars),
        (Global { name: na }, Global { name: nb }) => na == nb,
        (Constant { value: va }, Constant { value: vb }) => va == vb,
        (OpRef(oa), OpRef(ob)) => oa == ob,
        (CtorRef(ca), CtorRef(cb)) => a.ctor(*ca).name == b.ctor(*cb).name,
        (Tuple { fields: fa }, Tuple { fields: fb }) => {
            fa.len() == fb.len()
                && fa
                    .iter()
                    .zip(fb.iter())
                    .all(|(x, y)| expr_eq_inner(a, *x, b, *y, vars))
        }
        (Proj { tuple: ta, index: ia }, Proj { tuple: tb, index: ib }) => {
            ia == ib && expr_eq_inner(a, *ta, b, *tb, vars)
        }
        (
            If { cond: ca, then_branch: ta, else_branch: ea2 },
            If { cond: cb, then_branch: tb, else_branch: eb2 },
        ) => {
            let (ca, ta, ea2, cb, tb, eb2) = (*ca, *ta, *ea2, *cb, *tb, *eb2);
            expr_eq_inner(a, ca, b, cb, vars)
                && expr_eq_inner(a, ta, b, tb, vars)
                && expr_eq_inner(a, ea2, b, eb2, vars)
        }
        (
            Function { params: pa, body: ba, attrs: aa, .. },
            Function { params: pb, body: bb, attrs: ab, .. },
        ) => {
            if pa.len() != pb.len() || aa != ab {
                return false;
            }
            let (pa, pb, ba, bb) = (pa.clone(), pb.clone(), *ba, *bb);
            for (x, y) in pa.iter().zip(pb.iter()) {
                vars.insert(*x, *y);
                if !var_eq(a, *x, b, *y, vars) {
                    return false;
                }
            }
            expr_eq_inner(a, ba, b, bb, vars)
        }
        (
            Call { op: oa, args: aa, attrs: ta },
            Call { op: ob, args: ab, attrs: tb },
        ) => {
            if ta != tb || aa.len() != ab.len() {
                return false;
            }
            let (oa, ob, aa, ab) = (*oa, *ob, aa.clone(), ab.clone());
            expr_eq_inner(a, oa, b, ob, vars)
                && aa
                    .iter()
                    .zip(ab.iter())
                    .all(|(x, y)| expr_eq_inner(a, *x, b, *y, vars))
        }
        (
            Match { scrutinee: sa, clauses: ca },
            Match { scrutinee: sb, clauses: cb },
        ) => {
            if ca.len() != cb.len() {
                return false;
            }
            let (sa, sb, ca, cb) = (*sa, *sb, ca.clone(), cb.clone());
            if !expr_eq_inner(a, sa, b, sb, vars) {
                return false;
            }
            ca.iter().zip(cb.iter()).all(|(x, y)| {
                pattern_eq(a, &x.pattern, b, &y.pattern, vars)
                    && expr_eq_inner(a, x.rhs, b, y.rhs, vars)
            })
        }
        (RefCreate { value: va }, RefCreate { value: vb }) => {
            expr_eq_inner(a, *va, b, *vb, vars)
        }
        (RefRead { source: sa }, RefRead { source: sb }) => {
            expr_eq_inner(a, *sa, b, *sb, vars)
        }
        (
            RefWrite { target: ta, value: va },
            RefWrite { target: tb, value: vb },
        ) => {
            let (ta, va, tb, vb) = (*ta, *va, *tb, *vb);
            expr_eq_inner(a, ta, b, tb, vars) && expr_eq_inner(a, va, b, vb, vars)
        }
        _ => false,
    }
}

fn var_eq(a: &Module, va: ExprId, b: &Module, vb: ExprId, vars: &HashMap<ExprId, ExprId>) -> bool {
    match vars.get(&va) {
        Some(mapped) => *mapped == vb,
        // Free variables (e.g. comparing sub-expressions in isolation)
        // compare by name.
        None => match (a.arena.kind(va), b.arena.kind(vb)) {
            (ExprKind::Var { name: na }, ExprKind::Var { name: nb }) => na == nb,
            _ => false,
        },
    }
}

fn pattern_eq(
    a: &Module,
    pa: &Pattern,
    b: &Module,
    pb: &Pattern,
    vars: &mut HashMap<ExprId, ExprId>,
) -> bool {
    match (pa, pb) {
        (Pattern::Wildcard, Pattern::Wildcard) => true,
        (Pattern::Var(va), Pattern::Var(vb)) => {
            vars.insert(*va, *vb);
            var_eq(a, *va, b, *vb, vars)
        }
        (
            Pattern::Ctor { ctor: ca, fields: fa },
            Pattern::Ctor { ctor: cb, fields: fb },
        ) => {
            a.ctor(*ca).name == b.ctor(*cb).name
                && fa.len() == fb.len()
                && fa.iter().zip(fb).all(|(x, y)| pattern_eq(a, x, b, y, vars))
        }
        (Pattern::Tuple(fa), Pattern::Tuple(fb)) => {
            fa.len() == fb.len() && fa.iter().zip(fb).all(|(x, y)| pattern_eq(a, x, b, y, vars))
        }
        _ => false,
    }
}

/// Structural type equality across arenas.
pub fn type_eq(a: &Arena, ta: TypeId, b: &Arena, tb: TypeId) -> bool {
    match (a.ty(ta), b.ty(tb)) {
        (Type::Tensor, Type::Tensor)
        | (Type::Shape, Type::Shape)
        | (Type::Storage, Type::Storage)
        | (Type::Unknown, Type::Unknown) => true,
        (Type::Adt(ia), Type::Adt(ib)) => ia == ib,
        (Type::Tuple(fa), Type::Tuple(fb)) => {
            fa.len() == fb.len() && fa.iter().zip(fb).all(|(x, y)| type_eq(a, *x, b, *y))
        }
        (Type::Fn { params: pa, ret: ra }, Type::Fn { params: pb, ret: rb }) => {
            pa.len() == pb.len()
                && pa.iter().zip(pb).all(|(x, y)| type_eq(a, *x, b, *y))
                && type_eq(a, *ra, b, *rb)
        }
        (Type::Ref(ia), Type::Ref(ib)) => type_eq(a, *ia, b, *ib),
        _ => false,
    }
}
