// AST node types for dpc .tir source files.
//
// The parse tree keeps names as written (variables `%x`, globals `@f`,
// operator/constructor identifiers); resolve turns it into the arena IR.
// Every node carries a `SimpleSpan` for error reporting in downstream phases.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

/// An identifier with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Root ──

/// A complete `.tir` module source: type definitions and global defs.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub items: Vec<Item>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    TypeDef(TypeDefItem),
    Def(DefItem),
}

// ── type_def: 'type' IDENT '{' ctor_decl (',' ctor_decl)* '}' ──

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefItem {
    pub name: Ident,
    pub ctors: Vec<CtorDecl>,
    pub span: Span,
}

/// One constructor declaration: `Cons(Tensor, List)` or `Nil`.
#[derive(Debug, Clone, PartialEq)]
pub struct CtorDecl {
    pub name: Ident,
    pub fields: Vec<TypeAst>,
    pub span: Span,
}

// ── def: 'def' GLOBAL '(' params ')' '->' type attrs? '{' expr '}' ──

#[derive(Debug, Clone, PartialEq)]
pub struct DefItem {
    /// Global name without the leading `@`.
    pub name: Ident,
    pub params: Vec<ParamAst>,
    pub ret: TypeAst,
    pub attrs: Option<AttrsAst>,
    pub body: ExprAst,
    pub span: Span,
}

/// `%name: type` function parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamAst {
    pub name: Ident,
    pub ty: TypeAst,
}

/// Function attributes clause: `attrs(primitive, param_scopes=[..], result_scope=..)`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttrsAst {
    pub primitive: bool,
    pub param_scopes: Option<Vec<ScopeAst>>,
    pub result_scope: Option<ScopeAst>,
}

/// A scope literal: `device` optionally followed by `@memory`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeAst {
    pub device: Ident,
    pub memory: Option<Ident>,
    pub span: Span,
}

// ── Types ──

#[derive(Debug, Clone, PartialEq)]
pub struct TypeAst {
    pub kind: TypeAstKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeAstKind {
    Tensor,
    Shape,
    Storage,
    /// A named ADT.
    Named(String),
    Tuple(Vec<TypeAst>),
    Fn { params: Vec<TypeAst>, ret: Box<TypeAst> },
    Ref(Box<TypeAst>),
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct ExprAst {
    pub kind: ExprAstKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprAstKind {
    /// `%name` variable reference.
    Var(String),
    /// `@name` global reference.
    Global(String),
    /// Scalar constant.
    Constant(f64),
    /// Bare identifier: a primitive operator or a constructor, resolved later.
    Name(String),
    Tuple(Vec<ExprAst>),
    Proj {
        tuple: Box<ExprAst>,
        index: usize,
    },
    If {
        cond: Box<ExprAst>,
        then_branch: Box<ExprAst>,
        else_branch: Box<ExprAst>,
    },
    Let {
        var: Ident,
        ty: Option<TypeAst>,
        value: Box<ExprAst>,
        body: Box<ExprAst>,
    },
    Fn {
        params: Vec<ParamAst>,
        ret: Option<TypeAst>,
        attrs: Option<AttrsAst>,
        body: Box<ExprAst>,
    },
    Call {
        callee: Box<ExprAst>,
        args: Vec<ExprAst>,
    },
    OnDevice {
        body: Box<ExprAst>,
        scope: ScopeAst,
        fixed: bool,
    },
    DeviceCopy {
        body: Box<ExprAst>,
        src: ScopeAst,
        dst: ScopeAst,
    },
    Ref(Box<ExprAst>),
    RefRead(Box<ExprAst>),
    RefWrite {
        target: Box<ExprAst>,
        value: Box<ExprAst>,
    },
    Match {
        scrutinee: Box<ExprAst>,
        clauses: Vec<ClauseAst>,
    },
}

/// One match clause: `pattern => expr`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClauseAst {
    pub pattern: PatternAst,
    pub rhs: ExprAst,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternAst {
    pub kind: PatternAstKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternAstKind {
    Wildcard,
    Var(String),
    Ctor { name: String, fields: Vec<PatternAst> },
    Tuple(Vec<PatternAst>),
}
