// print.rs — Deterministic pretty-printer for IR modules
//
// Prints modules and expressions in the same surface syntax the parser
// reads, so planned output can be re-fed to the compiler. Scopes print in
// source form (device, plus memory when spelled): the target facet is
// config-derived and never written.
//
// Preconditions: module from resolve (checked types not required).
// Postconditions: output of a planned module re-parses to a structurally
//   equal module.
// Failure modes: none.
// Side effects: none.

use std::fmt::Write;

use crate::id::{ExprId, TypeId};
use crate::ir::{ExprKind, Module, Pattern, Type};
use crate::scope::Scope;

/// Print a whole module.
pub fn print_module(module: &Module) -> String {
    let mut printer = Printer {
        module,
        out: String::new(),
    };
    printer.module();
    printer.out
}

/// Print one expression, whitespace-normalized to a single line. Used in
/// diagnostics.
pub fn expr_to_string(module: &Module, e: ExprId) -> String {
    let mut printer = Printer {
        module,
        out: String::new(),
    };
    printer.expr(e, 0);
    printer.out.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct Printer<'m> {
    module: &'m Module,
    out: String,
}

impl<'m> Printer<'m> {
    fn module(&mut self) {
        for adt in &self.module.adts {
            let _ = writeln!(self.out, "type {} {{", adt.name);
            for &ctor_id in &adt.ctors {
                let ctor = self.module.ctor(ctor_id);
                if ctor.fields.is_empty() {
                    let _ = writeln!(self.out, "  {},", ctor.name);
                } else {
                    let fields: Vec<String> =
                        ctor.fields.iter().map(|f| self.type_str(*f)).collect();
                    let _ = writeln!(self.out, "  {}({}),", ctor.name, fields.join(", "));
                }
            }
            let _ = writeln!(self.out, "}}");
            self.out.push('\n');
        }
        let defs = self.module.defs.clone();
        for (i, (name, def)) in defs.iter().enumerate() {
            if i > 0 {
                self.out.push('\n');
            }
            self.def(name, *def);
        }
    }

    fn def(&mut self, name: &str, f: ExprId) {
        let ExprKind::Function {
            params,
            ret_ty,
            body,
            attrs,
        } = self.module.arena.kind(f).clone()
        else {
            panic!("internal: module def is not a function");
        };
        let _ = write!(self.out, "def @{}(", name);
        for (i, &param) in params.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            let ExprKind::Var { name } = self.module.arena.kind(param) else {
                panic!("internal: function parameter is not a variable");
            };
            let ty = self.type_str(self.module.arena.ty_of(param));
            let _ = write!(self.out, "%{}: {}", name, ty);
        }
        let _ = write!(self.out, ") -> {}", self.type_str(ret_ty));
        self.attrs(&attrs);
        self.out.push_str(" {\n  ");
        self.expr(body, 1);
        self.out.push_str("\n}\n");
    }

    fn attrs(&mut self, attrs: &crate::ir::FnAttrs) {
        let mut items = Vec::new();
        if attrs.primitive {
            items.push("primitive".to_string());
        }
        if let Some(param_scopes) = &attrs.param_scopes {
            let scopes: Vec<String> = param_scopes.iter().map(scope_str).collect();
            items.push(format!("param_scopes=[{}]", scopes.join(", ")));
        }
        if let Some(result_scope) = &attrs.result_scope {
            items.push(format!("result_scope={}", scope_str(result_scope)));
        }
        if !items.is_empty() {
            let _ = write!(self.out, " attrs({})", items.join(", "));
        }
    }

    fn indent(&mut self, depth: usize) {
        for _ in 0..depth {
            self.out.push_str("  ");
        }
    }

    fn expr(&mut self, e: ExprId, depth: usize) {
        match self.module.arena.kind(e).clone() {
            ExprKind::Var { name } => {
                let _ = write!(self.out, "%{}", name);
            }
            ExprKind::Global { name } => {
                let _ = write!(self.out, "@{}", name);
            }
            ExprKind::Constant { value } => {
                let _ = write!(self.out, "{}", value);
            }
            ExprKind::OpRef(op) => {
                self.out.push_str(crate::ops::def(op).name);
            }
            ExprKind::CtorRef(ctor) => {
                self.out.push_str(&self.module.ctor(ctor).name.clone());
            }
            ExprKind::Tuple { fields } => {
                self.out.push('(');
                for (i, &field) in fields.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.expr(field, depth);
                }
                if fields.len() == 1 {
                    self.out.push(',');
                }
                self.out.push(')');
            }
            ExprKind::Proj { tuple, index } => {
                self.postfix_base(tuple, depth);
                let _ = write!(self.out, ".{}", index);
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.out.push_str("if (");
                self.expr(cond, depth);
                self.out.push_str(") {\n");
                self.indent(depth + 1);
                self.expr(then_branch, depth + 1);
                self.out.push('\n');
                self.indent(depth);
                self.out.push_str("} else {\n");
                self.indent(depth + 1);
                self.expr(else_branch, depth + 1);
                self.out.push('\n');
                self.indent(depth);
                self.out.push('}');
            }
            ExprKind::Let { .. } => {
                // Iterative so deep chains cannot exhaust the stack.
                let mut cur = e;
                while let ExprKind::Let { var, value, body } =
                    self.module.arena.kind(cur).clone()
                {
                    let ExprKind::Var { name } = self.module.arena.kind(var) else {
                        panic!("internal: let binder is not a variable");
                    };
                    let _ = write!(self.out, "let %{} = ", name);
                    self.expr(value, depth);
                    self.out.push_str(";\n");
                    self.indent(depth);
                    cur = body;
                }
                self.expr(cur, depth);
            }
            ExprKind::Function {
                params,
                ret_ty,
                body,
                attrs,
            } => {
                self.out.push_str("fn (");
                for (i, &param) in params.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    let ExprKind::Var { name } = self.module.arena.kind(param) else {
                        panic!("internal: function parameter is not a variable");
                    };
                    let ty = self.type_str(self.module.arena.ty_of(param));
                    let _ = write!(self.out, "%{}: {}", name, ty);
                }
                self.out.push(')');
                if !matches!(self.module.arena.ty(ret_ty), Type::Unknown) {
                    let _ = write!(self.out, " -> {}", self.type_str(ret_ty));
                }
                self.attrs(&attrs);
                self.out.push_str(" {\n");
                self.indent(depth + 1);
                self.expr(body, depth + 1);
                self.out.push('\n');
                self.indent(depth);
                self.out.push('}');
            }
            ExprKind::Call { op, args, attrs } => match attrs {
                crate::ir::CallAttrs::OnDevice(props) => {
                    self.out.push_str("on_device(");
                    self.expr(args[0], depth);
                    let _ = write!(self.out, ", scope={}", scope_str(&props.scope));
                    if props.is_fixed {
                        self.out.push_str(", fixed=true");
                    }
                    self.out.push(')');
                }
                crate::ir::CallAttrs::DeviceCopy(props) => {
                    self.out.push_str("device_copy(");
                    self.expr(args[0], depth);
                    let _ = write!(
                        self.out,
                        ", src={}, dst={})",
                        scope_str(&props.src),
                        scope_str(&props.dst)
                    );
                }
                crate::ir::CallAttrs::None => {
                    self.postfix_base(op, depth);
                    self.out.push('(');
                    for (i, &arg) in args.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.expr(arg, depth);
                    }
                    self.out.push(')');
                }
            },
            ExprKind::Match { scrutinee, clauses } => {
                self.out.push_str("match (");
                self.expr(scrutinee, depth);
                self.out.push_str(") {\n");
                for clause in &clauses {
                    self.indent(depth + 1);
                    self.pattern(&clause.pattern);
                    self.out.push_str(" => ");
                    self.expr(clause.rhs, depth + 1);
                    self.out.push_str(",\n");
                }
                self.indent(depth);
                self.out.push('}');
            }
            ExprKind::RefCreate { value } => {
                self.out.push_str("ref(");
                self.expr(value, depth);
                self.out.push(')');
            }
            ExprKind::RefRead { source } => {
                self.out.push_str("ref_read(");
                self.expr(source, depth);
                self.out.push(')');
            }
            ExprKind::RefWrite { target, value } => {
                self.out.push_str("ref_write(");
                self.expr(target, depth);
                self.out.push_str(", ");
                self.expr(value, depth);
                self.out.push(')');
            }
        }
    }

    /// A call/projection base: atoms print bare, anything keyword-led needs
    /// parentheses to stay in postfix position.
    fn postfix_base(&mut self, base: ExprId, depth: usize) {
        let atom = matches!(
            self.module.arena.kind(base),
            ExprKind::Var { .. }
                | ExprKind::Global { .. }
                | ExprKind::OpRef(_)
                | ExprKind::CtorRef(_)
                | ExprKind::Tuple { .. }
                | ExprKind::Proj { .. }
        ) || matches!(
            self.module.arena.kind(base),
            ExprKind::Call {
                attrs: crate::ir::CallAttrs::None,
                ..
            }
        );
        if atom {
            self.expr(base, depth);
        } else {
            self.out.push('(');
            self.expr(base, depth);
            self.out.push(')');
        }
    }

    fn pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Wildcard => self.out.push('_'),
            Pattern::Var(var) => {
                let ExprKind::Var { name } = self.module.arena.kind(*var) else {
                    panic!("internal: pattern binder is not a variable");
                };
                let _ = write!(self.out, "%{}", name);
            }
            Pattern::Ctor { ctor, fields } => {
                self.out.push_str(&self.module.ctor(*ctor).name.clone());
                if !fields.is_empty() {
                    self.out.push('(');
                    for (i, field) in fields.iter().enumerate() {
                        if i > 0 {
                            self.out.push_str(", ");
                        }
                        self.pattern(field);
                    }
                    self.out.push(')');
                }
            }
            Pattern::Tuple(fields) => {
                self.out.push('(');
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    self.pattern(field);
                }
                self.out.push(')');
            }
        }
    }

    fn type_str(&self, ty: TypeId) -> String {
        match self.module.arena.ty(ty) {
            Type::Tensor => "Tensor".to_string(),
            Type::Shape => "Shape".to_string(),
            Type::Storage => "Storage".to_string(),
            Type::Unknown => "Tensor".to_string(),
            Type::Adt(adt) => self.module.adt(*adt).name.clone(),
            Type::Tuple(fields) => {
                let fields: Vec<String> = fields.iter().map(|f| self.type_str(*f)).collect();
                if fields.len() == 1 {
                    format!("({},)", fields[0])
                } else {
                    format!("({})", fields.join(", "))
                }
            }
            Type::Fn { params, ret } => {
                let params: Vec<String> = params.iter().map(|p| self.type_str(*p)).collect();
                format!("fn({}) -> {}", params.join(", "), self.type_str(*ret))
            }
            Type::Ref(inner) => format!("ref({})", self.type_str(*inner)),
        }
    }
}

/// Scope in source form: `device` or `device@memory`. The target facet is
/// config-derived and never printed.
fn scope_str(scope: &Scope) -> String {
    match (&scope.device, &scope.memory) {
        (Some(device), Some(memory)) => format!("{}@{}", device, memory),
        (Some(device), None) => device.clone(),
        _ => "?".to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
