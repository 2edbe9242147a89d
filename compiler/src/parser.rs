// Parser for dpc .tir source files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators. Attribute keys (`scope`, `src`, `dst`, `fixed`, `primitive`,
// `param_scopes`, `result_scope`) are ordinary identifiers matched by text,
// so they stay usable as operator names.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a `.tir` source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        program,
        errors: all_errors,
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators. This avoids
// complex lifetime annotations on per-rule helper functions.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Names ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    // `%name` with the sigil stripped.
    let var_name = just(Token::Var).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start() + 1..span.end()].to_string(),
            span,
        }
    });

    // `@name` with the sigil stripped.
    let global_name = just(Token::Global).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start() + 1..span.end()].to_string(),
            span,
        }
    });

    // An identifier that must spell a specific keyword-like attribute name.
    let key = move |name: &'static str| {
        just(Token::Ident).try_map(move |_, span: SimpleSpan| {
            if &source[span.start()..span.end()] == name {
                Ok(())
            } else {
                Err(Rich::custom(span, format!("expected '{}'", name)))
            }
        })
    };

    // ── Scope literal: device ('@' memory)? ──
    //
    // The `@memory` facet reuses the Global token; the parser strips the
    // sigil. The target facet is never written — it is config-derived.

    let scope_lit = ident
        .clone()
        .then(
            just(Token::Global)
                .map_with(move |_, e| {
                    let span: SimpleSpan = e.span();
                    Ident {
                        name: source[span.start() + 1..span.end()].to_string(),
                        span,
                    }
                })
                .or_not(),
        )
        .map_with(|(device, memory), e| ScopeAst {
            device,
            memory,
            span: e.span(),
        });

    // ── Types ──

    let type_ = recursive(|type_| {
        let named = ident.clone().map(|id| match id.name.as_str() {
            "Tensor" => TypeAstKind::Tensor,
            "Shape" => TypeAstKind::Shape,
            "Storage" => TypeAstKind::Storage,
            _ => TypeAstKind::Named(id.name),
        });

        let fn_ty = just(Token::Fn)
            .ignore_then(
                type_
                    .clone()
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then_ignore(just(Token::Arrow))
            .then(type_.clone())
            .map(|(params, ret)| TypeAstKind::Fn {
                params,
                ret: Box::new(ret),
            });

        let ref_ty = just(Token::Ref)
            .ignore_then(
                type_
                    .clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map(|t| TypeAstKind::Ref(Box::new(t)));

        let tuple_ty = type_
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(TypeAstKind::Tuple);

        choice((fn_ty, ref_ty, tuple_ty, named)).map_with(|kind, e| TypeAst {
            kind,
            span: e.span(),
        })
    });

    // ── Parameters ──

    let param = var_name
        .clone()
        .then_ignore(just(Token::Colon))
        .then(type_.clone())
        .map(|(name, ty)| ParamAst { name, ty });

    let params = param
        .separated_by(just(Token::Comma))
        .allow_trailing()
        .collect::<Vec<_>>();

    // ── Attributes clause ──

    enum AttrItem {
        Primitive,
        ParamScopes(Vec<ScopeAst>),
        ResultScope(ScopeAst),
    }

    let attr_item = choice((
        key("primitive").map(|_| AttrItem::Primitive),
        key("param_scopes")
            .ignore_then(just(Token::Equals))
            .ignore_then(
                scope_lit
                    .clone()
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBracket), just(Token::RBracket)),
            )
            .map(AttrItem::ParamScopes),
        key("result_scope")
            .ignore_then(just(Token::Equals))
            .ignore_then(scope_lit.clone())
            .map(AttrItem::ResultScope),
    ));

    let attrs_clause = just(Token::Attrs)
        .ignore_then(
            attr_item
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map(|items| {
            let mut attrs = AttrsAst::default();
            for item in items {
                match item {
                    AttrItem::Primitive => attrs.primitive = true,
                    AttrItem::ParamScopes(scopes) => attrs.param_scopes = Some(scopes),
                    AttrItem::ResultScope(scope) => attrs.result_scope = Some(scope),
                }
            }
            attrs
        });

    // ── Patterns ──

    let pattern = recursive(|pattern| {
        let wildcard = just(Token::Underscore).map(|_| PatternAstKind::Wildcard);

        let var = var_name.clone().map(|id| PatternAstKind::Var(id.name));

        let ctor = ident
            .clone()
            .then(
                pattern
                    .clone()
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen))
                    .or_not(),
            )
            .map(|(name, fields)| PatternAstKind::Ctor {
                name: name.name,
                fields: fields.unwrap_or_default(),
            });

        let tuple = pattern
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(PatternAstKind::Tuple);

        choice((wildcard, var, ctor, tuple)).map_with(|kind, e| PatternAst {
            kind,
            span: e.span(),
        })
    });

    // ── Expressions ──

    let expr = recursive(|expr| {
        let boolean = choice((
            just(Token::True).map(|_| true),
            just(Token::False).map(|_| false),
        ));

        // on_device(e, scope=S [, fixed=true|false])
        let on_device = just(Token::OnDevice)
            .ignore_then(
                expr.clone()
                    .then_ignore(just(Token::Comma))
                    .then_ignore(key("scope"))
                    .then_ignore(just(Token::Equals))
                    .then(scope_lit.clone())
                    .then(
                        just(Token::Comma)
                            .ignore_then(key("fixed"))
                            .ignore_then(just(Token::Equals))
                            .ignore_then(boolean)
                            .or_not(),
                    )
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|((body, scope), fixed), e| ExprAst {
                kind: ExprAstKind::OnDevice {
                    body: Box::new(body),
                    scope,
                    fixed: fixed.unwrap_or(false),
                },
                span: e.span(),
            });

        // device_copy(e, src=S1, dst=S2)
        let device_copy = just(Token::DeviceCopy)
            .ignore_then(
                expr.clone()
                    .then_ignore(just(Token::Comma))
                    .then_ignore(key("src"))
                    .then_ignore(just(Token::Equals))
                    .then(scope_lit.clone())
                    .then_ignore(just(Token::Comma))
                    .then_ignore(key("dst"))
                    .then_ignore(just(Token::Equals))
                    .then(scope_lit.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|((body, src), dst), e| ExprAst {
                kind: ExprAstKind::DeviceCopy {
                    body: Box::new(body),
                    src,
                    dst,
                },
                span: e.span(),
            });

        let ref_create = just(Token::Ref)
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|value, e| ExprAst {
                kind: ExprAstKind::Ref(Box::new(value)),
                span: e.span(),
            });

        let ref_read = just(Token::RefRead)
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|source_expr, e| ExprAst {
                kind: ExprAstKind::RefRead(Box::new(source_expr)),
                span: e.span(),
            });

        let ref_write = just(Token::RefWrite)
            .ignore_then(
                expr.clone()
                    .then_ignore(just(Token::Comma))
                    .then(expr.clone())
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .map_with(|(target, value), e| ExprAst {
                kind: ExprAstKind::RefWrite {
                    target: Box::new(target),
                    value: Box::new(value),
                },
                span: e.span(),
            });

        // let %x [: T] = e; body
        let let_expr = just(Token::Let)
            .ignore_then(var_name.clone())
            .then(just(Token::Colon).ignore_then(type_.clone()).or_not())
            .then_ignore(just(Token::Equals))
            .then(expr.clone())
            .then_ignore(just(Token::Semi))
            .then(expr.clone())
            .map_with(|(((var, ty), value), body), e| ExprAst {
                kind: ExprAstKind::Let {
                    var,
                    ty,
                    value: Box::new(value),
                    body: Box::new(body),
                },
                span: e.span(),
            });

        let if_expr = just(Token::If)
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(
                expr.clone()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .then_ignore(just(Token::Else))
            .then(
                expr.clone()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map_with(|((cond, then_branch), else_branch), e| ExprAst {
                kind: ExprAstKind::If {
                    cond: Box::new(cond),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                },
                span: e.span(),
            });

        let clause = pattern
            .clone()
            .then_ignore(just(Token::FatArrow))
            .then(expr.clone())
            .map_with(|(pat, rhs), e| ClauseAst {
                pattern: pat,
                rhs,
                span: e.span(),
            });

        let match_expr = just(Token::Match)
            .ignore_then(
                expr.clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(
                clause
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .at_least(1)
                    .collect::<Vec<_>>()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map_with(|(scrutinee, clauses), e| ExprAst {
                kind: ExprAstKind::Match {
                    scrutinee: Box::new(scrutinee),
                    clauses,
                },
                span: e.span(),
            });

        // fn (params) [-> T] [attrs(...)] { body }
        let fn_expr = just(Token::Fn)
            .ignore_then(
                params
                    .clone()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(just(Token::Arrow).ignore_then(type_.clone()).or_not())
            .then(attrs_clause.clone().or_not())
            .then(
                expr.clone()
                    .delimited_by(just(Token::LBrace), just(Token::RBrace)),
            )
            .map_with(|(((fn_params, ret), attrs), body), e| ExprAst {
                kind: ExprAstKind::Fn {
                    params: fn_params,
                    ret,
                    attrs,
                    body: Box::new(body),
                },
                span: e.span(),
            });

        // ── Primary ──

        let var_expr = var_name
            .clone()
            .map_with(|id, e| ExprAst {
                kind: ExprAstKind::Var(id.name),
                span: e.span(),
            });

        let global_expr = global_name.clone().map_with(|id, e| ExprAst {
            kind: ExprAstKind::Global(id.name),
            span: e.span(),
        });

        let const_expr = select! { Token::Number(n) => n }.map_with(|n, e| ExprAst {
            kind: ExprAstKind::Constant(n),
            span: e.span(),
        });

        let name_expr = ident.clone().map_with(|id, e| ExprAst {
            kind: ExprAstKind::Name(id.name),
            span: e.span(),
        });

        // `()` unit tuple, `(e)` grouping, `(e,)` / `(e1, e2, ...)` tuple.
        let paren = just(Token::LParen)
            .ignore_then(
                expr.clone()
                    .then(
                        just(Token::Comma)
                            .ignore_then(expr.clone())
                            .repeated()
                            .collect::<Vec<_>>(),
                    )
                    .then(just(Token::Comma).or_not())
                    .or_not(),
            )
            .then_ignore(just(Token::RParen))
            .map_with(|contents, e| match contents {
                None => ExprAst {
                    kind: ExprAstKind::Tuple(Vec::new()),
                    span: e.span(),
                },
                Some(((first, rest), trailing)) => {
                    if rest.is_empty() && trailing.is_none() {
                        first
                    } else {
                        let mut fields = vec![first];
                        fields.extend(rest);
                        ExprAst {
                            kind: ExprAstKind::Tuple(fields),
                            span: e.span(),
                        }
                    }
                }
            });

        let primary = choice((var_expr, global_expr, const_expr, name_expr, paren));

        // ── Postfix: calls and projections ──

        enum Postfix {
            Call(Vec<ExprAst>),
            Proj(usize),
        }

        let call_args = expr
            .clone()
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LParen), just(Token::RParen))
            .map(Postfix::Call);

        let proj = just(Token::Dot)
            .ignore_then(select! {
                Token::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as usize,
            })
            .map(Postfix::Proj);

        let postfix = primary
            .then(choice((call_args, proj)).repeated().collect::<Vec<_>>())
            .map_with(|(base, posts), e| {
                let span: SimpleSpan = e.span();
                posts.into_iter().fold(base, |acc, post| ExprAst {
                    kind: match post {
                        Postfix::Call(args) => ExprAstKind::Call {
                            callee: Box::new(acc),
                            args,
                        },
                        Postfix::Proj(index) => ExprAstKind::Proj {
                            tuple: Box::new(acc),
                            index,
                        },
                    },
                    span,
                })
            });

        choice((
            let_expr.boxed(),
            if_expr.boxed(),
            match_expr.boxed(),
            fn_expr.boxed(),
            on_device.boxed(),
            device_copy.boxed(),
            ref_read.boxed(),
            ref_write.boxed(),
            ref_create.boxed(),
            postfix.boxed(),
        ))
    });

    // ── Items ──

    let ctor_decl = ident
        .clone()
        .then(
            type_
                .clone()
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen))
                .or_not(),
        )
        .map_with(|(name, fields), e| CtorDecl {
            name,
            fields: fields.unwrap_or_default(),
            span: e.span(),
        });

    let type_def = just(Token::Type)
        .ignore_then(ident.clone())
        .then(
            ctor_decl
                .separated_by(just(Token::Comma))
                .allow_trailing()
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|(name, ctors), e| {
            Item::TypeDef(TypeDefItem {
                name,
                ctors,
                span: e.span(),
            })
        });

    let def = just(Token::Def)
        .ignore_then(global_name)
        .then(
            params
                .clone()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then_ignore(just(Token::Arrow))
        .then(type_.clone())
        .then(attrs_clause.clone().or_not())
        .then(
            expr.clone()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|((((name, def_params), ret), attrs), body), e| {
            Item::Def(DefItem {
                name,
                params: def_params,
                ret,
                attrs,
                body,
                span: e.span(),
            })
        });

    choice((type_def, def))
        .repeated()
        .collect::<Vec<_>>()
        .then_ignore(end())
        .map_with(|items, e| Program {
            items,
            span: e.span(),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        let result = parse(source);
        assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
        result.program.expect("no program")
    }

    #[test]
    fn minimal_def() {
        let program = parse_ok("def @main(%x: Tensor) -> Tensor { %x }");
        assert_eq!(program.items.len(), 1);
        let Item::Def(def) = &program.items[0] else {
            panic!("expected def");
        };
        assert_eq!(def.name.name, "main");
        assert_eq!(def.params.len(), 1);
        assert!(matches!(def.body.kind, ExprAstKind::Var(ref name) if name == "x"));
    }

    #[test]
    fn annotated_call() {
        let program =
            parse_ok("def @f(%x: Tensor, %y: Tensor) -> Tensor { add(%x, on_device(%y, scope=gpu)) }");
        let Item::Def(def) = &program.items[0] else {
            panic!("expected def");
        };
        let ExprAstKind::Call { callee, args } = &def.body.kind else {
            panic!("expected call");
        };
        assert!(matches!(callee.kind, ExprAstKind::Name(ref name) if name == "add"));
        let ExprAstKind::OnDevice { scope, fixed, .. } = &args[1].kind else {
            panic!("expected on_device");
        };
        assert_eq!(scope.device.name, "gpu");
        assert!(!*fixed);
    }

    #[test]
    fn fixed_annotation_and_memory_facet() {
        let program = parse_ok(
            "def @f(%x: Tensor) -> Tensor { on_device(%x, scope=gpu@texture, fixed=true) }",
        );
        let Item::Def(def) = &program.items[0] else {
            panic!("expected def");
        };
        let ExprAstKind::OnDevice { scope, fixed, .. } = &def.body.kind else {
            panic!("expected on_device");
        };
        assert_eq!(scope.memory.as_ref().unwrap().name, "texture");
        assert!(*fixed);
    }

    #[test]
    fn let_chain_and_projection() {
        let program = parse_ok(
            "def @f(%x: Tensor) -> Tensor { let %t = (%x, %x); let %a = %t.0; %a }",
        );
        let Item::Def(def) = &program.items[0] else {
            panic!("expected def");
        };
        let ExprAstKind::Let { body, .. } = &def.body.kind else {
            panic!("expected let");
        };
        let ExprAstKind::Let { value, .. } = &body.kind else {
            panic!("expected inner let");
        };
        assert!(matches!(value.kind, ExprAstKind::Proj { index: 0, .. }));
    }

    #[test]
    fn device_copy_attrs() {
        let program =
            parse_ok("def @f(%x: Tensor) -> Tensor { device_copy(%x, src=cpu, dst=gpu) }");
        let Item::Def(def) = &program.items[0] else {
            panic!("expected def");
        };
        let ExprAstKind::DeviceCopy { src, dst, .. } = &def.body.kind else {
            panic!("expected device_copy");
        };
        assert_eq!(src.device.name, "cpu");
        assert_eq!(dst.device.name, "gpu");
    }

    #[test]
    fn function_attrs_round_trip() {
        let program = parse_ok(
            "def @f(%x: Tensor) -> Tensor attrs(param_scopes=[gpu@global], result_scope=cpu) { %x }",
        );
        let Item::Def(def) = &program.items[0] else {
            panic!("expected def");
        };
        let attrs = def.attrs.as_ref().unwrap();
        assert_eq!(attrs.param_scopes.as_ref().unwrap().len(), 1);
        assert_eq!(attrs.result_scope.as_ref().unwrap().device.name, "cpu");
    }

    #[test]
    fn adt_and_match() {
        let program = parse_ok(
            "type List { Cons(Tensor, List), Nil }\n\
             def @f(%l: List) -> Tensor { match (%l) { Cons(%h, %t) => %h, _ => 0 } }",
        );
        assert_eq!(program.items.len(), 2);
        let Item::Def(def) = &program.items[1] else {
            panic!("expected def");
        };
        let ExprAstKind::Match { clauses, .. } = &def.body.kind else {
            panic!("expected match");
        };
        assert_eq!(clauses.len(), 2);
        assert!(matches!(clauses[1].pattern.kind, PatternAstKind::Wildcard));
    }

    #[test]
    fn higher_order_def() {
        let program = parse_ok(
            "def @apply(%f: fn(Tensor) -> Tensor, %x: Tensor) -> Tensor { %f(%x) }",
        );
        let Item::Def(def) = &program.items[0] else {
            panic!("expected def");
        };
        assert!(matches!(def.params[0].ty.kind, TypeAstKind::Fn { .. }));
        assert!(matches!(def.body.kind, ExprAstKind::Call { .. }));
    }

    #[test]
    fn syntax_error_is_collected() {
        let result = parse("def @f(%x: Tensor) -> Tensor { add(%x, ) extra }");
        assert!(!result.errors.is_empty());
    }
}
