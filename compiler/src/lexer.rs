// Lexer for dpc .tir source files.
//
// Tokenizes textual tensor IR modules. Uses the `logos` crate for
// DFA-based lexing. Whitespace (including newlines) and `//` comments are
// insignificant.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// dpc token types.
///
/// Keywords and symbols are matched as fixed strings. Numeric literals
/// carry parsed values. Identifiers, variables, and globals carry no
/// value — use the span to retrieve the text from the source.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|//[^\n]*")]
pub enum Token {
    // ── Keywords ──
    #[token("def")]
    Def,
    #[token("type")]
    Type,
    #[token("let")]
    Let,
    #[token("fn")]
    Fn,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("match")]
    Match,
    #[token("ref")]
    Ref,
    #[token("ref_read")]
    RefRead,
    #[token("ref_write")]
    RefWrite,
    #[token("on_device")]
    OnDevice,
    #[token("device_copy")]
    DeviceCopy,
    #[token("attrs")]
    Attrs,
    #[token("true")]
    True,
    #[token("false")]
    False,

    // ── Symbols ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("=>")]
    FatArrow,
    #[token("->")]
    Arrow,
    #[token("=")]
    Equals,
    #[token("_")]
    Underscore,

    // ── Literals ──
    /// Numeric literal (int, float, exponent, negative).
    #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    // ── Names ──
    //
    // Placed after keywords — logos prioritises fixed `#[token]` matches
    // over regex for the same length, so `let` matches Let, not Ident.
    /// Variable reference: `%` followed by an identifier.
    #[regex(r"%[a-zA-Z_][a-zA-Z0-9_]*")]
    Var,

    /// Global reference: `@` followed by an identifier. Also doubles as the
    /// `@memory` facet of a scope literal (the parser decides from context).
    #[regex(r"@[a-zA-Z_][a-zA-Z0-9_.]*")]
    Global,

    /// Identifier: `[a-zA-Z][a-zA-Z0-9_]*`
    #[regex(r"[a-zA-Z][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Def => write!(f, "def"),
            Token::Type => write!(f, "type"),
            Token::Let => write!(f, "let"),
            Token::Fn => write!(f, "fn"),
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::Match => write!(f, "match"),
            Token::Ref => write!(f, "ref"),
            Token::RefRead => write!(f, "ref_read"),
            Token::RefWrite => write!(f, "ref_write"),
            Token::OnDevice => write!(f, "on_device"),
            Token::DeviceCopy => write!(f, "device_copy"),
            Token::Attrs => write!(f, "attrs"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Semi => write!(f, ";"),
            Token::Colon => write!(f, ":"),
            Token::Dot => write!(f, "."),
            Token::FatArrow => write!(f, "=>"),
            Token::Arrow => write!(f, "->"),
            Token::Equals => write!(f, "="),
            Token::Underscore => write!(f, "_"),
            Token::Number(v) => write!(f, "{v}"),
            Token::Var => write!(f, "<var>"),
            Token::Global => write!(f, "<global>"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_number(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

// ── Public API ──

/// Lex a `.tir` source string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_not_idents() {
        let tokens = lex_ok("let fn def match");
        assert_eq!(tokens, vec![Token::Let, Token::Fn, Token::Def, Token::Match]);
    }

    #[test]
    fn vars_globals_idents() {
        let tokens = lex_ok("%x @main add");
        assert_eq!(tokens, vec![Token::Var, Token::Global, Token::Ident]);
    }

    #[test]
    fn comments_and_whitespace_skipped() {
        let tokens = lex_ok("add // trailing comment\n  multiply");
        assert_eq!(tokens, vec![Token::Ident, Token::Ident]);
    }

    #[test]
    fn numbers() {
        let tokens = lex_ok("1 2.5 -3 1e10");
        assert_eq!(
            tokens,
            vec![
                Token::Number(1.0),
                Token::Number(2.5),
                Token::Number(-3.0),
                Token::Number(1e10),
            ]
        );
    }

    #[test]
    fn annotation_call_shape() {
        let tokens = lex_ok("on_device(%y, scope=gpu@global, fixed=true)");
        assert_eq!(
            tokens,
            vec![
                Token::OnDevice,
                Token::LParen,
                Token::Var,
                Token::Comma,
                Token::Ident, // scope
                Token::Equals,
                Token::Ident,  // gpu
                Token::Global, // @global (memory facet)
                Token::Comma,
                Token::Ident, // fixed
                Token::Equals,
                Token::True,
                Token::RParen,
            ]
        );
    }

    #[test]
    fn bad_character_is_collected() {
        let result = lex("add # multiply");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.tokens.len(), 2);
    }
}
