#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use crux_ast::{span_between, Span};
use logos::Logos;
use miette::Diagnostic;
use thiserror::Error;

use crate::token::{Token, TokenKind};

#[derive(Debug, Error, Diagnostic)]
#[error("lex error: {message}")]
#[diagnostic(code(crux::lex))]
#[allow(unused_assignments)]
pub struct LexError {
    pub message: String,
    #[label]
    pub span: Span,
}

// Layout is not significant: every definition body is a single `return`.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"([ \t\f\r\n]+|#[^\n]*)")]
enum RawToken {
    #[token("def")]
    KwDef,
    #[token("return")]
    KwReturn,
    #[token("lambda")]
    KwLambda,
    #[token("and")]
    KwAnd,
    #[token("or")]
    KwOr,
    #[token("not")]
    KwNot,
    #[token("in")]
    KwIn,
    #[token("is")]
    KwIs,
    #[token("True")]
    KwTrue,
    #[token("False")]
    KwFalse,
    #[token("None")]
    KwNone,

    #[token("->")]
    Arrow,
    #[token("@")]
    At,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("...")]
    Ellipsis,

    #[token("==")]
    EqEq,
    #[token("!=")]
    Neq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("**")]
    StarStar,
    #[token("*")]
    Star,
    #[token("//")]
    SlashSlash,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    #[regex(r"[0-9][0-9_]*", |lex| parse_int_decimal(lex.slice()))]
    Int(Option<i64>),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

fn parse_int_decimal(s: &str) -> Option<i64> {
    if s.ends_with('_') || s.contains("__") {
        return None;
    }
    s.replace('_', "").parse::<i64>().ok()
}

pub struct Lexer<'a> {
    src: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src }
    }

    pub fn lex(&self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        let mut lex = RawToken::lexer(self.src);
        while let Some(raw) = lex.next() {
            let range = lex.span();
            let span = span_between(range.start, range.end);
            let Ok(raw) = raw else {
                return Err(LexError {
                    message: format!("unexpected character `{}`", lex.slice()),
                    span,
                });
            };
            let kind = match raw {
                RawToken::KwDef => TokenKind::KwDef,
                RawToken::KwReturn => TokenKind::KwReturn,
                RawToken::KwLambda => TokenKind::KwLambda,
                RawToken::KwAnd => TokenKind::KwAnd,
                RawToken::KwOr => TokenKind::KwOr,
                RawToken::KwNot => TokenKind::KwNot,
                RawToken::KwIn => TokenKind::KwIn,
                RawToken::KwIs => TokenKind::KwIs,
                RawToken::KwTrue => TokenKind::KwTrue,
                RawToken::KwFalse => TokenKind::KwFalse,
                RawToken::KwNone => TokenKind::KwNone,
                RawToken::Arrow => TokenKind::Arrow,
                RawToken::At => TokenKind::At,
                RawToken::Colon => TokenKind::Colon,
                RawToken::Comma => TokenKind::Comma,
                RawToken::Ellipsis => TokenKind::Ellipsis,
                RawToken::EqEq => TokenKind::EqEq,
                RawToken::Neq => TokenKind::Neq,
                RawToken::Le => TokenKind::Le,
                RawToken::Ge => TokenKind::Ge,
                RawToken::Lt => TokenKind::Lt,
                RawToken::Gt => TokenKind::Gt,
                RawToken::Plus => TokenKind::Plus,
                RawToken::Minus => TokenKind::Minus,
                RawToken::StarStar => TokenKind::StarStar,
                RawToken::Star => TokenKind::Star,
                RawToken::SlashSlash => TokenKind::SlashSlash,
                RawToken::Slash => TokenKind::Slash,
                RawToken::Percent => TokenKind::Percent,
                RawToken::LParen => TokenKind::LParen,
                RawToken::RParen => TokenKind::RParen,
                RawToken::LBracket => TokenKind::LBracket,
                RawToken::RBracket => TokenKind::RBracket,
                RawToken::Int(Some(n)) => TokenKind::Int(n),
                RawToken::Int(None) => {
                    return Err(LexError {
                        message: format!("invalid integer literal `{}`", lex.slice()),
                        span,
                    });
                }
                RawToken::Ident(s) => TokenKind::Ident(s),
            };
            tokens.push(Token { kind, span });
        }
        Ok(tokens)
    }
}
