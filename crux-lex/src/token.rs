#![forbid(unsafe_code)]

use crux_ast::Span;

#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwDef,
    KwReturn,
    KwLambda,
    KwAnd,
    KwOr,
    KwNot,
    KwIn,
    KwIs,
    KwTrue,
    KwFalse,
    KwNone,

    // Operators / punctuation
    Arrow,
    At,
    Colon,
    Comma,
    Ellipsis,
    EqEq,
    Neq,
    Lt,
    Gt,
    Le,
    Ge,
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    SlashSlash,
    Percent,

    LParen,
    RParen,
    LBracket,
    RBracket,

    // Literals / identifiers
    Int(i64),
    Ident(String),
}
