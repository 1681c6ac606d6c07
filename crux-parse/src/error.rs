#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use crux_ast::Span;
use crux_lex::LexError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[error("parse error: {message}")]
#[diagnostic(code(crux::parse))]
#[allow(unused_assignments)]
pub struct ParseError {
    pub message: String,
    #[label]
    pub span: Span,
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError {
            message: err.message,
            span: err.span,
        }
    }
}
