#![forbid(unsafe_code)]

mod error;
mod fmt;
mod parser;

use crux_lex::Lexer;

pub use error::ParseError;
pub use fmt::{format_expr, format_function, format_module};
pub use parser::Parser;

pub fn parse_module(src: &str) -> Result<crux_ast::Module, ParseError> {
    let tokens = Lexer::new(src).lex()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_module()
}

/// Parse exactly one definition.
pub fn parse_function(src: &str) -> Result<crux_ast::FunctionDef, ParseError> {
    let tokens = Lexer::new(src).lex()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_function_eof()
}

pub fn parse_expr(src: &str) -> Result<crux_ast::Expr, ParseError> {
    let tokens = Lexer::new(src).lex()?;
    let mut parser = Parser::new(&tokens);
    parser.parse_expr_eof()
}
