#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use crux_ast::Span;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[allow(unused_assignments)]
pub enum RewriteError {
    #[error("unhandled node type {kind} in pattern match")]
    #[diagnostic(code(crux::rewrite::unhandled))]
    UnhandledNodeKind {
        kind: &'static str,
        #[label("no matcher for this node")]
        span: Span,
    },

    #[error("pattern variable ${name} is not bound")]
    #[diagnostic(code(crux::rewrite::unbound))]
    UnboundPatternVar { name: String },
}
