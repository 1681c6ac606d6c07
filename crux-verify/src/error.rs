#![forbid(unsafe_code)]
#![allow(unused_assignments)]

use std::path::PathBuf;

use crux_ast::Span;
use crux_parse::ParseError;
use crux_rewrite::RewriteError;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
#[allow(unused_assignments)]
pub enum VerifyError {
    /// Multiply defined function, unresolved identifier, unknown function,
    /// invalid intrinsic, mismatched pattern parameters.
    #[error("definition error: {message}")]
    #[diagnostic(code(crux::verify::definition))]
    Definition {
        message: String,
        #[label]
        span: Option<Span>,
    },

    #[error("unsupported construct: {message}")]
    #[diagnostic(code(crux::verify::unsupported))]
    Unsupported {
        message: String,
        #[label]
        span: Option<Span>,
    },

    #[error("soundness failure: conclusion not required for proof")]
    #[diagnostic(
        code(crux::verify::soundness),
        help("the selected axioms are contradictory without the conclusion")
    )]
    Soundness { core: Vec<String> },

    #[error("quantifier argument must be a lambda")]
    #[diagnostic(code(crux::verify::quantifier))]
    QuantifierShape {
        #[label("expected `lambda ...: ...` here")]
        span: Span,
    },

    #[error("solver failure: {message}")]
    #[diagnostic(code(crux::verify::solver))]
    Solver { message: String },

    #[error("counterexample conflicts with proof of `{name}`")]
    #[diagnostic(code(crux::verify::conflict))]
    CounterexampleConflict { name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error("cannot write {}: {source}", path.display())]
    #[diagnostic(code(crux::verify::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl VerifyError {
    pub fn definition(message: impl Into<String>, span: impl Into<Option<Span>>) -> Self {
        VerifyError::Definition {
            message: message.into(),
            span: span.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>, span: impl Into<Option<Span>>) -> Self {
        VerifyError::Unsupported {
            message: message.into(),
            span: span.into(),
        }
    }

    pub fn solver(message: impl Into<String>) -> Self {
        VerifyError::Solver {
            message: message.into(),
        }
    }
}

impl From<RewriteError> for VerifyError {
    fn from(err: RewriteError) -> Self {
        let span = match &err {
            RewriteError::UnhandledNodeKind { span, .. } => Some(*span),
            RewriteError::UnboundPatternVar { .. } => None,
        };
        VerifyError::Unsupported {
            message: err.to_string(),
            span,
        }
    }
}
