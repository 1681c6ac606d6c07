#![forbid(unsafe_code)]

//! Structural rewriting over `crux_ast` expressions.
//!
//! Rules are `(pattern, replacement)` pairs whose upper-case names act as
//! pattern variables. A [`RewriteEngine`] indexes rules by the shape of the
//! pattern root and rewrites trees bottom-up until no rule applies.

mod beta;
mod engine;
mod error;
mod pattern;

pub use beta::{beta_reduce, inline, patt_to_lambda, substitute_names};
pub use engine::{pattern_key, Condition, LayeredEngine, PatternKey, RewriteEngine, RewriteRule, RuleSource};
pub use error::RewriteError;
pub use pattern::{is_pattern_name, matches, matches_all, preprocess, substitute, Bindings};
