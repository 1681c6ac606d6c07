#![forbid(unsafe_code)]

use std::collections::HashMap;

use crux_ast::{Expr, ExprKind};

use crate::error::RewriteError;

/// Pattern variable name -> bound subtree.
pub type Bindings = HashMap<String, Expr>;

/// Names written in upper case (`X`, `L1`) are pattern variables.
pub fn is_pattern_name(name: &str) -> bool {
    let mut cased = false;
    for c in name.chars() {
        if c.is_lowercase() {
            return false;
        }
        cased |= c.is_uppercase();
    }
    cased
}

/// Replace upper-case names with pattern variables.
///
/// Variables are identified by name, so a pattern and its replacement
/// preprocessed separately still share them.
pub fn preprocess(node: Expr) -> Expr {
    fn go(e: Expr) -> Result<Expr, std::convert::Infallible> {
        match e.kind {
            ExprKind::Name(n) if is_pattern_name(&n) => Ok(Expr {
                span: e.span,
                kind: ExprKind::PatternVar(n),
            }),
            kind => Expr { span: e.span, kind }.try_map_children(&mut go),
        }
    }
    match go(node) {
        Ok(e) => e,
        Err(never) => match never {},
    }
}

/// Structural match of `node` against `pattern`, extending `bindings`.
///
/// A pattern variable matches anything. A kind mismatch clears the
/// bindings. Kinds outside the matcher's closed set are an error.
pub fn matches(node: &Expr, pattern: &Expr, bindings: &mut Bindings) -> Result<bool, RewriteError> {
    if let ExprKind::PatternVar(v) = &pattern.kind {
        bindings.insert(v.clone(), node.clone());
        return Ok(true);
    }
    if node.kind_name() != pattern.kind_name() {
        bindings.clear();
        return Ok(false);
    }
    match (&node.kind, &pattern.kind) {
        (ExprKind::Call { func, args }, ExprKind::Call { func: pf, args: pargs }) => {
            Ok(matches(func, pf, bindings)? && matches_all(args, pargs, bindings)?)
        }
        (ExprKind::Name(a), ExprKind::Name(b)) => Ok(a == b),
        (ExprKind::Num(a), ExprKind::Num(b)) => Ok(a == b),
        (
            ExprKind::BinOp { op, left, right },
            ExprKind::BinOp {
                op: pop,
                left: pl,
                right: pr,
            },
        ) => Ok(op == pop && matches(left, pl, bindings)? && matches(right, pr, bindings)?),
        (ExprKind::BoolOp { op, values }, ExprKind::BoolOp { op: pop, values: pv }) => {
            Ok(op == pop && matches_all(values, pv, bindings)?)
        }
        _ => Err(RewriteError::UnhandledNodeKind {
            kind: node.kind_name(),
            span: node.span,
        }),
    }
}

pub fn matches_all(nodes: &[Expr], patterns: &[Expr], bindings: &mut Bindings) -> Result<bool, RewriteError> {
    if nodes.len() != patterns.len() {
        return Ok(false);
    }
    for (n, p) in nodes.iter().zip(patterns) {
        if !matches(n, p, bindings)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Instantiate `template`, replacing each pattern variable by a fresh copy of
/// its binding.
pub fn substitute(template: &Expr, bindings: &Bindings) -> Result<Expr, RewriteError> {
    fn go(e: Expr, bindings: &Bindings) -> Result<Expr, RewriteError> {
        match e.kind {
            ExprKind::PatternVar(v) => match bindings.get(&v) {
                Some(bound) => Ok(bound.fresh_copy()),
                None => Err(RewriteError::UnboundPatternVar { name: v }),
            },
            kind => Expr { span: e.span, kind }.try_map_children(&mut |c| go(c, bindings)),
        }
    }
    go(template.fresh_copy(), bindings)
}
