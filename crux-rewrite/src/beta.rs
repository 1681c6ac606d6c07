#![forbid(unsafe_code)]

use std::collections::HashMap;

use crux_ast::{ident, Expr, ExprKind, Lambda, NodeId, Param};

use crate::error::RewriteError;
use crate::pattern::{substitute, Bindings};

/// Inline an immediately applied lambda: `(lambda x: x + 1)(5)` is `5 + 1`.
///
/// Returns `None` when `node` is not such a call, or when the arguments
/// cannot be paired with the parameters (splats, arity mismatch).
pub fn beta_reduce(node: &Expr) -> Option<Expr> {
    let ExprKind::Call { func, args } = &node.kind else {
        return None;
    };
    let ExprKind::Lambda(lambda) = &func.kind else {
        return None;
    };
    inline(lambda, args)
}

pub fn inline(lambda: &Lambda, args: &[Expr]) -> Option<Expr> {
    if lambda.params.len() != args.len() || args.iter().any(|a| matches!(a.kind, ExprKind::Starred(_))) {
        return None;
    }
    let map: HashMap<String, Expr> = lambda
        .params
        .iter()
        .zip(args)
        .map(|(p, a)| (p.name.node.clone(), a.clone()))
        .collect();
    Some(substitute_names(&lambda.body, &map))
}

/// Capture-avoiding substitution of free names.
pub fn substitute_names(body: &Expr, map: &HashMap<String, Expr>) -> Expr {
    if map.is_empty() {
        return body.clone();
    }
    match &body.kind {
        ExprKind::Name(n) => match map.get(n) {
            Some(value) => value.fresh_copy(),
            None => body.clone(),
        },
        ExprKind::Lambda(lambda) => {
            let mut inner = map.clone();
            let mut params = Vec::with_capacity(lambda.params.len());
            let mut renames: HashMap<String, Expr> = HashMap::new();
            // A lambda whose body changes is a different function.
            let changed = map.keys().any(|k| lambda.body.mentions_name(k));
            for p in &lambda.params {
                let name = &p.name.node;
                inner.remove(name);
                let captured = map.values().any(|v| v.mentions_name(name));
                if captured {
                    let fresh = gensym(name);
                    renames.insert(name.clone(), Expr::name(fresh.clone()));
                    params.push(Param {
                        id: NodeId::fresh(),
                        name: ident(fresh),
                        annotation: p.annotation.clone(),
                    });
                } else {
                    params.push(p.clone());
                }
            }
            let renamed = substitute_names(&lambda.body, &renames);
            Expr {
                span: body.span,
                kind: ExprKind::Lambda(Lambda {
                    id: if changed { NodeId::fresh() } else { lambda.id },
                    params,
                    body: Box::new(substitute_names(&renamed, &inner)),
                }),
            }
        }
        _ => {
            let mut f = |c: Expr| Ok::<_, std::convert::Infallible>(substitute_names(&c, map));
            match body.clone().try_map_children(&mut f) {
                Ok(e) => e,
                Err(never) => match never {},
            }
        }
    }
}

fn gensym(base: &str) -> String {
    format!("{base}_{}", NodeId::fresh().index())
}

/// Turn a pattern with holes into a function of those holes.
///
/// `f($A, $B)` over holes `[A, B]` is just `f`; anything else becomes a
/// lambda whose parameters replace the holes.
pub fn patt_to_lambda(pattern: &Expr, holes: &[&str]) -> Result<Expr, RewriteError> {
    if let ExprKind::Call { func, args } = &pattern.kind {
        let direct = matches!(func.kind, ExprKind::Name(_))
            && args.len() == holes.len()
            && args
                .iter()
                .zip(holes)
                .all(|(a, h)| matches!(&a.kind, ExprKind::PatternVar(v) if v == h));
        if direct {
            return Ok((**func).clone());
        }
    }
    let mut bindings = Bindings::new();
    let mut params = Vec::with_capacity(holes.len());
    for h in holes {
        let name = gensym(&h.to_lowercase());
        bindings.insert((*h).to_string(), Expr::name(name.clone()));
        params.push(Param::new(ident(name), None));
    }
    let body = substitute(pattern, &bindings)?;
    Ok(Expr::lambda(params, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::preprocess;
    use crux_parse::{format_expr, parse_expr};

    fn reduce(src: &str) -> Option<String> {
        beta_reduce(&parse_expr(src).unwrap()).map(|e| format_expr(&e))
    }

    #[test]
    fn beta_reduces_immediate_lambda_application() {
        assert_eq!(reduce("(lambda x: x + 1)(5)").as_deref(), Some("5 + 1"));
        assert_eq!(reduce("(lambda x, y: f(y, x))(a, b)").as_deref(), Some("f(b, a)"));
    }

    #[test]
    fn non_lambda_callees_are_left_alone() {
        assert_eq!(reduce("f(5)"), None);
        assert_eq!(reduce("(lambda x: x)(*xs)"), None);
        assert_eq!(reduce("(lambda x: x)(1, 2)"), None);
    }

    #[test]
    fn inner_binders_shadow_outer_parameters() {
        assert_eq!(
            reduce("(lambda x: g(x, lambda x: x))(1)").as_deref(),
            Some("g(1, lambda x: x)")
        );
    }

    #[test]
    fn substitution_avoids_capture() {
        let out = reduce("(lambda x: lambda y: x + y)(y)").unwrap();
        assert!(out.starts_with("lambda y_"), "{out}");
        assert!(out.contains(": y + y_"), "{out}");
    }

    /// The lambda returned by an applied lambda, before and after reduction.
    fn inner_lambdas(src: &str) -> (Lambda, Lambda) {
        let call = parse_expr(src).unwrap();
        let ExprKind::Call { func, .. } = &call.kind else {
            panic!("expected a call");
        };
        let ExprKind::Lambda(outer) = &func.kind else {
            panic!("expected a lambda");
        };
        let ExprKind::Lambda(before) = &outer.body.kind else {
            panic!("expected a lambda body");
        };
        let reduced = beta_reduce(&call).unwrap();
        let ExprKind::Lambda(after) = &reduced.kind else {
            panic!("expected a lambda, got {}", format_expr(&reduced));
        };
        (before.clone(), after.clone())
    }

    #[test]
    fn renamed_parameters_get_fresh_identities() {
        let (before, after) = inner_lambdas("(lambda x: lambda y: x + y)(y)");
        assert_ne!(after.id, before.id);
        assert_ne!(after.params[0].id, before.params[0].id);
        assert_ne!(after.params[0].name, before.params[0].name);

        let (before, after) = inner_lambdas("(lambda x: lambda z: z)(1)");
        assert_eq!(after.id, before.id);
        assert_eq!(after.params[0].id, before.params[0].id);
    }

    #[test]
    fn direct_call_pattern_becomes_its_callee() {
        let p = preprocess(parse_expr("isint(R)").unwrap());
        assert_eq!(format_expr(&patt_to_lambda(&p, &["R"]).unwrap()), "isint");
    }

    #[test]
    fn general_pattern_becomes_a_lambda() {
        let p = preprocess(parse_expr("isint(R + 1)").unwrap());
        let out = format_expr(&patt_to_lambda(&p, &["R"]).unwrap());
        assert!(out.starts_with("lambda r_"), "{out}");
        assert!(out.contains(": isint(r_"), "{out}");
    }
}
