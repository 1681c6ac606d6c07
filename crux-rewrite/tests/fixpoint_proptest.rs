use crux_ast::{BinOp, BoolOp, Expr, ExprKind};
use crux_parse::{format_expr, parse_expr};
use crux_rewrite::{matches, preprocess, substitute, Bindings, RewriteEngine, RuleSource};
use proptest::prelude::*;

// Trees built only from the kinds the matcher understands.
fn arb_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        prop::sample::select(vec!["a", "b", "f", "g"]).prop_map(Expr::name),
        (0i64..3).prop_map(|n| Expr::synthetic(ExprKind::Num(n))),
    ];
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::synthetic(ExprKind::BinOp {
                op: BinOp::Add,
                left: Box::new(l),
                right: Box::new(r),
            })),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::synthetic(ExprKind::BinOp {
                op: BinOp::Mult,
                left: Box::new(l),
                right: Box::new(r),
            })),
            prop::collection::vec(inner.clone(), 2..4).prop_map(|values| Expr::synthetic(ExprKind::BoolOp {
                op: BoolOp::And,
                values,
            })),
            (prop::sample::select(vec!["f", "g"]), prop::collection::vec(inner, 0..3))
                .prop_map(|(f, args)| Expr::call(Expr::name(f), args)),
        ]
    })
}

fn simplifier() -> RewriteEngine {
    let rules = [
        ("X + 0", "X"),
        ("0 + X", "X"),
        ("X * 1", "X"),
        ("X * 0", "0"),
        ("f(f(X))", "f(X)"),
        ("g(X, Y)", "g(Y)"),
        ("X and X", "X"),
    ];
    let mut engine = RewriteEngine::new();
    for (p, r) in rules {
        engine.add(parse_expr(p).unwrap(), parse_expr(r).unwrap());
    }
    engine
}

proptest! {
    #[test]
    fn rewrite_reaches_a_fixpoint(tree in arb_expr()) {
        let engine = simplifier();
        let once = engine.rewrite(tree).unwrap();
        let twice = engine.rewrite(once.clone()).unwrap();
        prop_assert_eq!(format_expr(&once), format_expr(&twice));
    }

    #[test]
    fn identity_rule_reproduces_any_tree(tree in arb_expr()) {
        let var = preprocess(Expr::name("T"));
        let mut bindings = Bindings::new();
        prop_assert!(matches(&tree, &var, &mut bindings).unwrap());
        let out = substitute(&var, &bindings).unwrap();
        prop_assert_eq!(out, tree);
    }

    #[test]
    fn tree_matches_itself_as_a_ground_pattern(tree in arb_expr()) {
        let mut bindings = Bindings::new();
        prop_assert!(matches(&tree, &tree, &mut bindings).unwrap());
        prop_assert!(bindings.is_empty());
    }
}
