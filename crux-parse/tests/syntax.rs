use crux_ast::{CmpOp, ExprKind, Slice};
use crux_parse::{format_expr, format_function, parse_expr, parse_function, parse_module};

fn roundtrip(src: &str) -> String {
    format_expr(&parse_expr(src).expect("parse"))
}

#[test]
fn chained_comparison_keeps_every_operator() {
    let e = parse_expr("0 <= x < n").expect("parse");
    let ExprKind::Compare { ops, comparators, .. } = &e.kind else {
        panic!("expected compare, got {e:?}");
    };
    assert_eq!(ops, &vec![CmpOp::LtE, CmpOp::Lt]);
    assert_eq!(comparators.len(), 2);
}

#[test]
fn negated_membership_and_identity_operators() {
    assert_eq!(roundtrip("a not in b"), "a not in b");
    assert_eq!(roundtrip("a is not None"), "a is not None");
    assert_eq!(roundtrip("not a in b"), "not a in b");
}

#[test]
fn bool_ops_flatten() {
    let e = parse_expr("a and b and c or d").expect("parse");
    let ExprKind::BoolOp { values, .. } = &e.kind else {
        panic!("expected or");
    };
    assert_eq!(values.len(), 2);
    assert_eq!(format_expr(&values[0]), "a and b and c");
}

#[test]
fn precedence_is_preserved_when_formatting() {
    assert_eq!(roundtrip("(a + b) * c"), "(a + b) * c");
    assert_eq!(roundtrip("a + b * c"), "a + b * c");
    assert_eq!(roundtrip("a - (b - c)"), "a - (b - c)");
    assert_eq!(roundtrip("-x ** 2"), "-x ** 2");
    assert_eq!(roundtrip("f(x)(y)[0]"), "f(x)(y)[0]");
}

#[test]
fn tuples_and_starred_elements() {
    assert_eq!(roundtrip("()"), "()");
    assert_eq!(roundtrip("(4,)"), "(4,)");
    assert_eq!(roundtrip("(4, *())"), "(4, *())");
    assert_eq!(roundtrip("(*range, 4)"), "(*range, 4)");
    assert_eq!(roundtrip("(x)"), "x");
    assert_eq!(roundtrip("f(*args, 1)"), "f(*args, 1)");
}

#[test]
fn slices_parse_into_their_shapes() {
    let e = parse_expr("l[1:2:3]").expect("parse");
    let ExprKind::Subscript { slice, .. } = &e.kind else {
        panic!("expected subscript");
    };
    assert!(matches!(
        slice.as_ref(),
        Slice::Range {
            lower: Some(_),
            upper: Some(_),
            step: Some(_)
        }
    ));
    assert_eq!(roundtrip("l[:n]"), "l[:n]");
    assert_eq!(roundtrip("l[i, 1:2]"), "l[i, 1:2]");
}

#[test]
fn lambda_binds_loosest() {
    assert_eq!(roundtrip("(lambda x: x + 1)(5)"), "(lambda x: x + 1)(5)");
    assert_eq!(roundtrip("map(lambda a, b: a, l)"), "map(lambda a, b: a, l)");
}

#[test]
fn function_with_annotations_and_decorators() {
    let src = "@ch_weight(3)\n@ch_pattern(lambda a, b: a + b)\ndef _assert__op_Add(a: isint, b: isint) -> isint:\n    return isint(a + b)\n";
    let f = parse_function(src).expect("parse");
    assert_eq!(f.name.node, "_assert__op_Add");
    assert_eq!(f.decorators.len(), 2);
    assert!(f.params.iter().all(|p| p.annotation.is_some()));
    assert!(f.returns.is_some());
    assert_eq!(format_function(&f), src);
}

#[test]
fn module_parses_consecutive_definitions() {
    let src = "def f(x): return x\n# comment\ndef g(): return f(1)\n";
    let m = parse_module(src).expect("parse");
    let names: Vec<_> = m.functions.iter().map(|f| f.name.node.as_str()).collect();
    assert_eq!(names, vec!["f", "g"]);
    assert_ne!(m.functions[0].id, m.functions[1].id);
}

#[test]
fn stub_bodies_use_ellipsis() {
    let f = parse_function("def _builtin_len(l) -> isnat: return ...").expect("parse");
    assert_eq!(format_expr(&f.body), "...");
}

#[test]
fn trailing_tokens_are_rejected() {
    let err = parse_expr("a b").expect_err("expected parse error");
    assert!(err.message.contains("expected end of input"), "{}", err.message);
}

#[test]
fn missing_return_is_reported() {
    let err = parse_function("def f(x): x").expect_err("expected parse error");
    assert!(err.message.contains("KwReturn"), "{}", err.message);
}
