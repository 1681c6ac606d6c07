#![forbid(unsafe_code)]

use crux_ast::{BinOp, BoolOp, Constant, Expr, ExprKind, FunctionDef, Module, Slice, UnaryOp};

const INDENT: &str = "    ";

pub fn format_module(module: &Module) -> String {
    let mut out = String::new();
    for (i, f) in module.functions.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        fmt_function(&mut out, f);
    }
    out
}

pub fn format_function(f: &FunctionDef) -> String {
    let mut out = String::new();
    fmt_function(&mut out, f);
    out
}

pub fn format_expr(expr: &Expr) -> String {
    let mut out = String::new();
    fmt_expr(&mut out, expr, Prec::Lowest);
    out
}

fn fmt_function(out: &mut String, f: &FunctionDef) {
    for d in &f.decorators {
        out.push('@');
        fmt_expr(out, d, Prec::Lowest);
        out.push('\n');
    }
    out.push_str("def ");
    out.push_str(&f.name.node);
    out.push('(');
    for (i, p) in f.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&p.name.node);
        if let Some(a) = &p.annotation {
            out.push_str(": ");
            fmt_expr(out, a, Prec::Lowest);
        }
    }
    out.push(')');
    if let Some(r) = &f.returns {
        out.push_str(" -> ");
        fmt_expr(out, r, Prec::Lowest);
    }
    out.push_str(":\n");
    out.push_str(INDENT);
    out.push_str("return ");
    fmt_expr(out, &f.body, Prec::Lowest);
    out.push('\n');
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Lowest,
    Or,
    And,
    Not,
    Cmp,
    Add,
    Mul,
    Unary,
    Pow,
    Postfix,
}

fn prec_of(expr: &Expr) -> Prec {
    match &expr.kind {
        ExprKind::Lambda(_) => Prec::Lowest,
        ExprKind::BoolOp { op: BoolOp::Or, .. } => Prec::Or,
        ExprKind::BoolOp { op: BoolOp::And, .. } => Prec::And,
        ExprKind::UnaryOp { op: UnaryOp::Not, .. } => Prec::Not,
        ExprKind::UnaryOp { .. } => Prec::Unary,
        ExprKind::Compare { .. } => Prec::Cmp,
        ExprKind::BinOp { op, .. } => binop_prec(*op),
        ExprKind::Num(n) if *n < 0 => Prec::Unary,
        _ => Prec::Postfix,
    }
}

fn binop_prec(op: BinOp) -> Prec {
    match op {
        BinOp::Add | BinOp::Sub => Prec::Add,
        BinOp::Mult | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => Prec::Mul,
        BinOp::Pow => Prec::Pow,
    }
}

fn tighter(p: Prec) -> Prec {
    match p {
        Prec::Lowest => Prec::Or,
        Prec::Or => Prec::And,
        Prec::And => Prec::Not,
        Prec::Not => Prec::Cmp,
        Prec::Cmp => Prec::Add,
        Prec::Add => Prec::Mul,
        Prec::Mul => Prec::Unary,
        Prec::Unary => Prec::Pow,
        Prec::Pow | Prec::Postfix => Prec::Postfix,
    }
}

fn fmt_expr(out: &mut String, expr: &Expr, min: Prec) {
    let prec = prec_of(expr);
    let parens = prec < min;
    if parens {
        out.push('(');
    }
    match &expr.kind {
        ExprKind::Name(n) => out.push_str(n),
        ExprKind::PatternVar(n) => {
            out.push('$');
            out.push_str(n);
        }
        ExprKind::Num(n) => out.push_str(&n.to_string()),
        ExprKind::Constant(c) => out.push_str(match c {
            Constant::True => "True",
            Constant::False => "False",
            Constant::None => "None",
            Constant::Ellipsis => "...",
        }),
        ExprKind::Call { func, args } => {
            fmt_expr(out, func, Prec::Postfix);
            out.push('(');
            fmt_list(out, args);
            out.push(')');
        }
        ExprKind::BinOp { op, left, right } => {
            let (lp, rp) = if *op == BinOp::Pow {
                (Prec::Postfix, Prec::Unary)
            } else {
                (prec, tighter(prec))
            };
            fmt_expr(out, left, lp);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            fmt_expr(out, right, rp);
        }
        ExprKind::UnaryOp { op, operand } => {
            out.push_str(match op {
                UnaryOp::Not => "not ",
                UnaryOp::USub => "-",
                UnaryOp::UAdd => "+",
            });
            fmt_expr(out, operand, prec);
        }
        ExprKind::BoolOp { op, values } => {
            let sep = match op {
                BoolOp::And => " and ",
                BoolOp::Or => " or ",
            };
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    out.push_str(sep);
                }
                fmt_expr(out, v, tighter(prec));
            }
        }
        ExprKind::Compare {
            left,
            ops,
            comparators,
        } => {
            fmt_expr(out, left, Prec::Add);
            for (op, c) in ops.iter().zip(comparators) {
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                fmt_expr(out, c, Prec::Add);
            }
        }
        ExprKind::Subscript { value, slice } => {
            fmt_expr(out, value, Prec::Postfix);
            out.push('[');
            fmt_slice(out, slice);
            out.push(']');
        }
        ExprKind::Tuple(elts) => {
            out.push('(');
            fmt_list(out, elts);
            if elts.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        ExprKind::Starred(inner) => {
            out.push('*');
            fmt_expr(out, inner, Prec::Or);
        }
        ExprKind::Lambda(lambda) => {
            out.push_str("lambda");
            for (i, p) in lambda.params.iter().enumerate() {
                out.push_str(if i == 0 { " " } else { ", " });
                out.push_str(&p.name.node);
            }
            out.push_str(": ");
            fmt_expr(out, &lambda.body, Prec::Lowest);
        }
    }
    if parens {
        out.push(')');
    }
}

fn fmt_list(out: &mut String, items: &[Expr]) {
    for (i, e) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        fmt_expr(out, e, Prec::Lowest);
    }
}

fn fmt_slice(out: &mut String, slice: &Slice) {
    match slice {
        Slice::Index(e) => fmt_expr(out, e, Prec::Lowest),
        Slice::Range { lower, upper, step } => {
            if let Some(l) = lower {
                fmt_expr(out, l, Prec::Lowest);
            }
            out.push(':');
            if let Some(u) = upper {
                fmt_expr(out, u, Prec::Lowest);
            }
            if let Some(s) = step {
                out.push(':');
                fmt_expr(out, s, Prec::Lowest);
            }
        }
        Slice::Extended(dims) => {
            for (i, d) in dims.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                fmt_slice(out, d);
            }
        }
    }
}
