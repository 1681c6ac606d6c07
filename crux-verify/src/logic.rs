#![forbid(unsafe_code)]

//! First-order term IR over the `Unk` universe, rendered as SMT-LIB 2.
//!
//! Every source value lives in the datatype
//! `Unk = none | bool(Bool) | int(Int) | func(Func) | cons(tl, hd) | empty | undef`.
//! Calls go through the uninterpreted `App`; `T`/`F` give truthiness.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Sort {
    Unk,
    Func,
    Bool,
    Int,
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Sort::Unk => "Unk",
            Sort::Func => "Func",
            Sort::Bool => "Bool",
            Sort::Int => "Int",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    pub name: String,
    pub sort: Sort,
}

impl Symbol {
    pub fn new(name: impl Into<String>, sort: Sort) -> Self {
        Self {
            name: sanitize(&name.into()),
            sort,
        }
    }

    pub fn unk(name: impl Into<String>) -> Self {
        Self::new(name, Sort::Unk)
    }
}

/// Symbols owned by the preamble, the SMT-LIB core, or the solver labels.
const RESERVED: &[&str] = &[
    "Unk", "Func", "Bool", "Int", "none", "bool", "int", "func", "cons", "empty", "undef", "tobool", "toint",
    "tofunc", "tl", "hd", "App", "Concat", "T", "F", "true", "false", "not", "and", "or", "xor", "ite",
    "distinct", "forall", "exists", "let", "match", "par", "as", "conclusion", "div", "mod", "abs",
];

/// Keep user names from capturing reserved symbols.
pub fn sanitize(name: &str) -> String {
    let is_label = name
        .strip_prefix("assumption")
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()));
    if RESERVED.contains(&name) || is_label {
        format!("{name}!def")
    } else {
        name.to_string()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    // Unk constructors.
    None,
    Empty,
    Undef,
    WrapBool,
    WrapInt,
    WrapFunc,
    Cons,
    // Accessors.
    ToBool,
    ToInt,
    ToFunc,
    // Testers.
    IsNone,
    IsBool,
    IsInt,
    IsFunc,
    IsCons,
    IsEmpty,
    IsUndef,
    // Uninterpreted.
    App,
    Concat,
    Truthy,
    Falsy,
    // Core theory.
    Eq,
    Distinct,
    Not,
    And,
    Or,
    Implies,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
}

enum Arity {
    Fixed(&'static [Sort]),
    /// Any number of arguments of one sort.
    Many(Sort),
    /// At least two arguments sharing some sort.
    SameSort,
}

impl Op {
    pub fn smt_name(self) -> &'static str {
        match self {
            Op::None | Op::IsNone => "none",
            Op::Empty | Op::IsEmpty => "empty",
            Op::Undef | Op::IsUndef => "undef",
            Op::WrapBool | Op::IsBool => "bool",
            Op::WrapInt | Op::IsInt => "int",
            Op::WrapFunc | Op::IsFunc => "func",
            Op::Cons | Op::IsCons => "cons",
            Op::ToBool => "tobool",
            Op::ToInt => "toint",
            Op::ToFunc => "tofunc",
            Op::App => "App",
            Op::Concat => "Concat",
            Op::Truthy => "T",
            Op::Falsy => "F",
            Op::Eq => "=",
            Op::Distinct => "distinct",
            Op::Not => "not",
            Op::And => "and",
            Op::Or => "or",
            Op::Implies => "=>",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Add => "+",
            Op::Sub => "-",
        }
    }

    fn is_tester(self) -> bool {
        matches!(
            self,
            Op::IsNone | Op::IsBool | Op::IsInt | Op::IsFunc | Op::IsCons | Op::IsEmpty | Op::IsUndef
        )
    }

    fn arity(self) -> Arity {
        use Sort::*;
        match self {
            Op::None | Op::Empty | Op::Undef => Arity::Fixed(&[]),
            Op::WrapBool => Arity::Fixed(&[Bool]),
            Op::WrapInt => Arity::Fixed(&[Int]),
            Op::WrapFunc => Arity::Fixed(&[Func]),
            Op::Cons | Op::App | Op::Concat => Arity::Fixed(&[Unk, Unk]),
            Op::ToBool | Op::ToInt | Op::ToFunc | Op::Truthy | Op::Falsy => Arity::Fixed(&[Unk]),
            Op::IsNone | Op::IsBool | Op::IsInt | Op::IsFunc | Op::IsCons | Op::IsEmpty | Op::IsUndef => {
                Arity::Fixed(&[Unk])
            }
            Op::Eq | Op::Distinct => Arity::SameSort,
            Op::Not => Arity::Fixed(&[Bool]),
            Op::Implies => Arity::Fixed(&[Bool, Bool]),
            Op::And | Op::Or => Arity::Many(Bool),
            Op::Lt | Op::Le | Op::Gt | Op::Ge | Op::Add | Op::Sub => Arity::Fixed(&[Int, Int]),
        }
    }

    pub fn result_sort(self) -> Sort {
        match self {
            Op::None | Op::Empty | Op::Undef | Op::WrapBool | Op::WrapInt | Op::WrapFunc | Op::Cons | Op::App
            | Op::Concat => Sort::Unk,
            Op::ToInt | Op::Add | Op::Sub => Sort::Int,
            Op::ToFunc => Sort::Func,
            _ => Sort::Bool,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{op}` {message}")]
pub struct SortError {
    pub op: &'static str,
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QuantKind {
    Forall,
    Exists,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Quantifier {
    pub kind: QuantKind,
    pub vars: Vec<Symbol>,
    /// Each inner list is one (multi-)pattern.
    pub patterns: Vec<Vec<Term>>,
    pub weight: Option<u32>,
    pub body: Term,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Term {
    Const(Symbol),
    Bool(bool),
    Int(i64),
    Apply(Op, Vec<Term>),
    Quant(Box<Quantifier>),
}

impl Term {
    /// Sort-checked application.
    pub fn apply(op: Op, args: Vec<Term>) -> Result<Term, SortError> {
        let err = |message: String| SortError {
            op: op.smt_name(),
            message,
        };
        match op.arity() {
            Arity::Fixed(sorts) => {
                if sorts.len() != args.len() {
                    return Err(err(format!("takes {} argument(s), got {}", sorts.len(), args.len())));
                }
                for (i, (want, arg)) in sorts.iter().zip(&args).enumerate() {
                    let got = arg.sort();
                    if got != *want {
                        return Err(err(format!("argument {i} must be {want}, found {got}")));
                    }
                }
            }
            Arity::Many(want) => {
                if let Some(bad) = args.iter().find(|a| a.sort() != want) {
                    return Err(err(format!("arguments must be {want}, found {}", bad.sort())));
                }
            }
            Arity::SameSort => {
                if args.len() < 2 {
                    return Err(err(format!("takes at least 2 arguments, got {}", args.len())));
                }
                let first = args[0].sort();
                if let Some(bad) = args.iter().find(|a| a.sort() != first) {
                    return Err(err(format!("arguments must share a sort, found {first} and {}", bad.sort())));
                }
            }
        }
        Ok(Term::Apply(op, args))
    }

    pub fn sort(&self) -> Sort {
        match self {
            Term::Const(s) => s.sort,
            Term::Bool(_) | Term::Quant(_) => Sort::Bool,
            Term::Int(_) => Sort::Int,
            Term::Apply(op, _) => op.result_sort(),
        }
    }

    pub fn constant(name: impl Into<String>, sort: Sort) -> Term {
        Term::Const(Symbol::new(name, sort))
    }

    pub fn none() -> Term {
        Term::Apply(Op::None, vec![])
    }

    pub fn empty() -> Term {
        Term::Apply(Op::Empty, vec![])
    }

    pub fn undef() -> Term {
        Term::Apply(Op::Undef, vec![])
    }

    pub fn wrap_bool(b: Term) -> Term {
        Term::Apply(Op::WrapBool, vec![b])
    }

    pub fn wrap_int(i: Term) -> Term {
        Term::Apply(Op::WrapInt, vec![i])
    }

    pub fn wrap_func(f: Term) -> Term {
        Term::Apply(Op::WrapFunc, vec![f])
    }

    pub fn bool_value(b: bool) -> Term {
        Term::wrap_bool(Term::Bool(b))
    }

    pub fn int_value(n: i64) -> Term {
        Term::wrap_int(Term::Int(n))
    }

    pub fn cons(tl: Term, hd: Term) -> Term {
        Term::Apply(Op::Cons, vec![tl, hd])
    }

    pub fn app(f: Term, args: Term) -> Term {
        Term::Apply(Op::App, vec![f, args])
    }

    pub fn concat(a: Term, b: Term) -> Term {
        Term::Apply(Op::Concat, vec![a, b])
    }

    pub fn truthy(t: Term) -> Term {
        Term::Apply(Op::Truthy, vec![t])
    }

    pub fn tester(op: Op, t: Term) -> Term {
        debug_assert!(op.is_tester());
        Term::Apply(op, vec![t])
    }

    pub fn eq(a: Term, b: Term) -> Term {
        Term::Apply(Op::Eq, vec![a, b])
    }

    pub fn not(t: Term) -> Term {
        Term::Apply(Op::Not, vec![t])
    }

    pub fn and(terms: Vec<Term>) -> Term {
        Term::Apply(Op::And, terms)
    }

    pub fn implies(a: Term, b: Term) -> Term {
        Term::Apply(Op::Implies, vec![a, b])
    }

    pub fn is_empty_tuple(&self) -> bool {
        matches!(self, Term::Apply(Op::Empty, args) if args.is_empty())
    }

    /// `bool(b)` is `b`; anything else is unchanged.
    pub fn unwrap_bool(self) -> Result<Term, Term> {
        match self {
            Term::Apply(Op::WrapBool, mut args) if args.len() == 1 => Ok(args.remove(0)),
            other => Err(other),
        }
    }

    /// Quantify over `vars`; with no variables the body is returned as is.
    pub fn quantify(kind: QuantKind, vars: Vec<Symbol>, body: Term, patterns: Vec<Vec<Term>>, weight: Option<u32>) -> Term {
        if vars.is_empty() {
            return body;
        }
        Term::Quant(Box::new(Quantifier {
            kind,
            vars,
            patterns,
            weight,
            body,
        }))
    }

    pub fn forall(vars: Vec<Symbol>, body: Term) -> Term {
        Term::quantify(QuantKind::Forall, vars, body, Vec::new(), None)
    }

    /// Replace free constants by name; quantified variables shadow.
    pub fn substitute(&self, map: &HashMap<&str, Term>) -> Term {
        match self {
            Term::Const(s) => map.get(s.name.as_str()).cloned().unwrap_or_else(|| self.clone()),
            Term::Bool(_) | Term::Int(_) => self.clone(),
            Term::Apply(op, args) => Term::Apply(*op, args.iter().map(|a| a.substitute(map)).collect()),
            Term::Quant(q) => {
                let inner: HashMap<&str, Term> = map
                    .iter()
                    .filter(|(name, _)| !q.vars.iter().any(|v| v.name == **name))
                    .map(|(name, t)| (*name, t.clone()))
                    .collect();
                Term::Quant(Box::new(Quantifier {
                    kind: q.kind,
                    vars: q.vars.clone(),
                    patterns: q
                        .patterns
                        .iter()
                        .map(|p| p.iter().map(|t| t.substitute(&inner)).collect())
                        .collect(),
                    weight: q.weight,
                    body: q.body.substitute(&inner),
                }))
            }
        }
    }

    /// Free constants with their sorts, in name order.
    pub fn free_constants(&self, out: &mut BTreeMap<String, Sort>) {
        fn go<'t>(t: &'t Term, bound: &mut Vec<HashSet<&'t str>>, out: &mut BTreeMap<String, Sort>) {
            match t {
                Term::Const(s) => {
                    if !bound.iter().any(|scope| scope.contains(s.name.as_str())) {
                        out.insert(s.name.clone(), s.sort);
                    }
                }
                Term::Bool(_) | Term::Int(_) => {}
                Term::Apply(_, args) => {
                    for a in args {
                        go(a, bound, out);
                    }
                }
                Term::Quant(q) => {
                    bound.push(q.vars.iter().map(|v| v.name.as_str()).collect());
                    for p in q.patterns.iter().flatten() {
                        go(p, bound, out);
                    }
                    go(&q.body, bound, out);
                    bound.pop();
                }
            }
        }
        go(self, &mut Vec::new(), out);
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Const(s) => f.write_str(&s.name),
            Term::Bool(b) => write!(f, "{b}"),
            Term::Int(n) if *n < 0 => write!(f, "(- {})", n.unsigned_abs()),
            Term::Int(n) => write!(f, "{n}"),
            Term::Apply(op, args) => {
                if op.is_tester() {
                    return write!(f, "((_ is {}) {})", op.smt_name(), args[0]);
                }
                match (op, args.len()) {
                    (Op::And, 0) => return f.write_str("true"),
                    (Op::Or, 0) => return f.write_str("false"),
                    (Op::And | Op::Or, 1) => return write!(f, "{}", args[0]),
                    (_, 0) => return f.write_str(op.smt_name()),
                    _ => {}
                }
                write!(f, "({}", op.smt_name())?;
                for a in args {
                    write!(f, " {a}")?;
                }
                f.write_str(")")
            }
            Term::Quant(q) => {
                let kw = match q.kind {
                    QuantKind::Forall => "forall",
                    QuantKind::Exists => "exists",
                };
                write!(f, "({kw} (")?;
                for (i, v) in q.vars.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "({} {})", v.name, v.sort)?;
                }
                f.write_str(") ")?;
                if q.patterns.is_empty() && q.weight.is_none() {
                    return write!(f, "{})", q.body);
                }
                write!(f, "(! {}", q.body)?;
                for p in &q.patterns {
                    f.write_str(" :pattern (")?;
                    for (i, t) in p.iter().enumerate() {
                        if i > 0 {
                            f.write_str(" ")?;
                        }
                        write!(f, "{t}")?;
                    }
                    f.write_str(")")?;
                }
                if let Some(w) = q.weight {
                    write!(f, " :weight {w}")?;
                }
                f.write_str("))")
            }
        }
    }
}

/// Sort and function declarations every problem starts with.
pub const PREAMBLE: &str = "\
(declare-sort Func 0)
(declare-datatypes ((Unk 0)) (((none) (bool (tobool Bool)) (int (toint Int)) (func (tofunc Func)) (cons (tl Unk) (hd Unk)) (empty) (undef))))
(declare-fun App (Unk Unk) Unk)
(declare-fun Concat (Unk Unk) Unk)
(declare-fun T (Unk) Bool)
(declare-fun F (Unk) Bool)
";

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Term {
        Term::constant("x", Sort::Unk)
    }

    #[test]
    fn renders_constructors_and_testers() {
        assert_eq!(Term::cons(Term::empty(), Term::int_value(4)).to_string(), "(cons empty (int 4))");
        assert_eq!(Term::tester(Op::IsCons, x()).to_string(), "((_ is cons) x)");
        assert_eq!(Term::int_value(-3).to_string(), "(int (- 3))");
        assert_eq!(Term::and(vec![]).to_string(), "true");
    }

    #[test]
    fn quantifier_renders_patterns_and_weight() {
        let body = Term::truthy(Term::app(Term::constant("f", Sort::Unk), x()));
        let q = Term::quantify(
            QuantKind::Forall,
            vec![Symbol::unk("x")],
            body.clone(),
            vec![vec![body.clone()]],
            Some(2),
        );
        assert_eq!(
            q.to_string(),
            "(forall ((x Unk)) (! (T (App f x)) :pattern ((T (App f x))) :weight 2))"
        );
        assert_eq!(Term::forall(vec![], body.clone()), body);
    }

    #[test]
    fn apply_checks_sorts_and_arity() {
        assert!(Term::apply(Op::Add, vec![Term::Int(1), Term::Int(2)]).is_ok());
        let err = Term::apply(Op::Add, vec![x(), Term::Int(2)]).unwrap_err();
        assert!(err.to_string().contains("must be Int"), "{err}");
        assert!(Term::apply(Op::Not, vec![]).is_err());
        assert!(Term::apply(Op::Eq, vec![x(), Term::Int(1)]).is_err());
        assert!(Term::apply(Op::Distinct, vec![x(), x(), x()]).is_ok());
    }

    #[test]
    fn free_constants_skip_bound_variables() {
        let body = Term::eq(Term::app(Term::constant("g", Sort::Unk), x()), x());
        let t = Term::and(vec![
            Term::forall(vec![Symbol::unk("x")], body),
            Term::tester(Op::IsFunc, Term::wrap_func(Term::constant("lambda_1", Sort::Func))),
        ]);
        let mut out = BTreeMap::new();
        t.free_constants(&mut out);
        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec![
            ("g".to_string(), Sort::Unk),
            ("lambda_1".to_string(), Sort::Func),
        ]);
    }

    #[test]
    fn substitute_respects_shadowing() {
        let inner = Term::forall(vec![Symbol::unk("x")], Term::truthy(x()));
        let t = Term::and(vec![Term::truthy(x()), inner]);
        let map = HashMap::from([("x", Term::int_value(2))]);
        assert_eq!(t.substitute(&map).to_string(), "(and (T (int 2)) (forall ((x Unk)) (T x)))");
    }

    #[test]
    fn reserved_names_are_renamed() {
        assert_eq!(Symbol::unk("int").name, "int!def");
        assert_eq!(Symbol::unk("assumption12").name, "assumption12!def");
        assert_eq!(Symbol::unk("assumptions").name, "assumptions");
        assert_eq!(Symbol::unk("isint").name, "isint");
    }

    #[test]
    fn unwrap_bool_only_strips_wrapper() {
        assert_eq!(Term::bool_value(true).unwrap_bool(), Ok(Term::Bool(true)));
        assert!(x().unwrap_bool().is_err());
    }
}
