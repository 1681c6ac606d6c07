#![forbid(unsafe_code)]

//! Syntax tree to logic.
//!
//! Values are `Unk` terms. Calls to anything but an intrinsic become
//! `App(callee, args)` where `args` is a `cons` list built left to right from
//! `empty`; operators are calls to their `_op_<Name>` definitions.

use std::collections::{BTreeMap, HashMap};

use crux_ast::{CmpOp, Constant, Expr, ExprKind, FunctionDef, Lambda, NodeId, Param, Slice, Span};
use crux_parse::format_expr;
use crux_rewrite::beta_reduce;
use tracing::debug;

use crate::error::VerifyError;
use crate::intrinsic::Intrinsic;
use crate::logic::{Op, QuantKind, Sort, Symbol, Term};
use crate::normalize::Normalizer;
use crate::registry::Registry;
use crate::scope::{Resolution, Resolver, Scope};

/// Identity of something that gets a logic constant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefKey {
    Function(NodeId),
    Param(NodeId),
}

/// Per-attempt state: one constant per referenced definition, plus support
/// formulas produced along the way (lambda definitions).
#[derive(Debug, Default)]
pub struct BindingEnv {
    refs: HashMap<DefKey, Term>,
    support: Vec<Term>,
}

impl BindingEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// The constant for `key`, minted on first use.
    pub fn register(&mut self, key: DefKey, name: &str) -> Term {
        self.refs
            .entry(key)
            .or_insert_with(|| Term::constant(name, Sort::Unk))
            .clone()
    }

    pub fn constant(&self, key: DefKey) -> Option<&Term> {
        self.refs.get(&key)
    }

    pub fn is_referenced(&self, key: DefKey) -> bool {
        self.refs.contains_key(&key)
    }

    pub fn referenced(&self) -> impl Iterator<Item = DefKey> + '_ {
        self.refs.keys().copied()
    }

    pub fn support(&self) -> &[Term] {
        &self.support
    }

    pub fn take_support(&mut self) -> Vec<Term> {
        std::mem::take(&mut self.support)
    }
}

/// How an assertion function is being used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Axiom: declared or inferred trigger patterns, declared weight.
    Axiom,
    /// The goal: weight 1 and no patterns.
    Conclusion,
}

const TYPE_PREDICATES: &[&str] = &["isbool", "isint", "isnat", "istuple", "isfunc", "isnone"];

struct Arg {
    value: Term,
    splat: bool,
}

pub struct Compiler<'r> {
    registry: &'r Registry,
    resolver: Resolver<'r>,
    normalizer: Normalizer<'r>,
}

impl<'r> Compiler<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            resolver: Resolver::new(registry.defs()),
            normalizer: Normalizer::new(registry.defs(), registry.rules()),
        }
    }

    pub fn compile_expr(&self, env: &mut BindingEnv, scope: &Scope<'_>, expr: &Expr) -> Result<Term, VerifyError> {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Name(n) => self.name(env, scope, n, span),
            ExprKind::PatternVar(n) => Err(VerifyError::unsupported(
                format!("pattern variable ${n} outside a rewrite rule"),
                span,
            )),
            ExprKind::Num(n) => Ok(Term::int_value(*n)),
            ExprKind::Constant(c) => match c {
                Constant::True => Ok(Term::bool_value(true)),
                Constant::False => Ok(Term::bool_value(false)),
                Constant::None => Ok(Term::none()),
                Constant::Ellipsis => Err(VerifyError::unsupported("`...` has no logical meaning", span)),
            },
            ExprKind::Call { func, args } => self.call(env, scope, expr, func, args),
            ExprKind::BinOp { op, left, right } => {
                let f = self.operator(env, op.name(), span)?;
                let args = vec![self.plain(env, scope, left)?, self.plain(env, scope, right)?];
                apply(f, args, span)
            }
            ExprKind::UnaryOp { op, operand } => {
                let f = self.operator(env, op.name(), span)?;
                let args = vec![self.plain(env, scope, operand)?];
                apply(f, args, span)
            }
            ExprKind::BoolOp { op, values } => {
                let f = self.operator(env, op.name(), span)?;
                let mut values = values.iter();
                let Some(first) = values.next() else {
                    return Err(VerifyError::unsupported("empty boolean operation", span));
                };
                let mut acc = self.compile_expr(env, scope, first)?;
                for v in values {
                    let rhs = self.compile_expr(env, scope, v)?;
                    acc = apply(f.clone(), vec![Arg::plain(acc), Arg::plain(rhs)], span)?;
                }
                Ok(acc)
            }
            ExprKind::Compare {
                left,
                ops,
                comparators,
            } => self.compare(env, scope, left, ops, comparators, span),
            ExprKind::Subscript { value, slice } => {
                let value = self.compile_expr(env, scope, value)?;
                self.subscript(env, scope, value, slice, span)
            }
            ExprKind::Tuple(elts) => {
                let args = self.args(env, scope, elts)?;
                merge_args(args, span)
            }
            ExprKind::Starred(_) => Err(VerifyError::unsupported(
                "starred expression outside a call or tuple",
                span,
            )),
            ExprKind::Lambda(lambda) => self.lambda(env, scope, lambda),
        }
    }

    fn name(&self, env: &mut BindingEnv, scope: &Scope<'_>, name: &str, span: Span) -> Result<Term, VerifyError> {
        match self.resolver.resolve(name, span, scope)? {
            Resolution::Builtin(def) | Resolution::Pure(def) => {
                Ok(env.register(DefKey::Function(def.id), &def.name.node))
            }
            Resolution::Local(id) => Ok(env.register(DefKey::Param(id), name)),
            Resolution::Intrinsic(i) => i
                .as_value()
                .ok_or_else(|| VerifyError::unsupported(format!("intrinsic `{name}` must be called"), span)),
            Resolution::Unresolved => Err(VerifyError::definition(format!("undefined identifier: \"{name}\""), span)),
        }
    }

    /// Constant for the `_op_<name>` definition.
    fn operator(&self, env: &mut BindingEnv, name: &str, span: Span) -> Result<Term, VerifyError> {
        let op = format!("_op_{name}");
        let def = self
            .registry
            .defs()
            .definition(&op)
            .ok_or_else(|| VerifyError::definition(format!("missing operator definition: {op}"), span))?;
        Ok(env.register(DefKey::Function(def.id), &def.name.node))
    }

    fn plain(&self, env: &mut BindingEnv, scope: &Scope<'_>, e: &Expr) -> Result<Arg, VerifyError> {
        Ok(Arg::plain(self.compile_expr(env, scope, e)?))
    }

    fn args(&self, env: &mut BindingEnv, scope: &Scope<'_>, elts: &[Expr]) -> Result<Vec<Arg>, VerifyError> {
        elts.iter()
            .map(|a| match &a.kind {
                ExprKind::Starred(inner) => Ok(Arg {
                    value: self.compile_expr(env, scope, inner)?,
                    splat: true,
                }),
                _ => self.plain(env, scope, a),
            })
            .collect()
    }

    /// `a < b < c` is `(a < b) and (b < c)`, built from the right, with each
    /// operand compiled once.
    fn compare(
        &self,
        env: &mut BindingEnv,
        scope: &Scope<'_>,
        left: &Expr,
        ops: &[CmpOp],
        comparators: &[Expr],
        span: Span,
    ) -> Result<Term, VerifyError> {
        let (Some(first_op), Some(last)) = (ops.first(), comparators.last()) else {
            return Err(VerifyError::unsupported("comparison without operands", span));
        };
        if ops.len() != comparators.len() {
            return Err(VerifyError::unsupported("malformed comparison", span));
        }

        let mut ret: Option<Term> = None;
        let mut last_val = self.compile_expr(env, scope, last)?;
        for (op, lhs) in ops[1..].iter().zip(&comparators[..comparators.len() - 1]).rev() {
            let f = self.operator(env, op.name(), span)?;
            let lhs = self.compile_expr(env, scope, lhs)?;
            let clause = apply(f, vec![Arg::plain(lhs.clone()), Arg::plain(last_val)], span)?;
            ret = Some(self.conjoin(env, ret, clause, span)?);
            last_val = lhs;
        }
        let f = self.operator(env, first_op.name(), span)?;
        let lhs = self.compile_expr(env, scope, left)?;
        let clause = apply(f, vec![Arg::plain(lhs), Arg::plain(last_val)], span)?;
        self.conjoin(env, ret, clause, span)
    }

    fn conjoin(&self, env: &mut BindingEnv, acc: Option<Term>, clause: Term, span: Span) -> Result<Term, VerifyError> {
        match acc {
            None => Ok(clause),
            Some(rest) => {
                let and = self.operator(env, "And", span)?;
                apply(and, vec![Arg::plain(clause), Arg::plain(rest)], span)
            }
        }
    }

    fn subscript(
        &self,
        env: &mut BindingEnv,
        scope: &Scope<'_>,
        value: Term,
        slice: &Slice,
        span: Span,
    ) -> Result<Term, VerifyError> {
        match slice {
            Slice::Index(index) => {
                let f = self.operator(env, "Get", span)?;
                let index = self.compile_expr(env, scope, index)?;
                apply(f, vec![Arg::plain(value), Arg::plain(index)], span)
            }
            Slice::Range { lower, upper, step } => {
                let mut args = vec![Arg::plain(value)];
                for bound in [lower, upper] {
                    args.push(Arg::plain(self.bound(env, scope, bound.as_ref())?));
                }
                let f = match step {
                    None => self.operator(env, "SubList", span)?,
                    Some(step) => {
                        args.push(self.plain(env, scope, step)?);
                        self.operator(env, "SteppedSubList", span)?
                    }
                };
                apply(f, args, span)
            }
            // Dimensions are summed. This only makes sense for the narrow case
            // of integer-valued per-dimension lookups.
            Slice::Extended(dims) => {
                let mut terms = dims.iter().map(|d| self.subscript(env, scope, value.clone(), d, span));
                let Some(first) = terms.next() else {
                    return Err(VerifyError::unsupported("empty extended slice", span));
                };
                let mut acc = first?;
                let rest: Vec<Term> = terms.collect::<Result<_, _>>()?;
                for t in rest {
                    let add = self.operator(env, "Add", span)?;
                    acc = apply(add, vec![Arg::plain(acc), Arg::plain(t)], span)?;
                }
                Ok(acc)
            }
        }
    }

    fn bound(&self, env: &mut BindingEnv, scope: &Scope<'_>, bound: Option<&Expr>) -> Result<Term, VerifyError> {
        match bound {
            Some(e) => self.compile_expr(env, scope, e),
            None => Ok(Term::none()),
        }
    }

    /// Body of a lambda (or quantifier) with its parameters bound to
    /// variables. A parameter compiled before keeps the constant it got then.
    fn function_body(
        &self,
        env: &mut BindingEnv,
        scope: &Scope<'_>,
        params: &[Param],
        body: &Expr,
    ) -> Result<(Term, Vec<Symbol>), VerifyError> {
        let inner = scope.child(params);
        let mut vars = Vec::with_capacity(params.len());
        for p in params {
            vars.push(match env.register(DefKey::Param(p.id), &p.name.node) {
                Term::Const(s) => s,
                _ => Symbol::unk(p.name.node.clone()),
            });
        }
        let body = self.compile_expr(env, &inner, body)?;
        Ok((body, vars))
    }

    /// A fresh `Func` handle, defined extensionally by a support formula.
    fn lambda(&self, env: &mut BindingEnv, scope: &Scope<'_>, lambda: &Lambda) -> Result<Term, VerifyError> {
        let handle = Term::wrap_func(Term::constant(format!("lambda_{}", lambda.id.index()), Sort::Func));
        let (body, vars) = self.function_body(env, scope, &lambda.params, &lambda.body)?;
        let span = lambda.body.span;
        if body.sort() != Sort::Unk {
            return Err(VerifyError::unsupported(
                format!("lambda body must be a value, found {}", body.sort()),
                span,
            ));
        }
        let args = vars.iter().map(|v| Arg::plain(Term::Const(v.clone()))).collect();
        let applied = Term::app(handle.clone(), merge_args(args, span)?);
        let definition = Term::eq(applied.clone(), body);
        env.support
            .push(Term::quantify(QuantKind::Forall, vars, definition, vec![vec![applied]], None));
        env.support.push(Term::tester(Op::IsFunc, handle.clone()));
        Ok(handle)
    }

    fn call(
        &self,
        env: &mut BindingEnv,
        scope: &Scope<'_>,
        call: &Expr,
        func: &Expr,
        args: &[Expr],
    ) -> Result<Term, VerifyError> {
        if let Some(inlined) = beta_reduce(call) {
            return self.compile_expr(env, scope, &inlined);
        }
        let span = call.span;
        let callee = match &func.kind {
            ExprKind::Name(n) => match self.resolver.resolve(n, func.span, scope)? {
                Resolution::Intrinsic(i) => return self.intrinsic(env, scope, i, n, args, span),
                _ => self.name(env, scope, n, func.span)?,
            },
            _ => self.compile_expr(env, scope, func)?,
        };
        let args = self.args(env, scope, args)?;
        apply(callee, args, span)
    }

    fn intrinsic(
        &self,
        env: &mut BindingEnv,
        scope: &Scope<'_>,
        which: Intrinsic,
        name: &str,
        args: &[Expr],
        span: Span,
    ) -> Result<Term, VerifyError> {
        if let Some(kind) = which.quantifier() {
            let lambda = match args {
                [arg] => match &arg.kind {
                    ExprKind::Lambda(lambda) => lambda,
                    _ => return Err(VerifyError::QuantifierShape { span: arg.span }),
                },
                _ => return Err(VerifyError::QuantifierShape { span }),
            };
            let (body, vars) = self.function_body(env, scope, &lambda.params, &lambda.body)?;
            let body = as_formula(body, lambda.body.span)?;
            return Ok(Term::quantify(kind, vars, body, Vec::new(), None));
        }
        let mut terms = Vec::with_capacity(args.len());
        for a in args {
            if let ExprKind::Starred(_) = a.kind {
                return Err(VerifyError::unsupported(format!("cannot splat into intrinsic `{name}`"), a.span));
            }
            terms.push(self.compile_expr(env, scope, a)?);
        }
        which
            .apply(terms)
            .map_err(|err| VerifyError::unsupported(format!("intrinsic `{name}`: {err}"), span))
    }

    /// Compile an assertion function into a closed formula.
    ///
    /// Returns `None` for axioms whose `@ch_weight` is malformed; they are
    /// left out of the proof.
    pub fn compile_assertion(
        &self,
        env: &mut BindingEnv,
        def: &FunctionDef,
        role: Role,
    ) -> Result<Option<Term>, VerifyError> {
        let weight = match role {
            Role::Conclusion => 1,
            Role::Axiom => match find_weight(def) {
                Some(w) => w,
                None => {
                    debug!(function = %def.name.node, "skipping statement with malformed weight");
                    return Ok(None);
                }
            },
        };

        let root = Scope::root();
        let scope = root.child(&def.params);
        let body = self.compile_expr(env, &scope, &def.body)?;
        let mut formula = as_formula(body, def.body.span)?;

        let mut patterns = Vec::new();
        if !def.params.is_empty() && role == Role::Axiom {
            for multi in find_patterns(def)? {
                let terms = multi
                    .iter()
                    .map(|p| self.compile_expr(env, &scope, p))
                    .collect::<Result<Vec<_>, _>>()?;
                patterns.push(terms);
            }
        }

        let mut preconditions = Vec::new();
        for p in &def.params {
            if let Some(annotation) = &p.annotation {
                let call = self.normalizer.call_predicate(annotation, &Expr::name(p.name.node.clone()))?;
                let value = self.compile_expr(env, &scope, &call)?;
                preconditions.push(as_formula(value, annotation.span)?);
            }
        }
        formula = match preconditions.len() {
            0 => formula,
            1 => Term::implies(preconditions.remove(0), formula),
            _ => Term::implies(Term::and(preconditions), formula),
        };

        let vars: Vec<Symbol> = def
            .params
            .iter()
            .filter_map(|p| env.constant(DefKey::Param(p.id)))
            .filter_map(|t| match t {
                Term::Const(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        let patterns = usable_patterns(patterns, &vars);
        let formula = Term::quantify(QuantKind::Forall, vars, formula, patterns, Some(weight));
        debug!(function = %def.name.node, %formula, "compiled assertion");
        Ok(Some(formula))
    }
}

impl Arg {
    fn plain(value: Term) -> Self {
        Self { value, splat: false }
    }
}

fn apply(callee: Term, args: Vec<Arg>, span: Span) -> Result<Term, VerifyError> {
    let args = merge_args(args, span)?;
    checked(Op::App, vec![callee, args], span)
}

/// Argument list as a `cons` chain; a splat is concatenated, or taken as is
/// when nothing precedes it.
fn merge_args(args: Vec<Arg>, span: Span) -> Result<Term, VerifyError> {
    let mut acc = Term::empty();
    for arg in args {
        acc = if !arg.splat {
            checked(Op::Cons, vec![acc, arg.value], span)?
        } else if acc.is_empty_tuple() {
            if arg.value.sort() != Sort::Unk {
                return Err(VerifyError::unsupported(
                    format!("cannot splat a {} term", arg.value.sort()),
                    span,
                ));
            }
            arg.value
        } else {
            checked(Op::Concat, vec![acc, arg.value], span)?
        };
    }
    Ok(acc)
}

fn checked(op: Op, args: Vec<Term>, span: Span) -> Result<Term, VerifyError> {
    Term::apply(op, args).map_err(|err| VerifyError::unsupported(err.to_string(), span))
}

/// `bool(b)` is `b`, Bool terms are kept, any other value is `T(value)`.
fn as_formula(term: Term, span: Span) -> Result<Term, VerifyError> {
    match term.unwrap_bool() {
        Ok(b) => Ok(b),
        Err(t) if t.sort() == Sort::Bool => Ok(t),
        Err(t) => checked(Op::Truthy, vec![t], span),
    }
}

fn calls_name(e: &Expr) -> Option<(&str, &[Expr])> {
    match &e.kind {
        ExprKind::Call { func, args } => func.as_name().map(|n| (n, args.as_slice())),
        _ => None,
    }
}

/// `@ch_weight(n)`, default 1. `None` when the decorator is malformed.
pub fn find_weight(def: &FunctionDef) -> Option<u32> {
    for dec in &def.decorators {
        if let Some(("ch_weight", args)) = calls_name(dec) {
            return match args {
                [Expr {
                    kind: ExprKind::Num(n), ..
                }] => u32::try_from(*n).ok(),
                _ => None,
            };
        }
    }
    Some(1)
}

/// Declared `@ch_pattern(lambda ..: term, ..)` multi-patterns, or one
/// inferred from the body. A single pattern calling a type predicate also
/// gets an `isdefined(arg)` alternative.
pub fn find_patterns(def: &FunctionDef) -> Result<Vec<Vec<Expr>>, VerifyError> {
    let mut declared = Vec::new();
    for dec in &def.decorators {
        let Some(("ch_pattern", lambdas)) = calls_name(dec) else {
            continue;
        };
        let mut multi = Vec::with_capacity(lambdas.len());
        for lam in lambdas {
            let ExprKind::Lambda(lambda) = &lam.kind else {
                return Err(VerifyError::definition("ch_pattern arguments must be lambdas", lam.span));
            };
            if !lambda.params.iter().map(|p| p.name.node.as_str()).eq(def.param_names()) {
                return Err(VerifyError::definition(
                    format!("pattern arguments do not match function arguments of {}", def.name.node),
                    lam.span,
                ));
            }
            multi.push((*lambda.body).clone());
        }
        declared.push(multi);
    }
    let mut patterns = if declared.is_empty() {
        vec![vec![infer_pattern(&def.body).clone()]]
    } else {
        declared
    };

    let mut extra = Vec::new();
    for multi in &patterns {
        if let [single] = multi.as_slice() {
            if let Some((name, [arg, ..])) = calls_name(single) {
                if TYPE_PREDICATES.contains(&name) {
                    extra.push(vec![Expr::call(Expr::name("isdefined"), vec![arg.clone()])]);
                }
            }
        }
    }
    patterns.extend(extra);
    Ok(patterns)
}

/// The term an axiom is "about": look through `_z_wrapbool`, take the
/// consequent of an implication and the left side of an equation.
fn infer_pattern(e: &Expr) -> &Expr {
    match calls_name(e) {
        Some(("_z_wrapbool", [inner, ..])) => return infer_pattern(inner),
        Some(("implies" | "_z_implies", [_, consequent, ..])) => return infer_pattern(consequent),
        Some(("_z_eq", [lhs, ..])) => return infer_pattern(lhs),
        _ => {}
    }
    if let ExprKind::Compare { left, ops, .. } = &e.kind {
        if ops.as_slice() == [CmpOp::Eq] {
            return infer_pattern(left);
        }
    }
    e
}

/// Triggers must be uninterpreted applications covering every bound
/// variable; anything else is dropped and the solver picks its own.
fn usable_patterns(patterns: Vec<Vec<Term>>, vars: &[Symbol]) -> Vec<Vec<Term>> {
    patterns
        .into_iter()
        .filter(|multi| {
            let heads_ok = multi.iter().all(|t| {
                matches!(t, Term::Apply(Op::App | Op::Concat | Op::Truthy | Op::Falsy, _))
            });
            let mut mentioned = BTreeMap::new();
            for t in multi {
                t.free_constants(&mut mentioned);
            }
            let covers = vars.iter().all(|v| mentioned.contains_key(&v.name));
            if !(heads_ok && covers) {
                debug!(
                    pattern = %multi.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" "),
                    "dropping unusable trigger"
                );
            }
            heads_ok && covers
        })
        .collect()
}

/// Source of a definition, for reports and logs.
pub fn describe(def: &FunctionDef) -> String {
    format!("{}({}): {}", def.name.node, def.param_names().collect::<Vec<_>>().join(", "), format_expr(&def.body))
}
