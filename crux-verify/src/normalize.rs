#![forbid(unsafe_code)]

use std::sync::Arc;

use crux_ast::{Expr, ExprKind, FunctionDef, Param};
use crux_parse::format_expr;
use crux_rewrite::{patt_to_lambda, substitute, Bindings, LayeredEngine, RuleSource};
use tracing::debug;

use crate::error::VerifyError;
use crate::registry::ModuleInfo;

const HOLE: &str = "R";
const INVERSE: &str = "inverse*";

/// Rewrites predicate calls into a form the compiler handles better.
pub struct Normalizer<'a> {
    defs: &'a ModuleInfo,
    rules: &'a dyn RuleSource,
}

/// The reducing function of a `reduce` call, whichever way it was written.
enum Reducer<'e> {
    Lambda(&'e [Param], &'e Expr),
    Def(&'e Arc<FunctionDef>),
}

impl Reducer<'_> {
    fn params(&self) -> &[Param] {
        match self {
            Reducer::Lambda(params, _) => params,
            Reducer::Def(def) => &def.params,
        }
    }

    fn body(&self) -> &Expr {
        match self {
            Reducer::Lambda(_, body) => body,
            Reducer::Def(def) => &def.body,
        }
    }
}

impl<'a> Normalizer<'a> {
    pub fn new(defs: &'a ModuleInfo, rules: &'a dyn RuleSource) -> Self {
        Self { defs, rules }
    }

    /// `predicate(target)`, normalised.
    pub fn call_predicate(&self, predicate: &Expr, target: &Expr) -> Result<Expr, VerifyError> {
        self.normalize(&Expr::call(predicate.clone(), vec![target.clone()]))
    }

    pub fn normalize(&self, expr: &Expr) -> Result<Expr, VerifyError> {
        let rewritten = self.rules.rewrite(expr.clone())?;
        Ok(self.reduce_transform(&rewritten).unwrap_or(rewritten))
    }

    /// Push the context around an inner `reduce(f, L, I)` through `f`.
    ///
    /// With the call replaced by a hole `R`, the context `C[R]` is applied to
    /// `f`'s body with every parameter `p` marked as `inverse*(p)`. If a local
    /// rule `C[inverse*(I)] -> I` cancels every marker, the tree becomes
    /// `reduce(f', map(lambda r: C[r], L), C[I])`. Anything else leaves the
    /// tree alone.
    pub fn reduce_transform(&self, root: &Expr) -> Option<Expr> {
        let mut index = 0usize;
        let mut candidates: Vec<(usize, &Expr)> = Vec::new();
        root.walk(&mut |e| {
            if index > 0 && self.reduce_parts(e).is_some() {
                candidates.push((index, e));
            }
            index += 1;
        });

        for (at, call) in candidates {
            match self.try_reduce_at(root, at, call) {
                Ok(Some(out)) => {
                    debug!(from = %format_expr(root), to = %format_expr(&out), "reduce transform");
                    return Some(out);
                }
                Ok(None) => {}
                Err(err) => debug!(%err, "reduce transform not applicable"),
            }
        }
        None
    }

    fn reduce_parts<'e>(&self, e: &'e Expr) -> Option<(Reducer<'e>, &'e Expr, &'e Expr)>
    where
        'a: 'e,
    {
        let ExprKind::Call { func, args } = &e.kind else {
            return None;
        };
        let [f, list, init] = args.as_slice() else {
            return None;
        };
        let def = self.lookup(func.as_name()?)?;
        if def.name.node != "reduce" {
            return None;
        }
        let reducer = match &f.kind {
            ExprKind::Lambda(lambda) => Reducer::Lambda(&lambda.params, &lambda.body),
            ExprKind::Name(n) => Reducer::Def(self.lookup(n)?),
            _ => return None,
        };
        Some((reducer, list, init))
    }

    /// Registry lookup the way plain names resolve: builtin shadow first.
    fn lookup(&self, name: &str) -> Option<&'a Arc<FunctionDef>> {
        if !name.starts_with('_') {
            if let Some(def) = self.defs.definition(&format!("_builtin_{name}")) {
                return Some(def);
            }
        }
        self.defs.definition(name)
    }

    fn try_reduce_at(&self, root: &Expr, at: usize, call: &Expr) -> Result<Option<Expr>, VerifyError> {
        let Some((reducer, list, init)) = self.reduce_parts(call) else {
            return Ok(None);
        };
        let ExprKind::Call { func: reduce_fn, .. } = &call.kind else {
            return Ok(None);
        };

        let context = replace_nth(root, at, &Expr::synthetic(ExprKind::PatternVar(HOLE.into())));
        let with = |value: Expr| -> Result<Expr, VerifyError> {
            let mut b = Bindings::new();
            b.insert(HOLE.to_string(), value);
            Ok(substitute(&context, &b)?)
        };

        let names: Vec<&str> = reducer.params().iter().map(|p| p.name.node.as_str()).collect();
        let marked = mark_inverses(reducer.body(), &names);

        let mut canceller = LayeredEngine::new(self.rules);
        canceller.add(
            with(Expr::call(Expr::name(INVERSE), vec![Expr::name("I")]))?,
            Expr::name("I"),
        );
        let simplified = canceller.rewrite(with(marked)?)?;
        if simplified.mentions_name(INVERSE) {
            return Ok(None);
        }

        let params = reducer.params().iter().map(|p| Param::new(p.name.clone(), None)).collect();
        let new_fn = Expr::lambda(params, simplified);
        let mapper = patt_to_lambda(&context, &[HOLE])?;
        let new_list = Expr::call(Expr::name("map"), vec![mapper, list.clone()]);
        let new_init = with(init.clone())?;
        Ok(Some(Expr::call((**reduce_fn).clone(), vec![new_fn, new_list, new_init])))
    }
}

/// Wrap every free occurrence of `names` as `inverse*(name)`.
fn mark_inverses(body: &Expr, names: &[&str]) -> Expr {
    fn go(e: Expr, names: &[&str]) -> Result<Expr, std::convert::Infallible> {
        match &e.kind {
            ExprKind::Name(n) if names.contains(&n.as_str()) => Ok(Expr::call(Expr::name(INVERSE), vec![e])),
            ExprKind::Lambda(lambda) => {
                let inner: Vec<&str> = names
                    .iter()
                    .copied()
                    .filter(|n| !lambda.params.iter().any(|p| p.name.node == *n))
                    .collect();
                e.try_map_children(&mut |c| go(c, &inner))
            }
            _ => e.try_map_children(&mut |c| go(c, names)),
        }
    }
    match go(body.clone(), names) {
        Ok(e) => e,
        Err(never) => match never {},
    }
}

/// Copy of `root` with its `n`-th node in pre-order replaced by `with`.
fn replace_nth(root: &Expr, n: usize, with: &Expr) -> Expr {
    fn go(e: Expr, left: &mut Option<usize>, with: &Expr) -> Result<Expr, std::convert::Infallible> {
        match left {
            Some(0) => {
                *left = None;
                return Ok(with.clone());
            }
            Some(k) => *k -= 1,
            None => return Ok(e),
        }
        e.try_map_children(&mut |c| go(c, left, with))
    }
    match go(root.clone(), &mut Some(n), with) {
        Ok(e) => e,
        Err(never) => match never {},
    }
}
