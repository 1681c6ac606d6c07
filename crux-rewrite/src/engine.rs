#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crux_ast::{BinOp, BoolOp, Expr, ExprKind, UnaryOp};
use crux_parse::format_expr;
use tracing::debug;

use crate::error::RewriteError;
use crate::pattern::{matches, preprocess, substitute, Bindings};

/// Side condition evaluated after a successful match. It may add bindings
/// for the replacement.
pub type Condition = Arc<dyn Fn(&mut Bindings) -> bool + Send + Sync>;

/// Index key: node kind plus an operator or callee discriminant.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PatternKey {
    /// `None` is the any-callee bucket, consulted for every call.
    Call(Option<String>),
    BinOp(BinOp),
    BoolOp(BoolOp),
    UnaryOp(UnaryOp),
    Other(&'static str),
}

pub fn pattern_key(node: &Expr) -> PatternKey {
    match &node.kind {
        ExprKind::Call { func, .. } => match &func.kind {
            ExprKind::Name(n) => PatternKey::Call(Some(n.clone())),
            _ => PatternKey::Call(None),
        },
        ExprKind::BinOp { op, .. } => PatternKey::BinOp(*op),
        ExprKind::BoolOp { op, .. } => PatternKey::BoolOp(*op),
        ExprKind::UnaryOp { op, .. } => PatternKey::UnaryOp(*op),
        _ => PatternKey::Other(node.kind_name()),
    }
}

#[derive(Clone)]
pub struct RewriteRule {
    pub pattern: Expr,
    pub replacement: Expr,
    condition: Option<Condition>,
}

impl RewriteRule {
    pub fn new(pattern: Expr, replacement: Expr) -> Self {
        Self {
            pattern: preprocess(pattern),
            replacement: preprocess(replacement),
            condition: None,
        }
    }

    pub fn when(mut self, condition: impl Fn(&mut Bindings) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    fn admits(&self, bindings: &mut Bindings) -> bool {
        self.condition.as_ref().is_none_or(|c| c(bindings))
    }
}

impl fmt::Debug for RewriteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewriteRule")
            .field("pattern", &format_expr(&self.pattern))
            .field("replacement", &format_expr(&self.replacement))
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

/// Anything that can hand out candidate rules for a node.
pub trait RuleSource {
    fn candidates(&self, key: &PatternKey) -> Vec<&RewriteRule>;

    /// Rewrite bottom-up to a fixpoint.
    fn rewrite(&self, node: Expr) -> Result<Expr, RewriteError> {
        let mut node = node;
        loop {
            let visited = node.try_map_children(&mut |c| self.rewrite(c))?;
            match self.rewrite_top(&visited)? {
                Some(next) => node = next,
                None => return Ok(visited),
            }
        }
    }

    /// Apply rules at the root only, until none matches. `None` means the
    /// node was left untouched.
    fn rewrite_top(&self, node: &Expr) -> Result<Option<Expr>, RewriteError> {
        let mut current: Option<Expr> = None;
        'restart: loop {
            let here = current.as_ref().unwrap_or(node);
            for rule in self.candidates(&pattern_key(here)) {
                let mut bindings = Bindings::new();
                if matches(here, &rule.pattern, &mut bindings)? && rule.admits(&mut bindings) {
                    let next = substitute(&rule.replacement, &bindings)?;
                    debug!(from = %format_expr(here), to = %format_expr(&next), "rewrite");
                    current = Some(next);
                    continue 'restart;
                }
            }
            return Ok(current);
        }
    }
}

/// Rule set indexed by [`PatternKey`].
#[derive(Clone, Debug, Default)]
pub struct RewriteEngine {
    index: HashMap<PatternKey, Vec<RewriteRule>>,
    len: usize,
}

impl RewriteEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pattern: Expr, replacement: Expr) {
        self.add_rule(RewriteRule::new(pattern, replacement));
    }

    pub fn add_rule(&mut self, rule: RewriteRule) {
        self.index.entry(pattern_key(&rule.pattern)).or_default().push(rule);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn lookup<'r>(index: &'r HashMap<PatternKey, Vec<RewriteRule>>, key: &PatternKey) -> Vec<&'r RewriteRule> {
    let mut out: Vec<&RewriteRule> = index.get(key).map(|v| v.iter().collect()).unwrap_or_default();
    if matches!(key, PatternKey::Call(Some(_))) {
        if let Some(any) = index.get(&PatternKey::Call(None)) {
            out.extend(any.iter());
        }
    }
    out
}

impl RuleSource for RewriteEngine {
    fn candidates(&self, key: &PatternKey) -> Vec<&RewriteRule> {
        lookup(&self.index, key)
    }
}

/// Call-site-local rules layered over a shared base set. Local rules are
/// tried first.
pub struct LayeredEngine<'b> {
    local: RewriteEngine,
    base: &'b dyn RuleSource,
}

impl<'b> LayeredEngine<'b> {
    pub fn new(base: &'b dyn RuleSource) -> Self {
        Self {
            local: RewriteEngine::new(),
            base,
        }
    }

    pub fn add(&mut self, pattern: Expr, replacement: Expr) {
        self.local.add(pattern, replacement);
    }

    pub fn add_rule(&mut self, rule: RewriteRule) {
        self.local.add_rule(rule);
    }
}

impl RuleSource for LayeredEngine<'_> {
    fn candidates(&self, key: &PatternKey) -> Vec<&RewriteRule> {
        let mut out = self.local.candidates(key);
        out.extend(self.base.candidates(key));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crux_parse::parse_expr;

    fn e(src: &str) -> Expr {
        parse_expr(src).unwrap()
    }

    fn simplifier() -> RewriteEngine {
        let mut r = RewriteEngine::new();
        r.add(e("X + 0"), e("X"));
        r.add(e("0 + X"), e("X"));
        r.add(e("f(f(X))"), e("f(X)"));
        r
    }

    fn rewrite(r: &dyn RuleSource, src: &str) -> String {
        format_expr(&r.rewrite(e(src)).unwrap())
    }

    #[test]
    fn rewrites_nested_occurrences() {
        let r = simplifier();
        assert_eq!(rewrite(&r, "g(a + 0, 0 + (b + 0))"), "g(a, b)");
        assert_eq!(rewrite(&r, "f(f(f(f(x))))"), "f(x)");
    }

    #[test]
    fn rewritten_root_is_revisited() {
        let mut r = RewriteEngine::new();
        r.add(e("h(X)"), e("f(f(X + 0))"));
        r.add(e("f(f(X))"), e("f(X)"));
        r.add(e("X + 0"), e("X"));
        assert_eq!(rewrite(&r, "h(y)"), "f(y)");
    }

    #[test]
    fn conditions_gate_and_extend_bindings() {
        let mut r = RewriteEngine::new();
        r.add_rule(
            RewriteRule::new(e("double(X)"), e("X + Y")).when(|b| {
                let x = b["X"].clone();
                b.insert("Y".into(), x);
                true
            }),
        );
        r.add_rule(RewriteRule::new(e("never(X)"), e("X")).when(|_| false));
        assert_eq!(rewrite(&r, "double(a)"), "a + a");
        assert_eq!(rewrite(&r, "never(a)"), "never(a)");
    }

    #[test]
    fn any_callee_rules_apply_to_every_call() {
        let mut r = RewriteEngine::new();
        r.add(e("F(0)"), e("zero"));
        assert_eq!(rewrite(&r, "g(h(0))"), "g(zero)");
    }

    #[test]
    fn layered_engine_prefers_local_rules() {
        let mut base = RewriteEngine::new();
        base.add(e("inc(X)"), e("X + 1"));
        let mut layered = LayeredEngine::new(&base);
        layered.add(e("inc(0)"), e("1"));
        assert_eq!(rewrite(&layered, "inc(0)"), "1");
        assert_eq!(rewrite(&layered, "inc(a)"), "a + 1");
        assert_eq!(rewrite(&base, "inc(0)"), "0 + 1");
    }

    #[test]
    fn keys_distinguish_operators_and_callees() {
        assert_eq!(pattern_key(&e("a + b")), PatternKey::BinOp(BinOp::Add));
        assert_ne!(pattern_key(&e("a + b")), pattern_key(&e("a - b")));
        assert_eq!(pattern_key(&e("f(x)")), PatternKey::Call(Some("f".into())));
        assert_eq!(pattern_key(&e("(lambda x: x)(1)")), PatternKey::Call(None));
        assert_eq!(pattern_key(&e("a or b")), PatternKey::BoolOp(BoolOp::Or));
    }
}
