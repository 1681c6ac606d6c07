#![forbid(unsafe_code)]

use crux_ast::FunctionDef;

use crate::compile::find_weight;
use crate::prover::{Statement, StatementKind};

/// Ranks the optional statements of a proof attempt. Lower scores are kept
/// first; required statements are never scored.
pub trait ScoringOracle: Sync {
    fn score(&self, statements: &mut [Statement], conclusion: &FunctionDef);
}

/// Every optional statement scores the same, so the expansion order decides.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrivialOracle;

impl ScoringOracle for TrivialOracle {
    fn score(&self, statements: &mut [Statement], _conclusion: &FunctionDef) {
        for s in statements.iter_mut().filter(|s| !s.kind.is_required()) {
            s.score = Some(0.0);
        }
    }
}

/// Prefers cheap facts: function tags and lambda definitions first, then
/// assertions by their declared quantifier weight, with assertions about
/// functions the conclusion calls directly ranked ahead of the rest.
#[derive(Clone, Copy, Debug, Default)]
pub struct WeightOracle;

impl ScoringOracle for WeightOracle {
    fn score(&self, statements: &mut [Statement], conclusion: &FunctionDef) {
        for s in statements.iter_mut().filter(|s| !s.kind.is_required()) {
            let base = match s.kind {
                StatementKind::FunctionTag | StatementKind::Support => 0.0,
                _ => s
                    .source
                    .as_deref()
                    .and_then(find_weight)
                    .map_or(1.0, f64::from),
            };
            let direct = s
                .source
                .as_deref()
                .and_then(|src| src.name.node.strip_prefix("_assert_").or(src.name.node.strip_prefix("_assertdef_")))
                .is_some_and(|target| !target.is_empty() && conclusion.body.mentions_name(target));
            s.score = Some(if direct { base } else { base + 0.5 });
        }
    }
}

/// Required statements first (in order), then the `cap` best scored ones.
/// Unscored optional statements sort last.
pub fn select(mut statements: Vec<Statement>, cap: usize) -> Vec<Statement> {
    let (mut required, mut optional): (Vec<_>, Vec<_>) =
        statements.drain(..).partition(|s| s.kind.is_required());
    optional.sort_by(|a, b| {
        let key = |s: &Statement| s.score.unwrap_or(f64::INFINITY);
        key(a).total_cmp(&key(b))
    });
    optional.truncate(cap);
    required.extend(optional);
    required
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::Term;
    use crux_parse::parse_function;
    use std::sync::Arc;

    fn stmt(kind: StatementKind, src: Option<&str>) -> Statement {
        Statement {
            source: src.map(|s| Arc::new(parse_function(s).unwrap())),
            formula: Term::Bool(true),
            kind,
            score: None,
        }
    }

    #[test]
    fn trivial_oracle_leaves_required_unscored() {
        let conclusion = parse_function("def _assert_c(x): return f(x)").unwrap();
        let mut ss = vec![stmt(StatementKind::Structural, None), stmt(StatementKind::FunctionTag, None)];
        TrivialOracle.score(&mut ss, &conclusion);
        assert_eq!(ss[0].score, None);
        assert_eq!(ss[1].score, Some(0.0));
    }

    #[test]
    fn weight_oracle_prefers_direct_and_light_assertions() {
        let conclusion = parse_function("def _assert_c(x): return f(x)").unwrap();
        let mut ss = vec![
            stmt(StatementKind::Assertion, Some("@ch_weight(3)\ndef _assert_f(x): return x")),
            stmt(StatementKind::Assertion, Some("def _assert_g(x): return x")),
            stmt(StatementKind::Assertion, Some("def _assert_f(x): return x")),
        ];
        WeightOracle.score(&mut ss, &conclusion);
        assert_eq!(ss[0].score, Some(3.0));
        assert_eq!(ss[1].score, Some(1.5));
        assert_eq!(ss[2].score, Some(1.0));
    }

    #[test]
    fn select_keeps_required_and_truncates_the_rest() {
        let mut ss = vec![
            stmt(StatementKind::Assertion, None),
            stmt(StatementKind::Global, None),
            stmt(StatementKind::Assertion, None),
            stmt(StatementKind::Assertion, None),
        ];
        ss[0].score = Some(2.0);
        ss[2].score = None;
        ss[3].score = Some(1.0);
        let kept = select(ss, 2);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0].kind, StatementKind::Global);
        assert_eq!(kept[1].score, Some(1.0));
        assert_eq!(kept[2].score, Some(2.0));
    }
}
