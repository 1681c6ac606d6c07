//! Proof reports.
//!
//! After an attempt we keep, per asserted statement, its source and whether
//! the solver needed it, so a proof can be audited without re-running it.

use std::collections::BTreeMap;
use std::fmt;

use crate::counterexample_mapper::TypedValue;
use crate::prover::{ExpansionStats, StatementKind};

#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
    /// Unsat. `core` holds the labels the solver reported (empty in repro
    /// mode, where nothing is tracked).
    Proved { core: Vec<String> },
    /// Sat, or refuted by an externally supplied counterexample.
    Refuted {
        model: Option<String>,
        counterexample: BTreeMap<String, TypedValue>,
    },
    /// Timeout, cancellation or solver incompleteness.
    Unknown { reason: String },
}

impl Verdict {
    pub fn is_proved(&self) -> bool {
        matches!(self, Verdict::Proved { .. })
    }

    pub fn is_refuted(&self) -> bool {
        matches!(self, Verdict::Refuted { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Proved { .. } => "proved",
            Verdict::Refuted { .. } => "refuted",
            Verdict::Unknown { .. } => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReportEntry {
    /// Solver label, `assumption<i>`.
    pub label: String,
    pub kind: StatementKind,
    /// Source text of the assertion the statement came from.
    pub source: String,
    pub in_core: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProofReport {
    pub conclusion: String,
    /// Statements with a source definition, in assertion order.
    pub entries: Vec<ReportEntry>,
    pub verdict: Verdict,
    pub stats: ExpansionStats,
}

impl ProofReport {
    pub fn used(&self) -> impl Iterator<Item = &ReportEntry> {
        self.entries.iter().filter(|e| e.in_core)
    }
}

impl fmt::Display for ProofReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {}", self.verdict.label(), self.conclusion)?;
        writeln!(
            f,
            "  expansion: {} round(s), {} function(s)",
            self.stats.rounds, self.stats.handled
        )?;
        match &self.verdict {
            Verdict::Proved { .. } => {
                for e in self.used() {
                    writeln!(f, "  uses {}", e.source)?;
                }
            }
            Verdict::Refuted { counterexample, .. } => {
                for (name, value) in counterexample {
                    writeln!(f, "  {name} = {}", value.display_compact())?;
                }
            }
            Verdict::Unknown { reason } => writeln!(f, "  reason: {reason}")?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(label: &str, source: &str, in_core: bool) -> ReportEntry {
        ReportEntry {
            label: label.into(),
            kind: StatementKind::Assertion,
            source: source.into(),
            in_core,
        }
    }

    #[test]
    fn proved_report_lists_core_sources() {
        let report = ProofReport {
            conclusion: "_assert_c(x): isint(x)".into(),
            entries: vec![entry("assumption0", "_assert_a(x): a(x)", true), entry("assumption1", "_assert_b(x): b(x)", false)],
            verdict: Verdict::Proved {
                core: vec!["assumption0".into(), "conclusion".into()],
            },
            stats: ExpansionStats {
                rounds: 2,
                handled: 3,
                skipped: 0,
            },
        };
        let text = report.to_string();
        assert!(text.starts_with("proved: _assert_c(x): isint(x)\n"), "{text}");
        assert!(text.contains("uses _assert_a(x): a(x)"));
        assert!(!text.contains("_assert_b"));
        assert_eq!(report.used().count(), 1);
    }

    #[test]
    fn refuted_report_shows_counterexample() {
        let mut cex = BTreeMap::new();
        cex.insert("x".to_string(), TypedValue::Bool(true));
        let report = ProofReport {
            conclusion: "c".into(),
            entries: Vec::new(),
            verdict: Verdict::Refuted {
                model: None,
                counterexample: cex,
            },
            stats: ExpansionStats::default(),
        };
        assert!(report.to_string().contains("  x = True"));
        assert!(report.verdict.is_refuted());
        assert!(!report.verdict.is_proved());
    }
}
