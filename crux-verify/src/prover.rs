#![forbid(unsafe_code)]

//! Knowledge expansion.
//!
//! A proof attempt starts from the compiled conclusion and grows a set of
//! statements: every definition the formulas mention pulls in its assertions,
//! which may mention further definitions, until nothing new appears or the
//! round cap is hit.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crux_ast::{FunctionDef, Module, NodeId};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::compile::{describe, BindingEnv, Compiler, DefKey, Role};
use crate::config::ProverConfig;
use crate::counterexample_mapper::{CounterexampleMapper, TypedValue};
use crate::error::VerifyError;
use crate::logic::{Op, QuantKind, Sort, Symbol, Term};
use crate::oracle::{select, ScoringOracle, TrivialOracle};
use crate::proof_summary::{ProofReport, ReportEntry, Verdict};
use crate::registry::Registry;
use crate::solver::{assumption_label, solve, SmtBackend, SmtProblem};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Argument-list laws every problem needs.
    Structural,
    /// Module-global `_assert_` functions.
    Global,
    /// `_assert_<f>` for a referenced `f`.
    Assertion,
    /// `_assertdef_<f>`, from annotations.
    Definitional,
    /// `is-func(f)` for a referenced `f`.
    FunctionTag,
    /// Lambda definitions produced while compiling.
    Support,
}

impl StatementKind {
    /// Required statements are always asserted and never scored.
    pub fn is_required(self) -> bool {
        matches!(self, StatementKind::Structural | StatementKind::Global)
    }
}

#[derive(Clone, Debug)]
pub struct Statement {
    pub source: Option<Arc<FunctionDef>>,
    pub formula: Term,
    pub kind: StatementKind,
    pub score: Option<f64>,
}

impl Statement {
    pub fn new(source: Option<Arc<FunctionDef>>, formula: Term, kind: StatementKind) -> Self {
        Self {
            source,
            formula,
            kind,
            score: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExpansionStats {
    /// Rounds that ran, including the last one that found nothing new.
    pub rounds: usize,
    /// Definitions whose knowledge was pulled in.
    pub handled: usize,
    /// Statements left out because their weight was malformed.
    pub skipped: usize,
}

/// Everything an attempt asserts, before selection.
#[derive(Clone, Debug)]
pub struct ProofProblem {
    pub conclusion: Term,
    pub statements: Vec<Statement>,
    pub stats: ExpansionStats,
    /// Constant names standing for definitions, not for values.
    pub function_constants: Vec<String>,
}

/// `r + () = r`, `() + r = r`, `(*g, *(x,)) = (*g, x)` and
/// `(*g, *(*r, x)) = (*(*g, *r), x)`, each triggered on its left side.
pub fn structural_baseline() -> Vec<Term> {
    let var = |n: &str| Term::constant(n, Sort::Unk);
    let (r, g, x) = (var("r"), var("g"), var("x"));
    let law = |vars: &[&str], lhs: Term, rhs: Term| {
        Term::quantify(
            QuantKind::Forall,
            vars.iter().map(|v| Symbol::unk(*v)).collect(),
            Term::eq(lhs.clone(), rhs),
            vec![vec![lhs]],
            None,
        )
    };
    vec![
        law(&["r"], Term::concat(r.clone(), Term::empty()), r.clone()),
        law(&["r"], Term::concat(Term::empty(), r.clone()), r.clone()),
        law(
            &["x", "g"],
            Term::concat(g.clone(), Term::cons(Term::empty(), x.clone())),
            Term::cons(g.clone(), x.clone()),
        ),
        law(
            &["x", "g", "r"],
            Term::concat(g.clone(), Term::cons(r.clone(), x.clone())),
            Term::cons(Term::concat(g, r), x),
        ),
    ]
}

/// One `_assert_*` function's outcome in a module check.
#[derive(Debug)]
pub struct ModuleCheck {
    pub name: String,
    pub outcome: Result<ProofReport, VerifyError>,
}

/// Proves assertion functions against a registry.
pub struct Prover<'r> {
    registry: &'r Registry,
    oracle: &'r dyn ScoringOracle,
    config: ProverConfig,
}

impl<'r> Prover<'r> {
    /// Default configuration and [`TrivialOracle`]. Use
    /// `with_config(ProverConfig::from_env())` to honour the environment.
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            oracle: &TrivialOracle,
            config: ProverConfig::default(),
        }
    }

    pub fn with_oracle(mut self, oracle: &'r dyn ScoringOracle) -> Self {
        self.oracle = oracle;
        self
    }

    pub fn with_config(mut self, config: ProverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ProverConfig {
        &self.config
    }

    /// Compile the conclusion, expand knowledge around it and score the
    /// result. No solver involved.
    pub fn build_problem(&self, conclusion: &FunctionDef) -> Result<ProofProblem, VerifyError> {
        let defs = self.registry.defs();
        let compiler = Compiler::new(self.registry);
        let mut env = BindingEnv::new();
        let mut stats = ExpansionStats::default();

        let conclusion_formula = compiler
            .compile_assertion(&mut env, conclusion, Role::Conclusion)?
            .ok_or_else(|| VerifyError::unsupported("conclusion could not be weighed", conclusion.span))?;

        let mut statements: Vec<Statement> = structural_baseline()
            .into_iter()
            .map(|f| Statement::new(None, f, StatementKind::Structural))
            .collect();
        for global in defs.global_assertions() {
            if global.id == conclusion.id {
                continue;
            }
            self.push_assertion(&compiler, &mut env, global, StatementKind::Global, &mut statements, &mut stats)?;
        }

        let mut handled: HashSet<NodeId> = HashSet::new();
        for round in 0..self.config.max_rounds {
            absorb_support(&mut env, &mut statements);
            stats.rounds = round + 1;

            let border: HashSet<NodeId> = env
                .referenced()
                .filter_map(|k| match k {
                    DefKey::Function(id) if !handled.contains(&id) => Some(id),
                    _ => None,
                })
                .collect();

            let mut added = false;
            for info in defs.functions() {
                let Some(def) = info.definition() else {
                    continue;
                };
                if !border.contains(&def.id) {
                    continue;
                }
                added = true;
                handled.insert(def.id);
                for assertion in info.assertions() {
                    if assertion.id == conclusion.id {
                        continue;
                    }
                    self.push_assertion(
                        &compiler,
                        &mut env,
                        assertion,
                        StatementKind::Assertion,
                        &mut statements,
                        &mut stats,
                    )?;
                }
                if let Some(constant) = env.constant(DefKey::Function(def.id)) {
                    statements.push(Statement::new(
                        None,
                        Term::tester(Op::IsFunc, constant.clone()),
                        StatementKind::FunctionTag,
                    ));
                }
                if let Some(da) = info.definitional_assertion() {
                    self.push_assertion(
                        &compiler,
                        &mut env,
                        da,
                        StatementKind::Definitional,
                        &mut statements,
                        &mut stats,
                    )?;
                }
            }
            if !added {
                info!(
                    rounds = round,
                    functions = handled.len(),
                    "completed knowledge expansion"
                );
                break;
            }
        }
        absorb_support(&mut env, &mut statements);
        stats.handled = handled.len();

        self.oracle.score(&mut statements, conclusion);

        let function_constants = env
            .referenced()
            .filter(|k| matches!(k, DefKey::Function(_)))
            .filter_map(|k| match env.constant(k) {
                Some(Term::Const(s)) => Some(s.name.clone()),
                _ => None,
            })
            .collect();

        Ok(ProofProblem {
            conclusion: conclusion_formula,
            statements,
            stats,
            function_constants,
        })
    }

    fn push_assertion(
        &self,
        compiler: &Compiler<'_>,
        env: &mut BindingEnv,
        def: &Arc<FunctionDef>,
        kind: StatementKind,
        statements: &mut Vec<Statement>,
        stats: &mut ExpansionStats,
    ) -> Result<(), VerifyError> {
        match compiler.compile_assertion(env, def, Role::Axiom)? {
            Some(formula) => statements.push(Statement::new(Some(def.clone()), formula, kind)),
            None => stats.skipped += 1,
        }
        Ok(())
    }

    /// Build, select and solve.
    pub fn prove_assertion_fn(
        &self,
        conclusion: &FunctionDef,
        backend: &mut dyn SmtBackend,
    ) -> Result<ProofReport, VerifyError> {
        let described = describe(conclusion);
        info!(conclusion = %described, "checking assertion");

        let problem = self.build_problem(conclusion)?;
        let selected = select(problem.statements, self.config.max_scored_axioms);
        debug!(statements = selected.len(), "selected statements");
        let smt = SmtProblem::new(
            selected.iter().map(|s| s.formula.clone()).collect(),
            problem.conclusion,
        );

        let mapper = CounterexampleMapper::new().hiding(problem.function_constants);
        let verdict = solve(backend, &smt, &self.config, &mapper)?;

        let core: HashSet<&str> = match &verdict {
            Verdict::Proved { core } => core.iter().map(String::as_str).collect(),
            _ => HashSet::new(),
        };
        let entries: Vec<ReportEntry> = selected
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let source = s.source.as_deref()?;
                let label = assumption_label(i);
                Some(ReportEntry {
                    in_core: core.contains(label.as_str()),
                    label,
                    kind: s.kind,
                    source: describe(source),
                })
            })
            .collect();

        if verdict.is_proved() {
            for e in entries.iter().filter(|e| e.in_core) {
                info!(source = %e.source, "proof core");
            }
        }

        Ok(ProofReport {
            conclusion: described,
            entries,
            verdict,
            stats: problem.stats,
        })
    }

    /// Prove, then reconcile with a counterexample found by other means
    /// (e.g. by running the code). A proof that contradicts one is an error;
    /// otherwise the counterexample wins.
    pub fn check_assertion_fn(
        &self,
        conclusion: &FunctionDef,
        dynamic_counterexample: Option<BTreeMap<String, TypedValue>>,
        backend: &mut dyn SmtBackend,
    ) -> Result<ProofReport, VerifyError> {
        let report = self.prove_assertion_fn(conclusion, backend)?;
        match dynamic_counterexample {
            Some(counterexample) => {
                info!(conclusion = %report.conclusion, "dynamic counterexample found");
                if report.verdict.is_proved() {
                    return Err(VerifyError::CounterexampleConflict {
                        name: conclusion.name.node.clone(),
                    });
                }
                Ok(ProofReport {
                    entries: Vec::new(),
                    verdict: Verdict::Refuted {
                        model: None,
                        counterexample,
                    },
                    ..report
                })
            }
            None => {
                if report.verdict.is_refuted() {
                    warn!(conclusion = %report.conclusion, "cannot prove, but cannot find counterexample");
                }
                Ok(report)
            }
        }
    }

    /// Every `_assert_*` function of `module`, in order. Failures are
    /// reported per function.
    pub fn check_module(&self, module: &Module, backend: &mut dyn SmtBackend) -> Vec<ModuleCheck> {
        assertion_fns(module)
            .map(|f| ModuleCheck {
                name: f.name.node.clone(),
                outcome: self.prove_assertion_fn(f, backend),
            })
            .collect()
    }

    /// Like [`Prover::check_module`], one thread and one backend per
    /// assertion.
    pub fn check_module_parallel<B, F>(&self, module: &Module, factory: F) -> Vec<ModuleCheck>
    where
        F: Fn() -> B + Sync,
        B: SmtBackend,
    {
        let fns: Vec<&FunctionDef> = assertion_fns(module).collect();
        fns.par_iter()
            .map(|f| {
                let mut backend = factory();
                ModuleCheck {
                    name: f.name.node.clone(),
                    outcome: self.prove_assertion_fn(f, &mut backend),
                }
            })
            .collect()
    }
}

fn assertion_fns(module: &Module) -> impl Iterator<Item = &FunctionDef> {
    module.functions.iter().filter(|f| f.name.node.starts_with("_assert_"))
}

fn absorb_support(env: &mut BindingEnv, statements: &mut Vec<Statement>) {
    statements.extend(
        env.take_support()
            .into_iter()
            .map(|f| Statement::new(None, f, StatementKind::Support)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{BackendResult, ScriptedBackend};
    use crux_parse::{parse_function, parse_module};

    fn registry(src: &str) -> Registry {
        Registry::builder().source(src).unwrap().build().unwrap()
    }

    #[test]
    fn baseline_laws_render_with_triggers() {
        let laws = structural_baseline();
        assert_eq!(laws.len(), 4);
        assert_eq!(
            laws[0].to_string(),
            "(forall ((r Unk)) (! (= (Concat r empty) r) :pattern ((Concat r empty))))"
        );
    }

    #[test]
    fn expansion_follows_references_transitively() {
        let reg = registry(
            "def outer(x): return ...\n\
             def inner(x): return ...\n\
             def unrelated(x): return ...\n\
             def _assert_outer(x: isint): return isint(inner(outer(x)))\n\
             def _assert_inner(x: isint): return isint(inner(x))\n\
             def _assert_unrelated(x): return isnone(unrelated(x))\n",
        );
        let goal = parse_function("def _assert_goal(x: isint): return isint(outer(x))").unwrap();
        let problem = Prover::new(&reg).build_problem(&goal).unwrap();
        let sources: Vec<&str> = problem
            .statements
            .iter()
            .filter_map(|s| s.source.as_ref().map(|d| d.name.node.as_str()))
            .collect();
        assert!(sources.contains(&"_assert_outer"));
        assert!(sources.contains(&"_assert_inner"));
        assert!(!sources.contains(&"_assert_unrelated"));
        assert!(problem.stats.rounds <= ProverConfig::default().max_rounds);
        assert!(problem.stats.handled >= 3, "{:?}", problem.stats);
        assert!(problem.function_constants.iter().any(|c| c == "outer"));
    }

    #[test]
    fn required_statements_stay_unscored() {
        let reg = registry("def f(x): return ...\ndef _assert_f(x): return isint(f(x))\n");
        let goal = parse_function("def _assert_goal(x): return isint(f(x))").unwrap();
        let problem = Prover::new(&reg).build_problem(&goal).unwrap();
        for s in &problem.statements {
            assert_eq!(s.score.is_none(), s.kind.is_required(), "{:?}", s.kind);
        }
        assert!(problem.statements.iter().any(|s| s.kind == StatementKind::FunctionTag));
        assert!(problem.statements.iter().any(|s| s.kind == StatementKind::Global));
    }

    #[test]
    fn conclusion_is_not_its_own_axiom() {
        let module = parse_module("def f(x): return ...\ndef _assert_f(x): return isint(f(x))\n").unwrap();
        let goal = module.functions[1].clone();
        let reg = Registry::builder().module(module).build().unwrap();
        let problem = Prover::new(&reg).build_problem(&goal).unwrap();
        assert!(problem
            .statements
            .iter()
            .all(|s| s.source.as_ref().is_none_or(|d| d.id != goal.id)));
    }

    #[test]
    fn round_cap_bounds_expansion() {
        let reg = registry(
            "def a1(x): return ...\ndef a2(x): return ...\ndef a3(x): return ...\n\
             def _assert_a1(x): return isint(a2(x))\n\
             def _assert_a2(x): return isint(a3(x))\n",
        );
        let goal = parse_function("def _assert_goal(x): return isint(a1(x))").unwrap();
        let config = ProverConfig {
            max_rounds: 1,
            ..ProverConfig::default()
        };
        let problem = Prover::new(&reg).with_config(config).build_problem(&goal).unwrap();
        assert_eq!(problem.stats.rounds, 1);
        let sources: Vec<&str> = problem
            .statements
            .iter()
            .filter_map(|s| s.source.as_ref().map(|d| d.name.node.as_str()))
            .collect();
        assert!(sources.contains(&"_assert_a1"));
        assert!(!sources.contains(&"_assert_a2"));
    }

    #[test]
    fn report_marks_core_members() {
        let reg = registry("def f(x): return ...\ndef _assert_f(x): return isint(f(x))\n");
        let goal = parse_function("def _assert_goal(x): return isint(f(x))").unwrap();
        let prover = Prover::new(&reg);
        let selected = select(prover.build_problem(&goal).unwrap().statements, 120);
        let idx = selected
            .iter()
            .position(|s| s.source.as_ref().is_some_and(|d| d.name.node == "_assert_f"))
            .unwrap();
        let mut backend = ScriptedBackend::new([BackendResult::Unsat {
            core: Some(vec![assumption_label(idx), "conclusion".into()]),
        }]);
        let report = prover.prove_assertion_fn(&goal, &mut backend).unwrap();
        assert!(report.verdict.is_proved());
        let used: Vec<&str> = report.used().map(|e| e.source.as_str()).collect();
        assert_eq!(used, vec!["_assert_f(x): isint(f(x))"]);
    }

    #[test]
    fn dynamic_counterexample_conflicts_with_a_proof() {
        let reg = registry("def f(x): return ...\n");
        let goal = parse_function("def _assert_goal(x): return isint(f(x))").unwrap();
        let prover = Prover::new(&reg);
        let mut cex = BTreeMap::new();
        cex.insert("x".to_string(), TypedValue::None);

        let mut backend = ScriptedBackend::new([BackendResult::Unsat {
            core: Some(vec!["conclusion".into()]),
        }]);
        let err = prover
            .check_assertion_fn(&goal, Some(cex.clone()), &mut backend)
            .unwrap_err();
        assert!(matches!(err, VerifyError::CounterexampleConflict { ref name } if name == "_assert_goal"));

        let mut backend = ScriptedBackend::new([BackendResult::Unknown {
            reason: "timeout".into(),
            model: None,
        }]);
        let report = prover.check_assertion_fn(&goal, Some(cex), &mut backend).unwrap();
        assert!(report.verdict.is_refuted());
        assert!(report.entries.is_empty());
    }

    #[test]
    fn module_check_runs_every_assertion() {
        let module = parse_module(
            "def f(x): return ...\n\
             def _assert_f(x): return isint(f(x))\n\
             def _assert_(x): return isbool(x)\n",
        )
        .unwrap();
        let reg = Registry::builder().module(module.clone()).build().unwrap();
        let prover = Prover::new(&reg);
        let mut backend = ScriptedBackend::new([
            BackendResult::Sat { model: None },
            BackendResult::Unknown {
                reason: "timeout".into(),
                model: None,
            },
        ]);
        let results = prover.check_module(&module, &mut backend);
        assert_eq!(results.len(), 2);
        assert!(results[0].outcome.as_ref().unwrap().verdict.is_refuted());
        assert!(matches!(
            results[1].outcome.as_ref().unwrap().verdict,
            Verdict::Unknown { .. }
        ));

        let parallel = prover.check_module_parallel(&module, || {
            ScriptedBackend::new([BackendResult::Unsat {
                core: Some(vec!["conclusion".into()]),
            }])
        });
        assert_eq!(parallel.len(), 2);
        assert!(parallel.iter().all(|c| c.outcome.as_ref().is_ok_and(|r| r.verdict.is_proved())));
        assert_eq!(parallel[0].name, "_assert_f");
    }

    #[test]
    fn unknown_names_fail_the_attempt() {
        let reg = Registry::prelude().unwrap();
        let goal = parse_function("def _assert_goal(x): return missing(x)").unwrap();
        let err = Prover::new(&reg).build_problem(&goal).unwrap_err();
        assert!(matches!(err, VerifyError::Definition { .. }), "{err}");
    }
}
