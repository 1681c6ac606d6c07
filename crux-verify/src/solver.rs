#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Write as _;

use tracing::{info, warn};

use crate::config::{ProverConfig, SolveMode, SolverConfig};
use crate::counterexample_mapper::{CounterexampleMapper, TypedValue};
use crate::error::VerifyError;
use crate::logic::{QuantKind, Symbol, Term, PREAMBLE};
use crate::proof_summary::Verdict;

pub const CONCLUSION_LABEL: &str = "conclusion";

pub fn assumption_label(i: usize) -> String {
    format!("assumption{i}")
}

/// Assumptions (already selected and ordered) plus the conclusion.
#[derive(Clone, Debug)]
pub struct SmtProblem {
    pub assumptions: Vec<Term>,
    pub conclusion: Term,
}

impl SmtProblem {
    pub fn new(assumptions: Vec<Term>, conclusion: Term) -> Self {
        Self {
            assumptions,
            conclusion,
        }
    }

    /// Tracking literals in assertion order, conclusion last.
    pub fn labels(&self) -> Vec<String> {
        (0..self.assumptions.len())
            .map(assumption_label)
            .chain(std::iter::once(CONCLUSION_LABEL.to_string()))
            .collect()
    }

    /// A universal conclusion is refuted through one named constant per bound
    /// variable, so that a model reports the falsifying values. Names already
    /// free in the problem get a numeric suffix.
    fn witnesses(&self) -> Option<(&Term, Vec<(&str, Symbol)>)> {
        let Term::Quant(q) = &self.conclusion else {
            return None;
        };
        if q.kind != QuantKind::Forall {
            return None;
        }
        let mut taken = BTreeMap::new();
        for t in self.assumptions.iter().chain(std::iter::once(&self.conclusion)) {
            t.free_constants(&mut taken);
        }
        let mut out = Vec::with_capacity(q.vars.len());
        for v in &q.vars {
            let mut name = v.name.clone();
            let mut n = 1;
            while taken.contains_key(&name) {
                name = format!("{}_{n}", v.name);
                n += 1;
            }
            taken.insert(name.clone(), v.sort);
            out.push((v.name.as_str(), Symbol::new(name, v.sort)));
        }
        Some((&q.body, out))
    }

    /// The formula asserted against the assumptions.
    fn refutation(&self) -> Term {
        match self.witnesses() {
            Some((body, witnesses)) => {
                let map = witnesses.into_iter().map(|(var, c)| (var, Term::Const(c))).collect();
                Term::not(body.substitute(&map))
            }
            None => Term::not(self.conclusion.clone()),
        }
    }

    /// Names of the constants a model of the refutation must interpret.
    pub fn witness_names(&self) -> Vec<String> {
        self.witnesses()
            .map(|(_, ws)| ws.into_iter().map(|(_, c)| c.name).collect())
            .unwrap_or_default()
    }

    /// The conclusion's failure at candidate `values`: same assumptions, with
    /// the witnesses pinned where the value can be written down. Unsat means
    /// the values really falsify the conclusion. `None` when nothing could be
    /// pinned.
    pub fn witness_check(&self, values: &BTreeMap<String, TypedValue>) -> Option<SmtProblem> {
        let (body, witnesses) = self.witnesses()?;
        let mut pinned = 0;
        let map: HashMap<&str, Term> = witnesses
            .into_iter()
            .map(|(var, c)| match values.get(&c.name).and_then(value_term) {
                Some(value) => {
                    pinned += 1;
                    (var, value)
                }
                None => (var, Term::Const(c)),
            })
            .collect();
        (pinned > 0).then(|| SmtProblem::new(self.assumptions.clone(), Term::not(body.substitute(&map))))
    }

    fn header(&self, refutation: &Term) -> String {
        let mut constants = BTreeMap::new();
        for t in self.assumptions.iter().chain(std::iter::once(refutation)) {
            t.free_constants(&mut constants);
        }
        let mut out = String::from(PREAMBLE);
        for (name, sort) in constants {
            let _ = writeln!(out, "(declare-fun {name} () {sort})");
        }
        out
    }

    /// Each assertion guarded by its label, for checking under assumptions.
    pub fn tracked_text(&self) -> String {
        let refutation = self.refutation();
        let mut out = self.header(&refutation);
        for (i, a) in self.assumptions.iter().enumerate() {
            let label = assumption_label(i);
            let _ = writeln!(out, "(declare-const {label} Bool)");
            let _ = writeln!(out, "(assert (=> {label} {a}))");
        }
        let _ = writeln!(out, "(declare-const {CONCLUSION_LABEL} Bool)");
        let _ = writeln!(out, "(assert (=> {CONCLUSION_LABEL} {refutation}))");
        out
    }

    /// Plain assertions.
    pub fn untracked_text(&self) -> String {
        let refutation = self.refutation();
        let mut out = self.header(&refutation);
        for a in &self.assumptions {
            let _ = writeln!(out, "(assert {a})");
        }
        let _ = writeln!(out, "(assert {refutation})");
        out
    }

    /// The repro file: the untracked problem plus the commands to run it.
    pub fn repro_text(&self) -> String {
        let mut out = self.untracked_text();
        out.push_str("(check-sat)\n(get-model)\n");
        out
    }
}

/// Raw solver answer, before interpretation.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendResult {
    Unsat { core: Option<Vec<String>> },
    Sat { model: Option<String> },
    /// `model` is the candidate the solver stopped at, if it kept one.
    Unknown { reason: String, model: Option<String> },
}

/// Source-level value back to a term. Function handles and unrecognised
/// values have no closed form.
fn value_term(value: &TypedValue) -> Option<Term> {
    Some(match value {
        TypedValue::None => Term::none(),
        TypedValue::Bool(b) => Term::bool_value(*b),
        TypedValue::Int(n) => Term::int_value(*n),
        TypedValue::Tuple(elems) => elems
            .iter()
            .try_fold(Term::empty(), |acc, e| Some(Term::cons(acc, value_term(e)?)))?,
        TypedValue::Undefined => Term::undef(),
        TypedValue::Func(_) | TypedValue::Opaque(_) => return None,
    })
}

pub trait SmtBackend {
    fn check(&mut self, problem: &SmtProblem, mode: SolveMode) -> Result<BackendResult, VerifyError>;
}

impl<B: SmtBackend + ?Sized> SmtBackend for &mut B {
    fn check(&mut self, problem: &SmtProblem, mode: SolveMode) -> Result<BackendResult, VerifyError> {
        (**self).check(problem, mode)
    }
}

impl<B: SmtBackend + ?Sized> SmtBackend for Box<B> {
    fn check(&mut self, problem: &SmtProblem, mode: SolveMode) -> Result<BackendResult, VerifyError> {
        (**self).check(problem, mode)
    }
}

/// Fallback when compiled without `--features crux-verify/z3`.
///
/// This keeps the workspace buildable on machines without Z3.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoZ3Backend;

impl SmtBackend for NoZ3Backend {
    fn check(&mut self, _problem: &SmtProblem, _mode: SolveMode) -> Result<BackendResult, VerifyError> {
        Err(VerifyError::solver(
            "Z3 backend is not enabled. Rebuild with `--features crux-verify/z3`.",
        ))
    }
}

/// Replays canned answers and records what it was asked. For tests and
/// dry runs.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    answers: VecDeque<BackendResult>,
    /// `(mode, tracked text)` per call.
    pub seen: Vec<(SolveMode, String)>,
}

impl ScriptedBackend {
    pub fn new(answers: impl IntoIterator<Item = BackendResult>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            seen: Vec::new(),
        }
    }
}

impl SmtBackend for ScriptedBackend {
    fn check(&mut self, problem: &SmtProblem, mode: SolveMode) -> Result<BackendResult, VerifyError> {
        self.seen.push((mode, problem.tracked_text()));
        self.answers
            .pop_front()
            .ok_or_else(|| VerifyError::solver("scripted backend has no answer left"))
    }
}

/// Backend for this build: Z3 with the `z3` feature, otherwise the fallback.
pub fn default_backend(config: &SolverConfig) -> Box<dyn SmtBackend> {
    #[cfg(feature = "z3")]
    {
        Box::new(z3_backend::Z3Backend::new(config.clone()))
    }
    #[cfg(not(feature = "z3"))]
    {
        let _ = config;
        Box::new(NoZ3Backend)
    }
}

/// Run `problem` and interpret the answer.
///
/// In tracked mode an unsat answer must have `conclusion` in its core;
/// otherwise the assumptions are contradictory on their own.
pub fn solve(
    backend: &mut dyn SmtBackend,
    problem: &SmtProblem,
    config: &ProverConfig,
    mapper: &CounterexampleMapper,
) -> Result<Verdict, VerifyError> {
    if config.mode == SolveMode::Repro {
        std::fs::write(&config.repro_path, problem.repro_text()).map_err(|source| VerifyError::Io {
            path: config.repro_path.clone(),
            source,
        })?;
        info!(path = %config.repro_path.display(), "wrote repro smt file");
    }

    match backend.check(problem, config.mode)? {
        BackendResult::Unsat { core } => Ok(Verdict::Proved {
            core: checked_core(core, config.mode)?,
        }),
        BackendResult::Sat { model } => {
            let counterexample = model.as_deref().map(|m| mapper.map_model(m)).unwrap_or_default();
            info!(counterexample = %mapper.describe(&counterexample), "counterexample");
            Ok(Verdict::Refuted { model, counterexample })
        }
        BackendResult::Unknown {
            reason,
            model: Some(model),
        } if reason.to_ascii_lowercase().contains("incomplete") => {
            confirm_candidate(backend, problem, config, mapper, reason, model)
        }
        BackendResult::Unknown { reason, .. } => classify_unknown(reason),
    }
}

/// Empty in repro mode, where nothing is tracked.
fn checked_core(core: Option<Vec<String>>, mode: SolveMode) -> Result<Vec<String>, VerifyError> {
    match mode {
        SolveMode::Repro => Ok(Vec::new()),
        SolveMode::Tracked => {
            let core = core.ok_or_else(|| VerifyError::solver("unsat answer without a core"))?;
            if !core.iter().any(|l| l == CONCLUSION_LABEL) {
                return Err(VerifyError::Soundness { core });
            }
            Ok(core)
        }
    }
}

/// Quantifier instantiation ran out without a conflict, leaving a candidate
/// model. The candidate is a counterexample when the assumptions refute the
/// conclusion at its values.
fn confirm_candidate(
    backend: &mut dyn SmtBackend,
    problem: &SmtProblem,
    config: &ProverConfig,
    mapper: &CounterexampleMapper,
    reason: String,
    model: String,
) -> Result<Verdict, VerifyError> {
    let counterexample = mapper.map_model(&model);
    let Some(check) = problem.witness_check(&counterexample) else {
        return classify_unknown(reason);
    };
    match backend.check(&check, config.mode)? {
        BackendResult::Unsat { core } => {
            checked_core(core, config.mode)?;
            info!(counterexample = %mapper.describe(&counterexample), "confirmed counterexample");
            Ok(Verdict::Refuted {
                model: Some(model),
                counterexample,
            })
        }
        _ => classify_unknown(reason),
    }
}

/// Timeouts, cancellation and incompleteness are verdicts; a reported
/// exception is a failure.
fn classify_unknown(reason: String) -> Result<Verdict, VerifyError> {
    let lower = reason.to_ascii_lowercase();
    if ["timeout", "canceled", "cancelled", "interrupted"].iter().any(|k| lower.contains(k)) {
        warn!(%reason, "solver gave up");
        return Ok(Verdict::Unknown { reason });
    }
    if lower.contains("exception") || lower.contains("error") {
        return Err(VerifyError::solver(reason));
    }
    warn!(%reason, "solver returned unknown");
    Ok(Verdict::Unknown { reason })
}

#[cfg(feature = "z3")]
pub mod z3_backend {
    use super::{BackendResult, SmtBackend, SmtProblem};
    use crate::config::{SolveMode, SolverConfig};
    use crate::error::VerifyError;

    use z3::{ast::Bool, Config, Context, ContextHandle, Params, SatResult, Solver};

    pub struct Z3Backend {
        ctx: &'static Context,
        config: SolverConfig,
    }

    impl Z3Backend {
        pub fn new(config: SolverConfig) -> Self {
            let mut cfg = Config::new();
            cfg.set_model_generation(true);
            // Leaked so the interrupt handle can outlive any borrow of the
            // backend and be moved to another thread.
            let ctx: &'static Context = Box::leak(Box::new(Context::new(&cfg)));
            Self { ctx, config }
        }

        /// Cancels a running check from another thread; the check then
        /// reports unknown with reason "canceled".
        pub fn interrupt_handle(&self) -> ContextHandle<'static> {
            self.ctx.handle()
        }

        fn solver(&self) -> Solver<'static> {
            let solver = Solver::new(self.ctx);
            let mut params = Params::new(self.ctx);
            params.set_u32("timeout", self.config.timeout_ms);
            params.set_bool("unsat_core", self.config.unsat_core);
            params.set_bool("smt.mbqi", self.config.mbqi);
            params.set_bool("smt.macro_finder", self.config.macro_finder);
            params.set_bool("smt.pull_nested_quantifiers", self.config.pull_nested_quantifiers);
            solver.set_params(&params);
            solver
        }
    }

    impl Default for Z3Backend {
        fn default() -> Self {
            Self::new(SolverConfig::default())
        }
    }

    impl SmtBackend for Z3Backend {
        fn check(&mut self, problem: &SmtProblem, mode: SolveMode) -> Result<BackendResult, VerifyError> {
            let solver = self.solver();
            let sat = match mode {
                SolveMode::Tracked => {
                    solver.from_string(problem.tracked_text());
                    let lits: Vec<Bool<'static>> = problem
                        .labels()
                        .into_iter()
                        .map(|l| Bool::new_const(self.ctx, l))
                        .collect();
                    solver.check_assumptions(&lits)
                }
                SolveMode::Repro => {
                    solver.from_string(problem.untracked_text());
                    solver.check()
                }
            };
            Ok(match sat {
                SatResult::Unsat => BackendResult::Unsat {
                    core: (mode == SolveMode::Tracked)
                        .then(|| solver.get_unsat_core().iter().map(|b| b.to_string()).collect()),
                },
                SatResult::Sat => BackendResult::Sat {
                    model: solver.get_model().map(|m| m.to_string()),
                },
                SatResult::Unknown => BackendResult::Unknown {
                    reason: solver.get_reason_unknown().unwrap_or_else(|| "unknown".to_string()),
                    model: solver.get_model().map(|m| m.to_string()),
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::{Op, Sort};

    fn problem() -> SmtProblem {
        let x = Term::constant("x", Sort::Unk);
        let axiom = Term::forall(vec![Symbol::unk("y")], Term::truthy(Term::constant("y", Sort::Unk)));
        SmtProblem::new(vec![axiom, Term::tester(Op::IsInt, x.clone())], Term::truthy(x))
    }

    #[test]
    fn tracked_text_labels_every_assertion() {
        let text = problem().tracked_text();
        assert!(text.starts_with(PREAMBLE));
        assert!(text.contains("(declare-fun x () Unk)\n"));
        assert!(!text.contains("(declare-fun y "));
        assert!(text.contains("(assert (=> assumption1 ((_ is int) x)))"));
        assert!(text.ends_with("(declare-const conclusion Bool)\n(assert (=> conclusion (not (T x))))\n"));
        assert_eq!(problem().labels(), vec!["assumption0", "assumption1", "conclusion"]);
    }

    #[test]
    fn repro_text_is_untracked_and_runnable() {
        let text = problem().repro_text();
        assert!(!text.contains("assumption0"));
        assert!(text.contains("(assert (not (T x)))\n"));
        assert!(text.ends_with("(check-sat)\n(get-model)\n"));
    }

    fn run(answer: BackendResult) -> Result<Verdict, VerifyError> {
        let mut backend = ScriptedBackend::new([answer]);
        solve(&mut backend, &problem(), &ProverConfig::default(), &CounterexampleMapper::new())
    }

    #[test]
    fn core_without_conclusion_is_a_soundness_failure() {
        let err = run(BackendResult::Unsat {
            core: Some(vec!["assumption0".into()]),
        })
        .unwrap_err();
        assert!(matches!(err, VerifyError::Soundness { ref core } if core == &["assumption0"]));
        let ok = run(BackendResult::Unsat {
            core: Some(vec!["assumption1".into(), "conclusion".into()]),
        })
        .unwrap();
        assert!(ok.is_proved());
    }

    #[test]
    fn sat_maps_the_model() {
        let v = run(BackendResult::Sat {
            model: Some("(define-fun x () Unk (bool true))".into()),
        })
        .unwrap();
        match v {
            Verdict::Refuted { counterexample, .. } => assert_eq!(counterexample.len(), 1),
            other => panic!("expected refutation, got {other:?}"),
        }
    }

    #[test]
    fn unknown_reasons_are_classified() {
        assert!(matches!(
            run(BackendResult::Unknown {
                reason: "timeout".into(),
                model: None,
            }),
            Ok(Verdict::Unknown { .. })
        ));
        assert!(matches!(
            run(BackendResult::Unknown {
                reason: "canceled".into(),
                model: None,
            }),
            Ok(Verdict::Unknown { .. })
        ));
        assert!(matches!(
            run(BackendResult::Unknown {
                reason: "(incomplete quantifiers)".into(),
                model: None,
            }),
            Ok(Verdict::Unknown { .. })
        ));
        assert!(matches!(
            run(BackendResult::Unknown {
                reason: "Z3 exception: out of memory".into(),
                model: None,
            }),
            Err(VerifyError::Solver { .. })
        ));
    }

    fn universal() -> SmtProblem {
        let goal = Term::forall(vec![Symbol::unk("x")], Term::truthy(Term::constant("x", Sort::Unk)));
        SmtProblem::new(vec![Term::tester(Op::IsFunc, Term::constant("f", Sort::Unk))], goal)
    }

    fn incomplete(model: &str) -> BackendResult {
        BackendResult::Unknown {
            reason: "(incomplete quantifiers)".into(),
            model: Some(model.into()),
        }
    }

    #[test]
    fn universal_conclusion_is_refuted_through_named_constants() {
        let text = universal().tracked_text();
        assert!(text.contains("(declare-fun x () Unk)\n"));
        assert!(text.ends_with("(assert (=> conclusion (not (T x))))\n"));
        assert_eq!(universal().witness_names(), vec!["x"]);

        let clash = SmtProblem::new(vec![Term::truthy(Term::constant("x", Sort::Unk))], universal().conclusion);
        assert_eq!(clash.witness_names(), vec!["x_1"]);
        assert!(clash.untracked_text().ends_with("(assert (not (T x_1)))\n"));
    }

    #[test]
    fn confirmed_candidate_is_a_refutation() {
        let mut backend = ScriptedBackend::new([
            incomplete("(define-fun x () Unk (int 2))"),
            BackendResult::Unsat {
                core: Some(vec!["conclusion".into()]),
            },
        ]);
        let v = solve(&mut backend, &universal(), &ProverConfig::default(), &CounterexampleMapper::new()).unwrap();
        match v {
            Verdict::Refuted {
                model: Some(_),
                counterexample,
            } => assert_eq!(counterexample["x"], TypedValue::Int(2)),
            other => panic!("expected refutation, got {other:?}"),
        }
        assert!(backend.seen[1].1.ends_with("(assert (=> conclusion (not (not (T (int 2))))))\n"));
    }

    #[test]
    fn unconfirmed_candidate_stays_unknown() {
        let mut backend = ScriptedBackend::new([
            incomplete("(define-fun x () Unk (int 2))"),
            BackendResult::Unknown {
                reason: "(incomplete quantifiers)".into(),
                model: None,
            },
        ]);
        let v = solve(&mut backend, &universal(), &ProverConfig::default(), &CounterexampleMapper::new()).unwrap();
        assert!(matches!(v, Verdict::Unknown { .. }));

        // A function handle cannot be pinned, so there is nothing to confirm.
        let mut backend = ScriptedBackend::new([incomplete("(define-fun x () Unk (func Func!val!0))")]);
        let v = solve(&mut backend, &universal(), &ProverConfig::default(), &CounterexampleMapper::new()).unwrap();
        assert!(matches!(v, Verdict::Unknown { .. }));
        assert_eq!(backend.seen.len(), 1);
    }

    #[test]
    fn candidate_refuted_only_by_the_assumptions_is_unsound() {
        let mut backend = ScriptedBackend::new([
            incomplete("(define-fun x () Unk none)"),
            BackendResult::Unsat {
                core: Some(vec!["assumption0".into()]),
            },
        ]);
        let err = solve(&mut backend, &universal(), &ProverConfig::default(), &CounterexampleMapper::new()).unwrap_err();
        assert!(matches!(err, VerifyError::Soundness { .. }));
    }

    #[test]
    fn repro_mode_writes_the_problem() {
        let dir = std::env::temp_dir().join(format!("crux-repro-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("repro.smt2");
        let config = ProverConfig {
            repro_path: path.clone(),
            ..ProverConfig::default().with_mode(SolveMode::Repro)
        };
        let mut backend = ScriptedBackend::new([BackendResult::Unsat { core: None }]);
        let v = solve(&mut backend, &problem(), &config, &CounterexampleMapper::new()).unwrap();
        assert_eq!(v, Verdict::Proved { core: Vec::new() });
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, problem().repro_text());
        assert_eq!(backend.seen[0].0, SolveMode::Repro);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn no_z3_backend_reports_how_to_enable_it() {
        let err = NoZ3Backend.check(&problem(), SolveMode::Tracked).unwrap_err();
        assert!(err.to_string().contains("--features crux-verify/z3"));
    }
}
