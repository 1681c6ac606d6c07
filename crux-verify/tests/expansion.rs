use crux_parse::{parse_function, parse_module};
use crux_verify::{
    BackendResult, ProverConfig, Prover, Registry, ScriptedBackend, SolveMode, Verdict, VerifyError, WeightOracle,
};
use proptest::prelude::*;

fn chain(n: usize) -> String {
    let mut src = String::new();
    for i in 0..=n {
        src.push_str(&format!("def step{i}(v): return ...\n"));
    }
    for i in 0..n {
        src.push_str(&format!("def _assert_step{i}(v: isint): return isint(step{}(v))\n", i + 1));
    }
    src
}

proptest! {
    #[test]
    fn expansion_respects_the_round_cap(n in 0usize..8, max_rounds in 1usize..12) {
        let registry = Registry::builder().source(&chain(n)).unwrap().build().unwrap();
        let goal = parse_function("def _assert_goal(v: isint): return isint(step0(v))").unwrap();
        let config = ProverConfig { max_rounds, ..ProverConfig::default() };
        let problem = Prover::new(&registry).with_config(config).build_problem(&goal).unwrap();
        prop_assert!(problem.stats.rounds <= max_rounds);

        let pulled = problem
            .statements
            .iter()
            .filter(|s| s.source.as_ref().is_some_and(|d| d.name.node.starts_with("_assert_step")))
            .count();
        // step<i> is reached in round i + 1, bringing its assertion along.
        prop_assert_eq!(pulled, n.min(max_rounds));
    }
}

#[test]
fn tracked_problem_text_carries_labels_and_preamble() {
    let registry = Registry::prelude().unwrap();
    let goal = parse_function("def _assert_sum(x: isint, y: isint): return isint(x + y)").unwrap();
    let mut backend = ScriptedBackend::new([BackendResult::Unsat {
        core: Some(vec!["conclusion".into()]),
    }]);
    let report = Prover::new(&registry).prove_assertion_fn(&goal, &mut backend).unwrap();
    assert!(report.verdict.is_proved());

    let (mode, text) = &backend.seen[0];
    assert_eq!(*mode, SolveMode::Tracked);
    assert!(text.contains("(declare-datatypes ((Unk 0))"));
    assert!(text.contains("(declare-fun _op_Add () Unk)"));
    assert!(text.contains("(declare-fun isint () Unk)"));
    assert!(text.contains("(assert (=> assumption0 "));
    // The conclusion's variables become constants the model can name.
    assert!(text.contains("(declare-fun x () Unk)"));
    assert!(text.contains("(declare-fun y () Unk)"));
    assert!(text.contains("(assert (=> conclusion (not (=> (and (T (App isint (cons empty x)))"));
    assert!(!text.contains("(forall ((x Unk) (y Unk))"));
}

#[test]
fn soundness_failure_surfaces_as_an_error() {
    let registry = Registry::prelude().unwrap();
    let goal = parse_function("def _assert_goal(x): return isint(x)").unwrap();
    let mut backend = ScriptedBackend::new([BackendResult::Unsat {
        core: Some(vec!["assumption0".into(), "assumption3".into()]),
    }]);
    let err = Prover::new(&registry).prove_assertion_fn(&goal, &mut backend).unwrap_err();
    match err {
        VerifyError::Soundness { core } => assert_eq!(core.len(), 2),
        other => panic!("expected soundness failure, got {other}"),
    }
}

#[test]
fn weight_oracle_drives_selection() {
    let module = parse_module(
        "def pick(t): return ...\n\
         @ch_weight(5)\n\
         def _assert_pick(t: istuple): return isint(pick(t))\n\
         def _assert_pick(t: istuple): return isdefined(pick(t))\n",
    )
    .unwrap();
    let registry = Registry::builder().module(module).build().unwrap();
    let goal = parse_function("def _assert_goal(t: istuple): return isint(pick(t))").unwrap();
    let oracle = WeightOracle;
    let prover = Prover::new(&registry).with_oracle(&oracle);
    let problem = prover.build_problem(&goal).unwrap();
    let heavy = problem
        .statements
        .iter()
        .find(|s| s.source.as_ref().is_some_and(|d| d.name.node == "_assert_pick" && !d.decorators.is_empty()))
        .unwrap();
    assert_eq!(heavy.score, Some(5.0));

    let config = ProverConfig {
        max_scored_axioms: 0,
        ..ProverConfig::default()
    };
    let mut backend = ScriptedBackend::new([BackendResult::Sat { model: None }]);
    let report = Prover::new(&registry)
        .with_config(config)
        .prove_assertion_fn(&goal, &mut backend)
        .unwrap();
    // Only required statements survive a zero cap.
    assert!(report.entries.iter().all(|e| e.kind.is_required()));
    assert!(matches!(report.verdict, Verdict::Refuted { .. }));
}

#[test]
fn undefined_operator_is_reported_with_its_name() {
    let registry = Registry::prelude().unwrap();
    let goal = parse_function("def _assert_goal(x: isint): return isint(x ** 2)").unwrap();
    let err = Prover::new(&registry).build_problem(&goal).unwrap_err();
    assert!(err.to_string().contains("_op_Pow"), "{err}");
}
