#![forbid(unsafe_code)]

use std::path::PathBuf;

/// How a problem is handed to the solver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveMode {
    /// Labelled assertions, checked under assumptions so an unsat core is
    /// available.
    Tracked,
    /// Plain assertions; the exact problem is also written to the repro file.
    Repro,
}

/// Fixed solver parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SolverConfig {
    pub timeout_ms: u32,
    pub unsat_core: bool,
    /// Model-based instantiation. Off, a saturated search stops with a
    /// candidate model instead of running into the timeout.
    pub mbqi: bool,
    pub macro_finder: bool,
    pub pull_nested_quantifiers: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            unsat_core: true,
            mbqi: false,
            macro_finder: true,
            pull_nested_quantifiers: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProverConfig {
    /// Knowledge-expansion rounds before giving up on new definitions.
    pub max_rounds: usize,
    /// Scored (non-required) statements kept after sorting.
    pub max_scored_axioms: usize,
    pub mode: SolveMode,
    /// Overwritten on every repro run.
    pub repro_path: PathBuf,
    pub solver: SolverConfig,
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            max_rounds: 10,
            max_scored_axioms: 120,
            mode: SolveMode::Tracked,
            repro_path: PathBuf::from("repro.smt2"),
            solver: SolverConfig::default(),
        }
    }
}

impl ProverConfig {
    /// Defaults, with `CRUX_REPRO=1|true` selecting repro mode and
    /// `CRUX_REPRO_PATH` overriding the file it writes.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if matches!(var("CRUX_REPRO").as_deref(), Some("1" | "true")) {
            cfg.mode = SolveMode::Repro;
        }
        if let Some(path) = var("CRUX_REPRO_PATH").filter(|p| !p.is_empty()) {
            cfg.repro_path = PathBuf::from(path);
        }
        cfg
    }

    pub fn with_mode(mut self, mode: SolveMode) -> Self {
        self.mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_match_the_documented_caps() {
        let cfg = ProverConfig::default();
        assert_eq!(cfg.max_rounds, 10);
        assert_eq!(cfg.max_scored_axioms, 120);
        assert_eq!(cfg.mode, SolveMode::Tracked);
        assert_eq!(cfg.solver.timeout_ms, 10_000);
        assert!(!cfg.solver.pull_nested_quantifiers);
        assert!(!cfg.solver.mbqi);
        assert!(cfg.solver.macro_finder);
    }

    #[test]
    fn repro_toggle_accepts_one_or_true() {
        assert_eq!(ProverConfig::from_vars(vars(&[("CRUX_REPRO", "1")])).mode, SolveMode::Repro);
        assert_eq!(ProverConfig::from_vars(vars(&[("CRUX_REPRO", "true")])).mode, SolveMode::Repro);
        assert_eq!(ProverConfig::from_vars(vars(&[("CRUX_REPRO", "yes")])).mode, SolveMode::Tracked);
        assert_eq!(ProverConfig::from_vars(vars(&[])).mode, SolveMode::Tracked);
    }

    #[test]
    fn repro_path_override() {
        let cfg = ProverConfig::from_vars(vars(&[("CRUX_REPRO_PATH", "/tmp/p.smt2")]));
        assert_eq!(cfg.repro_path, PathBuf::from("/tmp/p.smt2"));
    }
}
