#![forbid(unsafe_code)]

//! Static prover for pure, annotated functions.
//!
//! Definitions are registered once in a [`Registry`]. Proving an assertion
//! function compiles it to a first-order formula over a single tagged-union
//! sort, expands the knowledge it depends on and hands the result to an SMT
//! backend.

pub mod compile;
pub mod config;
pub mod counterexample_mapper;
pub mod error;
pub mod intrinsic;
pub mod logic;
pub mod normalize;
pub mod oracle;
pub mod proof_summary;
pub mod prover;
pub mod registry;
pub mod scope;
pub mod solver;

pub use compile::{BindingEnv, Compiler, DefKey, Role};
pub use config::{ProverConfig, SolveMode, SolverConfig};
pub use counterexample_mapper::{CounterexampleMapper, TypedValue};
pub use error::VerifyError;
pub use oracle::{ScoringOracle, TrivialOracle, WeightOracle};
pub use proof_summary::{ProofReport, ReportEntry, Verdict};
pub use prover::{ExpansionStats, ModuleCheck, ProofProblem, Prover, Statement, StatementKind};
pub use registry::{FnInfo, ModuleInfo, Registry, RegistryBuilder};
pub use solver::{default_backend, BackendResult, NoZ3Backend, ScriptedBackend, SmtBackend, SmtProblem};
#[cfg(feature = "z3")]
pub use solver::z3_backend::Z3Backend;
