//! # ctmc-csl
//!
//! Numerical CSL model checking for sparse continuous-time Markov chains (CTMCs).
//!
//! Given a rate matrix, state sets and (optionally) a reward model, the crate computes dense
//! per-state vectors of probabilities, expected rewards and long-run averages:
//!
//! - time-bounded until `phi U[t,t'] psi` via **uniformization** and **Fox-Glynn** truncation,
//! - instantaneous and cumulative rewards at a time bound,
//! - unbounded until, reachability rewards / times and total rewards via the embedded DTMC,
//! - long-run averages of indicators or rewards via a **BSCC** decomposition.
//!
//! It does not parse models or formulas; callers hand over in-memory matrices and state sets.
//!
//! ## Public invariants (must not change)
//!
//! - **One entry per state**: every result vector has exactly one entry per row of the rate
//!   matrix, in state-index order.
//! - **Uniformized matrices are sub-stochastic**: the uniformization rate is the maximal
//!   relevant exit rate inflated by [`uniformization::UNIFORMIZATION_INFLATION`]; a
//!   non-positive rate is reported as [`Error::InvalidState`], never silently clamped.
//! - **No hidden state between queries**: every scratch matrix and vector is created per call.
//! - **Capabilities are explicit**: a query that needs `exp` (transient analysis) or value
//!   iteration fails with [`Error::Unsupported`] on domains that lack it (see [`value`]).
//!
//! ## References (conceptual anchors)
//!
//! - Baier, Haverkort, Hermanns, Katoen, *Model-checking algorithms for continuous-time Markov
//!   chains* (IEEE TSE 2003): the interval case split for bounded until.
//! - Fox & Glynn, *Computing Poisson probabilities* (CACM 1988), and Jansen,
//!   *Understanding Fox and Glynn's "Computing Poisson probabilities"* (2011): truncation points.
//! - Stewart, *Introduction to the Numerical Solution of Markov Chains* (1994): stationary
//!   distributions and relative value iteration.
//!
//! ## Module map
//!
//! - `csl`: the query object [`CtmcCslChecker`] (main entry point)
//! - `lra`: long-run averages over BSCCs (value iteration or stationary linear system)
//! - `transient`: uniformization-based transient / cumulative iteration
//! - `fox_glynn`: truncated Poisson weights
//! - `uniformization`: uniformization rate and uniformized matrices
//! - `dtmc`: embedded discrete-time helpers (until, next, reachability / total rewards)
//! - `solver`: linear equation solver traits, Gauss-Seidel and elimination
//! - `graph`: qualitative reachability and bottom SCCs
//! - `matrix`, `states`, `rewards`: sparse matrices, state sets, reward models
//! - `config`: tolerances and strategy selection

pub mod config;
pub mod csl;
pub mod dtmc;
pub mod fox_glynn;
pub mod graph;
pub mod lra;
pub mod matrix;
pub mod rewards;
pub mod solver;
pub mod states;
pub mod transient;
pub mod uniformization;
pub mod value;

pub use config::{CslConfig, LinearSolverMethod, LraMethod};
pub use csl::CtmcCslChecker;
pub use matrix::SparseMatrix;
pub use rewards::RewardModel;
pub use states::StateSet;
pub use value::{Capabilities, NumericDomain, ValueType};

/// ctmc-csl error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported operation for this numeric domain: {0}")]
    Unsupported(&'static str),
    #[error("invalid property: {0}")]
    InvalidProperty(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("solver requirements not checked: {0}")]
    UncheckedRequirement(String),
    #[error("shape mismatch: {0}")]
    Shape(&'static str),
    #[error("domain error: {0}")]
    Domain(&'static str),
    #[error("no convergence after {iterations} iterations")]
    NoConvergence { iterations: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
