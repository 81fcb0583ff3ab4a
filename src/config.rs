//! Tolerances and strategy knobs shared by all queries.

use crate::value::NumericDomain;
use crate::{Error, Result};

/// How the long-run average of a non-trivial BSCC is computed.
///
/// Both strategies compute the same quantity up to solver precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LraMethod {
    /// Relative value iteration on the aperiodic uniformized BSCC.
    ValueIteration,
    /// Stationary distribution from the balance equations plus a normalization row.
    LinearSystem,
}

/// Which bundled linear equation solver [`crate::solver::GeneralLinearSolverFactory`] creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverMethod {
    /// Gauss-Seidel on the fixed-point form `x = A·x + b`.
    ///
    /// Only converges for contractive systems (reachability over transient states). Do not
    /// pair it with [`LraMethod::LinearSystem`]: the normalization row makes the stationary
    /// system non-contractive.
    GaussSeidel,
    /// Gaussian elimination with partial pivoting on `A·x = b`. Exact for exact domains.
    Elimination,
}

/// Query configuration.
#[derive(Debug, Clone)]
pub struct CslConfig {
    /// Overall precision budget. Fox-Glynn truncation uses an eighth of it.
    pub precision: f64,
    /// Relative (`true`) or absolute termination criterion for iterative methods.
    pub relative: bool,
    /// LRA strategy; `None` picks the default for the numeric domain.
    pub lra_method: Option<LraMethod>,
    /// Linear solver; `None` picks [`LinearSolverMethod::Elimination`].
    pub solver_method: Option<LinearSolverMethod>,
    /// Iteration bound for Gauss-Seidel and value iteration.
    pub max_iterations: usize,
}

impl Default for CslConfig {
    fn default() -> Self {
        Self {
            precision: 1e-6,
            relative: true,
            lra_method: None,
            solver_method: None,
            max_iterations: 1_000_000,
        }
    }
}

impl CslConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.precision.is_finite() || self.precision <= 0.0 || self.precision >= 1.0 {
            return Err(Error::Domain("precision must be in (0, 1)"));
        }
        if self.max_iterations == 0 {
            return Err(Error::Domain("max_iterations must be >= 1"));
        }
        Ok(())
    }

    /// Precision handed to Fox-Glynn; the weights are combined with several later roundings.
    pub fn fox_glynn_precision(&self) -> f64 {
        self.precision / 8.0
    }

    /// Effective LRA strategy for `domain`.
    pub fn lra_method_for(&self, domain: NumericDomain) -> LraMethod {
        self.lra_method.unwrap_or(match domain {
            NumericDomain::Floating => LraMethod::ValueIteration,
            NumericDomain::Exact | NumericDomain::Parametric => LraMethod::LinearSystem,
        })
    }

    pub fn solver_method(&self) -> LinearSolverMethod {
        self.solver_method.unwrap_or(LinearSolverMethod::Elimination)
    }
}
