//! Linear equation solvers.
//!
//! Two problem formats exist:
//!
//! - **fixed point**: `x = A·x + b` (what reachability and LRA reductions naturally produce),
//! - **equation system**: `A·x = b`.
//!
//! A [`LinearEquationSolverFactory`] declares which format its solvers expect, and
//! [`LinearSystem::into_format`] converts between them (`A ↦ I - A`). Factories can also declare
//! [`SolverRequirements`]; callers discharge the ones they can (e.g. by supplying bounds) and
//! must fail with [`Error::UncheckedRequirement`] on any critical one that remains.

use crate::config::{CslConfig, LinearSolverMethod};
use crate::matrix::{identity_minus, SparseMatrix};
use crate::value::{max_value, min_value, within_precision, ValueType};
use crate::{Error, Result};
use ndarray::Array1;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProblemFormat {
    FixedPoint,
    EquationSystem,
}

/// A square system matrix tagged with its format.
#[derive(Debug, Clone)]
pub enum LinearSystem<V> {
    /// `A` in `x = A·x + b`.
    FixedPoint(SparseMatrix<V>),
    /// `A` in `A·x = b`.
    Equations(SparseMatrix<V>),
}

impl<V: ValueType> LinearSystem<V> {
    pub fn format(&self) -> ProblemFormat {
        match self {
            LinearSystem::FixedPoint(_) => ProblemFormat::FixedPoint,
            LinearSystem::Equations(_) => ProblemFormat::EquationSystem,
        }
    }

    /// The matrix in `format`, converting when the tags differ.
    pub fn into_format(self, format: ProblemFormat) -> Result<SparseMatrix<V>> {
        match (self, format) {
            (LinearSystem::FixedPoint(m), ProblemFormat::FixedPoint)
            | (LinearSystem::Equations(m), ProblemFormat::EquationSystem) => Ok(m),
            (LinearSystem::FixedPoint(m), ProblemFormat::EquationSystem)
            | (LinearSystem::Equations(m), ProblemFormat::FixedPoint) => identity_minus(&m),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequirementKind {
    LowerBounds,
    UpperBounds,
    Acyclic,
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RequirementKind::LowerBounds => "lower bounds",
            RequirementKind::UpperBounds => "upper bounds",
            RequirementKind::Acyclic => "acyclic system",
        })
    }
}

/// Preconditions a solver needs before `solve_equations` may be called.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SolverRequirements {
    enabled: Vec<(RequirementKind, bool)>,
}

impl SolverRequirements {
    pub fn none() -> Self {
        Self::default()
    }

    /// Enable `kind`; `critical` requirements must be discharged before solving.
    pub fn require(mut self, kind: RequirementKind, critical: bool) -> Self {
        self.clear(kind);
        self.enabled.push((kind, critical));
        self
    }

    pub fn clear(&mut self, kind: RequirementKind) {
        self.enabled.retain(|(k, _)| *k != kind);
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    pub fn has_enabled_critical_requirement(&self) -> bool {
        self.enabled.iter().any(|(_, critical)| *critical)
    }

    pub fn enabled_as_string(&self) -> String {
        self.enabled
            .iter()
            .map(|(k, critical)| {
                if *critical {
                    format!("{k} (critical)")
                } else {
                    k.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A solver bound to one system matrix.
pub trait LinearEquationSolver<V: ValueType>: Send {
    /// Solve for `x`, using its incoming content as the initial guess where that matters.
    fn solve_equations(&mut self, x: &mut Array1<V>, b: &Array1<V>) -> Result<()>;

    fn set_lower_bound(&mut self, lower: V);

    fn set_upper_bound(&mut self, upper: V);

    fn set_bounds(&mut self, lower: V, upper: V) {
        self.set_lower_bound(lower);
        self.set_upper_bound(upper);
    }

    fn requirements(&self) -> SolverRequirements {
        SolverRequirements::none()
    }
}

pub trait LinearEquationSolverFactory<V: ValueType>: Send + Sync {
    fn problem_format(&self) -> ProblemFormat;

    fn requirements(&self) -> SolverRequirements {
        SolverRequirements::none()
    }

    /// A solver for `matrix`, which must already be in [`Self::problem_format`].
    fn create(&self, matrix: SparseMatrix<V>) -> Result<Box<dyn LinearEquationSolver<V>>>;
}

/// Gauss-Seidel on `x = A·x + b`, clamping iterates to the configured bounds.
#[derive(Debug, Clone)]
pub struct GaussSeidelSolver<V> {
    matrix: SparseMatrix<V>,
    lower: Option<V>,
    upper: Option<V>,
    precision: f64,
    relative: bool,
    max_iterations: usize,
}

impl<V: ValueType> GaussSeidelSolver<V> {
    pub fn new(matrix: SparseMatrix<V>, precision: f64, relative: bool, max_iterations: usize) -> Self {
        Self {
            matrix,
            lower: None,
            upper: None,
            precision,
            relative,
            max_iterations,
        }
    }

    fn clamp(&self, mut v: V) -> V {
        if let Some(lower) = &self.lower {
            v = max_value(v, lower.clone());
        }
        if let Some(upper) = &self.upper {
            v = min_value(v, upper.clone());
        }
        v
    }
}

impl<V: ValueType> LinearEquationSolver<V> for GaussSeidelSolver<V> {
    fn solve_equations(&mut self, x: &mut Array1<V>, b: &Array1<V>) -> Result<()> {
        let n = self.matrix.rows();
        if self.matrix.cols() != n || x.len() != n || b.len() != n {
            return Err(Error::Shape("Gauss-Seidel needs a square system and matching vectors"));
        }
        for iteration in 1..=self.max_iterations {
            let mut converged = true;
            for i in 0..n {
                let mut diagonal = V::zero();
                let mut sum = b[i].clone();
                if let Some(row) = self.matrix.outer_view(i) {
                    for (j, a) in row.iter() {
                        if j == i {
                            diagonal = a.clone();
                        } else {
                            sum = sum + a.clone() * x[j].clone();
                        }
                    }
                }
                let denominator = V::one() - diagonal;
                if denominator.is_zero() {
                    return Err(Error::InvalidState(format!(
                        "Gauss-Seidel: row {i} is a pure self-loop"
                    )));
                }
                let new = self.clamp(sum / denominator);
                if converged && !within_precision(&x[i], &new, self.precision, self.relative) {
                    converged = false;
                }
                x[i] = new;
            }
            if converged {
                tracing::debug!(iterations = iteration, "Gauss-Seidel converged");
                return Ok(());
            }
        }
        Err(Error::NoConvergence {
            iterations: self.max_iterations,
        })
    }

    fn set_lower_bound(&mut self, lower: V) {
        self.lower = Some(lower);
    }

    fn set_upper_bound(&mut self, upper: V) {
        self.upper = Some(upper);
    }
}

/// Gaussian elimination with partial pivoting on `A·x = b`.
///
/// Dense internally; meant for the moderately sized systems this crate produces (single BSCCs,
/// maybe-state sets). Bounds are accepted and ignored: the solution is exact up to round-off.
#[derive(Debug, Clone)]
pub struct EliminationSolver<V> {
    matrix: SparseMatrix<V>,
}

impl<V: ValueType> EliminationSolver<V> {
    pub fn new(matrix: SparseMatrix<V>) -> Self {
        Self { matrix }
    }
}

impl<V: ValueType> LinearEquationSolver<V> for EliminationSolver<V> {
    fn solve_equations(&mut self, x: &mut Array1<V>, b: &Array1<V>) -> Result<()> {
        let n = self.matrix.rows();
        if self.matrix.cols() != n || x.len() != n || b.len() != n {
            return Err(Error::Shape("elimination needs a square system and matching vectors"));
        }

        // Augmented dense rows [A | b].
        let mut rows: Vec<Vec<V>> = Vec::with_capacity(n);
        for (i, row) in self.matrix.outer_iterator().enumerate() {
            let mut dense = vec![V::zero(); n + 1];
            for (j, a) in row.iter() {
                dense[j] = a.clone();
            }
            dense[n] = b[i].clone();
            rows.push(dense);
        }

        for col in 0..n {
            let mut pivot = col;
            for r in col + 1..n {
                if rows[r][col].abs() > rows[pivot][col].abs() {
                    pivot = r;
                }
            }
            if rows[pivot][col].is_zero() {
                return Err(Error::InvalidState(format!(
                    "singular linear system (column {col})"
                )));
            }
            rows.swap(col, pivot);
            let (upper, lower) = rows.split_at_mut(col + 1);
            let pivot_row = &upper[col];
            for row in lower.iter_mut() {
                if row[col].is_zero() {
                    continue;
                }
                let factor = row[col].clone() / pivot_row[col].clone();
                for k in col..=n {
                    row[k] = row[k].clone() - factor.clone() * pivot_row[k].clone();
                }
            }
        }

        for i in (0..n).rev() {
            let mut s = rows[i][n].clone();
            for j in i + 1..n {
                s = s - rows[i][j].clone() * x[j].clone();
            }
            x[i] = s / rows[i][i].clone();
        }
        tracing::debug!(size = n, "solved linear system by elimination");
        Ok(())
    }

    fn set_lower_bound(&mut self, _lower: V) {}

    fn set_upper_bound(&mut self, _upper: V) {}
}

/// Creates the bundled solver selected by [`CslConfig::solver_method`].
#[derive(Debug, Clone)]
pub struct GeneralLinearSolverFactory {
    method: LinearSolverMethod,
    precision: f64,
    relative: bool,
    max_iterations: usize,
}

impl GeneralLinearSolverFactory {
    pub fn from_config(config: &CslConfig) -> Self {
        Self {
            method: config.solver_method(),
            precision: config.precision,
            relative: config.relative,
            max_iterations: config.max_iterations,
        }
    }

    pub fn method(&self) -> LinearSolverMethod {
        self.method
    }
}

impl<V: ValueType> LinearEquationSolverFactory<V> for GeneralLinearSolverFactory {
    fn problem_format(&self) -> ProblemFormat {
        match self.method {
            LinearSolverMethod::GaussSeidel => ProblemFormat::FixedPoint,
            LinearSolverMethod::Elimination => ProblemFormat::EquationSystem,
        }
    }

    fn create(&self, matrix: SparseMatrix<V>) -> Result<Box<dyn LinearEquationSolver<V>>> {
        Ok(match self.method {
            LinearSolverMethod::GaussSeidel => Box::new(GaussSeidelSolver::new(
                matrix,
                self.precision,
                self.relative,
                self.max_iterations,
            )),
            LinearSolverMethod::Elimination => Box::new(EliminationSolver::new(matrix)),
        })
    }
}

/// Optional bounds on every entry of the solution.
#[derive(Debug, Clone, PartialEq)]
pub struct SolutionBounds<V> {
    pub lower: Option<V>,
    pub upper: Option<V>,
}

impl<V> SolutionBounds<V> {
    pub fn none() -> Self {
        Self {
            lower: None,
            upper: None,
        }
    }

    pub fn at_least(lower: V) -> Self {
        Self {
            lower: Some(lower),
            upper: None,
        }
    }

    pub fn between(lower: V, upper: V) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
        }
    }
}

/// Convert `system` to the factory's format, check requirements and solve.
///
/// Known bounds discharge the matching requirements and are handed to the solver. `x` carries
/// the initial guess in and the solution out.
pub fn solve_system<V: ValueType>(
    factory: &dyn LinearEquationSolverFactory<V>,
    system: LinearSystem<V>,
    x: &mut Array1<V>,
    b: &Array1<V>,
    bounds: SolutionBounds<V>,
) -> Result<()> {
    let mut requirements = factory.requirements();
    if bounds.lower.is_some() {
        requirements.clear(RequirementKind::LowerBounds);
    }
    if bounds.upper.is_some() {
        requirements.clear(RequirementKind::UpperBounds);
    }
    if requirements.has_enabled_critical_requirement() {
        return Err(Error::UncheckedRequirement(requirements.enabled_as_string()));
    }

    let format = factory.problem_format();
    let matrix = system.into_format(format)?;
    tracing::debug!(size = matrix.rows(), ?format, "invoking linear equation solver");
    let mut solver = factory.create(matrix)?;
    if let Some(lower) = bounds.lower {
        solver.set_lower_bound(lower);
    }
    if let Some(upper) = bounds.upper {
        solver.set_upper_bound(upper);
    }
    solver.solve_equations(x, b)
}
