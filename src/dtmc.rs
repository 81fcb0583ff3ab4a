//! Discrete-time reductions on the embedded chain.
//!
//! Unbounded CTMC properties only depend on the jump chain, so they are answered here on a
//! probability matrix. Every function returns one entry per state.

use crate::graph::{prob_0, prob_01, prob_1, prob_greater_0};
use crate::matrix::{constrained_row_sums, submatrix, transpose, Multiplier, SparseMatrix};
use crate::solver::{solve_system, LinearEquationSolverFactory, LinearSystem, SolutionBounds};
use crate::states::{gather, scatter, StateSet};
use crate::value::{from_count, ValueType};
use crate::{Error, Result};
use ndarray::Array1;

/// `P(phi U psi)` per state.
pub fn compute_until_probabilities<V: ValueType>(
    transition_matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    phi: &StateSet,
    psi: &StateSet,
    factory: &dyn LinearEquationSolverFactory<V>,
) -> Result<Array1<V>> {
    let n = transition_matrix.rows();
    let (prob0, prob1) = prob_01(backward, phi, psi)?;
    let maybe = prob0.or(&prob1).complement();
    tracing::debug!(
        prob0 = prob0.count(),
        prob1 = prob1.count(),
        maybe = maybe.count(),
        "until: qualitative precomputation"
    );

    let mut result = Array1::from_elem(n, V::zero());
    for s in prob1.iter() {
        result[s] = V::one();
    }
    if !maybe.is_empty() {
        let a = submatrix(transition_matrix, &maybe, &maybe, false)?;
        let b = constrained_row_sums(transition_matrix, &maybe, &prob1)?;
        let mut x = Array1::from_elem(maybe.count(), V::zero());
        solve_system(
            factory,
            LinearSystem::FixedPoint(a),
            &mut x,
            &b,
            SolutionBounds::between(V::zero(), V::one()),
        )?;
        scatter(&mut result, &maybe, &x);
    }
    Ok(result)
}

/// Forward view of `phi U psi` from a uniform start over `initial`.
///
/// States that can still reach `psi` through `phi` get their expected number of visits before
/// the run leaves them, each `psi` state gets the probability of being where the run stops,
/// and every other state is zero.
pub fn compute_all_until_probabilities<V: ValueType>(
    transition_matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    initial: &StateSet,
    phi: &StateSet,
    psi: &StateSet,
    factory: &dyn LinearEquationSolverFactory<V>,
) -> Result<Array1<V>> {
    let n = transition_matrix.rows();
    initial.check_len(n, "initial states do not match the model")?;
    if initial.is_empty() {
        return Err(Error::Domain("at least one initial state is required"));
    }
    let start = V::one() / from_count::<V>(initial.count())?;
    let maybe = prob_greater_0(backward, phi, psi)?.and_not(psi);
    tracing::debug!(
        initial = initial.count(),
        maybe = maybe.count(),
        "all until: qualitative precomputation"
    );

    let mut result = Array1::from_elem(n, V::zero());
    for s in initial.iter() {
        if psi.contains(s) {
            result[s] = start.clone();
        }
    }
    if maybe.is_empty() {
        return Ok(result);
    }

    // Expected visits: x = P_maybe^T · x + initial mass.
    let a = transpose(&submatrix(transition_matrix, &maybe, &maybe, false)?);
    let b: Array1<V> = maybe
        .iter()
        .map(|s| if initial.contains(s) { start.clone() } else { V::zero() })
        .collect();
    let mut visits = b.clone();
    solve_system(
        factory,
        LinearSystem::FixedPoint(a),
        &mut visits,
        &b,
        SolutionBounds::at_least(V::zero()),
    )?;

    for (k, s) in maybe.iter().enumerate() {
        if let Some(row) = transition_matrix.outer_view(s) {
            for (c, p) in row.iter() {
                if psi.contains(c) {
                    result[c] = result[c].clone() + visits[k].clone() * p.clone();
                }
            }
        }
    }
    scatter(&mut result, &maybe, &visits);
    Ok(result)
}

/// Probability of being in `next_states` after one step.
pub fn compute_next_probabilities<V: ValueType>(
    transition_matrix: &SparseMatrix<V>,
    next_states: &StateSet,
) -> Result<Array1<V>> {
    next_states.check_len(transition_matrix.cols(), "next states do not match the model")?;
    let indicator = Array1::from_shape_fn(next_states.len(), |s| {
        if next_states.contains(s) {
            V::one()
        } else {
            V::zero()
        }
    });
    Ok(Multiplier::new(transition_matrix).multiply(&indicator, None))
}

/// Expected reward collected (one `rewards[s]` per visit of `s`) until reaching `targets`.
///
/// States that miss `targets` with positive probability get infinity; domains without an
/// infinite value fail with [`Error::Unsupported`] in that case.
pub fn compute_reachability_rewards<V: ValueType>(
    transition_matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    rewards: &Array1<V>,
    targets: &StateSet,
    factory: &dyn LinearEquationSolverFactory<V>,
) -> Result<Array1<V>> {
    let n = transition_matrix.rows();
    if rewards.len() != n {
        return Err(Error::Shape("rewards must have one entry per state"));
    }
    let all = StateSet::full(n);
    let greater0 = prob_greater_0(backward, &all, targets)?;
    let infinity = prob_1(backward, &all, targets, &greater0)?.complement();
    let maybe = targets.or(&infinity).complement();
    tracing::debug!(
        targets = targets.count(),
        infinity = infinity.count(),
        maybe = maybe.count(),
        "reachability rewards: qualitative precomputation"
    );

    let mut result = Array1::from_elem(n, V::zero());
    if !infinity.is_empty() {
        let inf = V::infinity().ok_or(Error::Unsupported(
            "infinite expected rewards are not representable in this numeric domain",
        ))?;
        for s in infinity.iter() {
            result[s] = inf.clone();
        }
    }
    if !maybe.is_empty() {
        let a = submatrix(transition_matrix, &maybe, &maybe, false)?;
        let b = gather(rewards, &maybe);
        let mut x = Array1::from_elem(maybe.count(), V::zero());
        solve_system(
            factory,
            LinearSystem::FixedPoint(a),
            &mut x,
            &b,
            SolutionBounds::at_least(V::zero()),
        )?;
        scatter(&mut result, &maybe, &x);
    }
    Ok(result)
}

/// Expected reward collected over the whole (infinite) run.
///
/// Equivalent to reachability rewards towards the states that can no longer reach any
/// state with a nonzero reward.
pub fn compute_total_rewards<V: ValueType>(
    transition_matrix: &SparseMatrix<V>,
    backward: &SparseMatrix<V>,
    rewards: &Array1<V>,
    factory: &dyn LinearEquationSolverFactory<V>,
) -> Result<Array1<V>> {
    let n = transition_matrix.rows();
    if rewards.len() != n {
        return Err(Error::Shape("rewards must have one entry per state"));
    }
    let rewarding = StateSet::from_predicate(n, |s| !rewards[s].is_zero());
    let targets = prob_0(backward, &StateSet::full(n), &rewarding)?;
    compute_reachability_rewards(transition_matrix, backward, rewards, &targets, factory)
}
