//! Long-run averages via a bottom-SCC decomposition.
//!
//! In the long run a chain ends up in some BSCC and, inside it, behaves like an irreducible
//! chain with a unique stationary distribution. So:
//!
//! 1. every BSCC gets one long-run average (its stationary expectation of the value function),
//! 2. every other state averages the values of the BSCCs it is absorbed into, weighted by the
//!    absorption probabilities (a reachability-reward style linear system).
//!
//! The per-BSCC value is computed either by relative value iteration on an aperiodic
//! uniformization of the BSCC, or from the balance equations `π·Q = 0, Σ π = 1`.

use crate::config::{CslConfig, LraMethod};
use crate::graph::bottom_sccs;
use crate::matrix::{
    compute_probability_matrix, from_triplets, submatrix, transpose, Multiplier, SparseMatrix,
};
use crate::solver::{solve_system, LinearEquationSolverFactory, LinearSystem, SolutionBounds};
use crate::states::{scatter, StateSet};
use crate::value::{convert, from_count, max_value, min_value, ValueType};
use crate::{Error, Result};
use ndarray::{Array1, ArrayView1};

/// Long-run average of `value_getter` per state.
///
/// With `exit_rates` the matrix is a CTMC rate matrix; without, it is read as a DTMC
/// probability matrix (self-loop on the "diagonal" of every row, exit rate one).
pub fn compute_long_run_averages<V: ValueType>(
    matrix: &SparseMatrix<V>,
    value_getter: impl Fn(usize) -> V,
    exit_rates: Option<&ArrayView1<V>>,
    config: &CslConfig,
    factory: &dyn LinearEquationSolverFactory<V>,
) -> Result<Array1<V>> {
    let n = matrix.rows();
    if matrix.cols() != n {
        return Err(Error::Shape("LRA needs a square matrix"));
    }
    if exit_rates.is_some_and(|e| e.len() != n) {
        return Err(Error::Shape("exit rates must have one entry per state"));
    }
    let probability_matrix = match exit_rates {
        Some(exit) => compute_probability_matrix(matrix, exit)?,
        None => matrix.clone(),
    };

    let bsccs = bottom_sccs(matrix);
    tracing::info!(bsccs = bsccs.len(), states = n, "found bottom SCCs");
    let placement = Placement::new(n, &bsccs);

    let method = config.lra_method_for(V::DOMAIN);
    let backward = transpose(matrix);
    let mut result = Array1::from_elem(n, V::zero());
    let mut bscc_values: Vec<V> = Vec::with_capacity(bsccs.len());

    for (index, members) in bsccs.iter().enumerate() {
        let value = match members.as_slice() {
            [only] => value_getter(*only),
            _ => match method {
                LraMethod::ValueIteration => lra_for_bscc_value_iteration(
                    matrix,
                    members,
                    |s| placement.local_in(s, index),
                    &value_getter,
                    exit_rates,
                    config,
                )?,
                LraMethod::LinearSystem => lra_for_bscc_linear_system(
                    &backward,
                    members,
                    |s| placement.local_in(s, index),
                    &value_getter,
                    exit_rates,
                    factory,
                )?,
            },
        };
        if members.len() > 1 {
            tracing::debug!(index, size = members.len(), value = value.approx(), "BSCC long-run average");
        }
        for &s in members {
            result[s] = value.clone();
        }
        bscc_values.push(value);
    }

    let transient = StateSet::from_predicate(n, |s| placement.bscc[s].is_none());
    let Some(first) = bscc_values.first() else {
        return Ok(result);
    };
    if transient.is_empty() {
        return Ok(result);
    }

    // x = P_transient · x + b, where b collects the one-step mass into BSCCs.
    let b: Array1<V> = transient
        .iter()
        .map(|s| {
            let mut acc = V::zero();
            if let Some(row) = probability_matrix.outer_view(s) {
                for (c, p) in row.iter() {
                    if let Some(index) = placement.bscc[c] {
                        acc = acc + p.clone() * bscc_values[index].clone();
                    }
                }
            }
            acc
        })
        .collect();
    let (lower, upper) = bscc_values.iter().skip(1).fold(
        (first.clone(), first.clone()),
        |(lo, hi), v| (min_value(lo, v.clone()), max_value(hi, v.clone())),
    );
    let a = submatrix(&probability_matrix, &transient, &transient, false)?;
    let midpoint = (lower.clone() + upper.clone()) / from_count::<V>(2)?;
    let mut x = Array1::from_elem(transient.count(), midpoint);
    solve_system(
        factory,
        LinearSystem::FixedPoint(a),
        &mut x,
        &b,
        SolutionBounds::between(lower, upper),
    )?;
    scatter(&mut result, &transient, &x);
    Ok(result)
}

/// Where every state sits in the BSCC decomposition.
struct Placement {
    /// Index of the state's BSCC, `None` for transient states.
    bscc: Vec<Option<usize>>,
    /// Position of the state among its BSCC's members.
    local: Vec<usize>,
}

impl Placement {
    fn new(n: usize, bsccs: &[Vec<usize>]) -> Self {
        let mut bscc = vec![None; n];
        let mut local = vec![0; n];
        for (index, members) in bsccs.iter().enumerate() {
            for (k, &s) in members.iter().enumerate() {
                bscc[s] = Some(index);
                local[s] = k;
            }
        }
        Self { bscc, local }
    }

    fn local_in(&self, state: usize, index: usize) -> Option<usize> {
        (self.bscc[state] == Some(index)).then(|| self.local[state])
    }
}

/// Relative value iteration on the BSCC uniformized with rate `max exit + 1`.
///
/// The extra `+1` keeps a positive self-loop on every state, which makes the chain aperiodic.
/// Stops once the spread of one step's increments is within `precision / rate`, scaled by
/// `|v[0] + min increment|` when relative.
fn lra_for_bscc_value_iteration<V: ValueType>(
    matrix: &SparseMatrix<V>,
    members: &[usize],
    local_of: impl Fn(usize) -> Option<usize>,
    value_getter: &impl Fn(usize) -> V,
    exit_rates: Option<&ArrayView1<V>>,
    config: &CslConfig,
) -> Result<V> {
    if !V::capabilities().value_iteration {
        return Err(Error::Unsupported(
            "value iteration is not available for this numeric domain",
        ));
    }
    let exit_of = |s: usize| exit_rates.map_or_else(V::one, |e| e[s].clone());
    let max_exit = match exit_rates {
        Some(_) => members.iter().fold(V::zero(), |acc, &s| max_value(acc, exit_of(s))),
        None => V::one(),
    };
    let rate = max_exit + V::one();

    let size = members.len();
    let mut triplets = Vec::with_capacity(size);
    for (k, &s) in members.iter().enumerate() {
        // Self-loops are summed into the materialized diagonal.
        triplets.push((k, k, V::one() - exit_of(s) / rate.clone()));
        if let Some(row) = matrix.outer_view(s) {
            for (c, v) in row.iter() {
                if let Some(col) = local_of(c) {
                    triplets.push((k, col, v.clone() / rate.clone()));
                }
            }
        }
    }
    let p = from_triplets(size, size, triplets)?;
    let multiplier = Multiplier::new(&p);
    let rewards: Array1<V> = members.iter().map(|&s| value_getter(s) / rate.clone()).collect();

    let precision = convert::<V>(config.precision)? / rate.clone();
    let mut w = Array1::from_elem(size, V::zero());
    for iteration in 1..=config.max_iterations {
        let mut v = multiplier.multiply(&w, Some(&rewards));
        let mut max_diff = v[0].clone() - w[0].clone();
        let mut min_diff = max_diff.clone();
        for k in 1..size {
            let diff = v[k].clone() - w[k].clone();
            max_diff = max_value(max_diff, diff.clone());
            min_diff = min_value(min_diff, diff);
        }
        let bound = if config.relative {
            precision.clone() * (v[0].clone() + min_diff.clone()).abs()
        } else {
            precision.clone()
        };
        if max_diff - min_diff <= bound {
            tracing::debug!(iterations = iteration, "LRA value iteration converged");
            return Ok(v[0].clone() * rate);
        }
        let reference = v[0].clone();
        v.mapv_inplace(|x| x - reference.clone());
        w = v;
    }
    Err(Error::NoConvergence {
        iterations: config.max_iterations,
    })
}

/// Stationary distribution of the BSCC from its balance equations.
///
/// Row 0 is replaced by the normalization `Σ π = 1`; every other row `k` states that the
/// inflow into the `k`-th member equals its outflow.
fn lra_for_bscc_linear_system<V: ValueType>(
    backward: &SparseMatrix<V>,
    members: &[usize],
    local_of: impl Fn(usize) -> Option<usize>,
    value_getter: &impl Fn(usize) -> V,
    exit_rates: Option<&ArrayView1<V>>,
    factory: &dyn LinearEquationSolverFactory<V>,
) -> Result<V> {
    let size = members.len();
    let mut triplets = Vec::new();
    for k in 0..size {
        triplets.push((0, k, V::one()));
    }
    for (row, &global) in members.iter().enumerate().skip(1) {
        if let Some(preds) = backward.outer_view(global) {
            for (pred, rate) in preds.iter() {
                if let Some(col) = local_of(pred) {
                    triplets.push((row, col, rate.clone()));
                }
            }
        }
        let exit = exit_rates.map_or_else(V::one, |e| e[global].clone());
        triplets.push((row, row, -exit));
    }
    let a = from_triplets(size, size, triplets)?;

    let mut b = Array1::from_elem(size, V::zero());
    b[0] = V::one();
    let uniform = V::one() / from_count::<V>(size)?;
    let mut pi = Array1::from_elem(size, uniform);
    solve_system(
        factory,
        LinearSystem::Equations(a),
        &mut pi,
        &b,
        SolutionBounds::between(V::zero(), V::one()),
    )?;

    Ok(pi
        .iter()
        .zip(members)
        .fold(V::zero(), |acc, (p, &s)| acc + p.clone() * value_getter(s)))
}
