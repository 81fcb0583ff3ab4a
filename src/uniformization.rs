//! Uniformization: from a CTMC (restricted to some states) to a DTMC plus a Poisson clock.

use crate::matrix::{from_rows, submatrix, SparseMatrix};
use crate::states::StateSet;
use crate::value::{from_count, max_value, ValueType};
use crate::{Error, Result};
use ndarray::ArrayView1;

/// Factor applied to the largest relevant exit rate (`51/50`).
///
/// Strictly above one, so every uniformized state keeps a positive self-loop.
pub const UNIFORMIZATION_INFLATION: f64 = 1.02;

fn inflation<V: ValueType>() -> Result<V> {
    Ok(from_count::<V>(51)? / from_count::<V>(50)?)
}

/// `max { exit(s) : s ∈ states } · 1.02`.
///
/// Fails with [`Error::InvalidState`] when that is not positive (no relevant state moves).
pub fn uniformization_rate<V: ValueType>(exit_rates: &ArrayView1<V>, states: &StateSet) -> Result<V> {
    states.check_len(exit_rates.len(), "state set does not match exit rates")?;
    let max_exit = states
        .iter()
        .fold(V::zero(), |acc, s| max_value(acc, exit_rates[s].clone()));
    let rate = max_exit * inflation::<V>()?;
    if rate <= V::zero() {
        return Err(Error::InvalidState(
            "the uniformization rate must be positive".to_string(),
        ));
    }
    tracing::debug!(rate = rate.approx(), states = states.count(), "uniformization rate");
    Ok(rate)
}

/// Uniformized matrix over `keep`: off-diagonal `rate / Λ`, diagonal `1 + (self-loop - exit) / Λ`.
///
/// Transitions leaving `keep` are dropped, so rows that had them sum to less than one. The
/// diagonal is always materialized.
pub fn compute_uniformized_matrix<V: ValueType>(
    rate_matrix: &SparseMatrix<V>,
    keep: &StateSet,
    uniformization_rate: &V,
    exit_rates: &ArrayView1<V>,
) -> Result<SparseMatrix<V>> {
    if exit_rates.len() != rate_matrix.rows() {
        return Err(Error::Shape("exit rates must have one entry per state"));
    }
    let sub = submatrix(rate_matrix, keep, keep, true)?;
    let mut rows = Vec::with_capacity(sub.rows());
    for ((local, global), row) in keep.iter().enumerate().zip(sub.outer_iterator()) {
        let exit = exit_rates[global].clone();
        let mut entries = Vec::with_capacity(row.nnz());
        for (c, v) in row.iter() {
            let value = if c == local {
                (v.clone() - exit.clone()) / uniformization_rate.clone() + V::one()
            } else {
                v.clone() / uniformization_rate.clone()
            };
            entries.push((c, value));
        }
        rows.push(entries);
    }
    Ok(from_rows(sub.cols(), rows))
}
