//! Sparse matrix plumbing on top of `sprs` (CSR).
//!
//! Rate matrices follow the usual convention: entry `(i, j)` is the rate of moving from `i`
//! to `j`, self-loops are allowed but carry no special meaning, and the *exit rate* of `i` is
//! its full row sum. All helpers here return fresh matrices; nothing is mutated in place.

use crate::states::StateSet;
use crate::value::ValueType;
use crate::{Error, Result};
use ndarray::{Array1, ArrayView1};
use sprs::{CsMat, TriMat};

/// Row-major sparse matrix over a numeric domain.
pub type SparseMatrix<V> = CsMat<V>;

/// Build a CSR matrix from already sorted, duplicate-free rows.
pub(crate) fn from_rows<V: ValueType>(cols: usize, rows: Vec<Vec<(usize, V)>>) -> SparseMatrix<V> {
    let n = rows.len();
    let nnz: usize = rows.iter().map(Vec::len).sum();
    let mut indptr = Vec::with_capacity(n + 1);
    let mut indices = Vec::with_capacity(nnz);
    let mut data = Vec::with_capacity(nnz);
    indptr.push(0);
    for row in rows {
        for (c, v) in row {
            indices.push(c);
            data.push(v);
        }
        indptr.push(indices.len());
    }
    CsMat::new((n, cols), indptr, indices, data)
}

fn collect_rows<V: ValueType>(m: &SparseMatrix<V>) -> Vec<Vec<(usize, V)>> {
    let mut rows = Vec::with_capacity(m.rows());
    for row in m.outer_iterator() {
        let mut entries = Vec::with_capacity(row.nnz());
        for (c, v) in row.iter() {
            entries.push((c, v.clone()));
        }
        rows.push(entries);
    }
    rows
}

/// Build a `rows × cols` matrix from `(row, col, value)` triplets in any order.
///
/// Duplicate positions are summed.
pub fn from_triplets<V: ValueType>(
    rows: usize,
    cols: usize,
    triplets: impl IntoIterator<Item = (usize, usize, V)>,
) -> Result<SparseMatrix<V>> {
    let triplets = triplets.into_iter();
    let mut tri = TriMat::with_capacity((rows, cols), triplets.size_hint().0);
    for (r, c, v) in triplets {
        if r >= rows || c >= cols {
            return Err(Error::Shape("triplet index out of range"));
        }
        tri.add_triplet(r, c, v);
    }
    Ok(tri.to_csr())
}

/// Check the rate-matrix contract: square, finite, nonnegative entries.
pub fn validate_rate_matrix<V: ValueType>(m: &SparseMatrix<V>) -> Result<()> {
    if m.rows() != m.cols() {
        return Err(Error::Shape("rate matrix must be square"));
    }
    for row in m.outer_iterator() {
        for (_, v) in row.iter() {
            if !v.approx().is_finite() {
                return Err(Error::Domain("rate matrix contains non-finite values"));
            }
            if *v < V::zero() {
                return Err(Error::Domain("rates must be nonnegative"));
            }
        }
    }
    Ok(())
}

/// Per-row sums; for a rate matrix these are the exit rates.
pub fn row_sums<V: ValueType>(m: &SparseMatrix<V>) -> Array1<V> {
    let mut out = Vec::with_capacity(m.rows());
    for row in m.outer_iterator() {
        let mut s = V::zero();
        for (_, v) in row.iter() {
            s = s + v.clone();
        }
        out.push(s);
    }
    Array1::from_vec(out)
}

/// For each state of `rows` (in order), the sum of its entries whose column lies in `cols`.
pub fn constrained_row_sums<V: ValueType>(
    m: &SparseMatrix<V>,
    rows: &StateSet,
    cols: &StateSet,
) -> Result<Array1<V>> {
    rows.check_len(m.rows(), "row set does not match matrix rows")?;
    cols.check_len(m.cols(), "column set does not match matrix columns")?;
    let mut out = Vec::with_capacity(rows.count());
    for r in rows.iter() {
        let mut s = V::zero();
        if let Some(row) = m.outer_view(r) {
            for (c, v) in row.iter() {
                if cols.contains(c) {
                    s = s + v.clone();
                }
            }
        }
        out.push(s);
    }
    Ok(Array1::from_vec(out))
}

/// `Σ_j m(row, j) · other(row, j)`.
pub fn pointwise_product_row_sum<V: ValueType>(
    m: &SparseMatrix<V>,
    other: &SparseMatrix<V>,
    row: usize,
) -> V {
    let mut s = V::zero();
    if let Some(view) = m.outer_view(row) {
        for (c, v) in view.iter() {
            if let Some(w) = other.get(row, c) {
                s = s + v.clone() * w.clone();
            }
        }
    }
    s
}

pub fn pointwise_product_row_sums<V: ValueType>(
    m: &SparseMatrix<V>,
    other: &SparseMatrix<V>,
) -> Result<Array1<V>> {
    if m.shape() != other.shape() {
        return Err(Error::Shape("pointwise product needs equally shaped matrices"));
    }
    Ok(Array1::from_vec(
        (0..m.rows())
            .map(|r| pointwise_product_row_sum(m, other, r))
            .collect(),
    ))
}

/// The rows/columns of `m` selected by `rows`/`cols`, re-indexed to member positions.
///
/// With `insert_diagonal`, every row `k` gets an (explicit zero) entry at column `k` if it had
/// none, so later passes can rewrite the diagonal without changing the structure.
pub fn submatrix<V: ValueType>(
    m: &SparseMatrix<V>,
    rows: &StateSet,
    cols: &StateSet,
    insert_diagonal: bool,
) -> Result<SparseMatrix<V>> {
    rows.check_len(m.rows(), "row set does not match matrix rows")?;
    cols.check_len(m.cols(), "column set does not match matrix columns")?;
    let col_index = cols.local_indices();
    let n_cols = cols.count();

    let mut out = Vec::with_capacity(rows.count());
    for (local_row, global_row) in rows.iter().enumerate() {
        let mut entries: Vec<(usize, V)> = Vec::new();
        if let Some(view) = m.outer_view(global_row) {
            for (c, v) in view.iter() {
                if let Some(local_col) = col_index[c] {
                    entries.push((local_col, v.clone()));
                }
            }
        }
        if insert_diagonal && local_row < n_cols && !entries.iter().any(|(c, _)| *c == local_row)
        {
            let pos = entries.partition_point(|(c, _)| *c < local_row);
            entries.insert(pos, (local_row, V::zero()));
        }
        out.push(entries);
    }
    Ok(from_rows(n_cols, out))
}

pub fn transpose<V: ValueType>(m: &SparseMatrix<V>) -> SparseMatrix<V> {
    m.transpose_view().to_csr()
}

/// Replace each row in `rows` by a single self-loop of weight one.
pub fn make_rows_absorbing<V: ValueType>(
    m: &SparseMatrix<V>,
    rows: &StateSet,
) -> Result<SparseMatrix<V>> {
    rows.check_len(m.rows(), "row set does not match matrix rows")?;
    let mut out = collect_rows(m);
    for r in rows.iter() {
        out[r] = vec![(r, V::one())];
    }
    Ok(from_rows(m.cols(), out))
}

/// `I - m` for a square matrix (converts between `x = A·x + b` and `(I - A)·x = b`).
pub fn identity_minus<V: ValueType>(m: &SparseMatrix<V>) -> Result<SparseMatrix<V>> {
    if m.rows() != m.cols() {
        return Err(Error::Shape("identity_minus needs a square matrix"));
    }
    let full = StateSet::full(m.rows());
    let with_diagonal = submatrix(m, &full, &full, true)?;
    let mut out = collect_rows(&with_diagonal);
    for (r, row) in out.iter_mut().enumerate() {
        for (c, v) in row.iter_mut() {
            *v = if *c == r {
                V::one() - v.clone()
            } else {
                -v.clone()
            };
        }
    }
    Ok(from_rows(m.cols(), out))
}

fn check_exit_rates<V: ValueType>(m: &SparseMatrix<V>, exit_rates: &ArrayView1<V>) -> Result<()> {
    if exit_rates.len() != m.rows() {
        return Err(Error::Shape("exit rates must have one entry per state"));
    }
    Ok(())
}

/// Embedded DTMC: every row divided by its exit rate.
///
/// Rows without transitions stay empty; a row with transitions but a zero exit rate is an
/// inconsistent input and is rejected.
pub fn compute_probability_matrix<V: ValueType>(
    rate_matrix: &SparseMatrix<V>,
    exit_rates: &ArrayView1<V>,
) -> Result<SparseMatrix<V>> {
    check_exit_rates(rate_matrix, exit_rates)?;
    let mut out = collect_rows(rate_matrix);
    for (r, row) in out.iter_mut().enumerate() {
        if row.is_empty() {
            continue;
        }
        let exit = exit_rates[r].clone();
        if exit.is_zero() {
            return Err(Error::InvalidState(format!(
                "state {r} has transitions but a zero exit rate"
            )));
        }
        for (_, v) in row.iter_mut() {
            *v = v.clone() / exit.clone();
        }
    }
    Ok(from_rows(rate_matrix.cols(), out))
}

/// Generator matrix `Q`: the rate matrix with `self-loop - exit rate` on the diagonal.
pub fn compute_generator_matrix<V: ValueType>(
    rate_matrix: &SparseMatrix<V>,
    exit_rates: &ArrayView1<V>,
) -> Result<SparseMatrix<V>> {
    check_exit_rates(rate_matrix, exit_rates)?;
    let full = StateSet::full(rate_matrix.rows());
    let with_diagonal = submatrix(rate_matrix, &full, &full, true)?;
    let mut out = collect_rows(&with_diagonal);
    for (r, row) in out.iter_mut().enumerate() {
        for (c, v) in row.iter_mut() {
            if *c == r {
                *v = v.clone() - exit_rates[r].clone();
            }
        }
    }
    Ok(from_rows(rate_matrix.cols(), out))
}

/// Repeated sparse matrix-vector products `x ← M·x (+ add)`.
///
/// Walks the CSR rows directly: the `sprs` products need `MulAcc` scalars and take no
/// add-vector, and exact rationals are not `MulAcc`.
#[derive(Debug, Clone, Copy)]
pub struct Multiplier<'a, V> {
    matrix: &'a SparseMatrix<V>,
}

impl<'a, V: ValueType> Multiplier<'a, V> {
    pub fn new(matrix: &'a SparseMatrix<V>) -> Self {
        Self { matrix }
    }

    /// `Σ_j M(row, j) · x[j]`.
    pub fn multiply_row(&self, row: usize, x: &Array1<V>) -> V {
        let mut s = V::zero();
        if let Some(view) = self.matrix.outer_view(row) {
            for (c, v) in view.iter() {
                s = s + v.clone() * x[c].clone();
            }
        }
        s
    }

    pub fn multiply(&self, x: &Array1<V>, add: Option<&Array1<V>>) -> Array1<V> {
        debug_assert_eq!(x.len(), self.matrix.cols());
        let mut out = Vec::with_capacity(self.matrix.rows());
        for r in 0..self.matrix.rows() {
            let mut s = self.multiply_row(r, x);
            if let Some(add) = add {
                s = s + add[r].clone();
            }
            out.push(s);
        }
        Array1::from_vec(out)
    }

    /// Apply [`Multiplier::multiply`] `count` times, replacing `x` each time.
    pub fn repeated_multiply(&self, x: &mut Array1<V>, add: Option<&Array1<V>>, count: usize) {
        for _ in 0..count {
            *x = self.multiply(x, add);
        }
    }
}

/// Random sparse CTMC for tests: `n` states, each edge present with probability `density`,
/// rates in `(0.1, 5.0)`, and a few absorbing states when `absorbing` is set.
#[cfg(test)]
pub(crate) fn random_rate_matrix(
    n: usize,
    density: f64,
    absorbing: bool,
    seed: u64,
) -> SparseMatrix<f64> {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut triplets = Vec::new();
    for i in 0..n {
        if absorbing && rng.random_bool(0.2) {
            continue;
        }
        for j in 0..n {
            if i != j && rng.random_bool(density) {
                triplets.push((i, j, 0.1 + 4.9 * rng.random::<f64>()));
            }
        }
    }
    match from_triplets(n, n, triplets) {
        Ok(m) => m,
        Err(e) => panic!("random triplets out of range: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use num::BigRational;
    use proptest::prelude::*;

    fn dense<V: ValueType>(m: &SparseMatrix<V>) -> Vec<Vec<V>> {
        let mut out = vec![vec![V::zero(); m.cols()]; m.rows()];
        for (r, row) in m.outer_iterator().enumerate() {
            for (c, v) in row.iter() {
                out[r][c] = v.clone();
            }
        }
        out
    }

    #[test]
    fn triplets_are_sorted_and_duplicates_summed() -> Result<()> {
        let m = from_triplets(2, 3, vec![(1, 2, 1.0), (0, 1, 2.0), (1, 0, 3.0), (0, 1, 0.5)])?;
        assert_eq!(m.nnz(), 3);
        assert_eq!(
            dense(&m),
            vec![vec![0.0, 2.5, 0.0], vec![3.0, 0.0, 1.0]]
        );
        assert!(from_triplets(2, 2, vec![(2, 0, 1.0)]).is_err());
        Ok(())
    }

    #[test]
    fn submatrix_reindexes_and_reserves_diagonal() -> Result<()> {
        let m = from_triplets(
            4,
            4,
            vec![(0, 1, 1.0), (1, 3, 2.0), (3, 1, 4.0), (3, 0, 5.0), (2, 2, 7.0)],
        )?;
        let keep = StateSet::from_states(4, [1, 3])?;
        let sub = submatrix(&m, &keep, &keep, true)?;
        assert_eq!(sub.shape(), (2, 2));
        // Row 0 is state 1 (-> 3), row 1 is state 3 (-> 1); both get an explicit diagonal.
        assert_eq!(sub.nnz(), 4);
        assert_eq!(dense(&sub), vec![vec![0.0, 2.0], vec![4.0, 0.0]]);
        assert!(sub.get(0, 0).is_some());
        Ok(())
    }

    #[test]
    fn transpose_and_row_sums() -> Result<()> {
        let m = from_triplets(3, 3, vec![(0, 1, 2.0), (0, 2, 1.0), (2, 0, 4.0)])?;
        let t = transpose(&m);
        assert_eq!(dense(&t), vec![vec![0.0, 0.0, 4.0], vec![2.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]]);
        assert_eq!(row_sums(&m), array![3.0, 0.0, 4.0]);

        let rows = StateSet::from_states(3, [0, 2])?;
        let cols = StateSet::from_states(3, [2])?;
        assert_eq!(constrained_row_sums(&m, &rows, &cols)?, array![1.0, 0.0]);
        Ok(())
    }

    #[test]
    fn exact_triplets_merge_and_transpose() -> Result<()> {
        let r = |n: i64, d: i64| BigRational::new(n.into(), d.into());
        let m = from_triplets(2, 3, vec![(1, 2, r(1, 3)), (0, 1, r(1, 2)), (1, 2, r(1, 6))])?;
        assert_eq!(m.nnz(), 2);
        assert_eq!(m.get(1, 2), Some(&r(1, 2)));
        let t = transpose(&m);
        assert!(t.is_csr());
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t.get(2, 1), Some(&r(1, 2)));
        assert_eq!(t.get(1, 0), Some(&r(1, 2)));
        assert_eq!(t.get(0, 0), None);
        Ok(())
    }

    #[test]
    fn generator_rows_sum_to_zero_and_identity_minus_flips() -> Result<()> {
        let m = from_triplets(2, 2, vec![(0, 1, 3.0), (1, 0, 1.0), (1, 1, 2.0)])?;
        let exit = row_sums(&m);
        let q = compute_generator_matrix(&m, &exit.view())?;
        assert_eq!(dense(&q), vec![vec![-3.0, 3.0], vec![1.0, -1.0]]);

        let i_minus = identity_minus(&m)?;
        assert_eq!(dense(&i_minus), vec![vec![1.0, -3.0], vec![-1.0, -1.0]]);
        Ok(())
    }

    #[test]
    fn probability_matrix_is_exact_for_rationals() -> Result<()> {
        let r = |n: i64| BigRational::from_integer(n.into());
        let m = from_triplets(3, 3, vec![(0, 1, r(2)), (0, 2, r(1))])?;
        let exit = row_sums(&m);
        let p = compute_probability_matrix(&m, &exit.view())?;
        assert_eq!(p.get(0, 1), Some(&BigRational::new(2.into(), 3.into())));
        assert_eq!(p.get(0, 2), Some(&BigRational::new(1.into(), 3.into())));
        assert_eq!(p.outer_view(1).map(|v| v.nnz()), Some(0));
        Ok(())
    }

    #[test]
    fn inconsistent_exit_rates_are_rejected() -> Result<()> {
        let m = from_triplets(2, 2, vec![(0, 1, 1.0)])?;
        assert!(matches!(
            compute_probability_matrix(&m, &array![0.0, 0.0].view()),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            compute_probability_matrix(&m, &array![1.0].view()),
            Err(Error::Shape(_))
        ));
        Ok(())
    }

    #[test]
    fn validation_rejects_negative_rates() -> Result<()> {
        let m = from_triplets(2, 2, vec![(0, 1, -1.0)])?;
        assert!(validate_rate_matrix(&m).is_err());
        let m = from_triplets(2, 3, vec![(0, 1, 1.0)])?;
        assert!(matches!(validate_rate_matrix(&m), Err(Error::Shape(_))));
        Ok(())
    }

    #[test]
    fn multiplier_applies_add_vector_every_step() -> Result<()> {
        let m = from_triplets(2, 2, vec![(0, 1, 1.0), (1, 1, 1.0)])?;
        let mult = Multiplier::new(&m);
        let add = array![0.5, 0.0];
        let mut x = array![0.0, 1.0];
        mult.repeated_multiply(&mut x, Some(&add), 3);
        assert_eq!(x, array![1.5, 1.0]);
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_probability_matrix_rows_sum_to_one(
            n in 1usize..24,
            density in 0.05f64..0.6,
            seed in any::<u64>(),
        ) {
            let m = random_rate_matrix(n, density, true, seed);
            let exit = row_sums(&m);
            let p = compute_probability_matrix(&m, &exit.view()).unwrap();
            let sums = row_sums(&p);
            for s in 0..n {
                if exit[s] > 0.0 {
                    prop_assert!((sums[s] - 1.0).abs() <= 1e-12, "row {s} sums to {}", sums[s]);
                } else {
                    prop_assert_eq!(sums[s], 0.0);
                }
            }
        }
    }
}
