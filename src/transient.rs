//! Transient and cumulative analysis by uniformization.
//!
//! With a uniformized matrix `P` (rate `Λ`) and `λ = t·Λ`, the value of a vector `v` at time
//! `t` is `Σ_k Poisson(λ; k) · P^k · v`, and the value accumulated over `[0, t]` is
//! `Σ_k (1 - Σ_{j≤k} Poisson(λ; j)) / Λ · P^k · v`. Both sums are truncated to the
//! Fox-Glynn window.

use crate::fox_glynn::fox_glynn;
use crate::matrix::{Multiplier, SparseMatrix};
use crate::value::{convert, require_exponential, ValueType};
use crate::{Error, Result};
use ndarray::{Array1, Zip};

/// Which of the two Poisson-weighted sums to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransientMode {
    /// Value at the time bound.
    #[default]
    Instantaneous,
    /// Value accumulated up to the time bound.
    Cumulative,
}

fn accumulate<V: ValueType>(result: &mut Array1<V>, weight: &V, values: &Array1<V>) {
    Zip::from(result)
        .and(values)
        .for_each(|r, v| *r = r.clone() + weight.clone() * v.clone());
}

/// Poisson-weighted sum of `uniformized^k · values` over the Fox-Glynn window of `t·Λ`.
///
/// `add`, when present, is added after *every* multiplication, including the ones before the
/// window starts. A zero `t·Λ` returns `values` untouched.
pub fn compute_transient_probabilities<V: ValueType>(
    uniformized: &SparseMatrix<V>,
    add: Option<&Array1<V>>,
    time_bound: f64,
    uniformization_rate: &V,
    values: Array1<V>,
    mode: TransientMode,
    fox_glynn_precision: f64,
) -> Result<Array1<V>> {
    require_exponential::<V>("transient analysis needs exponential support")?;
    if !time_bound.is_finite() || time_bound < 0.0 {
        return Err(Error::Domain("time bound must be finite and nonnegative"));
    }
    let n = uniformized.rows();
    if uniformized.cols() != n || values.len() != n || add.is_some_and(|a| a.len() != n) {
        return Err(Error::Shape("uniformized matrix and vectors disagree"));
    }

    let lambda = time_bound * uniformization_rate.approx();
    if lambda == 0.0 {
        return Ok(values);
    }

    let mut fg = fox_glynn(lambda, fox_glynn_precision)?;
    fg.normalize();
    tracing::debug!(lambda, left = fg.left, right = fg.right, ?mode, "Fox-Glynn window");

    let mut weights: Vec<V> = fg
        .weights
        .iter()
        .map(|w| convert::<V>(*w))
        .collect::<Result<_>>()?;
    let cumulative = mode == TransientMode::Cumulative;
    if cumulative {
        let mut sum = V::zero();
        for w in &mut weights {
            sum = sum + w.clone();
            *w = (V::one() - sum.clone()) / uniformization_rate.clone();
        }
    }

    let multiplier = Multiplier::new(uniformized);
    let mut values = values;
    let mut result: Array1<V>;
    let start;
    if fg.left == 0 {
        result = values.mapv(|v| v * weights[0].clone());
        start = 1;
    } else {
        result = if cumulative {
            values.mapv(|v| v / uniformization_rate.clone())
        } else {
            Array1::from_elem(n, V::zero())
        };
        start = fg.left;
        if cumulative {
            let inv_rate = V::one() / uniformization_rate.clone();
            for _ in 1..fg.left {
                values = multiplier.multiply(&values, add);
                accumulate(&mut result, &inv_rate, &values);
            }
        } else if fg.left > 1 {
            multiplier.repeated_multiply(&mut values, add, fg.left - 1);
        }
    }

    for index in start..=fg.right {
        values = multiplier.multiply(&values, add);
        accumulate(&mut result, &weights[index - fg.left], &values);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{from_triplets, random_rate_matrix, row_sums};
    use crate::states::StateSet;
    use crate::uniformization::{compute_uniformized_matrix, uniformization_rate};
    use ndarray::array;
    use num::BigRational;
    use proptest::prelude::*;

    fn two_state(a: f64, b: f64) -> Result<(SparseMatrix<f64>, f64)> {
        let m = from_triplets(2, 2, vec![(0, 1, a), (1, 0, b)])?;
        let exit = row_sums(&m);
        let all = StateSet::full(2);
        let rate = uniformization_rate(&exit.view(), &all)?;
        Ok((compute_uniformized_matrix(&m, &all, &rate, &exit.view())?, rate))
    }

    #[test]
    fn two_state_transient_matches_closed_form() -> Result<()> {
        let (a, b) = (2.0, 3.0);
        let (u, rate) = two_state(a, b)?;
        for t in [0.01, 0.3, 1.0, 4.0] {
            let got = compute_transient_probabilities(
                &u,
                None,
                t,
                &rate,
                array![0.0, 1.0],
                TransientMode::Instantaneous,
                1e-10,
            )?;
            let expected = a / (a + b) * (1.0 - (-(a + b) * t).exp());
            assert!((got[0] - expected).abs() < 1e-8, "t = {t}: {} vs {expected}", got[0]);
        }
        Ok(())
    }

    #[test]
    fn two_state_cumulative_matches_closed_form() -> Result<()> {
        let (a, b) = (2.0, 3.0);
        let (u, rate) = two_state(a, b)?;
        for t in [0.5, 2.0, 30.0] {
            let got = compute_transient_probabilities(
                &u,
                None,
                t,
                &rate,
                array![0.0, 1.0],
                TransientMode::Cumulative,
                1e-10,
            )?;
            let s = a + b;
            let expected = a / s * (t - (1.0 - (-s * t).exp()) / s);
            assert!((got[0] - expected).abs() < 1e-7, "t = {t}: {} vs {expected}", got[0]);
        }
        Ok(())
    }

    #[test]
    fn exact_domain_is_unsupported() -> Result<()> {
        let one = BigRational::from_integer(1.into());
        let m = from_triplets(1, 1, vec![(0, 0, one.clone())])?;
        let err = compute_transient_probabilities(
            &m,
            None,
            1.0,
            &one,
            Array1::from_elem(1, one.clone()),
            TransientMode::Instantaneous,
            1e-6,
        );
        assert!(matches!(err, Err(Error::Unsupported(_))));
        Ok(())
    }

    #[test]
    fn negative_time_is_rejected() -> Result<()> {
        let (u, rate) = two_state(1.0, 1.0)?;
        let err = compute_transient_probabilities(
            &u,
            None,
            -1.0,
            &rate,
            array![1.0, 0.0],
            TransientMode::Instantaneous,
            1e-6,
        );
        assert!(matches!(err, Err(Error::Domain(_))));
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_zero_time_returns_input(
            n in 2usize..16,
            density in 0.1f64..0.6,
            seed in any::<u64>(),
            values in prop::collection::vec(-10.0f64..10.0, 16),
        ) {
            let m = random_rate_matrix(n, density, false, seed);
            let exit = row_sums(&m);
            let all = StateSet::full(n);
            let Ok(rate) = uniformization_rate(&exit.view(), &all) else {
                return Ok(());
            };
            let u = compute_uniformized_matrix(&m, &all, &rate, &exit.view()).unwrap();
            let input = Array1::from_vec(values[..n].to_vec());
            for mode in [TransientMode::Instantaneous, TransientMode::Cumulative] {
                let out = compute_transient_probabilities(&u, None, 0.0, &rate, input.clone(), mode, 1e-8).unwrap();
                prop_assert_eq!(&out, &input);
            }
        }

        #[test]
        fn prop_transient_distribution_stays_stochastic(
            n in 2usize..12,
            seed in any::<u64>(),
            t in 0.01f64..5.0,
        ) {
            let m = random_rate_matrix(n, 0.4, false, seed);
            let exit = row_sums(&m);
            let all = StateSet::full(n);
            let Ok(rate) = uniformization_rate(&exit.view(), &all) else {
                return Ok(());
            };
            let u = compute_uniformized_matrix(&m, &all, &rate, &exit.view()).unwrap();
            let ones = Array1::from_elem(n, 1.0);
            let out = compute_transient_probabilities(&u, None, t, &rate, ones, TransientMode::Instantaneous, 1e-9).unwrap();
            for v in out.iter() {
                prop_assert!((v - 1.0).abs() < 1e-9, "{v}");
            }
        }
    }
}
