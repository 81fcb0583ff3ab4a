//! Truncated Poisson weights (Fox & Glynn).
//!
//! For a Poisson rate `λ` and an accuracy `ε`, compute a window `[left, right]` such that the
//! Poisson(λ) mass outside it is below `ε`, together with weights proportional to the Poisson
//! probabilities on the window.
//!
//! Two regimes:
//!
//! - `λ < 400`: direct evaluation starting from `e^{-λ}`, extending `right` until the
//!   accumulated mass reaches `1 - ε/2`, then raising `left` past the steps whose combined
//!   mass stays within the other `ε/2`.
//! - `λ ≥ 400`: the Fox-Glynn finder. `e^{-λ}` underflows, so the bounds come from the
//!   normal-approximation tail estimates and the weights are computed by recurrence from a
//!   large seed at the mode `⌊λ⌋`, then summed smallest-first.
//!
//! Weights are *unnormalized*; `total_weight` is their sum. Use
//! [`FoxGlynnResult::normalize`] before treating them as probabilities.

use crate::{Error, Result};
use std::f64::consts::{PI, SQRT_2};

/// Below this rate the direct method is accurate.
const NAIVE_LAMBDA_LIMIT: f64 = 400.0;

/// Magnitude of the seed weight at the mode (kept far from overflow after summing).
const MODE_WEIGHT_SEED: f64 = 1e300;

#[derive(Debug, Clone, PartialEq)]
pub struct FoxGlynnResult {
    pub left: usize,
    pub right: usize,
    pub total_weight: f64,
    /// `weights[k - left]` belongs to step `k`.
    pub weights: Vec<f64>,
}

impl FoxGlynnResult {
    /// Weight of step `k` (zero outside the window).
    pub fn weight(&self, k: usize) -> f64 {
        if k < self.left || k > self.right {
            return 0.0;
        }
        self.weights[k - self.left]
    }

    /// Scale the weights to sum to one.
    pub fn normalize(&mut self) {
        let total = self.total_weight;
        for w in &mut self.weights {
            *w /= total;
        }
        self.total_weight = 1.0;
    }
}

pub fn fox_glynn(lambda: f64, precision: f64) -> Result<FoxGlynnResult> {
    if !lambda.is_finite() || lambda <= 0.0 {
        return Err(Error::Domain("Poisson rate must be positive and finite"));
    }
    if !precision.is_finite() || precision <= 0.0 || precision >= 1.0 {
        return Err(Error::Domain("Fox-Glynn precision must be in (0, 1)"));
    }
    if lambda < NAIVE_LAMBDA_LIMIT {
        Ok(naive(lambda, precision))
    } else {
        Ok(finder(lambda, precision))
    }
}

fn naive(lambda: f64, precision: f64) -> FoxGlynnResult {
    let exp_coef = (-lambda).exp();
    let target = (1.0 - precision / 2.0) / exp_coef;

    let mut weights = vec![exp_coef];
    let mut term = 1.0;
    let mut accum = 1.0;
    let mut k = 1.0;
    while accum < target {
        term *= lambda / k;
        let next = accum + term;
        weights.push(term * exp_coef);
        // Stalled in floating point: nothing left to gain.
        if next == accum {
            break;
        }
        accum = next;
        k += 1.0;
    }

    let right = weights.len() - 1;
    let mode = (lambda.floor() as usize).min(right);
    let mut left = 0;
    let mut dropped = 0.0;
    while left < mode && dropped + weights[left] <= precision / 2.0 {
        dropped += weights[left];
        left += 1;
    }
    weights.drain(..left);

    let total_weight = weights.iter().sum();
    FoxGlynnResult {
        left,
        right,
        total_weight,
        weights,
    }
}

fn finder(lambda: f64, precision: f64) -> FoxGlynnResult {
    let sqrt_lambda = lambda.sqrt();
    let sqrt_pi = PI.sqrt();
    let half_eps = precision / 2.0;
    let mode = lambda.floor();

    // Right truncation point.
    let a_lambda = (1.0 + 1.0 / lambda) * 0.0625f64.exp() * SQRT_2;
    let lower_k = 1.0 / (2.0 * SQRT_2 * lambda);
    let upper_k = sqrt_lambda / (2.0 * SQRT_2);
    let mut k = lower_k;
    let mut first = true;
    while k <= upper_k {
        let d = 1.0 / (1.0 - (-(2.0 / 9.0) * (k * SQRT_2 * sqrt_lambda + 1.5)).exp());
        if a_lambda * d * (-k * k / 2.0).exp() / (k * SQRT_2 * sqrt_pi) <= half_eps {
            break;
        }
        k += if first { 4.0 } else { 1.0 };
        first = false;
    }
    let right = (mode + k * SQRT_2 * sqrt_lambda + 1.5).ceil() as usize;

    // Left truncation point.
    let b_lambda = (1.0 + 1.0 / lambda) * (0.125 / lambda).exp();
    let mut k = 1.0 / (SQRT_2 * sqrt_lambda);
    while b_lambda * (-k * k / 2.0).exp() / (k * SQRT_2 * sqrt_pi) > half_eps {
        k += 1.0;
    }
    let left = (mode - k * sqrt_lambda - 1.5).floor().max(0.0) as usize;

    let m = mode as usize;
    let width = (right - left).max(1) as f64;
    let mut weights = vec![0.0; right - left + 1];
    weights[m - left] = MODE_WEIGHT_SEED / (1e10 * width);
    for j in (left + 1..=m).rev() {
        weights[j - 1 - left] = (j as f64 / lambda) * weights[j - left];
    }
    for j in m..right {
        weights[j + 1 - left] = (lambda / (j + 1) as f64) * weights[j - left];
    }

    // Sum from both ends, smaller term first.
    let (mut s, mut t) = (0, weights.len() - 1);
    let mut total_weight = 0.0;
    while s < t {
        if weights[s] <= weights[t] {
            total_weight += weights[s];
            s += 1;
        } else {
            total_weight += weights[t];
            t -= 1;
        }
    }
    total_weight += weights[s];

    FoxGlynnResult {
        left,
        right,
        total_weight,
        weights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ln_factorial(k: usize) -> f64 {
        (2..=k).map(|i| (i as f64).ln()).sum()
    }

    fn poisson_pmf(lambda: f64, k: usize) -> f64 {
        (-lambda + k as f64 * lambda.ln() - ln_factorial(k)).exp()
    }

    #[test]
    fn tails_are_below_precision_for_representative_rates() -> Result<()> {
        let precision = 1e-6;
        for lambda in [0.5, 5.0, 50.0, 300.0, 500.0] {
            let fg = fox_glynn(lambda, precision)?;
            assert!(fg.left <= lambda.floor() as usize && lambda.floor() as usize <= fg.right);
            let inside: f64 = (fg.left..=fg.right).map(|k| poisson_pmf(lambda, k)).sum();
            let tail = 1.0 - inside;
            assert!(tail < precision, "lambda {lambda}: tail {tail} in [{}, {}]", fg.left, fg.right);
        }
        Ok(())
    }

    #[test]
    fn normalized_weights_are_the_conditional_poisson_masses() -> Result<()> {
        for lambda in [0.5, 5.0, 50.0, 300.0, 500.0] {
            let mut fg = fox_glynn(lambda, 1e-8)?;
            fg.normalize();
            let sum: f64 = fg.weights.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "lambda {lambda}: sum {sum}");

            let inside: f64 = (fg.left..=fg.right).map(|k| poisson_pmf(lambda, k)).sum();
            for k in fg.left..=fg.right {
                let expected = poisson_pmf(lambda, k) / inside;
                let got = fg.weight(k);
                assert!(
                    (got - expected).abs() <= 1e-9 * expected.max(1e-300) + 1e-15,
                    "lambda {lambda}, k {k}: {got} vs {expected}"
                );
            }
        }
        Ok(())
    }

    #[test]
    fn small_rates_start_at_zero() -> Result<()> {
        let fg = fox_glynn(0.5, 1e-6)?;
        assert_eq!(fg.left, 0);
        assert!((fg.weights[0] - (-0.5f64).exp()).abs() < 1e-15);
        assert_eq!(fg.weight(fg.right + 1), 0.0);
        Ok(())
    }

    #[test]
    fn direct_regime_skips_the_negligible_left_tail() -> Result<()> {
        let precision = 1e-6;
        let fg = fox_glynn(300.0, precision)?;
        // About five standard deviations below the mean carry less than 1e-6.
        assert!(fg.left > 200 && fg.left < 300, "left {}", fg.left);
        assert_eq!(fg.weights.len(), fg.right - fg.left + 1);
        let below: f64 = (0..fg.left).map(|k| poisson_pmf(300.0, k)).sum();
        assert!(below <= precision / 2.0 * (1.0 + 1e-9), "dropped {below}");
        assert!((fg.weights[0] - poisson_pmf(300.0, fg.left)).abs() <= 1e-9 * fg.weights[0]);
        Ok(())
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        for (lambda, precision) in [
            (0.0, 1e-6),
            (-1.0, 1e-6),
            (f64::NAN, 1e-6),
            (f64::INFINITY, 1e-6),
            (1.0, 0.0),
            (1.0, 1.0),
            (1.0, f64::NAN),
        ] {
            assert!(
                matches!(fox_glynn(lambda, precision), Err(Error::Domain(_))),
                "({lambda}, {precision}) accepted"
            );
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_window_contains_mode_and_weights_are_finite(
            lambda in 0.01f64..3000.0,
            exp in 3i32..12,
        ) {
            let fg = fox_glynn(lambda, 10f64.powi(-exp)).unwrap();
            let mode = lambda.floor() as usize;
            prop_assert!(fg.left <= mode && mode <= fg.right);
            prop_assert_eq!(fg.weights.len(), fg.right - fg.left + 1);
            prop_assert!(fg.total_weight.is_finite() && fg.total_weight > 0.0);
            prop_assert!(fg.weights.iter().all(|w| w.is_finite() && *w >= 0.0));
        }
    }
}
