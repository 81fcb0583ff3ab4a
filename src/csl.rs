//! CSL queries on a CTMC.
//!
//! [`CtmcCslChecker`] borrows a rate matrix, owns its exit rates and backward transitions, and
//! answers one query per method call. Every query returns one value per state.
//!
//! Time-bounded until `phi U[t, t'] psi` is split by the shape of the interval:
//!
//! | interval     | reduction                                                                  |
//! |--------------|----------------------------------------------------------------------------|
//! | `[0, ∞]`     | unbounded until on the embedded DTMC                                        |
//! | `[0, 0]`     | indicator of `psi`                                                          |
//! | `[0, t]`     | transient analysis of the maybe states, with inflow into `psi` as add-vector |
//! | `[t, ∞]`     | unbounded until values, propagated backwards over `t` inside `phi`          |
//! | `[t, t']`    | `[0, t' - t]` first, then propagated backwards over `t` inside `phi`        |
//! | `[t, t]`     | indicator of `psi` propagated backwards over `t` inside `phi`               |
//!
//! States that cannot reach `psi` through `phi` are fixed to zero and never enter a
//! uniformized matrix.

use crate::config::CslConfig;
use crate::dtmc;
use crate::graph::{backward_transitions, prob_greater_0};
use crate::lra::compute_long_run_averages;
use crate::matrix::{
    compute_generator_matrix, compute_probability_matrix, constrained_row_sums,
    make_rows_absorbing, pointwise_product_row_sum, row_sums, transpose, validate_rate_matrix, SparseMatrix,
};
use crate::rewards::RewardModel;
use crate::solver::{GeneralLinearSolverFactory, LinearEquationSolverFactory};
use crate::states::{gather, scatter, StateSet};
use crate::transient::{compute_transient_probabilities, TransientMode};
use crate::uniformization::{compute_uniformized_matrix, uniformization_rate};
use crate::value::{from_count, require_exponential, Capabilities, ValueType};
use crate::{Error, Result};
use ndarray::Array1;

/// Query object for one CTMC.
pub struct CtmcCslChecker<'a, V: ValueType> {
    rate_matrix: &'a SparseMatrix<V>,
    exit_rates: Array1<V>,
    backward: SparseMatrix<V>,
    capabilities: Capabilities,
    config: CslConfig,
    factory: Box<dyn LinearEquationSolverFactory<V>>,
}

impl<'a, V: ValueType> CtmcCslChecker<'a, V> {
    /// Checker with exit rates taken as the row sums of `rate_matrix`.
    pub fn new(rate_matrix: &'a SparseMatrix<V>) -> Result<Self> {
        let exit_rates = row_sums(rate_matrix);
        Self::with_exit_rates(rate_matrix, exit_rates)
    }

    /// Checker with externally supplied exit rates.
    pub fn with_exit_rates(rate_matrix: &'a SparseMatrix<V>, exit_rates: Array1<V>) -> Result<Self> {
        validate_rate_matrix(rate_matrix)?;
        if exit_rates.len() != rate_matrix.rows() {
            return Err(Error::Shape("exit rates must have one entry per state"));
        }
        if exit_rates.iter().any(|r| *r < V::zero()) {
            return Err(Error::Domain("exit rates must be nonnegative"));
        }
        let config = CslConfig::default();
        let factory = Box::new(GeneralLinearSolverFactory::from_config(&config));
        tracing::debug!(
            states = rate_matrix.rows(),
            transitions = rate_matrix.nnz(),
            domain = ?V::DOMAIN,
            "CTMC checker created"
        );
        Ok(Self {
            rate_matrix,
            exit_rates,
            backward: backward_transitions(rate_matrix),
            capabilities: V::capabilities(),
            config,
            factory,
        })
    }

    /// Replace the configuration. Also resets the solver factory to the bundled one built
    /// from `config`, so call [`Self::with_solver_factory`] afterwards to override it.
    pub fn with_config(mut self, config: CslConfig) -> Result<Self> {
        config.validate()?;
        self.factory = Box::new(GeneralLinearSolverFactory::from_config(&config));
        self.config = config;
        Ok(self)
    }

    pub fn with_solver_factory(mut self, factory: Box<dyn LinearEquationSolverFactory<V>>) -> Self {
        self.factory = factory;
        self
    }

    pub fn num_states(&self) -> usize {
        self.rate_matrix.rows()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn config(&self) -> &CslConfig {
        &self.config
    }

    pub fn exit_rates(&self) -> &Array1<V> {
        &self.exit_rates
    }

    pub fn backward_transitions(&self) -> &SparseMatrix<V> {
        &self.backward
    }

    fn check_states(&self, states: &StateSet, what: &'static str) -> Result<()> {
        states.check_len(self.num_states(), what)
    }

    fn check_rewards(&self, rewards: &RewardModel<V>) -> Result<()> {
        if rewards.is_empty() {
            return Err(Error::InvalidProperty("missing reward model"));
        }
        rewards.validate(self.num_states())
    }

    fn indicator(&self, states: &StateSet) -> Array1<V> {
        Array1::from_shape_fn(self.num_states(), |s| {
            if states.contains(s) {
                V::one()
            } else {
                V::zero()
            }
        })
    }

    /// Embedded DTMC of the chain.
    pub fn compute_probability_matrix(&self) -> Result<SparseMatrix<V>> {
        compute_probability_matrix(self.rate_matrix, &self.exit_rates.view())
    }

    pub fn compute_generator_matrix(&self) -> Result<SparseMatrix<V>> {
        compute_generator_matrix(self.rate_matrix, &self.exit_rates.view())
    }

    /// Probability of reaching `psi` within `time` from each of the `maybe` states, where
    /// `psi` is absorbing and every other state outside `maybe` is dropped.
    fn reach_within(&self, maybe: &StateSet, psi: &StateSet, time: f64) -> Result<Array1<V>> {
        let exit = self.exit_rates.view();
        let rate = uniformization_rate(&exit, maybe)?;
        let uniformized = compute_uniformized_matrix(self.rate_matrix, maybe, &rate, &exit)?;
        let inflow = constrained_row_sums(self.rate_matrix, maybe, psi)?
            .mapv(|r| r / rate.clone());
        compute_transient_probabilities(
            &uniformized,
            Some(&inflow),
            time,
            &rate,
            Array1::from_elem(maybe.count(), V::zero()),
            TransientMode::Instantaneous,
            self.config.fox_glynn_precision(),
        )
    }

    /// Expected value of `start` after `time`, for walks that never leave `states`.
    fn propagate(&self, states: &StateSet, start: Array1<V>, time: f64) -> Result<Array1<V>> {
        let exit = self.exit_rates.view();
        let rate = uniformization_rate(&exit, states)?;
        let uniformized = compute_uniformized_matrix(self.rate_matrix, states, &rate, &exit)?;
        compute_transient_probabilities(
            &uniformized,
            None,
            time,
            &rate,
            start,
            TransientMode::Instantaneous,
            self.config.fox_glynn_precision(),
        )
    }

    /// `P(phi U[lower, upper] psi)`; `upper` may be `f64::INFINITY`.
    pub fn compute_bounded_until_probabilities(
        &self,
        phi: &StateSet,
        psi: &StateSet,
        lower: f64,
        upper: f64,
    ) -> Result<Array1<V>> {
        require_exponential::<V>("bounded until needs exponential support")?;
        self.check_states(phi, "phi states do not match the model")?;
        self.check_states(psi, "psi states do not match the model")?;
        if !lower.is_finite() || lower < 0.0 || upper.is_nan() || upper < lower {
            return Err(Error::Domain("time interval must satisfy 0 <= lower <= upper"));
        }
        if lower == 0.0 && upper == f64::INFINITY {
            return self.compute_until_probabilities(phi, psi);
        }

        let n = self.num_states();
        let greater0 = prob_greater_0(&self.backward, phi, psi)?;
        let maybe = greater0.and_not(psi);
        tracing::info!(
            greater0 = greater0.count(),
            maybe = maybe.count(),
            lower,
            upper,
            "bounded until: qualitative precomputation"
        );
        if greater0.is_empty() {
            return Ok(Array1::from_elem(n, V::zero()));
        }
        if upper == 0.0 {
            return Ok(self.indicator(psi));
        }

        if lower == 0.0 {
            let mut result = self.indicator(psi);
            if !maybe.is_empty() {
                let sub = self.reach_within(&maybe, psi, upper)?;
                scatter(&mut result, &maybe, &sub);
            }
            return Ok(result);
        }

        // From here on phi has to hold until `lower`: only phi-states can carry mass.
        let relevant = greater0.and(phi);
        let mut result = Array1::from_elem(n, V::zero());
        if relevant.is_empty() {
            return Ok(result);
        }

        let start = if upper == f64::INFINITY {
            let until = self.compute_until_probabilities(phi, psi)?;
            gather(&until, &relevant)
        } else {
            let mut start = gather(&self.indicator(psi), &relevant);
            if lower != upper && !maybe.is_empty() {
                let sub = self.reach_within(&maybe, psi, upper - lower)?;
                let local = relevant.local_indices();
                for (k, s) in maybe.iter().enumerate() {
                    if let Some(i) = local[s] {
                        start[i] = sub[k].clone();
                    }
                }
            }
            start
        };
        let sub = self.propagate(&relevant, start, lower)?;
        scatter(&mut result, &relevant, &sub);
        Ok(result)
    }

    pub fn compute_until_probabilities(&self, phi: &StateSet, psi: &StateSet) -> Result<Array1<V>> {
        self.check_states(phi, "phi states do not match the model")?;
        self.check_states(psi, "psi states do not match the model")?;
        let p = self.compute_probability_matrix()?;
        dtmc::compute_until_probabilities(&p, &self.backward, phi, psi, self.factory.as_ref())
    }

    /// Expected visits to the states still able to reach `psi` through `phi`, and absorption
    /// probabilities for `psi`, from a uniform start over `initial` (on the embedded DTMC).
    pub fn compute_all_until_probabilities(
        &self,
        initial: &StateSet,
        phi: &StateSet,
        psi: &StateSet,
    ) -> Result<Array1<V>> {
        self.check_states(initial, "initial states do not match the model")?;
        self.check_states(phi, "phi states do not match the model")?;
        self.check_states(psi, "psi states do not match the model")?;
        let p = self.compute_probability_matrix()?;
        dtmc::compute_all_until_probabilities(&p, &self.backward, initial, phi, psi, self.factory.as_ref())
    }

    pub fn compute_next_probabilities(&self, next: &StateSet) -> Result<Array1<V>> {
        self.check_states(next, "next states do not match the model")?;
        let p = self.compute_probability_matrix()?;
        dtmc::compute_next_probabilities(&p, next)
    }

    /// Expected state reward at `time`.
    pub fn compute_instantaneous_rewards(&self, rewards: &RewardModel<V>, time: f64) -> Result<Array1<V>> {
        require_exponential::<V>("instantaneous rewards need exponential support")?;
        self.check_rewards(rewards)?;
        check_time(time)?;
        let state_rewards = rewards
            .state_rewards()
            .ok_or(Error::InvalidProperty("instantaneous rewards need state rewards"))?
            .clone();
        if time == 0.0 {
            return Ok(state_rewards);
        }
        let all = StateSet::full(self.num_states());
        self.propagate(&all, state_rewards, time)
    }

    /// Expected reward accumulated over `[0, time]`.
    pub fn compute_cumulative_rewards(&self, rewards: &RewardModel<V>, time: f64) -> Result<Array1<V>> {
        require_exponential::<V>("cumulative rewards need exponential support")?;
        self.check_rewards(rewards)?;
        check_time(time)?;
        let n = self.num_states();
        if time == 0.0 {
            return Ok(Array1::from_elem(n, V::zero()));
        }
        let exit = self.exit_rates.view();
        let all = StateSet::full(n);
        let rate = uniformization_rate(&exit, &all)?;
        let uniformized = compute_uniformized_matrix(self.rate_matrix, &all, &rate, &exit)?;
        let total = rewards.total_reward_vector(self.rate_matrix, &exit)?;
        compute_transient_probabilities(
            &uniformized,
            None,
            time,
            &rate,
            total,
            TransientMode::Cumulative,
            self.config.fox_glynn_precision(),
        )
    }

    /// Per-visit rewards of the embedded DTMC: state rewards times the mean sojourn time,
    /// plus state-action rewards, plus transition rewards weighted by jump probabilities.
    fn embedded_rewards(&self, p: &SparseMatrix<V>, rewards: &RewardModel<V>) -> Result<Array1<V>> {
        let mut out = Vec::with_capacity(self.num_states());
        for s in 0..self.num_states() {
            let mut r = V::zero();
            if rewards.has_state_rewards() {
                let state_reward = rewards.state_reward(s);
                let exit = &self.exit_rates[s];
                if !exit.is_zero() {
                    r = state_reward / exit.clone();
                } else if !state_reward.is_zero() {
                    // Rewards forever in a state that is never left.
                    r = V::infinity().ok_or(Error::Unsupported(
                        "infinite expected rewards are not representable in this numeric domain",
                    ))?;
                }
            }
            r = r + rewards.state_action_reward(s) + rewards.transition_reward_row_sum(p, s);
            out.push(r);
        }
        Ok(Array1::from_vec(out))
    }

    /// Expected reward accumulated until reaching `targets`.
    pub fn compute_reachability_rewards(
        &self,
        rewards: &RewardModel<V>,
        targets: &StateSet,
    ) -> Result<Array1<V>> {
        self.check_rewards(rewards)?;
        self.check_states(targets, "target states do not match the model")?;
        let p = self.compute_probability_matrix()?;
        let embedded = self.embedded_rewards(&p, rewards)?;
        dtmc::compute_reachability_rewards(&p, &self.backward, &embedded, targets, self.factory.as_ref())
    }

    /// Expected reward accumulated over the whole run.
    pub fn compute_total_rewards(&self, rewards: &RewardModel<V>) -> Result<Array1<V>> {
        self.check_rewards(rewards)?;
        let p = self.compute_probability_matrix()?;
        let embedded = self.embedded_rewards(&p, rewards)?;
        dtmc::compute_total_rewards(&p, &self.backward, &embedded, self.factory.as_ref())
    }

    /// Expected time until reaching `targets`.
    pub fn compute_reachability_times(&self, targets: &StateSet) -> Result<Array1<V>> {
        self.check_states(targets, "target states do not match the model")?;
        let p = self.compute_probability_matrix()?;
        let sojourn = Array1::from_shape_fn(self.num_states(), |s| {
            let exit = &self.exit_rates[s];
            if targets.contains(s) || exit.is_zero() {
                V::zero()
            } else {
                V::one() / exit.clone()
            }
        });
        dtmc::compute_reachability_rewards(&p, &self.backward, &sojourn, targets, self.factory.as_ref())
    }

    /// Long-run fraction of time spent in `psi`.
    pub fn compute_long_run_average_probabilities(&self, psi: &StateSet) -> Result<Array1<V>> {
        self.check_states(psi, "psi states do not match the model")?;
        let n = self.num_states();
        if psi.is_empty() {
            return Ok(Array1::from_elem(n, V::zero()));
        }
        if psi.is_full() {
            return Ok(Array1::from_elem(n, V::one()));
        }
        compute_long_run_averages(
            self.rate_matrix,
            |s| if psi.contains(s) { V::one() } else { V::zero() },
            Some(&self.exit_rates.view()),
            &self.config,
            self.factory.as_ref(),
        )
    }

    /// Long-run reward rate.
    pub fn compute_long_run_average_rewards(&self, rewards: &RewardModel<V>) -> Result<Array1<V>> {
        self.check_rewards(rewards)?;
        let exit = self.exit_rates.view();
        compute_long_run_averages(
            self.rate_matrix,
            |s| {
                let mut value = rewards.state_reward(s);
                if rewards.has_state_action_rewards() {
                    value = value + rewards.state_action_reward(s) * exit[s].clone();
                }
                if let Some(transition) = rewards.transition_rewards() {
                    value = value + pointwise_product_row_sum(self.rate_matrix, transition, s);
                }
                value
            },
            Some(&exit),
            &self.config,
            self.factory.as_ref(),
        )
    }

    /// Long-run average of a plain per-state reward rate.
    pub fn compute_long_run_average_rewards_from_vector(
        &self,
        state_rewards: &Array1<V>,
    ) -> Result<Array1<V>> {
        if state_rewards.len() != self.num_states() {
            return Err(Error::Shape("state rewards must have one entry per state"));
        }
        compute_long_run_averages(
            self.rate_matrix,
            |s| state_rewards[s].clone(),
            Some(&self.exit_rates.view()),
            &self.config,
            self.factory.as_ref(),
        )
    }

    /// Forward transient distribution at `time`, starting uniformly from `initial`, with
    /// `psi` made absorbing.
    pub fn compute_all_transient_probabilities(
        &self,
        initial: &StateSet,
        psi: &StateSet,
        time: f64,
    ) -> Result<Array1<V>> {
        require_exponential::<V>("transient distributions need exponential support")?;
        self.check_states(initial, "initial states do not match the model")?;
        self.check_states(psi, "psi states do not match the model")?;
        check_time(time)?;
        if initial.is_empty() {
            return Err(Error::Domain("at least one initial state is required"));
        }

        let n = self.num_states();
        let absorbing = make_rows_absorbing(self.rate_matrix, psi)?;
        let mut rates = self.exit_rates.clone();
        for s in psi.iter() {
            rates[s] = V::one();
        }
        let all = StateSet::full(n);
        let rate = uniformization_rate(&rates.view(), &all)?;
        // Row s of the transposed chain collects the inflow into s.
        let forward = transpose(&absorbing);
        let uniformized = compute_uniformized_matrix(&forward, &all, &rate, &rates.view())?;

        let mass = V::one() / from_count::<V>(initial.count())?;
        let start = Array1::from_shape_fn(n, |s| {
            if initial.contains(s) {
                mass.clone()
            } else {
                V::zero()
            }
        });
        compute_transient_probabilities(
            &uniformized,
            None,
            time,
            &rate,
            start,
            TransientMode::Instantaneous,
            self.config.fox_glynn_precision(),
        )
    }
}

fn check_time(time: f64) -> Result<()> {
    if !time.is_finite() || time < 0.0 {
        return Err(Error::Domain("time bound must be finite and nonnegative"));
    }
    Ok(())
}
