//! Reward structures attached to a CTMC.

use crate::matrix::{pointwise_product_row_sum, SparseMatrix};
use crate::value::ValueType;
use crate::{Error, Result};
use ndarray::{Array1, ArrayView1};

/// State, state-action and transition rewards; each part is optional.
///
/// In a CTMC every state has exactly one (implicit) action, so state-action rewards are also a
/// per-state vector. They are earned once per *step*, whereas state rewards are earned per
/// unit of *time*.
#[derive(Debug, Clone)]
pub struct RewardModel<V> {
    state_rewards: Option<Array1<V>>,
    state_action_rewards: Option<Array1<V>>,
    transition_rewards: Option<SparseMatrix<V>>,
}

impl<V> Default for RewardModel<V> {
    fn default() -> Self {
        Self {
            state_rewards: None,
            state_action_rewards: None,
            transition_rewards: None,
        }
    }
}

impl<V: ValueType> RewardModel<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state_rewards(mut self, rewards: Array1<V>) -> Self {
        self.state_rewards = Some(rewards);
        self
    }

    pub fn with_state_action_rewards(mut self, rewards: Array1<V>) -> Self {
        self.state_action_rewards = Some(rewards);
        self
    }

    pub fn with_transition_rewards(mut self, rewards: SparseMatrix<V>) -> Self {
        self.transition_rewards = Some(rewards);
        self
    }

    pub fn has_state_rewards(&self) -> bool {
        self.state_rewards.is_some()
    }

    pub fn has_state_action_rewards(&self) -> bool {
        self.state_action_rewards.is_some()
    }

    pub fn has_transition_rewards(&self) -> bool {
        self.transition_rewards.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !(self.has_state_rewards() || self.has_state_action_rewards() || self.has_transition_rewards())
    }

    pub fn state_rewards(&self) -> Option<&Array1<V>> {
        self.state_rewards.as_ref()
    }

    pub fn state_action_rewards(&self) -> Option<&Array1<V>> {
        self.state_action_rewards.as_ref()
    }

    pub fn transition_rewards(&self) -> Option<&SparseMatrix<V>> {
        self.transition_rewards.as_ref()
    }

    /// State reward of `state` (zero when there are no state rewards).
    pub fn state_reward(&self, state: usize) -> V {
        self.state_rewards
            .as_ref()
            .map_or_else(V::zero, |r| r[state].clone())
    }

    /// State-action reward of `state` (zero when there are none).
    pub fn state_action_reward(&self, state: usize) -> V {
        self.state_action_rewards
            .as_ref()
            .map_or_else(V::zero, |r| r[state].clone())
    }

    /// `Σ_j matrix(state, j) · transition_reward(state, j)` (zero without transition rewards).
    pub fn transition_reward_row_sum(&self, matrix: &SparseMatrix<V>, state: usize) -> V {
        self.transition_rewards
            .as_ref()
            .map_or_else(V::zero, |t| pointwise_product_row_sum(matrix, t, state))
    }

    /// Check every present part against a model with `num_states` states.
    pub fn validate(&self, num_states: usize) -> Result<()> {
        if self.state_rewards.as_ref().is_some_and(|r| r.len() != num_states) {
            return Err(Error::Shape("state rewards must have one entry per state"));
        }
        if self
            .state_action_rewards
            .as_ref()
            .is_some_and(|r| r.len() != num_states)
        {
            return Err(Error::Shape("state-action rewards must have one entry per state"));
        }
        if self
            .transition_rewards
            .as_ref()
            .is_some_and(|t| t.shape() != (num_states, num_states))
        {
            return Err(Error::Shape("transition rewards must be a square state matrix"));
        }
        Ok(())
    }

    /// Reward *rate* per state: state reward + state-action reward × exit rate + the
    /// transition rewards weighted by the rates.
    pub fn total_reward_vector(
        &self,
        rate_matrix: &SparseMatrix<V>,
        exit_rates: &ArrayView1<V>,
    ) -> Result<Array1<V>> {
        let n = rate_matrix.rows();
        self.validate(n)?;
        if exit_rates.len() != n {
            return Err(Error::Shape("exit rates must have one entry per state"));
        }
        Ok(Array1::from_vec(
            (0..n)
                .map(|s| {
                    self.state_reward(s)
                        + self.state_action_reward(s) * exit_rates[s].clone()
                        + self.transition_reward_row_sum(rate_matrix, s)
                })
                .collect(),
        ))
    }
}
