//! Immutable-by-convention sets of state indices over a fixed state range.

use crate::{Error, Result};
use fixedbitset::FixedBitSet;
use ndarray::Array1;

/// A set of states `⊆ {0, .., len-1}` (phi-states, psi-states, targets, BSCC members, ...).
///
/// Iteration is always in ascending index order, which is what gives "local" indices in
/// submatrices their meaning: the `k`-th member of a set is row `k` of the submatrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSet {
    bits: FixedBitSet,
}

impl StateSet {
    /// No states out of `len`.
    pub fn empty(len: usize) -> Self {
        Self {
            bits: FixedBitSet::with_capacity(len),
        }
    }

    /// All `len` states.
    pub fn full(len: usize) -> Self {
        let mut bits = FixedBitSet::with_capacity(len);
        bits.insert_range(..);
        Self { bits }
    }

    pub fn from_states(len: usize, states: impl IntoIterator<Item = usize>) -> Result<Self> {
        let mut set = Self::empty(len);
        for s in states {
            if s >= len {
                return Err(Error::Shape("state index out of range"));
            }
            set.bits.insert(s);
        }
        Ok(set)
    }

    /// `{ s : pred(s) }` over `0..len`.
    pub fn from_predicate(len: usize, mut pred: impl FnMut(usize) -> bool) -> Self {
        let mut set = Self::empty(len);
        for s in 0..len {
            if pred(s) {
                set.bits.insert(s);
            }
        }
        set
    }

    /// Size of the universe (number of states of the model).
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Number of members.
    pub fn count(&self) -> usize {
        self.bits.count_ones(..)
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_full(&self) -> bool {
        self.count() == self.len()
    }

    pub fn contains(&self, state: usize) -> bool {
        self.bits.contains(state)
    }

    pub fn insert(&mut self, state: usize) {
        self.bits.insert(state);
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.ones()
    }

    pub fn complement(&self) -> Self {
        let mut bits = self.bits.clone();
        bits.toggle_range(..);
        Self { bits }
    }

    pub fn and(&self, other: &StateSet) -> Self {
        let mut bits = self.bits.clone();
        bits.intersect_with(&other.bits);
        Self { bits }
    }

    pub fn or(&self, other: &StateSet) -> Self {
        let mut bits = self.bits.clone();
        bits.union_with(&other.bits);
        Self { bits }
    }

    pub fn and_not(&self, other: &StateSet) -> Self {
        let mut bits = self.bits.clone();
        bits.difference_with(&other.bits);
        Self { bits }
    }

    /// For every state, its position among the members (`None` for non-members).
    pub fn local_indices(&self) -> Vec<Option<usize>> {
        let mut out = vec![None; self.len()];
        for (local, global) in self.iter().enumerate() {
            out[global] = Some(local);
        }
        out
    }

    /// Re-index `self` into the member positions of `within`.
    ///
    /// The result has `within.count()` slots; slot `k` is set iff the `k`-th member of
    /// `within` is in `self`.
    pub fn restrict_to(&self, within: &StateSet) -> StateSet {
        let mut out = StateSet::empty(within.count());
        for (local, global) in within.iter().enumerate() {
            if self.contains(global) {
                out.bits.insert(local);
            }
        }
        out
    }

    pub(crate) fn check_len(&self, len: usize, what: &'static str) -> Result<()> {
        if self.len() != len {
            return Err(Error::Shape(what));
        }
        Ok(())
    }
}

/// Entries of `values` at the members of `states`, in ascending order.
pub(crate) fn gather<V: Clone>(values: &Array1<V>, states: &StateSet) -> Array1<V> {
    states.iter().map(|s| values[s].clone()).collect()
}

/// Write `local[k]` to `target[s]` for the `k`-th member `s` of `states`.
pub(crate) fn scatter<V: Clone>(target: &mut Array1<V>, states: &StateSet, local: &Array1<V>) {
    for (k, s) in states.iter().enumerate() {
        target[s] = local[k].clone();
    }
}
