//! Qualitative (graph-based) analysis: reachability sets and bottom SCCs.
//!
//! Only the *structure* of a matrix matters here. Explicit zero entries (e.g. reserved
//! diagonals) are not edges.

use crate::matrix::{transpose, SparseMatrix};
use crate::states::StateSet;
use crate::value::ValueType;
use crate::Result;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

/// Backward transition structure: row `j` lists the predecessors of `j`.
pub fn backward_transitions<V: ValueType>(m: &SparseMatrix<V>) -> SparseMatrix<V> {
    transpose(m)
}

/// States that reach `psi` with positive probability while staying in `phi` until then.
///
/// Backward search from `psi` through `phi`-states.
pub fn prob_greater_0<V: ValueType>(
    backward: &SparseMatrix<V>,
    phi: &StateSet,
    psi: &StateSet,
) -> Result<StateSet> {
    phi.check_len(backward.rows(), "phi states do not match the model")?;
    psi.check_len(backward.rows(), "psi states do not match the model")?;

    let mut result = psi.clone();
    let mut stack: Vec<usize> = psi.iter().collect();
    while let Some(s) = stack.pop() {
        if let Some(preds) = backward.outer_view(s) {
            for (p, v) in preds.iter() {
                if v.is_zero() || result.contains(p) || !phi.contains(p) {
                    continue;
                }
                result.insert(p);
                stack.push(p);
            }
        }
    }
    Ok(result)
}

/// Complement of [`prob_greater_0`].
pub fn prob_0<V: ValueType>(
    backward: &SparseMatrix<V>,
    phi: &StateSet,
    psi: &StateSet,
) -> Result<StateSet> {
    Ok(prob_greater_0(backward, phi, psi)?.complement())
}

/// States reaching `psi` with probability one, given the precomputed `greater0` set.
///
/// A state fails to be almost-sure iff it can reach a probability-zero state before `psi`.
pub fn prob_1<V: ValueType>(
    backward: &SparseMatrix<V>,
    phi: &StateSet,
    psi: &StateSet,
    greater0: &StateSet,
) -> Result<StateSet> {
    let not_one = prob_greater_0(backward, &phi.and_not(psi), &greater0.complement())?;
    Ok(not_one.complement())
}

/// `(prob0, prob1)` for `phi U psi`.
pub fn prob_01<V: ValueType>(
    backward: &SparseMatrix<V>,
    phi: &StateSet,
    psi: &StateSet,
) -> Result<(StateSet, StateSet)> {
    let greater0 = prob_greater_0(backward, phi, psi)?;
    let one = prob_1(backward, phi, psi, &greater0)?;
    Ok((greater0.complement(), one))
}

/// Bottom strongly connected components of the (forward) matrix.
///
/// Each component is listed by its sorted members, and the components are ordered by smallest
/// member. A state without successors forms a singleton BSCC.
pub fn bottom_sccs<V: ValueType>(m: &SparseMatrix<V>) -> Vec<Vec<usize>> {
    let n = m.rows();
    let mut graph: DiGraph<(), ()> = DiGraph::with_capacity(n, m.nnz());
    for _ in 0..n {
        graph.add_node(());
    }
    for (r, row) in m.outer_iterator().enumerate() {
        for (c, v) in row.iter() {
            if !v.is_zero() {
                graph.add_edge(NodeIndex::new(r), NodeIndex::new(c), ());
            }
        }
    }

    let sccs = tarjan_scc(&graph);
    let mut component = vec![0usize; n];
    for (id, scc) in sccs.iter().enumerate() {
        for node in scc {
            component[node.index()] = id;
        }
    }

    let mut bottom: Vec<Vec<usize>> = sccs
        .iter()
        .enumerate()
        .filter(|(id, scc)| {
            scc.iter().all(|node| {
                graph
                    .neighbors(*node)
                    .all(|succ| component[succ.index()] == *id)
            })
        })
        .map(|(_, scc)| {
            let mut members: Vec<usize> = scc.iter().map(|node| node.index()).collect();
            members.sort_unstable();
            members
        })
        .collect();
    bottom.sort_unstable_by_key(|members| members.first().copied());
    bottom
}
