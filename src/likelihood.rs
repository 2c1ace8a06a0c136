//! Felsenstein's pruning algorithm under the Mk model.
//!
//! # Algorithm
//! For each node, from the deepest level up to the subtree root:
//!
//! ```text
//! L[node, s] = Π_{child} Σ_i L[child, i] · P(i → s | t_child, q)
//! ```
//!
//! `P` is the transition matrix for the child's branch, evaluated once per
//! edge per pass. Tips keep the vectors set at construction. The subtree
//! likelihood is the root vector averaged under a flat prior over the `k`
//! states: `Σ_s L[root, s] / k`.
//!
//! Nodes are processed in reverse level order (no recursion), so a node is
//! only reached after both of its children.
//!
//! # Numeric limitation
//! Plain probabilities are multiplied throughout. Trees with many tips or long
//! branches can underflow to `0.0`; this is logged but not corrected.

use crate::error::LikelihoodError;
use crate::mk::MkModel;
use crate::tree::{Likelihoods, NodeId, NodeKind, Tree};
use log::warn;

/// Compute likelihood vectors for every internal node below (and including)
/// `node`, and return the marginal likelihood of that subtree at `rate`.
///
/// # Errors
/// - [`LikelihoodError::NotMember`] if `node` is not in the tree.
/// - [`LikelihoodError::MissingChildLikelihoods`] if a child vector is not
///   computed when its parent is reached (e.g. a tip without observed state).
/// - [`LikelihoodError::UncomputedLeaf`] if `node` itself is such a tip.
pub fn subtree_likelihood(
    tree: &mut Tree,
    node: NodeId,
    rate: f64,
) -> Result<f64, LikelihoodError> {
    if !tree.contains(node) {
        return Err(LikelihoodError::NotMember(node));
    }

    let n_states = tree.n_states();
    let model = MkModel::new(rate, n_states);

    for id in tree.level_order(node).into_iter().rev() {
        let children = match &tree.get(id).kind {
            NodeKind::Leaf { .. } => continue,
            NodeKind::Internal { children, .. } => *children,
        };

        let mut combined = vec![1.0; n_states];
        for child in children {
            let child_node = tree.get(child);
            let child_likelihoods = child_node
                .likelihoods
                .values()
                .ok_or(LikelihoodError::MissingChildLikelihoods { node: id, child })?;
            let p = model.transition_probabilities(child_node.branch_length.unwrap_or(0.0));

            for (s, value) in combined.iter_mut().enumerate() {
                let branch: f64 = child_likelihoods
                    .iter()
                    .enumerate()
                    .map(|(i, l)| l * p[(i, s)])
                    .sum();
                *value *= branch;
            }
        }
        tree.set_likelihoods(id, Likelihoods::computed(combined));
    }

    let root_likelihoods = tree
        .get(node)
        .likelihoods
        .values()
        .ok_or(LikelihoodError::UncomputedLeaf(node))?;

    // Flat prior over root states
    let prior = 1.0 / n_states as f64;
    let likelihood: f64 = root_likelihoods.iter().map(|l| prior * l).sum();
    if likelihood == 0.0 {
        warn!("Likelihood of subtree at node {node} underflowed to 0 (rate {rate})");
    }
    Ok(likelihood)
}

/// Whole-tree likelihood, i.e. [`subtree_likelihood`] at the current root.
pub fn tree_likelihood(tree: &mut Tree, rate: f64) -> Result<f64, LikelihoodError> {
    let root = tree.root();
    subtree_likelihood(tree, root, rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::TraitData;
    use crate::tree::tests::{tips, NEWICK};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_likelihood() {
        let mut tree = Tree::from_newick(NEWICK, &tips()).unwrap();
        let l = tree_likelihood(&mut tree, 1.0).unwrap();
        assert_eq!((l * 1e4).round() / 1e4, 0.0015);
        assert_abs_diff_eq!(l, 0.0015036826563742522, epsilon = 1e-12);
    }

    #[test]
    fn test_all_internal_nodes_computed() {
        let mut tree = Tree::from_newick(NEWICK, &tips()).unwrap();
        tree_likelihood(&mut tree, 1.0).unwrap();
        for id in tree.node_ids() {
            let node = tree.node(id).unwrap();
            assert!(node.likelihoods().is_computed());
            assert_eq!(node.likelihoods().len(), 3);
        }
    }

    #[test]
    fn test_tips_never_overwritten() {
        let mut tree = Tree::from_newick(NEWICK, &tips()).unwrap();
        let before: Vec<_> = tree
            .leaves()
            .into_iter()
            .map(|id| tree.node(id).unwrap().likelihoods().clone())
            .collect();
        tree_likelihood(&mut tree, 0.3).unwrap();
        tree_likelihood(&mut tree, 2.0).unwrap();
        let after: Vec<_> = tree
            .leaves()
            .into_iter()
            .map(|id| tree.node(id).unwrap().likelihoods().clone())
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_cherry_subtree() {
        // (A:1,B:1) with A=0, B=1 under 3 states and rate 1:
        // L[s] = P(0->s) P(1->s), summed under the flat prior
        let mut tree = Tree::from_newick(NEWICK, &tips()).unwrap();
        let a = tree.find_leaf("A").unwrap();
        let cherry = tree.node(a).unwrap().parent().unwrap();
        let l = subtree_likelihood(&mut tree, cherry, 1.0).unwrap();

        let decay = (-3.0f64).exp();
        let same = 1.0 / 3.0 + 2.0 / 3.0 * decay;
        let diff = 1.0 / 3.0 - decay / 3.0;
        let expected = (2.0 * same * diff + diff * diff) / 3.0;
        assert_abs_diff_eq!(l, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_length_branches() {
        // Identical tips on zero-length branches: only their shared state survives
        let traits = TraitData::new([("A", 0), ("B", 0), ("C", 1)]).unwrap();
        let mut tree = Tree::from_newick("(A:0,B:0)", &traits).unwrap();
        let l = tree_likelihood(&mut tree, 1.0).unwrap();
        assert_abs_diff_eq!(l, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_rate() {
        // No change possible: likelihood is 1/k when all tips agree, 0 otherwise
        let traits = TraitData::new([("A", 1), ("B", 1), ("C", 1), ("D", 0)]).unwrap();
        let mut tree = Tree::from_newick("((A:1,B:2):1,C:3)", &traits).unwrap();
        assert_abs_diff_eq!(tree_likelihood(&mut tree, 0.0).unwrap(), 0.5, epsilon = 1e-12);

        let mut tree = Tree::from_newick("((A:1,D:2):1,C:3)", &traits).unwrap();
        assert_abs_diff_eq!(tree_likelihood(&mut tree, 0.0).unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_tip_state_fails() {
        let traits = TraitData::new([("A", 0), ("B", 1)]).unwrap();
        let mut tree = Tree::from_newick("((A:1,B:1):1,C:1)", &traits).unwrap();
        let c = tree.find_leaf("C").unwrap();
        let err = tree_likelihood(&mut tree, 1.0).unwrap_err();
        assert_eq!(
            err,
            LikelihoodError::MissingChildLikelihoods {
                node: tree.root(),
                child: c
            }
        );

        let err = subtree_likelihood(&mut tree, c, 1.0).unwrap_err();
        assert_eq!(err, LikelihoodError::UncomputedLeaf(c));
    }

    #[test]
    fn test_not_member() {
        let mut tree = Tree::from_newick(NEWICK, &tips()).unwrap();
        let err = subtree_likelihood(&mut tree, 999, 1.0).unwrap_err();
        assert_eq!(err, LikelihoodError::NotMember(999));
    }
}
