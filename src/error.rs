//! Error taxonomy for tree construction, topology edits, likelihood
//! evaluation and sampling.
//!
//! Every error is raised synchronously at the point of violation and never
//! retried. Inside a Markov chain a [`LikelihoodError`] is fatal: it is
//! propagated out of the sampler as [`McmcError::Likelihood`] instead of
//! being counted as a rejected proposal.

use crate::tree::NodeId;
use thiserror::Error;

/// Malformed or non-binary tree input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructureError {
    /// The external Newick parser rejected the input.
    #[error("failed to parse tree: {0}")]
    Parse(String),

    /// A node has a number of children other than 0 or 2.
    #[error("node {node} has {children} children, expected a strictly binary tree")]
    NotBinary { node: String, children: usize },

    /// Leaves must carry a label.
    #[error("leaf without a label")]
    UnlabeledLeaf,

    /// Leaf labels must be unique.
    #[error("duplicate leaf label {0:?}")]
    DuplicateLabel(String),

    #[error("negative branch length {length} above node {node}")]
    NegativeBranchLength { node: String, length: f64 },

    /// The state count is `max(index) + 1`, so at least one assignment is needed.
    #[error("trait data assigns no states")]
    EmptyStateAssignment,

    #[error("state {state} out of range for a model with {n_states} states")]
    StateOutOfRange { state: usize, n_states: usize },
}

/// Illegal topology edit. The tree is left untouched when one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    #[error("cannot detach root")]
    CannotDetachRoot,

    #[error("cannot swap position of root node")]
    SwapRoot,

    #[error("attempt to swap siblings {0} and {1}")]
    SwapSiblings(NodeId, NodeId),

    #[error("cannot swap node {node} with its ancestor {ancestor}")]
    SwapAncestor { node: NodeId, ancestor: NodeId },

    #[error("cannot swap node {0} with itself")]
    SwapSelf(NodeId),

    #[error("node {0} is not a member of the tree")]
    NotMember(NodeId),

    #[error("node {0} is still attached to the tree")]
    NotDetached(NodeId),

    #[error("leaf label {0:?} already present in the tree")]
    DuplicateLabel(String),

    #[error("tree has no non-root node to prune")]
    NothingToPrune,
}

/// The pruning pass met a node it cannot evaluate. Indicates upstream
/// structural corruption, not a transient condition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LikelihoodError {
    #[error("child {child} of node {node} has no computed likelihoods")]
    MissingChildLikelihoods { node: NodeId, child: NodeId },

    #[error("leaf {0} has no computed likelihoods")]
    UncomputedLeaf(NodeId),

    #[error("node {0} is not a member of the tree")]
    NotMember(NodeId),
}

/// Failure of a Markov chain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum McmcError {
    #[error(transparent)]
    Likelihood(#[from] LikelihoodError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("invalid sampler configuration: {0}")]
    InvalidConfig(String),
}

/// Umbrella error for the binary, the trace writers and the Python layer.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Likelihood(#[from] LikelihoodError),

    #[error(transparent)]
    Mcmc(#[from] McmcError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detach_root_message() {
        assert_eq!(TopologyError::CannotDetachRoot.to_string(), "cannot detach root");
    }

    #[test]
    fn test_chain_errors_keep_their_source() {
        let err: McmcError = LikelihoodError::UncomputedLeaf(3).into();
        assert_eq!(err, McmcError::Likelihood(LikelihoodError::UncomputedLeaf(3)));
        assert_eq!(err.to_string(), "leaf 3 has no computed likelihoods");

        let err: Error = err.into();
        assert!(matches!(err, Error::Mcmc(McmcError::Likelihood(_))));
    }
}
