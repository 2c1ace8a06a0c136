//! Crate root: module orchestration and public re-exports.
//!
//! Modules:
//! - `error`: error taxonomy (structure, topology, likelihood, sampler).
//! - `traits`: observed tip states and their number of states.
//! - `io`: Newick parsing via `phylotree` and TSV trace output.
//! - `tree`: arena-backed strictly binary tree with per-node likelihoods.
//! - `topology`: detach / attach / swap / prune-and-regraft.
//! - `mk`: Mk rate matrix and transition probabilities.
//! - `likelihood`: Felsenstein pruning.
//! - `mcmc`: Metropolis samplers over the rate and the topology.
//! - `api`: Python bindings via `pyo3` (gated behind "python" feature).

pub mod error;
pub mod io;
pub mod likelihood;
pub mod mcmc;
pub mod mk;
pub mod topology;
pub mod traits;
pub mod tree;

#[cfg(feature = "python")]
pub mod api;

// Re-export frequently used types & functions
pub use error::{Error, LikelihoodError, McmcError, Result, StructureError, TopologyError};
pub use io::{parse_newick, read_newick, write_rate_trace_tsv, write_topology_trace_tsv};
pub use likelihood::{subtree_likelihood, tree_likelihood};
pub use mcmc::{
    random_number_generator, sample_rate, sample_rate_replicates, sample_rate_with,
    sample_topology, sample_topology_replicates, sample_topology_with, RateChainConfig,
    RatePrior, RateTrace, TopologyChainConfig, TopologyTrace,
};
pub use mk::MkModel;
pub use topology::Detached;
pub use traits::TraitData;
pub use tree::{NodeId, Tree};
