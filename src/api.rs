//! Python binding layer for Mk likelihoods and MCMC.
//!
//! Every function takes the tree as a Newick string and the tip states as a
//! `dict[str, int]`.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::collections::HashMap;
use std::fmt::Display;

use crate::likelihood;
use crate::mcmc::{self, RateChainConfig, RatePrior, TopologyChainConfig};
use crate::traits::TraitData;
use crate::tree::Tree;

fn value_error(e: impl Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Helper function to build a tree with tip states
fn build_tree(newick: &str, states: HashMap<String, usize>) -> PyResult<Tree> {
    let traits = TraitData::new(states).map_err(value_error)?;
    Tree::from_newick(newick, &traits).map_err(value_error)
}

fn rate_config(
    n_iterations: usize,
    proposal_width: f64,
    initial_rate: Option<f64>,
    prior_upper: f64,
) -> RateChainConfig {
    RateChainConfig {
        n_iterations,
        proposal_width,
        initial_rate,
        prior: RatePrior::Uniform {
            lower: 0.0,
            upper: prior_upper,
        },
    }
}

/// Likelihood of a tree under the Mk model at a given rate.
///
/// Args:
///     newick: Tree in Newick notation, strictly binary with labeled leaves
///     states: Mapping from leaf label to state index (0..k-1)
///     rate: Transition rate between any two states
///
/// Returns:
///     The marginal likelihood under a flat prior over root states
///
/// Raises:
///     ValueError: If the tree is malformed or a leaf has no state
#[pyfunction]
#[pyo3(signature = (newick, states, rate=1.0))]
fn tree_likelihood(newick: &str, states: HashMap<String, usize>, rate: f64) -> PyResult<f64> {
    let mut tree = build_tree(newick, states)?;
    likelihood::tree_likelihood(&mut tree, rate).map_err(value_error)
}

/// Sample the Mk rate with a Metropolis chain.
///
/// Args:
///     newick: Tree in Newick notation
///     states: Mapping from leaf label to state index
///     n_iterations: Chain length (default: 1000)
///     proposal_width: Width of the uniform proposal window (default: 0.2)
///     initial_rate: Starting rate, drawn from the prior when None
///     prior_upper: Upper bound of the uniform prior on [0, prior_upper] (default: 1.0)
///     seed: Seed for a reproducible chain
///
/// Returns:
///     A tuple of (samples, likelihoods), both of length n_iterations
///
/// Raises:
///     ValueError: If the input or the configuration is invalid
#[pyfunction]
#[pyo3(signature = (newick, states, n_iterations=1000, proposal_width=0.2, initial_rate=None, prior_upper=1.0, seed=None))]
fn sample_rate(
    newick: &str,
    states: HashMap<String, usize>,
    n_iterations: usize,
    proposal_width: f64,
    initial_rate: Option<f64>,
    prior_upper: f64,
    seed: Option<u64>,
) -> PyResult<(Vec<f64>, Vec<f64>)> {
    let mut tree = build_tree(newick, states)?;
    let config = rate_config(n_iterations, proposal_width, initial_rate, prior_upper);
    let mut rng = mcmc::random_number_generator(seed);
    let trace = mcmc::sample_rate_with(&mut tree, &config, &mut rng).map_err(value_error)?;
    Ok((trace.samples, trace.likelihoods))
}

/// Sample tree topologies by prune-and-regraft at a fixed rate.
///
/// Args:
///     newick: Starting tree in Newick notation
///     states: Mapping from leaf label to state index
///     n_iterations: Chain length (default: 1000)
///     rate: Fixed Mk rate (default: 0.5)
///     seed: Seed for a reproducible chain
///
/// Returns:
///     A tuple of (trees, likelihoods) where trees are Newick strings of the
///     current tree after each iteration
///
/// Raises:
///     ValueError: If the input or the configuration is invalid
#[pyfunction]
#[pyo3(signature = (newick, states, n_iterations=1000, rate=0.5, seed=None))]
fn sample_topology(
    newick: &str,
    states: HashMap<String, usize>,
    n_iterations: usize,
    rate: f64,
    seed: Option<u64>,
) -> PyResult<(Vec<String>, Vec<f64>)> {
    let tree = build_tree(newick, states)?;
    let config = TopologyChainConfig { n_iterations, rate };
    let mut rng = mcmc::random_number_generator(seed);
    let trace = mcmc::sample_topology_with(&tree, &config, &mut rng).map_err(value_error)?;
    let trees = trace.trees.iter().map(Tree::to_newick).collect();
    Ok((trees, trace.likelihoods))
}

/// Run independent rate chains in parallel.
///
/// Chain i is seeded with seed + i.
///
/// Returns:
///     A list of (samples, likelihoods) tuples, one per chain
#[pyfunction]
#[pyo3(signature = (newick, states, n_chains, n_iterations=1000, proposal_width=0.2, prior_upper=1.0, seed=None))]
fn sample_rate_replicates(
    newick: &str,
    states: HashMap<String, usize>,
    n_chains: usize,
    n_iterations: usize,
    proposal_width: f64,
    prior_upper: f64,
    seed: Option<u64>,
) -> PyResult<Vec<(Vec<f64>, Vec<f64>)>> {
    let tree = build_tree(newick, states)?;
    let config = rate_config(n_iterations, proposal_width, None, prior_upper);
    let chains =
        mcmc::sample_rate_replicates(&tree, &config, n_chains, seed).map_err(value_error)?;
    Ok(chains
        .into_iter()
        .map(|trace| (trace.samples, trace.likelihoods))
        .collect())
}

/// Python module definition
#[pymodule]
fn rust_mk_tree_mcmc(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(tree_likelihood, m)?)?;
    m.add_function(wrap_pyfunction!(sample_rate, m)?)?;
    m.add_function(wrap_pyfunction!(sample_topology, m)?)?;
    m.add_function(wrap_pyfunction!(sample_rate_replicates, m)?)?;
    Ok(())
}
