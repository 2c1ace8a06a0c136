//! Metropolis samplers over the Mk rate and over tree topologies.
//!
//! Both chains share one skeleton: propose, evaluate the pruning likelihood,
//! accept with probability `min(1, likelihood ratio · prior ratio)` by
//! comparing against a uniform(0, 1) draw, record. Chains are pure: no burn-in,
//! thinning or convergence diagnostics are applied here.
//!
//! A [`LikelihoodError`](crate::error::LikelihoodError) during a chain is
//! fatal and returned as [`McmcError::Likelihood`], never counted as a
//! rejection.
//!
//! Independent replicates run in parallel with `rayon`; each replicate owns its
//! own copy of the tree and its own RNG seeded with `seed + i`.

use crate::error::McmcError;
use crate::likelihood::tree_likelihood;
use crate::tree::Tree;
use log::{debug, info, trace};
use rand::{Rng, SeedableRng};
use rand_isaac::Isaac64Rng;
use rayon::prelude::*;

/// Seeded RNG for reproducible chains, or entropy-seeded when `seed` is `None`.
pub fn random_number_generator(seed: Option<u64>) -> Isaac64Rng {
    match seed {
        None => Isaac64Rng::from_entropy(),
        Some(seed) => Isaac64Rng::seed_from_u64(seed),
    }
}

/// Prior distribution over the rate parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RatePrior {
    Uniform { lower: f64, upper: f64 },
    Exponential { mean: f64 },
}

impl Default for RatePrior {
    fn default() -> Self {
        RatePrior::Uniform {
            lower: 0.0,
            upper: 1.0,
        }
    }
}

impl RatePrior {
    /// Probability density at `rate`; `0.0` outside the support.
    pub fn density(&self, rate: f64) -> f64 {
        match *self {
            RatePrior::Uniform { lower, upper } => {
                if (lower..=upper).contains(&rate) {
                    1.0 / (upper - lower)
                } else {
                    0.0
                }
            }
            RatePrior::Exponential { mean } => {
                if rate >= 0.0 {
                    (-rate / mean).exp() / mean
                } else {
                    0.0
                }
            }
        }
    }

    /// Draw a rate from the prior.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match *self {
            RatePrior::Uniform { lower, upper } => rng.gen_range(lower..upper),
            RatePrior::Exponential { mean } => {
                let u: f64 = rng.gen_range(0.0..1.0);
                -mean * (1.0 - u).ln()
            }
        }
    }

    fn validate(&self) -> Result<(), McmcError> {
        match *self {
            RatePrior::Uniform { lower, upper } => {
                if !(lower.is_finite() && upper.is_finite() && 0.0 <= lower && lower < upper) {
                    return Err(McmcError::InvalidConfig(format!(
                        "uniform prior needs 0 <= lower < upper, got [{lower}, {upper}]"
                    )));
                }
            }
            RatePrior::Exponential { mean } => {
                if !(mean.is_finite() && mean > 0.0) {
                    return Err(McmcError::InvalidConfig(format!(
                        "exponential prior needs a positive mean, got {mean}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Settings of a rate chain.
#[derive(Debug, Clone, PartialEq)]
pub struct RateChainConfig {
    pub n_iterations: usize,
    /// Width `w` of the uniform proposal window `[q - w/2, q + w/2]`.
    pub proposal_width: f64,
    /// Starting rate; drawn from the prior when `None`.
    pub initial_rate: Option<f64>,
    pub prior: RatePrior,
}

impl Default for RateChainConfig {
    fn default() -> Self {
        Self {
            n_iterations: 1000,
            proposal_width: 0.2,
            initial_rate: None,
            prior: RatePrior::default(),
        }
    }
}

impl RateChainConfig {
    fn validate(&self) -> Result<(), McmcError> {
        self.prior.validate()?;
        if !(self.proposal_width.is_finite() && self.proposal_width > 0.0) {
            return Err(McmcError::InvalidConfig(format!(
                "proposal width must be positive, got {}",
                self.proposal_width
            )));
        }
        if let Some(rate) = self.initial_rate {
            if self.prior.density(rate) <= 0.0 {
                return Err(McmcError::InvalidConfig(format!(
                    "initial rate {rate} is outside the prior support"
                )));
            }
        }
        Ok(())
    }
}

/// Settings of a topology chain.
#[derive(Debug, Clone, PartialEq)]
pub struct TopologyChainConfig {
    pub n_iterations: usize,
    /// Fixed rate at which every topology is evaluated.
    pub rate: f64,
}

impl Default for TopologyChainConfig {
    fn default() -> Self {
        Self {
            n_iterations: 1000,
            rate: 0.5,
        }
    }
}

impl TopologyChainConfig {
    fn validate(&self) -> Result<(), McmcError> {
        if !(self.rate.is_finite() && self.rate >= 0.0) {
            return Err(McmcError::InvalidConfig(format!(
                "rate must be non-negative, got {}",
                self.rate
            )));
        }
        Ok(())
    }
}

/// Output of a rate chain: one entry per iteration in both sequences.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTrace {
    /// Current rate after each accept/reject decision.
    pub samples: Vec<f64>,
    /// Likelihood of the current rate before each proposal.
    pub likelihoods: Vec<f64>,
    pub accepted: usize,
}

impl RateTrace {
    pub fn acceptance_rate(&self) -> f64 {
        acceptance_rate(self.accepted, self.samples.len())
    }
}

/// Output of a topology chain: the current tree and its likelihood after each decision.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyTrace {
    pub trees: Vec<Tree>,
    pub likelihoods: Vec<f64>,
    pub accepted: usize,
}

impl TopologyTrace {
    pub fn acceptance_rate(&self) -> f64 {
        acceptance_rate(self.accepted, self.trees.len())
    }
}

fn acceptance_rate(accepted: usize, iterations: usize) -> f64 {
    if iterations == 0 {
        0.0
    } else {
        accepted as f64 / iterations as f64
    }
}

/// Symmetric proposal `|q + U(-w/2, w/2)|`, reflected at zero. `width` must be positive.
pub(crate) fn propose_rate<R: Rng + ?Sized>(current: f64, width: f64, rng: &mut R) -> f64 {
    let half = width / 2.0;
    (current + rng.gen_range(-half..half)).abs()
}

/// `L(proposal) / L(current)`; an underflowed current likelihood accepts any
/// proposal that is not itself zero.
fn likelihood_ratio(proposal: f64, current: f64) -> f64 {
    if current > 0.0 {
        proposal / current
    } else if proposal > 0.0 {
        f64::INFINITY
    } else {
        1.0
    }
}

/// Metropolis decision: accept with probability `min(1, ratio)`.
fn accept<R: Rng + ?Sized>(ratio: f64, rng: &mut R) -> bool {
    rng.gen_range(0.0..1.0) < ratio
}

/// Rate chain with the default prior and a starting rate drawn from it.
pub fn sample_rate<R: Rng + ?Sized>(
    tree: &mut Tree,
    n_iterations: usize,
    proposal_width: f64,
    rng: &mut R,
) -> Result<RateTrace, McmcError> {
    let config = RateChainConfig {
        n_iterations,
        proposal_width,
        ..Default::default()
    };
    sample_rate_with(tree, &config, rng)
}

/// Metropolis chain over the rate parameter.
///
/// # Algorithm
/// ```text
/// q ← initial rate, L ← L(q)
/// repeat n times:
///     q' ← |q + U(-w/2, w/2)|
///     r  ← L(q')/L(q) · prior(q')/prior(q)      (L(q') skipped when prior(q') = 0)
///     record L
///     if U(0, 1) < r: q ← q', L ← L(q')
///     record q
/// ```
///
/// The tree's internal likelihood vectors are overwritten by each evaluation.
pub fn sample_rate_with<R: Rng + ?Sized>(
    tree: &mut Tree,
    config: &RateChainConfig,
    rng: &mut R,
) -> Result<RateTrace, McmcError> {
    config.validate()?;

    let mut current = match config.initial_rate {
        Some(rate) => rate,
        None => config.prior.draw(rng),
    };
    let mut l_current = tree_likelihood(tree, current)?;
    debug!(
        "Starting rate chain: {} iterations, width {}, prior {:?}, initial rate {current}",
        config.n_iterations, config.proposal_width, config.prior
    );

    let mut trace = RateTrace {
        samples: Vec::with_capacity(config.n_iterations),
        likelihoods: Vec::with_capacity(config.n_iterations),
        accepted: 0,
    };
    for i in 0..config.n_iterations {
        let proposal = propose_rate(current, config.proposal_width, rng);
        let prior_ratio = config.prior.density(proposal) / config.prior.density(current);
        trace.likelihoods.push(l_current);

        if prior_ratio > 0.0 {
            let l_proposal = tree_likelihood(tree, proposal)?;
            let ratio = likelihood_ratio(l_proposal, l_current) * prior_ratio;
            let accepted = accept(ratio, rng);
            trace!(
                "Iteration {i}: rate {current} -> {proposal}, ratio {ratio:.6}, accepted {accepted}"
            );
            if accepted {
                current = proposal;
                l_current = l_proposal;
                trace.accepted += 1;
            }
        } else {
            trace!("Iteration {i}: rate {proposal} outside prior support, rejected");
        }
        trace.samples.push(current);
    }

    info!(
        "Rate chain finished: {} iterations, acceptance rate {:.3}, final rate {current}",
        config.n_iterations,
        trace.acceptance_rate()
    );
    Ok(trace)
}

/// Topology chain with the default fixed rate.
pub fn sample_topology<R: Rng + ?Sized>(
    tree: &Tree,
    n_iterations: usize,
    rng: &mut R,
) -> Result<TopologyTrace, McmcError> {
    let config = TopologyChainConfig {
        n_iterations,
        ..Default::default()
    };
    sample_topology_with(tree, &config, rng)
}

/// Metropolis chain over tree topologies at a fixed rate.
///
/// Every iteration copies the current tree, applies one
/// [`Tree::prune_and_regraft`] to the copy and keeps the copy if accepted.
/// No topology prior is applied, so the acceptance ratio is the likelihood
/// ratio alone. The input tree is left as is.
pub fn sample_topology_with<R: Rng + ?Sized>(
    tree: &Tree,
    config: &TopologyChainConfig,
    rng: &mut R,
) -> Result<TopologyTrace, McmcError> {
    config.validate()?;

    let mut current = tree.clone();
    let mut l_current = tree_likelihood(&mut current, config.rate)?;
    debug!(
        "Starting topology chain: {} iterations at rate {}, {} leaves",
        config.n_iterations,
        config.rate,
        current.n_leaves()
    );

    let mut trace = TopologyTrace {
        trees: Vec::with_capacity(config.n_iterations),
        likelihoods: Vec::with_capacity(config.n_iterations),
        accepted: 0,
    };
    for i in 0..config.n_iterations {
        let mut proposal = current.clone();
        proposal.prune_and_regraft(rng)?;
        let l_proposal = tree_likelihood(&mut proposal, config.rate)?;

        let ratio = likelihood_ratio(l_proposal, l_current);
        let accepted = accept(ratio, rng);
        trace!("Iteration {i}: likelihood {l_current} -> {l_proposal}, accepted {accepted}");
        if accepted {
            current = proposal;
            l_current = l_proposal;
            trace.accepted += 1;
        }
        trace.trees.push(current.clone());
        trace.likelihoods.push(l_current);
    }

    info!(
        "Topology chain finished: {} iterations, acceptance rate {:.3}",
        config.n_iterations,
        trace.acceptance_rate()
    );
    Ok(trace)
}

/// Run `n_chains` independent rate chains in parallel.
///
/// Chain `i` works on its own copy of `tree` with an RNG seeded `seed + i`
/// (entropy-seeded when `seed` is `None`). Fails with the first chain error.
pub fn sample_rate_replicates(
    tree: &Tree,
    config: &RateChainConfig,
    n_chains: usize,
    seed: Option<u64>,
) -> Result<Vec<RateTrace>, McmcError> {
    (0..n_chains)
        .into_par_iter()
        .map(|i| {
            let mut tree = tree.clone();
            let mut rng = random_number_generator(seed.map(|s| s.wrapping_add(i as u64)));
            sample_rate_with(&mut tree, config, &mut rng)
        })
        .collect()
}

/// Run `n_chains` independent topology chains in parallel, seeded like
/// [`sample_rate_replicates`].
pub fn sample_topology_replicates(
    tree: &Tree,
    config: &TopologyChainConfig,
    n_chains: usize,
    seed: Option<u64>,
) -> Result<Vec<TopologyTrace>, McmcError> {
    (0..n_chains)
        .into_par_iter()
        .map(|i| {
            let mut rng = random_number_generator(seed.map(|s| s.wrapping_add(i as u64)));
            sample_topology_with(tree, config, &mut rng)
        })
        .collect()
}
