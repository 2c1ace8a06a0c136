use clap::{ArgAction, Parser, ValueEnum};
use log::LevelFilter;
use rust_mk_tree_mcmc::io::{read_newick, write_rate_trace_tsv, write_topology_trace_tsv};
use rust_mk_tree_mcmc::mcmc::{
    sample_rate_replicates, sample_topology_replicates, RateChainConfig, RatePrior,
    TopologyChainConfig,
};
use rust_mk_tree_mcmc::traits::TraitData;
use rust_mk_tree_mcmc::tree::Tree;
use std::path::PathBuf;
use std::time::Instant;

/// Sample the Mk rate or the tree topology of a discrete trait with
/// Metropolis MCMC and write the chains as TSV.
#[derive(Parser, Debug)]
#[command(name = "mk-mcmc", version, about = "Mk model MCMC over rates or tree topologies")]
struct Args {
    /// Path to a Newick tree file (the first tree is used)
    #[arg(short = 'i', long = "tree")]
    tree: PathBuf,

    /// Observed tip state as LABEL=INDEX; repeat for every tip
    #[arg(short = 's', long = "state", value_parser = parse_state, required = true)]
    states: Vec<(String, usize)>,

    /// What to sample: rate | topology
    #[arg(long = "mode", value_enum, default_value_t = ModeArg::Rate)]
    mode: ModeArg,

    /// Number of iterations per chain
    #[arg(short = 'n', long = "iterations", default_value_t = 1000)]
    iterations: usize,

    /// Width of the uniform rate proposal window (rate mode)
    #[arg(short = 'w', long = "width", default_value_t = 0.2)]
    width: f64,

    /// Initial rate (rate mode, drawn from the prior if unset) or fixed rate
    /// (topology mode, default 0.5)
    #[arg(short = 'r', long = "rate")]
    rate: Option<f64>,

    /// Upper bound of the uniform rate prior on [0, upper] (rate mode)
    #[arg(long = "prior-upper", default_value_t = 1.0)]
    prior_upper: f64,

    /// Seed for reproducible chains; chain i uses seed + i
    #[arg(long = "seed")]
    seed: Option<u64>,

    /// Number of independent chains, run in parallel
    #[arg(short = 'c', long = "chains", default_value_t = 1)]
    chains: usize,

    /// Output path for the TSV trace (.gz compresses)
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Quiet mode: suppresses progress messages on stdout
    #[arg(short = 'q', long = "quiet", default_value_t = false)]
    quiet: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ModeArg {
    Rate,
    Topology,
}

fn parse_state(s: &str) -> Result<(String, usize), String> {
    let (label, index) = s
        .split_once('=')
        .ok_or_else(|| format!("expected LABEL=INDEX, got {s:?}"))?;
    let index = index
        .trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid state index {index:?}: {e}"))?;
    Ok((label.trim().to_string(), index))
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Warn,
        (false, 1) => LevelFilter::Info,
        (false, 2) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    // Read tree and tip states
    let t0 = Instant::now();
    let traits = match TraitData::new(args.states.iter().cloned()) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Invalid tip states: {e}");
            std::process::exit(2);
        }
    };
    let tree = match read_newick(&args.tree)
        .and_then(|parsed| Ok(Tree::from_parsed(&parsed, &traits)?))
    {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to read tree {:?}: {e}", args.tree);
            std::process::exit(2);
        }
    };
    let read_s = t0.elapsed().as_secs_f64();
    log_if(!args.quiet, format!("Reading tree {read_s:.3}s"));
    log_if(
        !args.quiet,
        format!("Read {} leaves with {} states", tree.n_leaves(), tree.n_states()),
    );

    // Run the chains and write the traces
    let t1 = Instant::now();
    let written = match args.mode {
        ModeArg::Rate => {
            let config = RateChainConfig {
                n_iterations: args.iterations,
                proposal_width: args.width,
                initial_rate: args.rate,
                prior: RatePrior::Uniform {
                    lower: 0.0,
                    upper: args.prior_upper,
                },
            };
            let chains = match sample_rate_replicates(&tree, &config, args.chains, args.seed) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Rate chain failed: {e}");
                    std::process::exit(3);
                }
            };
            log_chains_done(!args.quiet, "rate", args.chains, t1.elapsed().as_secs_f64());
            for (i, chain) in chains.iter().enumerate() {
                log_if(
                    !args.quiet,
                    format!("Chain {i}: acceptance rate {:.3}", chain.acceptance_rate()),
                );
            }
            write_rate_trace_tsv(&args.output, &chains)
        }
        ModeArg::Topology => {
            let config = TopologyChainConfig {
                n_iterations: args.iterations,
                rate: args.rate.unwrap_or(TopologyChainConfig::default().rate),
            };
            let chains = match sample_topology_replicates(&tree, &config, args.chains, args.seed) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("Topology chain failed: {e}");
                    std::process::exit(3);
                }
            };
            log_chains_done(!args.quiet, "topology", args.chains, t1.elapsed().as_secs_f64());
            for (i, chain) in chains.iter().enumerate() {
                log_if(
                    !args.quiet,
                    format!("Chain {i}: acceptance rate {:.3}", chain.acceptance_rate()),
                );
            }
            write_topology_trace_tsv(&args.output, &chains)
        }
    };

    if let Err(e) = written {
        eprintln!("Failed to write output {:?}: {e}", args.output);
        std::process::exit(4);
    }
    log_if(!args.quiet, format!("Wrote trace to {:?}", args.output));
}

fn log_if(show: bool, msg: String) {
    if show {
        println!("{}", msg);
    }
}

fn log_chains_done(show: bool, mode: &str, chains: usize, secs: f64) {
    if !show {
        return;
    }
    if chains == 1 {
        println!("Sampling {mode} {secs:.3}s");
    } else {
        println!("Sampling {mode} with {chains} chains {secs:.3}s");
    }
}
