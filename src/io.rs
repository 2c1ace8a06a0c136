use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use phylotree::tree::Tree as PhyloTree;

use crate::error::StructureError;
use crate::mcmc::{RateTrace, TopologyTrace};

/// Remove bracketed comments such as BEAST's `[&rate=0.12]` from a Newick string.
///
/// `:[&rate=0.123]2.45` becomes `:2.45`; branch lengths are kept.
fn strip_annotations(newick: &str) -> String {
    let mut result = String::with_capacity(newick.len());
    let mut depth = 0usize;
    for ch in newick.chars() {
        match ch {
            '[' => depth += 1,
            ']' if depth > 0 => depth -= 1,
            _ if depth == 0 => result.push(ch),
            _ => {}
        }
    }
    result
}

/// Parse one Newick tree with the `phylotree` parser.
///
/// Annotations are stripped and a missing terminating `;` is added, so both
/// `"(A:1,B:1)"` and `"(A:1,B:1);"` are accepted.
pub fn parse_newick(newick: &str) -> Result<PhyloTree, StructureError> {
    let mut cleaned = strip_annotations(newick.trim());
    if !cleaned.ends_with(';') {
        cleaned.push(';');
    }
    PhyloTree::from_newick(&cleaned).map_err(|e| StructureError::Parse(e.to_string()))
}

/// Read the first tree of a Newick file.
pub fn read_newick<P: AsRef<Path>>(path: P) -> crate::error::Result<PhyloTree> {
    let content = fs::read_to_string(path.as_ref())?;
    let first = content
        .split_inclusive(';')
        .map(str::trim)
        .find(|tree| !tree.is_empty())
        .ok_or_else(|| StructureError::Parse(format!("no tree found in {:?}", path.as_ref())))?;
    Ok(parse_newick(first)?)
}

/// Open `path` for writing; a `.gz` suffix selects gzip compression.
fn create_writer(path: &Path) -> io::Result<Box<dyn Write>> {
    if path.as_os_str() == "-" {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "writing traces to stdout is not supported",
        ));
    }

    let file = File::create(path)?;
    if path.to_string_lossy().ends_with(".gz") {
        let enc = GzEncoder::new(file, Compression::default());
        Ok(Box::new(BufWriter::new(enc)))
    } else {
        Ok(Box::new(BufWriter::new(file)))
    }
}

/// Write rate chains as TSV with columns `chain, iteration, rate, likelihood`.
///
/// If `path` ends with `.gz`, the output is gzip-compressed.
pub fn write_rate_trace_tsv<P: AsRef<Path>>(path: P, chains: &[RateTrace]) -> io::Result<()> {
    let mut out = create_writer(path.as_ref())?;

    writeln!(&mut out, "chain\titeration\trate\tlikelihood")?;
    for (chain, trace) in chains.iter().enumerate() {
        for (i, (rate, likelihood)) in trace.samples.iter().zip(&trace.likelihoods).enumerate() {
            writeln!(&mut out, "{chain}\t{i}\t{rate}\t{likelihood}")?;
        }
    }

    out.flush()?;
    Ok(())
}

/// Write topology chains as TSV with columns `chain, iteration, likelihood, newick`.
///
/// If `path` ends with `.gz`, the output is gzip-compressed.
pub fn write_topology_trace_tsv<P: AsRef<Path>>(
    path: P,
    chains: &[TopologyTrace],
) -> io::Result<()> {
    let mut out = create_writer(path.as_ref())?;

    writeln!(&mut out, "chain\titeration\tlikelihood\tnewick")?;
    for (chain, trace) in chains.iter().enumerate() {
        for (i, (tree, likelihood)) in trace.trees.iter().zip(&trace.likelihoods).enumerate() {
            writeln!(&mut out, "{chain}\t{i}\t{likelihood}\t{}", tree.to_newick())?;
        }
    }

    out.flush()?;
    Ok(())
}
