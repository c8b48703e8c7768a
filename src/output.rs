use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;
use rand::prelude::*;
use rand_distr::WeightedAliasIndex;
use rayon::prelude::*;

use crate::config::AlignOutput;
use crate::error::Result;
use crate::fragments::{Fragment, PairStatus};
use crate::library::Librarian;
use crate::models::LibraryModels;
use crate::targets::{TargetCache, TargetTable};
use crate::util::log_sum;

fn status_label(status: PairStatus) -> &'static str {
    match status {
        PairStatus::Paired => "paired",
        PairStatus::LeftOnly => "left",
        PairStatus::RightOnly => "right",
    }
}

/*
    Writes processed fragments during the last round: every hit with its posterior
    probability, or one hit per fragment drawn from the posteriors.
*/
pub(crate) struct AlignmentWriter {
    out: BufWriter<File>,
    mode: AlignOutput,
}

impl AlignmentWriter {
    pub(crate) fn create(path: &Path, mode: AlignOutput) -> Result<AlignmentWriter> {
        let out = BufWriter::new(File::create(path)?);
        Ok(AlignmentWriter { out, mode })
    }

    pub(crate) fn write_fragment(&mut self, frag: &Fragment, targets: &TargetTable) -> Result<()> {
        match self.mode {
            AlignOutput::None => {}
            AlignOutput::Probabilities => {
                for hit in frag.hits() {
                    writeln!(self.out, "{}\t{}\t{}\t{}\t{}\t{:.6}", frag.name(), targets.get(hit.target_id).name(),
                        hit.left, hit.right, status_label(hit.pair_status), hit.probability.exp())?;
                }
            }
            AlignOutput::Sampled => {
                let weights: Vec<f64> = frag.hits().iter().map(|h| h.probability.exp()).collect();
                // no usable weights: keep the first hit
                let chosen = match WeightedAliasIndex::new(weights) {
                    Ok(dist) => dist.sample(&mut thread_rng()),
                    Err(_) => 0,
                };
                let hit = &frag.hits()[chosen];
                writeln!(self.out, "{}\t{}\t{}\t{}\t{}", frag.name(), targets.get(hit.target_id).name(),
                    hit.left, hit.right, status_label(hit.pair_status))?;
            }
        }
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/*
    Writes the abundance estimates to results.xprs and the parameters of every library
    to params.xprs (params.<l>.xprs with several libraries). With `round` set, the files
    go into the x_<round> subdirectory instead.
*/
pub(crate) fn output_results(output_dir: &Path, libs: &Librarian, tot_counts: usize, round: Option<usize>) -> Result<()> {
    let models: Vec<&LibraryModels> = libs.iter().map(|lib| &lib.models).collect();
    let cache = libs.targets().cache_read();
    write_snapshot(output_dir, libs.targets(), &cache, &models, tot_counts, round)
}

// same as output_results, for a caller that already holds the target cache
pub(crate) fn write_snapshot(
    output_dir: &Path,
    targets: &TargetTable,
    cache: &TargetCache,
    models: &[&LibraryModels],
    tot_counts: usize,
    round: Option<usize>,
) -> Result<()> {
    let dir: PathBuf = match round {
        Some(r) => output_dir.join(format!("x_{}", r)),
        None => output_dir.to_path_buf(),
    };
    fs::create_dir_all(&dir)?;
    info!("Writing results to {}", dir.display());

    write_abundances(&dir.join("results.xprs"), targets, &cache.eff_lengths, tot_counts)?;

    for (l, lib) in models.iter().enumerate() {
        let name = if models.len() > 1 { format!("params.{}.xprs", l + 1) } else { "params.xprs".to_string() };
        let mut out = BufWriter::new(File::create(dir.join(name))?);
        lib.fld.append_output(&mut out)?;
        if let Some(mismatch) = &lib.mismatch {
            mismatch.append_output(&mut out)?;
        }
        if let Some(bias) = &lib.bias {
            bias.append_output(&mut out)?;
        }
        out.flush()?;
    }
    Ok(())
}

fn write_abundances(path: &Path, targets: &TargetTable, eff_lengths: &[f64], tot_counts: usize) -> Result<()> {
    let masses: Vec<f64> = (0..targets.size()).into_par_iter().map(|id| targets.abundance_mass(id)).collect();
    let total = log_sum(&masses);

    let rows: Vec<String> = targets.iter().collect::<Vec<_>>().par_iter().map(|t| {
        let rho = if total.is_finite() { (masses[t.id()] - total).exp() } else { 0.0 };
        let eff_len = eff_lengths.get(t.id()).copied().unwrap_or(0.0).exp();
        let est_counts = rho * tot_counts as f64;
        let fpkm = if tot_counts > 0 { est_counts * 1e9 / (eff_len * tot_counts as f64) } else { 0.0 };
        format!("{}\t{}\t{}\t{:.2}\t{}\t{}\t{:.2}\t{:.6e}\t{}", t.id(), t.name(), t.length(), eff_len,
            t.tot_counts(), t.uniq_counts(), est_counts, fpkm, if t.solvable() { "T" } else { "F" })
    }).collect();

    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "target_id\tname\tlength\teff_length\ttot_counts\tuniq_counts\test_counts\tfpkm\tsolvable")?;
    for row in rows {
        writeln!(out, "{}", row)?;
    }
    out.flush()?;
    Ok(())
}
