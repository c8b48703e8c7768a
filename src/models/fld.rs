use std::io::Write;

use mathru::statistics::distrib::{Continuous, Normal};
use parking_lot::RwLock;

use super::FragmentLengthModel;
use crate::util::{log_add, log_sum, LOG_ZERO};

/*
    counts: log mass observed at each fragment length 0..=max_val (prior included)
    total: log of the summed mass
    num_obs: observations added after the prior
*/
struct FldHist {
    counts: Vec<f64>,
    total: f64,
    num_obs: u64,
}

// Fragment length distribution: a discretized normal prior refined by observed pair lengths.
pub(crate) struct Fld {
    max_val: u32,
    hist: RwLock<FldHist>,
}

impl Fld {
    pub(crate) fn new(alpha: f64, max_val: u32, mean: f64, stddev: f64) -> Fld {
        let normal = Normal::new(mean, stddev * stddev);
        let pdf: Vec<f64> = (0..=max_val).map(|l| normal.pdf(l as f64)).collect();
        let norm: f64 = pdf[1..].iter().sum();
        // alpha pseudo-counts per length, shaped like the prior
        let prior_mass = alpha * (max_val + 1) as f64;

        let mut counts = vec![LOG_ZERO; max_val as usize + 1];
        for l in 1..=max_val as usize {
            counts[l] = (prior_mass * pdf[l] / norm).max(f64::MIN_POSITIVE).ln();
        }
        let total = log_sum(&counts);
        Fld { max_val, hist: RwLock::new(FldHist { counts, total, num_obs: 0 }) }
    }

    pub(crate) fn mean(&self) -> f64 {
        let hist = self.hist.read();
        hist.counts.iter().enumerate().map(|(l, c)| l as f64 * (c - hist.total).exp()).sum()
    }

    pub(crate) fn num_obs(&self) -> u64 {
        self.hist.read().num_obs
    }
}

impl FragmentLengthModel for Fld {
    fn pmf(&self, len: u32) -> f64 {
        let hist = self.hist.read();
        hist.counts[len.min(self.max_val) as usize] - hist.total
    }

    fn add_val(&self, len: u32, weight: f64) {
        if len > self.max_val || len == 0 {
            return;
        }
        let mut hist = self.hist.write();
        let l = len as usize;
        hist.counts[l] = log_add(hist.counts[l], weight);
        hist.total = log_add(hist.total, weight);
        hist.num_obs += 1;
    }

    fn snapshot(&self) -> Vec<f64> {
        let hist = self.hist.read();
        hist.counts.iter().map(|c| c - hist.total).collect()
    }

    fn append_output(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, ">Fragment Length Distribution (mean {:.2}, {} observations)", self.mean(), self.num_obs())?;
        let probs: Vec<String> = self.snapshot().iter().map(|p| format!("{:.6e}", p.exp())).collect();
        writeln!(out, "{}", probs.join("\t"))
    }
}
