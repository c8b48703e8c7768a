use std::io::Write;

use parking_lot::Mutex;

use super::BiasModel;
use crate::fragments::{FragHit, PairStatus};
use crate::targets::{bias_bin, TargetCache, NUM_BIAS_BINS};
use crate::util::{log_add, log_sum};

/*
    five / three: log mass of fragment ends observed in each positional bin,
    seeded with alpha per bin so that an empty table is unbiased
*/
struct BiasCounts {
    five: Vec<f64>,
    three: Vec<f64>,
}

// Positional bias of fragment ends along targets, relative to a uniform placement.
pub(crate) struct BiasTable {
    observed: Mutex<BiasCounts>,
}

// log(observed share / uniform share) per bin
fn relative_weights(observed: &[f64]) -> Vec<f64> {
    let total = log_sum(observed);
    let uniform = (NUM_BIAS_BINS as f64).ln();
    observed.iter().map(|o| o - total + uniform).collect()
}

impl BiasTable {
    pub(crate) fn new(alpha: f64) -> BiasTable {
        let seed = vec![alpha.ln(); NUM_BIAS_BINS];
        BiasTable { observed: Mutex::new(BiasCounts { five: seed.clone(), three: seed }) }
    }

    // every library starts from the same expectations as the first one
    pub(crate) fn copy_expectations(&self, other: &BiasTable) {
        if std::ptr::eq(self, other) {
            return;
        }
        let theirs = other.observed.lock();
        let mut ours = self.observed.lock();
        ours.five.clone_from(&theirs.five);
        ours.three.clone_from(&theirs.three);
    }
}

impl BiasModel for BiasTable {
    fn update_observed(&self, hit: &FragHit, target_len: u32, weight: f64) {
        let mut counts = self.observed.lock();
        if hit.pair_status != PairStatus::RightOnly {
            let b = bias_bin(hit.left, target_len);
            counts.five[b] = log_add(counts.five[b], weight);
        }
        if hit.pair_status != PairStatus::LeftOnly {
            let b = bias_bin(hit.right.saturating_sub(1), target_len);
            counts.three[b] = log_add(counts.three[b], weight);
        }
    }

    fn apply_pending(&self, cache: &mut TargetCache) {
        let counts = self.observed.lock();
        cache.five_prime = relative_weights(&counts.five);
        cache.three_prime = relative_weights(&counts.three);
    }

    fn append_output(&self, out: &mut dyn Write) -> std::io::Result<()> {
        let counts = self.observed.lock();
        for (label, observed) in [("5'", &counts.five), ("3'", &counts.three)] {
            writeln!(out, ">{} Positional Bias", label)?;
            let weights: Vec<String> = relative_weights(observed).iter().map(|w| format!("{:.6e}", w.exp())).collect();
            writeln!(out, "{}", weights.join("\t"))?;
        }
        Ok(())
    }
}
