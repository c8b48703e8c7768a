use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use log::debug;
use parking_lot::RwLock;

use super::MismatchModel;
use crate::fragments::FragHit;
use crate::util::log_add;

/*
    mismatched / matched: log mass of mismatched and matched aligned bases
*/
struct MismatchCounts {
    mismatched: f64,
    matched: f64,
}

impl MismatchCounts {
    // log of the per-base mismatch rate and of its complement
    fn log_rates(&self) -> (f64, f64) {
        let total = log_add(self.mismatched, self.matched);
        (self.mismatched - total, self.matched - total)
    }
}

// Per-base mismatch rate learned from the weighted alignments; scores hits binomially once active.
pub(crate) struct MismatchTable {
    active: AtomicBool,
    fixed: AtomicBool,
    counts: RwLock<MismatchCounts>,
}

impl MismatchTable {
    // alpha pseudo-counts of each kind, with a 1% prior mismatch rate
    pub(crate) fn new(alpha: f64) -> MismatchTable {
        let counts = MismatchCounts { mismatched: (alpha * 0.01).ln(), matched: (alpha * 0.99).ln() };
        MismatchTable { active: AtomicBool::new(false), fixed: AtomicBool::new(false), counts: RwLock::new(counts) }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn is_fixed(&self) -> bool {
        self.fixed.load(Ordering::Acquire)
    }

    pub(crate) fn mismatch_rate(&self) -> f64 {
        self.counts.read().log_rates().0.exp()
    }
}

impl MismatchModel for MismatchTable {
    fn log_likelihood(&self, hit: &FragHit) -> f64 {
        if !self.is_active() {
            return 0.0;
        }
        let (log_mm, log_match) = self.counts.read().log_rates();
        let mm = hit.mismatches.min(hit.aligned_len) as f64;
        mm * log_mm + (hit.aligned_len as f64 - mm) * log_match
    }

    fn update(&self, hit: &FragHit, p: f64, mass: f64) {
        if self.is_fixed() {
            return;
        }
        let weight = p + mass;
        let mm = hit.mismatches.min(hit.aligned_len);
        let matched = hit.aligned_len - mm;
        let mut counts = self.counts.write();
        if mm > 0 {
            counts.mismatched = log_add(counts.mismatched, (mm as f64).ln() + weight);
        }
        if matched > 0 {
            counts.matched = log_add(counts.matched, (matched as f64).ln() + weight);
        }
    }

    fn activate(&self) {
        debug!("Mismatch model activated");
        self.active.store(true, Ordering::Release);
    }

    fn fix(&self) {
        debug!("Mismatch model fixed at rate {:.5}", self.mismatch_rate());
        self.fixed.store(true, Ordering::Release);
    }

    fn append_output(&self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, ">Mismatch Rate")?;
        writeln!(out, "{:.6e}", self.mismatch_rate())
    }
}
