use std::io::Write;

use crate::fragments::{FragHit, Fragment};
use crate::targets::TargetCache;

pub(crate) mod fld;
pub(crate) mod mismatch;
pub(crate) mod bias;
pub(crate) mod rho;

/*
    The contracts the pipeline relies on. Every model is shared by the driver thread,
    the worker threads and the background bias updater, so all methods take &self and
    each implementation does its own locking. Weights and masses are in the log domain.
*/

pub(crate) trait FragmentLengthModel: Send + Sync {
    // log probability of a fragment of this length
    fn pmf(&self, len: u32) -> f64;
    fn add_val(&self, len: u32, weight: f64);
    // log pmf for every length 0..=max_val
    fn snapshot(&self) -> Vec<f64>;
    fn append_output(&self, out: &mut dyn Write) -> std::io::Result<()>;
}

pub(crate) trait MismatchModel: Send + Sync {
    fn log_likelihood(&self, hit: &FragHit) -> f64;
    fn update(&self, hit: &FragHit, p: f64, mass: f64);
    // start influencing the likelihood
    fn activate(&self);
    // stop accepting observations
    fn fix(&self);
    fn append_output(&self, out: &mut dyn Write) -> std::io::Result<()>;
}

pub(crate) trait BiasModel: Send + Sync {
    fn update_observed(&self, hit: &FragHit, target_len: u32, weight: f64);
    // publishes the bias weights learned so far; only called with the cache write lock held
    fn apply_pending(&self, cache: &mut TargetCache);
    fn append_output(&self, out: &mut dyn Write) -> std::io::Result<()>;
}

pub(crate) trait MassPropagator: Send + Sync {
    // turns the raw per-hit scores into posteriors and spreads the fragment mass over its targets
    fn process_fragment(&self, frag: &mut Fragment, mass_n: f64);
}

// The auxiliary models of one library. A missing model means its scoring and update steps are skipped.
pub(crate) struct LibraryModels {
    pub(crate) fld: Box<dyn FragmentLengthModel>,
    pub(crate) mismatch: Option<Box<dyn MismatchModel>>,
    pub(crate) bias: Option<Box<dyn BiasModel>>,
}
