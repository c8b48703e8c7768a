use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use log::info;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rayon::prelude::*;

use crate::fragments::Fragment;
use crate::models::FragmentLengthModel;
use crate::util::{AtomicF64, LOG_ZERO};

mod bundles;
use bundles::BundleTable;

pub(crate) mod priors;
use priors::AlphaMap;

pub(crate) const NUM_BIAS_BINS: usize = 20;

// which positional bin of a target a coordinate falls in
pub(crate) fn bias_bin(pos: u32, target_len: u32) -> usize {
    if target_len == 0 {
        return 0;
    }
    let bin = pos as usize * NUM_BIAS_BINS / target_len as usize;
    bin.min(NUM_BIAS_BINS - 1)
}

/*
    A reference sequence being quantified. Shared by every fragment that hits it, so
    all mutable state is atomic; nothing here is locked per target.

    log_prior: log pseudo-mass the target starts every round with
    tot_counts / uniq_counts: fragments seen during the first round (all / single-hit)
    mass: log mass accumulated during the current round
    ret_mass: log mass of the last completed round
*/
#[derive(Debug)]
pub(crate) struct Target {
    id: usize,
    name: String,
    length: u32,
    log_prior: f64,
    tot_counts: AtomicU64,
    uniq_counts: AtomicU64,
    solvable: AtomicBool,
    mass: AtomicF64,
    ret_mass: AtomicF64,
}

impl Target {
    fn new(id: usize, name: String, length: u32, log_prior: f64) -> Target {
        Target {
            id, name, length, log_prior,
            tot_counts: AtomicU64::new(0), uniq_counts: AtomicU64::new(0),
            solvable: AtomicBool::new(false),
            mass: AtomicF64::new(log_prior), ret_mass: AtomicF64::new(LOG_ZERO),
        }
    }

    pub(crate) fn id(&self) -> usize { self.id }

    pub(crate) fn name(&self) -> &str { &self.name }

    pub(crate) fn length(&self) -> u32 { self.length }

    pub(crate) fn incr_counts(&self, unique_hit: bool) {
        self.tot_counts.fetch_add(1, Ordering::Relaxed);
        if unique_hit {
            self.uniq_counts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn tot_counts(&self) -> u64 { self.tot_counts.load(Ordering::Relaxed) }

    pub(crate) fn uniq_counts(&self) -> u64 { self.uniq_counts.load(Ordering::Relaxed) }

    pub(crate) fn solvable(&self) -> bool { self.solvable.load(Ordering::Acquire) }

    pub(crate) fn set_solvable(&self, flag: bool) { self.solvable.store(flag, Ordering::Release) }

    pub(crate) fn add_mass(&self, log_mass: f64) { self.mass.log_add(log_mass) }

    pub(crate) fn mass(&self) -> f64 { self.mass.load() }

    pub(crate) fn ret_mass(&self) -> f64 { self.ret_mass.load() }

    fn round_reset(&self) {
        self.ret_mass.store(self.mass.load());
        self.mass.store(self.log_prior);
    }
}

/*
    Values derived from the auxiliary models that scoring reads for every hit. They live
    behind one lock in the TargetTable: the background bias updater writes them, scoring
    reads them.

    eff_lengths: log effective length per target
    five_prime / three_prime: log bias weight per positional bin, empty until published
*/
#[derive(Clone, Debug, Default)]
pub(crate) struct TargetCache {
    pub(crate) eff_lengths: Vec<f64>,
    pub(crate) five_prime: Vec<f64>,
    pub(crate) three_prime: Vec<f64>,
}

impl TargetCache {
    fn weight(weights: &[f64], pos: u32, target_len: u32) -> f64 {
        if weights.is_empty() {
            0.0
        } else {
            weights[bias_bin(pos, target_len)]
        }
    }
}

// A target paired with the cache snapshot its caller is holding the lock for.
pub(crate) struct TargetView<'a> {
    target: &'a Target,
    cache: &'a TargetCache,
}

impl<'a> TargetView<'a> {
    pub(crate) fn solvable(&self) -> bool { self.target.solvable() }

    pub(crate) fn cached_effective_length(&self) -> f64 {
        self.cache.eff_lengths.get(self.target.id).copied().unwrap_or(0.0)
    }

    pub(crate) fn get_5_bias(&self, pos: u32) -> f64 {
        TargetCache::weight(&self.cache.five_prime, pos, self.target.length)
    }

    pub(crate) fn get_3_bias(&self, pos: u32) -> f64 {
        TargetCache::weight(&self.cache.three_prime, pos, self.target.length)
    }
}

pub(crate) struct TargetTable {
    targets: Vec<Target>,
    index: HashMap<String, usize>,
    bundles: Mutex<BundleTable>,
    cache: RwLock<TargetCache>,
    rounds_closed: AtomicUsize,
}

impl TargetTable {
    // builds the table from (name, length) pairs in header order; the id of a target is its position
    pub(crate) fn new(entries: Vec<(String, u32)>, alphas: Option<&AlphaMap>, expr_alpha: f64, fld: &dyn FragmentLengthModel) -> TargetTable {
        let lengths: Vec<u32> = entries.iter().map(|(_, len)| *len).collect();
        let eff_lengths = effective_lengths(&lengths, fld);

        let mut index = HashMap::new();
        let mut targets = Vec::with_capacity(entries.len());
        for (id, (name, length)) in entries.into_iter().enumerate() {
            let alpha = alphas.and_then(|a| a.get(&name)).copied().unwrap_or(expr_alpha);
            let log_prior = alpha.ln() + eff_lengths[id];
            index.insert(name.clone(), id);
            targets.push(Target::new(id, name, length, log_prior));
        }
        info!("Loaded {} targets", targets.len());

        TargetTable {
            bundles: Mutex::new(BundleTable::new(targets.len())),
            targets, index,
            cache: RwLock::new(TargetCache { eff_lengths, ..TargetCache::default() }),
            rounds_closed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn size(&self) -> usize { self.targets.len() }

    pub(crate) fn get(&self, id: usize) -> &Target { &self.targets[id] }

    pub(crate) fn id_of(&self, name: &str) -> Option<usize> { self.index.get(name).copied() }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Target> { self.targets.iter() }

    pub(crate) fn view<'a>(&'a self, id: usize, cache: &'a TargetCache) -> TargetView<'a> {
        TargetView { target: &self.targets[id], cache }
    }

    // scoring holds this for the whole fragment; the bias updater cannot publish meanwhile
    pub(crate) fn cache_read(&self) -> RwLockReadGuard<'_, TargetCache> {
        self.cache.read()
    }

    pub(crate) fn cache_write(&self) -> RwLockWriteGuard<'_, TargetCache> {
        self.cache.write()
    }

    pub(crate) fn compute_effective_lengths(&self, fld: &dyn FragmentLengthModel) -> Vec<f64> {
        let lengths: Vec<u32> = self.targets.iter().map(|t| t.length).collect();
        effective_lengths(&lengths, fld)
    }

    pub(crate) fn merge_bundles(&self, frag: &Fragment) {
        if frag.num_hits() < 2 {
            return;
        }
        let mut bundles = self.bundles.lock();
        let first = frag.hits()[0].target_id;
        for hit in &frag.hits()[1..] {
            bundles.merge(first, hit.target_id);
        }
    }

    pub(crate) fn num_bundles(&self) -> usize {
        self.bundles.lock().num_bundles()
    }

    // the log mass that abundances are read from: the last closed round once there is one
    pub(crate) fn abundance_mass(&self, id: usize) -> f64 {
        let target = &self.targets[id];
        if self.rounds_closed.load(Ordering::Acquire) > 0 {
            target.ret_mass()
        } else {
            target.mass()
        }
    }

    pub(crate) fn round_reset(&self) {
        self.targets.par_iter().for_each(|t| t.round_reset());
        self.rounds_closed.fetch_add(1, Ordering::AcqRel);
    }
}

// log of sum over fragment lengths l <= L of pmf(l) * (L - l + 1), floored at one position
fn effective_lengths(lengths: &[u32], fld: &dyn FragmentLengthModel) -> Vec<f64> {
    let pmf: Vec<f64> = fld.snapshot().into_iter().map(f64::exp).collect();
    lengths.par_iter().map(|&len| {
        let upper = (len as usize).min(pmf.len().saturating_sub(1));
        let mut eff = 0.0;
        for l in 1..=upper {
            eff += pmf[l] * (len as usize - l + 1) as f64;
        }
        if eff < 1.0 { 0.0 } else { eff.ln() }
    }).collect()
}
