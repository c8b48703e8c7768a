use crate::fragments::{Fragment, PairStatus};
use crate::models::{LibraryModels, MassPropagator};
use crate::targets::{TargetCache, TargetTable};

/*
    Everything scoring one fragment needs. Built by whoever processes the fragment
    (the driver inline, or a worker) while it holds the TargetCache read lock.

    mass_n: log mass of the current fragment under the forgetting factor
    first_round: counts and model observations are only collected in the first round
    burned_out: length and bias models no longer learn
    edit_detect: the mismatch model keeps learning after burn-out
*/
pub(crate) struct AssignContext<'a> {
    pub(crate) targets: &'a TargetTable,
    pub(crate) cache: &'a TargetCache,
    pub(crate) models: &'a LibraryModels,
    pub(crate) propagator: &'a dyn MassPropagator,
    pub(crate) mass_n: f64,
    pub(crate) first_round: bool,
    pub(crate) burned_out: bool,
    pub(crate) edit_detect: bool,
}

pub(crate) fn process_fragment(frag: &mut Fragment, ctx: &AssignContext) {
    let num_hits = frag.num_hits();
    assert!(num_hits > 0, "fragment '{}' has no alignments", frag.name());
    let models = ctx.models;

    let mut num_solvable = 0;
    if num_hits > 1 {
        for hit in frag.hits_mut() {
            let target = ctx.targets.view(hit.target_id, ctx.cache);
            if target.solvable() {
                num_solvable += 1;
            }

            let mut ll = 0.0;
            if let Some(mismatch) = &models.mismatch {
                ll += mismatch.log_likelihood(hit);
            }
            if models.bias.is_some() {
                if hit.pair_status != PairStatus::RightOnly {
                    ll += target.get_5_bias(hit.left);
                }
                if hit.pair_status != PairStatus::LeftOnly {
                    ll += target.get_3_bias(hit.right.saturating_sub(1));
                }
            }
            if hit.pair_status == PairStatus::Paired {
                ll += models.fld.pmf(hit.length());
            }
            hit.probability = ll - target.cached_effective_length();
        }
    }

    ctx.propagator.process_fragment(frag, ctx.mass_n);

    if !ctx.first_round {
        return;
    }
    for hit in frag.hits() {
        let target = ctx.targets.get(hit.target_id);
        target.incr_counts(num_hits == 1);

        // the last ambiguous target of a fragment whose other targets are all solvable
        if !target.solvable() && num_solvable == num_hits - 1 {
            target.set_solvable(true);
        }

        let p = hit.probability;
        if let Some(mismatch) = &models.mismatch {
            if !ctx.burned_out || ctx.edit_detect {
                mismatch.update(hit, p, ctx.mass_n);
            }
        }
        if !ctx.burned_out {
            if hit.pair_status == PairStatus::Paired {
                models.fld.add_val(hit.length(), p + ctx.mass_n);
            }
            if let Some(bias) = &models.bias {
                bias.update_observed(hit, target.length(), p + ctx.mass_n);
            }
        }
    }
}
