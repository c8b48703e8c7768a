use std::sync::Arc;

use super::MassPropagator;
use crate::fragments::Fragment;
use crate::targets::TargetTable;
use crate::util::log_sum;

/*
    Mass propagation over the shared target table. A hit's posterior combines its
    likelihood score with the abundance of its target: the running mass during an
    online round, the previous round's mass once a batch round has closed one.
*/
pub(crate) struct RhoPropagator {
    targets: Arc<TargetTable>,
}

impl RhoPropagator {
    pub(crate) fn new(targets: Arc<TargetTable>) -> RhoPropagator {
        RhoPropagator { targets }
    }
}

impl MassPropagator for RhoPropagator {
    fn process_fragment(&self, frag: &mut Fragment, mass_n: f64) {
        if frag.num_hits() == 1 {
            let hit = &mut frag.hits_mut()[0];
            hit.probability = 0.0;
            self.targets.get(hit.target_id).add_mass(mass_n);
            return;
        }

        let scores: Vec<f64> = frag.hits().iter()
            .map(|h| h.probability + self.targets.abundance_mass(h.target_id))
            .collect();
        let total = log_sum(&scores);
        // nothing to tell the hits apart by: split evenly
        let uniform = -(scores.len() as f64).ln();
        for (hit, score) in frag.hits_mut().iter_mut().zip(scores) {
            hit.probability = if total.is_finite() { score - total } else { uniform };
            self.targets.get(hit.target_id).add_mass(hit.probability + mass_n);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragments::{FragHit, PairStatus};
    use crate::models::fld::Fld;

    fn table() -> Arc<TargetTable> {
        let fld = Fld::new(1.0, 50, 20.0, 5.0);
        let entries = vec![("a".to_string(), 500), ("b".to_string(), 500)];
        Arc::new(TargetTable::new(entries, None, 0.1, &fld))
    }

    #[test]
    fn test_posteriors_sum_to_one() {
        let targets = table();
        let rho = RhoPropagator::new(Arc::clone(&targets));
        let mut hits = vec![FragHit::new(0, 0, 30, PairStatus::Paired), FragHit::new(1, 0, 30, PairStatus::Paired)];
        hits[0].probability = -1.0;
        hits[1].probability = -3.0;
        let mut frag = Fragment::with_hits("r", hits);
        rho.process_fragment(&mut frag, 0.0);

        let p: Vec<f64> = frag.hits().iter().map(|h| h.probability.exp()).collect();
        assert!((p[0] + p[1] - 1.0).abs() < 1e-12);
        assert!(p[0] > p[1]);
    }

    #[test]
    fn test_single_hit_takes_all_the_mass() {
        let targets = table();
        let rho = RhoPropagator::new(Arc::clone(&targets));
        let (before_a, before_b) = (targets.get(0).mass(), targets.get(1).mass());
        let mut frag = Fragment::with_hits("r", vec![FragHit::new(1, 0, 30, PairStatus::LeftOnly)]);
        rho.process_fragment(&mut frag, 0.0);
        assert_eq!(frag.hits()[0].probability, 0.0);
        assert!(targets.get(1).mass() > before_b);
        assert_eq!(targets.get(0).mass(), before_a);
    }

    #[test]
    fn test_impossible_hits_split_evenly() {
        let targets = table();
        let rho = RhoPropagator::new(targets);
        let mut hits = vec![FragHit::new(0, 0, 30, PairStatus::Paired), FragHit::new(1, 0, 30, PairStatus::Paired)];
        hits[0].probability = f64::NEG_INFINITY;
        hits[1].probability = f64::NEG_INFINITY;
        let mut frag = Fragment::with_hits("r", hits);
        rho.process_fragment(&mut frag, 0.0);
        assert!((frag.hits()[0].probability - 0.5_f64.ln()).abs() < 1e-12);
    }
}
