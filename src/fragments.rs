#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PairStatus {
    Paired,
    LeftOnly,
    RightOnly,
}

/*
    One candidate alignment of a fragment to a target.

    target_id: index of the target in the TargetTable
    left / right: half-open span of the fragment on the target
    mismatches: edit distance reported by the aligner (NM)
    aligned_len: number of aligned read bases the mismatches were counted over
    probability: raw log-score after scoring, log posterior after mass propagation
*/
#[derive(Clone, Debug)]
pub(crate) struct FragHit {
    pub(crate) target_id: usize,
    pub(crate) left: u32,
    pub(crate) right: u32,
    pub(crate) pair_status: PairStatus,
    pub(crate) mismatches: u32,
    pub(crate) aligned_len: u32,
    pub(crate) probability: f64,
}

impl FragHit {
    pub(crate) fn new(target_id: usize, left: u32, right: u32, pair_status: PairStatus) -> FragHit {
        FragHit { target_id, left, right, pair_status, mismatches: 0, aligned_len: right.saturating_sub(left), probability: 0.0 }
    }

    pub(crate) fn with_mismatches(mut self, mismatches: u32, aligned_len: u32) -> FragHit {
        self.mismatches = mismatches;
        self.aligned_len = aligned_len;
        self
    }

    pub(crate) fn length(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }
}

// A sequenced fragment together with every hit the aligner reported for it.
#[derive(Clone, Debug)]
pub(crate) struct Fragment {
    name: String,
    hits: Vec<FragHit>,
}

impl Fragment {
    pub(crate) fn new(name: String) -> Fragment {
        Fragment { name, hits: Vec::new() }
    }

    pub(crate) fn with_hits(name: &str, hits: Vec<FragHit>) -> Fragment {
        Fragment { name: name.to_string(), hits }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn add_hit(&mut self, hit: FragHit) {
        self.hits.push(hit);
    }

    pub(crate) fn num_hits(&self) -> usize {
        self.hits.len()
    }

    pub(crate) fn hits(&self) -> &[FragHit] {
        &self.hits
    }

    pub(crate) fn hits_mut(&mut self) -> &mut [FragHit] {
        &mut self.hits
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InvalidReason {
    Unmapped,
    UnknownTarget,
    BadCoordinates,
    WrongStrand,
}

// An alignment record that never becomes part of a fragment but still has to reach the output stage.
#[derive(Clone, Debug)]
pub(crate) struct ReadHit {
    pub(crate) name: String,
    pub(crate) reason: InvalidReason,
}

impl ReadHit {
    pub(crate) fn new(name: String, reason: InvalidReason) -> ReadHit {
        ReadHit { name, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_length() {
        let hit = FragHit::new(0, 100, 350, PairStatus::Paired);
        assert_eq!(hit.length(), 250);
        assert_eq!(hit.aligned_len, 250);
        let hit = hit.with_mismatches(3, 200);
        assert_eq!(hit.mismatches, 3);
        assert_eq!(hit.aligned_len, 200);
    }

    #[test]
    fn test_fragment_owns_hits_in_order() {
        let mut frag = Fragment::new("r1".to_string());
        frag.add_hit(FragHit::new(2, 0, 10, PairStatus::LeftOnly));
        frag.add_hit(FragHit::new(5, 4, 14, PairStatus::RightOnly));
        assert_eq!(frag.name(), "r1");
        assert_eq!(frag.num_hits(), 2);
        assert_eq!(frag.hits()[1].target_id, 5);
        frag.hits_mut()[0].probability = -1.0;
        assert_eq!(frag.hits()[0].probability, -1.0);
    }
}
