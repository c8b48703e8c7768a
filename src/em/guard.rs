use bloomfilter::Bloom;
use log::debug;

// each new stage holds twice the names of the previous one at half its false-positive rate
const GROWTH: usize = 2;
const TIGHTENING: f64 = 0.5;

/*
    One Bloom filter of the guard, filled up to `capacity` names.
*/
struct Stage {
    filter: Bloom<String>,
    capacity: usize,
    inserted: usize,
}

impl Stage {
    fn new(capacity: usize, fp_rate: f64) -> Stage {
        Stage { filter: Bloom::new_for_fp_rate(capacity, fp_rate), capacity, inserted: 0 }
    }
}

/*
    Remembers every fragment name seen during the first pass over a library. Names of
    one fragment are grouped by the parser, so a name that comes back means the input
    is not sorted by read name.

    The filter answers "maybe seen" for a small share of new names. It starts with one
    stage sized for `capacity` names and adds a larger, stricter stage whenever the
    newest one is full, so the combined false-positive rate stays below the configured
    rate however many names a library has.
*/
pub(crate) struct DuplicateGuard {
    stages: Vec<Stage>,
    next_fp_rate: f64,
}

impl DuplicateGuard {
    pub(crate) fn new(capacity: usize, fp_rate: f64) -> DuplicateGuard {
        debug!("Duplicate filter sized for {} names at false-positive rate {:e}", capacity, fp_rate);
        let first_rate = fp_rate * TIGHTENING;
        DuplicateGuard { stages: vec![Stage::new(capacity, first_rate)], next_fp_rate: first_rate * TIGHTENING }
    }

    // true if the name was (probably) seen before; otherwise records it and returns false
    pub(crate) fn test_and_insert(&mut self, name: &str) -> bool {
        let name = name.to_string();
        if self.stages.iter().any(|s| s.filter.check(&name)) {
            return true;
        }
        if self.newest().inserted == self.newest().capacity {
            self.grow();
        }
        let stage = self.newest_mut();
        stage.filter.set(&name);
        stage.inserted += 1;
        false
    }

    pub(crate) fn num_stages(&self) -> usize {
        self.stages.len()
    }

    fn grow(&mut self) {
        let capacity = self.newest().capacity * GROWTH;
        self.stages.push(Stage::new(capacity, self.next_fp_rate));
        self.next_fp_rate *= TIGHTENING;
        debug!("Duplicate filter grew to {} stages, newest holds {} names", self.num_stages(), capacity);
    }

    fn newest(&self) -> &Stage {
        &self.stages[self.stages.len() - 1]
    }

    fn newest_mut(&mut self) -> &mut Stage {
        let last = self.stages.len() - 1;
        &mut self.stages[last]
    }
}
