use log::info;

/*
    Counters of one pass, summed over libraries by the driver.

    num_frags: fragments that went through assignment
    num_multi_mapped: fragments with more than one hit
    num_invalid: alignment records that never formed a fragment
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PassStats {
    num_frags: usize,
    num_multi_mapped: usize,
    num_invalid: usize,
}

impl PassStats {
    pub(crate) fn new_with_stats(num_frags: usize, num_multi_mapped: usize, num_invalid: usize) -> PassStats {
        PassStats { num_frags, num_multi_mapped, num_invalid }
    }

    pub(crate) fn update(&mut self, s: &PassStats) {
        self.num_frags += s.num_frags;
        self.num_multi_mapped += s.num_multi_mapped;
        self.num_invalid += s.num_invalid;
    }

    pub(crate) fn log_stats(&self, label: &str) {
        info!("Stats ({}):", label);
        info!("# of processed fragments: {}", self.num_frags);
        info!("# of multi-mapped fragments: {}", self.num_multi_mapped);
        info!("# of invalid alignments: {}", self.num_invalid);
    }

    pub(crate) fn num_frags(&self) -> usize {
        self.num_frags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_sums_counters() {
        let mut total = PassStats::default();
        total.update(&PassStats::new_with_stats(10, 4, 1));
        total.update(&PassStats::new_with_stats(5, 0, 2));
        assert_eq!(total, PassStats::new_with_stats(15, 4, 3));
        assert_eq!(total.num_frags(), 15);
    }
}
