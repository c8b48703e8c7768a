use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{EmError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum AlignOutput {
    None,
    Probabilities,
    Sampled,
}

// which fragment orientations the library protocol can produce
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum Direction {
    Both,
    // read 1 forward, read 2 reverse
    Fr,
    // read 1 reverse, read 2 forward
    Rf,
}

/*
    Every knob of a run. Built once (defaults, then an optional config file, then the
    command line) and passed by reference into the driver and the round controller.

    ff_param: forgetting factor controlling the growth of the fragment mass
    burn_in: fragments before the auxiliary models are applied to assignment
    burn_out: fragments after which the auxiliary models stop learning
    num_threads: total threads including the parse thread and the driver thread
    remaining_rounds: additional EM rounds after the initial online round
    online_additional: the additional rounds are online (true) or batch (false)
    both: run one batch round after the online rounds
    stop_at: stop parsing after this many fragments (0 disables)
    direction: orientations kept by the parser; the others are reported as invalid
    dup_capacity / dup_fp_rate: initial sizing of the duplicate fragment-name filter
    output_running_reads: write intermediate results at fragment counts d * 10^k, d in 1..=9,
        starting from running_reads_first
*/
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct EmConfig {
    pub(crate) ff_param: f64,
    pub(crate) burn_in: usize,
    pub(crate) burn_out: usize,
    pub(crate) num_threads: usize,
    pub(crate) error_model: bool,
    pub(crate) bias_correct: bool,
    pub(crate) edit_detect: bool,
    pub(crate) remaining_rounds: usize,
    pub(crate) online_additional: bool,
    pub(crate) both: bool,
    pub(crate) stop_at: usize,
    pub(crate) direction: Direction,
    pub(crate) expr_alpha: f64,
    pub(crate) fld_alpha: f64,
    pub(crate) bias_alpha: f64,
    pub(crate) mm_alpha: f64,
    pub(crate) fl_max: u32,
    pub(crate) fl_mean: f64,
    pub(crate) fl_stddev: f64,
    pub(crate) dup_capacity: usize,
    pub(crate) dup_fp_rate: f64,
    pub(crate) output_dir: String,
    pub(crate) output_align: AlignOutput,
    pub(crate) output_running_rounds: bool,
    pub(crate) output_running_reads: bool,
    pub(crate) running_reads_first: usize,
    pub(crate) priors_file: Option<String>,
}

impl Default for EmConfig {
    fn default() -> Self {
        EmConfig {
            ff_param: 0.85,
            burn_in: 100_000,
            burn_out: 5_000_000,
            num_threads: 2,
            error_model: true,
            bias_correct: true,
            edit_detect: false,
            remaining_rounds: 0,
            online_additional: false,
            both: false,
            stop_at: 0,
            direction: Direction::Both,
            expr_alpha: 0.1,
            fld_alpha: 1.0,
            bias_alpha: 1.0,
            mm_alpha: 1.0,
            fl_max: 800,
            fl_mean: 200.0,
            fl_stddev: 80.0,
            dup_capacity: 10_000_000,
            dup_fp_rate: 1e-7,
            output_dir: ".".to_string(),
            output_align: AlignOutput::None,
            output_running_rounds: false,
            output_running_reads: false,
            running_reads_first: 1_000_000,
            priors_file: None,
        }
    }
}

impl EmConfig {
    // loads the config file, creating it with the defaults if it does not exist yet
    pub(crate) fn load(path: &Path) -> Result<EmConfig> {
        info!("Loading configuration from {}", path.display());
        let config: EmConfig = confy::load_path(path)?;
        Ok(config)
    }

    pub(crate) fn store(&self, path: &Path) -> Result<()> {
        confy::store_path(path, self.clone())?;
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(0.5..=1.0).contains(&self.ff_param) {
            return Err(EmError::invalid_parameter("forget-param", "must be between 0.5 and 1.0"));
        }
        if self.burn_in > self.burn_out {
            return Err(EmError::invalid_parameter("burn-in", "must not exceed burn-out"));
        }
        for (name, alpha) in [("expr-alpha", self.expr_alpha), ("fld-alpha", self.fld_alpha), ("bias-alpha", self.bias_alpha), ("mm-alpha", self.mm_alpha)] {
            if !(alpha > 0.0 && alpha.is_finite()) {
                return Err(EmError::invalid_parameter(name, "must be a positive pseudo-count"));
            }
        }
        if self.fl_max == 0 {
            return Err(EmError::invalid_parameter("frag-len-max", "must be positive"));
        }
        if self.fl_stddev <= 0.0 {
            return Err(EmError::invalid_parameter("frag-len-stddev", "must be positive"));
        }
        if self.running_reads_first == 0 {
            return Err(EmError::invalid_parameter("running-reads-first", "must be positive"));
        }
        if self.dup_capacity == 0 || !(self.dup_fp_rate > 0.0 && self.dup_fp_rate < 1.0) {
            return Err(EmError::invalid_parameter("duplicate-filter", "needs a positive capacity and a rate in (0, 1)"));
        }
        Ok(())
    }

    // one parsing thread and one driver thread always run, so they do not count as workers
    pub(crate) fn worker_threads(&self) -> usize {
        let workers = self.num_threads.saturating_sub(2);
        if workers > 0 && self.edit_detect {
            workers - 1
        } else {
            workers
        }
    }

    pub(crate) fn queue_capacity(&self) -> usize {
        self.worker_threads().max(10)
    }

    // there is more than the initial round only if rounds remain or a batch round is forced
    pub(crate) fn single_round(&self) -> bool {
        self.remaining_rounds == 0 && !self.both
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, false, 0 ; "no threads")]
    #[test_case(2, false, 0 ; "parse and driver only")]
    #[test_case(6, false, 4 ; "four workers")]
    #[test_case(6, true, 3 ; "edit detection takes one")]
    #[test_case(3, true, 0 ; "edit detection keeps the last worker")]
    fn test_worker_threads(num_threads: usize, edit_detect: bool, expected: usize) {
        let config = EmConfig { num_threads, edit_detect, ..EmConfig::default() };
        assert_eq!(config.worker_threads(), expected);
    }

    #[test]
    fn test_queue_capacity_has_a_floor() {
        let config = EmConfig { num_threads: 4, ..EmConfig::default() };
        assert_eq!(config.queue_capacity(), 10);
        let config = EmConfig { num_threads: 40, ..EmConfig::default() };
        assert_eq!(config.queue_capacity(), 38);
    }

    #[test_case(0.49 ; "below range")]
    #[test_case(1.01 ; "above range")]
    fn test_forgetting_factor_out_of_range(ff_param: f64) {
        let config = EmConfig { ff_param, ..EmConfig::default() };
        assert!(matches!(config.validate(), Err(EmError::InvalidParameter { .. })));
    }

    #[test_case(EmConfig { expr_alpha: 0.0, ..EmConfig::default() }, "expr-alpha" ; "zero expression prior")]
    #[test_case(EmConfig { fld_alpha: -1.0, ..EmConfig::default() }, "fld-alpha" ; "negative length prior")]
    #[test_case(EmConfig { bias_alpha: f64::NAN, ..EmConfig::default() }, "bias-alpha" ; "nan bias prior")]
    #[test_case(EmConfig { mm_alpha: 0.0, ..EmConfig::default() }, "mm-alpha" ; "zero mismatch prior")]
    fn test_pseudo_counts_must_be_positive(config: EmConfig, name: &str) {
        match config.validate() {
            Err(EmError::InvalidParameter { parameter, .. }) => assert_eq!(parameter, name),
            other => panic!("expected {} to be rejected, got {:?}", name, other),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(EmConfig::default().validate().is_ok());
        let config = EmConfig { burn_in: 10, burn_out: 5, ..EmConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_and_load_round_trip_through_confy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("streamem.toml");
        let config = EmConfig { burn_in: 7, output_align: AlignOutput::Sampled, ..EmConfig::default() };
        config.store(&path).unwrap();
        let loaded = EmConfig::load(&path).unwrap();
        assert_eq!(loaded.burn_in, 7);
        assert_eq!(loaded.output_align, AlignOutput::Sampled);
    }
}
