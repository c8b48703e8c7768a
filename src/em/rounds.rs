use log::info;

use crate::config::EmConfig;
use crate::error::Result;
use crate::library::Librarian;

/*
    Where the run stands between passes. Read by the driver for every pass.

    first_round: only the first pass counts fragments, trains the models and checks read order
    last_round: the pass whose alignments are written out
    ff: forgetting factor of the fragment mass for the next pass
    remaining_rounds: additional passes still to run
*/
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RoundState {
    pub(crate) first_round: bool,
    pub(crate) last_round: bool,
    pub(crate) ff: f64,
    pub(crate) remaining_rounds: usize,
}

impl RoundState {
    pub(crate) fn new(config: &EmConfig) -> RoundState {
        RoundState {
            first_round: true,
            last_round: config.single_round(),
            ff: config.ff_param,
            remaining_rounds: config.remaining_rounds,
        }
    }
}

/*
    Runs the initial online pass, then the additional rounds: online ones first (same
    forgetting factor, target masses carried over), then batch ones, where every pass
    starts from reset target masses and weighs all fragments alike.
*/
pub(crate) struct RoundController<'a> {
    config: &'a EmConfig,
}

impl<'a> RoundController<'a> {
    pub(crate) fn new(config: &'a EmConfig) -> RoundController<'a> {
        RoundController { config }
    }

    /*
        `pass` runs one pass over every library and returns the fragments it processed.
        `checkpoint` writes intermediate results before an additional round when running
        round output is enabled; it gets the fragment total and the remaining rounds.
        Returns the fragment total of the final pass.
    */
    pub(crate) fn run<P, C>(&self, libs: &mut Librarian, mut pass: P, mut checkpoint: C) -> Result<usize>
    where
        P: FnMut(&mut Librarian, &RoundState) -> Result<usize>,
        C: FnMut(&Librarian, usize, usize) -> Result<()>,
    {
        let mut state = RoundState::new(self.config);
        let mut tot_counts = pass(libs, &state)?;

        while self.config.online_additional && state.remaining_rounds > 0 {
            state.remaining_rounds -= 1;
            if self.config.output_running_rounds {
                checkpoint(libs, tot_counts, state.remaining_rounds)?;
            }
            info!("{} remaining rounds.", state.remaining_rounds);
            state.first_round = false;
            state.last_round = state.remaining_rounds == 0 && !self.config.both;
            libs.prepare_round(state.last_round);
            tot_counts = pass(libs, &state)?;
        }

        // "both" finishes with exactly one batch round
        if self.config.both {
            state.remaining_rounds = 1;
        }

        libs.targets().round_reset();
        state.ff = 1.0;
        state.first_round = false;
        while !state.last_round {
            if self.config.output_running_rounds {
                checkpoint(libs, tot_counts, state.remaining_rounds)?;
            }
            state.remaining_rounds = state.remaining_rounds.saturating_sub(1);
            info!("Re-estimating counts with additional round of EM ({} remaining)...", state.remaining_rounds);
            state.last_round = state.remaining_rounds == 0;
            libs.prepare_round(state.last_round);
            tot_counts = pass(libs, &state)?;
            libs.targets().round_reset();
        }
        Ok(tot_counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmError;
    use crate::fragments::{FragHit, Fragment, PairStatus};
    use crate::library::testing::librarian;
    use crate::models::mocks::{models, CallLog};
    use test_case::test_case;

    fn libs() -> Librarian {
        let frags = vec![Fragment::with_hits("r", vec![FragHit::new(0, 0, 50, PairStatus::LeftOnly)])];
        librarian(1, frags, models(&CallLog::default(), false, false))
    }

    // runs the controller with a pass that only records the round it was given
    fn record(config: &EmConfig) -> (Vec<RoundState>, Vec<usize>) {
        let mut passes = Vec::new();
        let mut checkpoints = Vec::new();
        let mut libs = libs();
        RoundController::new(config)
            .run(&mut libs, |_, state| { passes.push(state.clone()); Ok(7) }, |_, _, remaining| { checkpoints.push(remaining); Ok(()) })
            .unwrap();
        (passes, checkpoints)
    }

    #[test_case(0 ; "no additional rounds")]
    #[test_case(1 ; "one online round")]
    #[test_case(4 ; "four online rounds")]
    fn test_online_rounds(rounds: usize) {
        let config = EmConfig { remaining_rounds: rounds, online_additional: true, ..EmConfig::default() };
        let (passes, _) = record(&config);

        assert_eq!(passes.len(), rounds + 1);
        assert!(passes[0].first_round);
        assert!(passes[1..].iter().all(|p| !p.first_round));
        let last: Vec<bool> = passes.iter().map(|p| p.last_round).collect();
        assert_eq!(last.iter().filter(|l| **l).count(), 1);
        assert!(*last.last().unwrap());
        assert!(passes.iter().all(|p| p.ff == config.ff_param));
    }

    #[test]
    fn test_batch_rounds_use_uniform_weights() {
        let config = EmConfig { remaining_rounds: 2, online_additional: false, ..EmConfig::default() };
        let (passes, _) = record(&config);

        assert_eq!(passes.len(), 3);
        assert_eq!(passes[0].ff, config.ff_param);
        assert!(!passes[0].last_round);
        assert_eq!((passes[1].ff, passes[1].last_round, passes[1].remaining_rounds), (1.0, false, 1));
        assert_eq!((passes[2].ff, passes[2].last_round, passes[2].remaining_rounds), (1.0, true, 0));
    }

    #[test]
    fn test_both_adds_one_batch_round_after_online() {
        let config = EmConfig { remaining_rounds: 2, online_additional: true, both: true, ..EmConfig::default() };
        let (passes, _) = record(&config);

        assert_eq!(passes.len(), 4);
        assert!(passes[..3].iter().all(|p| p.ff == config.ff_param && !p.last_round));
        assert_eq!(passes[3].ff, 1.0);
        assert!(passes[3].last_round);
    }

    #[test]
    fn test_checkpoints_before_each_additional_round() {
        let config = EmConfig { remaining_rounds: 2, output_running_rounds: true, ..EmConfig::default() };
        let (_, checkpoints) = record(&config);
        assert_eq!(checkpoints, vec![2, 1]);

        let config = EmConfig { remaining_rounds: 2, online_additional: true, output_running_rounds: true, ..EmConfig::default() };
        let (_, checkpoints) = record(&config);
        assert_eq!(checkpoints, vec![1, 0]);

        let config = EmConfig { remaining_rounds: 2, ..EmConfig::default() };
        assert!(record(&config).1.is_empty());
    }

    #[test]
    fn test_masses_are_closed_after_the_run() {
        let config = EmConfig::default();
        let mut libs = libs();
        let prior = libs.targets().get(0).mass();
        let tot = RoundController::new(&config)
            .run(&mut libs, |libs, _| { libs.targets().get(0).add_mass(3.0); Ok(1) }, |_, _, _| Ok(()))
            .unwrap();
        assert_eq!(tot, 1);
        // the finished round is what abundances are read from
        assert!(libs.targets().abundance_mass(0) > prior);
        assert_eq!(libs.targets().get(0).mass(), prior);
    }

    #[test]
    fn test_pass_errors_stop_the_run() {
        let config = EmConfig { remaining_rounds: 3, online_additional: true, ..EmConfig::default() };
        let mut libs = libs();
        let mut calls = 0;
        let result = RoundController::new(&config).run(&mut libs, |_, state| {
            calls += 1;
            if state.first_round { Ok(1) } else { Err(EmError::UnsortedAlignments { name: "r".to_string() }) }
        }, |_, _, _| Ok(()));
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }
}
