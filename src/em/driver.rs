use std::path::Path;
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use log::{debug, info, trace};
use parking_lot::{Condvar, Mutex};

use super::assigner::{process_fragment, AssignContext};
use super::guard::DuplicateGuard;
use super::mass_increment;
use super::queue::{BoundedQueue, ParseChannels};
use super::rounds::RoundState;
use crate::config::EmConfig;
use crate::error::{EmError, Result};
use crate::fragments::{Fragment, ReadHit};
use crate::library::{Librarian, PassParts};
use crate::models::{BiasModel, FragmentLengthModel, LibraryModels, MassPropagator};
use crate::output::{write_snapshot, AlignmentWriter};
use crate::stats::PassStats;
use crate::targets::TargetTable;

const BIAS_UPDATE_INTERVAL: Duration = Duration::from_millis(500);
const PROGRESS_INTERVAL: usize = 1_000_000;

// Wakes the bias updater early when the pass no longer needs it.
struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn new() -> StopSignal {
        StopSignal { stopped: Mutex::new(false), cond: Condvar::new() }
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }

    fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }

    fn wait(&self, timeout: Duration) {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            self.cond.wait_for(&mut stopped, timeout);
        }
    }
}

/*
    Republishes the effective lengths and bias weights learned so far, until stopped.
    Publishing takes the cache write lock, so it never overlaps the scoring of a
    fragment. One last publish follows the stop request.
*/
fn bias_update(targets: &TargetTable, fld: &dyn FragmentLengthModel, bias: Option<&dyn BiasModel>, stop: &StopSignal) {
    debug!("Bias updater started");
    loop {
        let stopped = stop.is_stopped();
        let eff_lengths = targets.compute_effective_lengths(fld);
        {
            let mut cache = targets.cache_write();
            cache.eff_lengths = eff_lengths;
            if let Some(bias) = bias {
                bias.apply_pending(&mut cache);
            }
        }
        if stopped {
            break;
        }
        stop.wait(BIAS_UPDATE_INTERVAL);
    }
    debug!("Bias updater stopped");
}

// Fragment counts d * 10^k for d in 1..=9, from a first power of ten up.
struct LogScale {
    digit: usize,
    scale: usize,
}

impl LogScale {
    fn starting_at(first: usize) -> LogScale {
        LogScale { digit: 1, scale: first }
    }

    fn next(&self) -> usize {
        self.digit * self.scale
    }

    fn advance(&mut self) {
        if self.digit == 9 {
            self.digit = 1;
            self.scale *= 10;
        } else {
            self.digit += 1;
        }
    }
}

/*
    Progress of one pass over all libraries.

    num_frags: fragments processed so far in this pass, over every library
    running_reads: next fragment count to write intermediate results at, if enabled
*/
struct PassProgress {
    num_frags: usize,
    running_reads: Option<LogScale>,
}

impl PassProgress {
    fn new(config: &EmConfig) -> PassProgress {
        let running_reads = config.output_running_reads.then(|| LogScale::starting_at(config.running_reads_first));
        PassProgress { num_frags: 0, running_reads }
    }

    // true when the fragment just counted is a running-reads checkpoint
    fn count_fragment(&mut self) -> bool {
        self.num_frags += 1;
        match self.running_reads.as_mut() {
            Some(schedule) if schedule.next() == self.num_frags => {
                schedule.advance();
                true
            }
            _ => false,
        }
    }
}

// Raises the abort flag when a worker unwinds, so the driver stops handing it fragments.
struct WorkerExit<'a>(&'a ParseChannels);

impl Drop for WorkerExit<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
            self.0.proc_on.close();
        }
    }
}

// What every fragment of a pass is scored against, whichever thread scores it.
#[derive(Clone, Copy)]
struct PassShared<'a> {
    targets: &'a TargetTable,
    models: &'a LibraryModels,
    propagator: &'a dyn MassPropagator,
    first_round: bool,
    edit_detect: bool,
}

impl PassShared<'_> {
    fn assign(&self, frag: &mut Fragment, mass_n: f64, burned_out: bool) {
        let cache = self.targets.cache_read();
        let ctx = AssignContext {
            targets: self.targets,
            cache: &cache,
            models: self.models,
            propagator: self.propagator,
            mass_n,
            first_round: self.first_round,
            burned_out,
            edit_detect: self.edit_detect,
        };
        process_fragment(frag, &ctx);
    }

    // worker loop; only runs once the models are burned out
    fn work(&self, channels: &ParseChannels) {
        let _exit = WorkerExit(channels);
        while let Some((mut frag, mass_n)) = channels.proc_on.pop(true) {
            self.assign(&mut frag, mass_n, true);
            channels.proc_out.push(Some(frag));
        }
    }
}

// returns the number of multi-mapped fragments; keeps draining after a write error
fn post_process(queue: &BoundedQueue<Fragment>, mut writer: Option<&mut AlignmentWriter>, targets: &TargetTable) -> Result<usize> {
    let mut num_multi = 0;
    let mut result = Ok(());
    while let Some(frag) = queue.pop(true) {
        if frag.num_hits() > 1 {
            num_multi += 1;
        }
        if result.is_ok() {
            if let Some(w) = writer.as_mut() {
                result = w.write_fragment(&frag, targets);
            }
        }
    }
    if result.is_ok() {
        if let Some(w) = writer.as_mut() {
            result = w.flush();
        }
    }
    result.map(|_| num_multi)
}

fn drain_invalid(queue: &BoundedQueue<ReadHit>) -> usize {
    let mut num_invalid = 0;
    while let Some(hit) = queue.pop(true) {
        trace!("Skipping alignment of '{}': {:?}", hit.name, hit.reason);
        num_invalid += 1;
    }
    num_invalid
}

fn join<T>(handle: ScopedJoinHandle<'_, T>, stage: &'static str) -> Result<T> {
    handle.join().map_err(|_| EmError::ThreadPanic { stage })
}

fn stop_updater(updater: &mut Option<ScopedJoinHandle<'_, ()>>, stop: &StopSignal) -> Result<()> {
    match updater.take() {
        Some(handle) => {
            stop.stop();
            join(handle, "bias update")
        }
        None => Ok(()),
    }
}

/*
    One pass over one library. The driver thread pops parsed fragments and scores them
    itself until the library burns out; after that a worker pool scores them if threads
    are configured. Every spawned thread is joined before returning, also when the pass
    fails, so an error never leaves a stage blocked on a queue.

    Running-reads checkpoints are written by the driver under the cache write lock,
    so no fragment is being scored while the snapshot is taken.
*/
fn run_pass(parts: PassParts<'_>, progress: &mut PassProgress, round: &RoundState, config: &EmConfig) -> Result<PassStats> {
    let channels = ParseChannels::new(config.queue_capacity());
    let stop = StopSignal::new();
    let num_workers = config.worker_threads();

    let PassParts { in_file_name, parser, models, n, mass_n, all_models, targets, propagator } = parts;
    let (parse_stage, writer) = parser.stages();
    let shared = PassShared { targets, models, propagator, first_round: round.first_round, edit_detect: config.edit_detect };
    let (channels, stop) = (&channels, &stop);

    thread::scope(|s| {
        let parse = s.spawn(move || parse_stage.threaded_parse(channels, targets, config.stop_at));
        let post = s.spawn(move || post_process(&channels.proc_out, writer, targets));
        let invalid = s.spawn(move || drain_invalid(&channels.proc_invalid));

        let mut updater = None;
        let mut pool = Vec::new();
        let mut guard = round.first_round.then(|| DuplicateGuard::new(config.dup_capacity, config.dup_fp_rate));
        let mut burned_out = *n >= config.burn_out;
        let mut num_frags = 0;
        let mut unsorted = None;
        let mut failure = None;
        let mut parsed_all = false;

        loop {
            if *n == config.burn_in {
                let (fld, bias) = (models.fld.as_ref(), models.bias.as_deref());
                updater = Some(s.spawn(move || bias_update(targets, fld, bias, stop)));
                if let Some(mismatch) = &models.mismatch {
                    mismatch.activate();
                }
                debug!("{}: burn-in reached", in_file_name);
            }
            if *n == config.burn_out {
                if let Some(mismatch) = &models.mismatch {
                    mismatch.fix();
                }
                burned_out = true;
                if let Err(e) = stop_updater(&mut updater, stop) {
                    failure.get_or_insert(e);
                }
                debug!("{}: burn-out reached", in_file_name);
            }
            if burned_out && num_workers > 0 && pool.is_empty() {
                for _ in 0..num_workers {
                    pool.push(s.spawn(move || shared.work(channels)));
                }
                debug!("Started {} worker threads", num_workers);
            }

            let mut frag = match channels.proc_in.pop(true) {
                Some(frag) => frag,
                None => {
                    parsed_all = true;
                    break;
                }
            };
            if let Some(guard) = guard.as_mut() {
                if guard.test_and_insert(frag.name()) {
                    unsorted = Some(frag.name().to_string());
                    channels.abort();
                    break;
                }
            }

            if pool.is_empty() {
                shared.assign(&mut frag, *mass_n, burned_out);
                channels.proc_out.push(Some(frag));
            } else if !channels.proc_on.push(Some((frag, *mass_n))) {
                // a worker died; its panic surfaces when the pool is joined
                break;
            }

            num_frags += 1;
            let checkpoint = progress.count_fragment();
            if progress.num_frags % PROGRESS_INTERVAL == 0 {
                info!("Fragments processed ({}): {}\tnumber of bundles: {}", in_file_name, progress.num_frags, targets.num_bundles());
            }
            *n += 1;
            *mass_n += mass_increment(*n, round.ff);

            if checkpoint {
                let cache = targets.cache_write();
                let written = write_snapshot(Path::new(&config.output_dir), targets, &cache, &all_models, progress.num_frags, Some(progress.num_frags));
                if let Err(e) = written {
                    failure.get_or_insert(e);
                    channels.abort();
                    break;
                }
            }
        }

        if !parsed_all {
            // every early exit raised the abort flag; the parser stops there and ends with its sentinel
            while channels.proc_in.pop(true).is_some() {}
        }
        for _ in 0..pool.len() {
            channels.proc_on.push(None);
        }
        if let Err(e) = stop_updater(&mut updater, stop) {
            failure.get_or_insert(e);
        }
        let parsed = join(parse, "parse").and_then(|r| r);
        for handle in pool {
            if let Err(e) = join(handle, "worker") {
                failure.get_or_insert(e);
            }
        }
        channels.proc_out.push(None);
        let num_multi = join(post, "post-processing").and_then(|r| r);
        let num_invalid = join(invalid, "invalid alignment");

        if let Some(name) = unsorted {
            return Err(EmError::UnsortedAlignments { name });
        }
        if let Some(e) = failure {
            return Err(e);
        }
        parsed?;
        Ok(PassStats::new_with_stats(num_frags, num_multi?, num_invalid?))
    })
}

/*
    One pass over every library, in order. Returns the number of fragments processed
    in this pass.
*/
pub(crate) fn calc_abundances(libs: &mut Librarian, round: &RoundState, config: &EmConfig) -> Result<usize> {
    info!("Processing input fragment alignments...");
    let mut total = PassStats::default();
    let mut progress = PassProgress::new(config);
    for l in 0..libs.size() {
        libs.set_curr(l);
        let stats = run_pass(libs.pass_parts(l), &mut progress, round, config)?;
        stats.log_stats(&libs.curr_lib().in_file_name);
        total.update(&stats);
    }
    info!("COMPLETED: processed {} mapped fragments, targets are in {} bundles", total.num_frags(), libs.targets().num_bundles());
    Ok(total.num_frags())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlignOutput;
    use crate::fragments::{FragHit, PairStatus};
    use crate::library::testing::{librarian, librarian_of, librarian_with_parser};
    use crate::models::mocks::{models, CallLog, Event, PanickingMismatch};
    use crate::readers::testing::VecSource;
    use crate::readers::MapParser;

    fn single(name: &str, target: usize) -> Fragment {
        Fragment::with_hits(name, vec![FragHit::new(target, 10, 60, PairStatus::LeftOnly)])
    }

    fn double(name: &str) -> Fragment {
        Fragment::with_hits(name, vec![
            FragHit::new(0, 10, 60, PairStatus::Paired).with_mismatches(1, 50),
            FragHit::new(1, 20, 70, PairStatus::Paired).with_mismatches(0, 50),
        ])
    }

    fn config(num_threads: usize, burn_in: usize, burn_out: usize) -> EmConfig {
        EmConfig { num_threads, burn_in, burn_out, dup_capacity: 10_000, ..EmConfig::default() }
    }

    fn running_reads(dir: &Path) -> EmConfig {
        EmConfig {
            output_running_reads: true,
            running_reads_first: 1,
            output_dir: dir.to_string_lossy().into_owned(),
            ..config(0, 100_000, 5_000_000)
        }
    }

    #[test]
    fn test_log_scale_checkpoints() {
        let mut scale = LogScale::starting_at(1);
        let mut seen = Vec::new();
        for _ in 0..11 {
            seen.push(scale.next());
            scale.advance();
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 20]);

        let scale = LogScale::starting_at(1_000_000);
        assert_eq!(scale.next(), 1_000_000);
    }

    #[test]
    fn test_single_hit_fragments_inline() {
        let log = CallLog::default();
        let frags = vec![single("a", 0), single("b", 1), single("c", 2)];
        let mut libs = librarian(3, frags, models(&log, false, false));
        let config = config(0, 100_000, 5_000_000);
        let round = RoundState::new(&config);

        assert_eq!(calc_abundances(&mut libs, &round, &config).unwrap(), 3);
        for id in 0..3 {
            assert_eq!(libs.targets().get(id).tot_counts(), 1);
            assert_eq!(libs.targets().get(id).uniq_counts(), 1);
        }
        assert!(log.events().is_empty());
        assert_eq!(libs.curr_lib().n, 4);
        assert!(libs.curr_lib().mass_n > 0.0);
    }

    #[test]
    fn test_lifecycle_activate_then_fix() {
        let log = CallLog::default();
        let frags = (0..6).map(|i| single(&format!("r{}", i), i % 2)).collect();
        let mut libs = librarian(2, frags, models(&log, true, false));
        let config = config(0, 2, 5);
        let round = RoundState::new(&config);

        assert_eq!(calc_abundances(&mut libs, &round, &config).unwrap(), 6);
        assert_eq!(log.lifecycle(), vec![Event::Update, Event::Activate, Event::Update, Event::Update, Event::Update, Event::Fix]);
        assert_eq!(log.count(Event::LogLikelihood), 0);
    }

    #[test]
    fn test_bias_updater_publishes_between_burn_in_and_burn_out() {
        let log = CallLog::default();
        let frags = (0..10).map(|i| double(&format!("r{}", i))).collect();
        let mut libs = librarian(2, frags, models(&log, true, true));
        let config = config(0, 2, 8);
        let round = RoundState::new(&config);

        calc_abundances(&mut libs, &round, &config).unwrap();
        // at least the first publish and the one after the stop request
        assert!(log.count(Event::ApplyPending) >= 2);
        assert_eq!(log.count(Event::Fix), 1);
        // observations stop at burn-out: 7 fragments of 2 hits before it
        assert_eq!(log.count(Event::UpdateObserved), 14);
        assert_eq!(log.count(Event::Update), 14);
    }

    #[test]
    fn test_worker_pool_after_burn_out() {
        let log = CallLog::default();
        let frags = (0..200).map(|i| double(&format!("r{}", i))).collect();
        let mut libs = librarian(2, frags, models(&log, true, false));
        let config = config(4, 1, 1);
        let round = RoundState::new(&config);

        assert_eq!(calc_abundances(&mut libs, &round, &config).unwrap(), 200);
        assert_eq!(libs.targets().get(0).tot_counts(), 200);
        assert_eq!(libs.targets().get(1).tot_counts(), 200);
        assert_eq!(log.count(Event::LogLikelihood), 400);
        assert_eq!(log.count(Event::Update), 0);
        assert_eq!(log.lifecycle(), vec![Event::Activate, Event::Fix]);
        assert_eq!(libs.curr_lib().n, 201);
    }

    #[test]
    fn test_non_consecutive_read_aborts_the_pass() {
        let log = CallLog::default();
        let mut frags = vec![single("a", 0), single("b", 1), single("a", 0)];
        frags.extend((0..50).map(|i| single(&format!("c{}", i), 1)));
        let mut libs = librarian(2, frags, models(&log, false, false));
        let config = config(0, 100_000, 5_000_000);
        let round = RoundState::new(&config);

        match calc_abundances(&mut libs, &round, &config) {
            Err(EmError::UnsortedAlignments { name }) => assert_eq!(name, "a"),
            other => panic!("expected an ordering error, got {:?}", other),
        }
        assert_eq!(libs.targets().get(0).tot_counts(), 1);
    }

    #[test]
    fn test_later_rounds_skip_the_duplicate_check() {
        let log = CallLog::default();
        let frags = vec![single("a", 0), single("b", 1), single("a", 0)];
        let mut libs = librarian(2, frags, models(&log, false, false));
        let config = config(0, 100_000, 5_000_000);
        let round = RoundState { first_round: false, ..RoundState::new(&config) };

        assert_eq!(calc_abundances(&mut libs, &round, &config).unwrap(), 3);
        // counts belong to the first round only
        assert_eq!(libs.targets().get(0).tot_counts(), 0);
    }

    #[test]
    fn test_active_writer_receives_every_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.1.prob");
        let writer = AlignmentWriter::create(&path, AlignOutput::Probabilities).unwrap();
        let frags = vec![double("x"), single("y", 1), double("z")];
        let parser = MapParser::new(Box::new(VecSource::fragments(frags)), Some(writer), true);
        let log = CallLog::default();
        let mut libs = librarian_with_parser(2, parser, models(&log, false, false));
        let config = config(0, 100_000, 5_000_000);
        let round = RoundState::new(&config);

        calc_abundances(&mut libs, &round, &config).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 5);
        assert!(text.lines().filter(|l| l.starts_with("y\t")).all(|l| l.ends_with("1.000000")));
    }

    #[test]
    fn test_running_reads_checkpoints_are_written() {
        let dir = tempfile::tempdir().unwrap();
        let log = CallLog::default();
        let frags = (0..25).map(|i| single(&format!("r{}", i), i % 3)).collect();
        let mut libs = librarian(3, frags, models(&log, false, false));
        let config = running_reads(dir.path());
        let round = RoundState::new(&config);

        assert_eq!(calc_abundances(&mut libs, &round, &config).unwrap(), 25);
        for n in [1, 2, 5, 9, 10, 20] {
            let sub = dir.path().join(format!("x_{}", n));
            assert!(sub.join("results.xprs").exists(), "missing checkpoint {}", n);
            assert!(sub.join("params.xprs").exists());
        }
        for n in [11, 19, 21, 25, 30] {
            assert!(!dir.path().join(format!("x_{}", n)).exists(), "unexpected checkpoint {}", n);
        }
        let text = std::fs::read_to_string(dir.path().join("x_20").join("results.xprs")).unwrap();
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn test_no_checkpoints_unless_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let log = CallLog::default();
        let frags = (0..12).map(|i| single(&format!("r{}", i), 0)).collect();
        let mut libs = librarian(1, frags, models(&log, false, false));
        let config = EmConfig { output_running_reads: false, ..running_reads(dir.path()) };
        let round = RoundState::new(&config);

        calc_abundances(&mut libs, &round, &config).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_pass_counts_fragments_across_libraries() {
        let dir = tempfile::tempdir().unwrap();
        let log = CallLog::default();
        let libraries = (0..2).map(|l| {
            let frags = (0..6).map(|i| single(&format!("lib{}_r{}", l, i), i % 2)).collect();
            (MapParser::new(Box::new(VecSource::fragments(frags)), None, false), models(&log, false, false))
        }).collect();
        let mut libs = librarian_of(2, libraries);
        let config = running_reads(dir.path());
        let round = RoundState::new(&config);

        assert_eq!(calc_abundances(&mut libs, &round, &config).unwrap(), 12);
        // neither library reaches 10 fragments on its own
        let sub = dir.path().join("x_10");
        assert!(sub.join("results.xprs").exists());
        assert!(sub.join("params.1.xprs").exists());
        assert!(sub.join("params.2.xprs").exists());
        assert!(!dir.path().join("x_11").exists());
        assert_eq!(libs.curr_lib().n, 7);
    }

    #[test]
    fn test_worker_panic_fails_the_pass() {
        let log = CallLog::default();
        let frags = (0..200).map(|i| double(&format!("r{}", i))).collect();
        let mut lib_models = models(&log, false, false);
        lib_models.mismatch = Some(Box::new(PanickingMismatch));
        let mut libs = librarian(2, frags, lib_models);
        let config = config(4, 1, 1);
        let round = RoundState::new(&config);

        match calc_abundances(&mut libs, &round, &config) {
            Err(EmError::ThreadPanic { stage }) => assert_eq!(stage, "worker"),
            other => panic!("expected a worker failure, got {:?}", other),
        }
    }
}
