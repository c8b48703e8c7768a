extern crate clap;
use clap::{Arg, ArgMatches, Command};
use std::{fs, path::Path, str::FromStr, sync::Arc, time::Instant};

use env_logger::Env;
use log::{error, info};

mod config;
use config::{AlignOutput, Direction, EmConfig};

mod error;
use error::{EmError, Result};

mod em;
use em::{calc_abundances, RoundController};

mod fragments;
mod library;
use library::{Librarian, Library};

mod models;
use models::{bias::BiasTable, fld::Fld, mismatch::MismatchTable, rho::RhoPropagator, BiasModel, LibraryModels, MismatchModel};

mod output;
use output::{output_results, AlignmentWriter};

mod readers;
use readers::{read_header, BamSource, MapParser};

mod stats;
mod targets;
use targets::{priors::parse_priors, TargetTable};

mod util;

fn cli() -> Command<'static> {
    Command::new("streamem").version("0.1.0")
        .about("Streaming EM quantification of multi-mapping fragment alignments")
        .arg(Arg::new("alignments")
            .help("comma-separated SAM/BAM files, grouped by read name")
            .required(true)
            .index(1))
        .arg(Arg::new("output-dir")
            .short('o')
            .long("output-dir")
            .help("directory for results.xprs and params.xprs")
            .takes_value(true)
            .display_order(1))
        .arg(Arg::new("config")
            .short('c')
            .long("config")
            .help("TOML file with run parameters; created with the defaults if missing")
            .takes_value(true)
            .display_order(1))
        .arg(Arg::new("write-config")
            .long("write-config")
            .help("store the effective parameters of this run at the given path")
            .takes_value(true)
            .display_order(1))
        .arg(Arg::new("threads")
            .short('p')
            .long("num-threads")
            .help("total threads, including the parse and driver threads")
            .takes_value(true)
            .display_order(2))
        .arg(Arg::new("forget-param")
            .short('f')
            .long("forget-param")
            .help("forgetting factor in [0.5, 1.0]")
            .takes_value(true)
            .display_order(2))
        .arg(Arg::new("burn-in")
            .long("burn-in")
            .help("fragments before the auxiliary models are used for assignment")
            .takes_value(true)
            .display_order(3))
        .arg(Arg::new("burn-out")
            .long("burn-out")
            .help("fragments after which the auxiliary models stop learning")
            .takes_value(true)
            .display_order(3))
        .arg(Arg::new("stop-at")
            .long("stop-at")
            .help("stop after this many fragments per file (0 for all)")
            .takes_value(true)
            .display_order(3))
        .arg(Arg::new("additional-online")
            .short('O')
            .long("additional-online")
            .help("number of additional online rounds")
            .takes_value(true)
            .conflicts_with("additional-batch")
            .display_order(4))
        .arg(Arg::new("additional-batch")
            .short('B')
            .long("additional-batch")
            .help("number of additional batch rounds")
            .takes_value(true)
            .display_order(4))
        .arg(Arg::new("both")
            .long("both")
            .help("finish the online rounds with one batch round")
            .display_order(4))
        .arg(Arg::new("fr-stranded")
            .long("fr-stranded")
            .help("accept only forward->reverse alignments (second-stranded protocols)")
            .conflicts_with("rf-stranded")
            .display_order(5))
        .arg(Arg::new("rf-stranded")
            .long("rf-stranded")
            .help("accept only reverse->forward alignments (first-stranded protocols)")
            .display_order(5))
        .arg(Arg::new("no-error-model")
            .long("no-error-model")
            .help("disable the mismatch model")
            .display_order(5))
        .arg(Arg::new("no-bias-correct")
            .long("no-bias-correct")
            .help("disable positional bias correction")
            .display_order(5))
        .arg(Arg::new("edit-detect")
            .long("edit-detect")
            .help("keep learning mismatches after burn-out")
            .display_order(5))
        .arg(Arg::new("expr-alpha")
            .long("expr-alpha")
            .help("prior pseudo-count per target")
            .takes_value(true)
            .display_order(6))
        .arg(Arg::new("fld-alpha")
            .long("fld-alpha")
            .help("prior pseudo-count of the fragment length distribution")
            .takes_value(true)
            .display_order(6))
        .arg(Arg::new("bias-alpha")
            .long("bias-alpha")
            .help("prior pseudo-count per bias bin")
            .takes_value(true)
            .display_order(6))
        .arg(Arg::new("mm-alpha")
            .long("mm-alpha")
            .help("prior pseudo-count of the mismatch model")
            .takes_value(true)
            .display_order(6))
        .arg(Arg::new("frag-len-max")
            .long("frag-len-max")
            .help("longest fragment length modelled")
            .takes_value(true)
            .display_order(6))
        .arg(Arg::new("frag-len-mean")
            .short('m')
            .long("frag-len-mean")
            .help("prior mean of the fragment length distribution")
            .takes_value(true)
            .display_order(6))
        .arg(Arg::new("frag-len-stddev")
            .short('s')
            .long("frag-len-stddev")
            .help("prior standard deviation of the fragment length distribution")
            .takes_value(true)
            .display_order(6))
        .arg(Arg::new("prior-params")
            .long("prior-params")
            .help("file with per-target prior pseudo-counts")
            .takes_value(true)
            .display_order(6))
        .arg(Arg::new("output-align-prob")
            .long("output-align-prob")
            .help("write every alignment with its posterior probability")
            .conflicts_with("output-align-samp")
            .display_order(7))
        .arg(Arg::new("output-align-samp")
            .long("output-align-samp")
            .help("write one alignment per fragment sampled from the posteriors")
            .display_order(7))
        .arg(Arg::new("output-running-rounds")
            .long("output-running-rounds")
            .help("write intermediate results before every additional round")
            .display_order(7))
        .arg(Arg::new("output-running-reads")
            .long("output-running-reads")
            .help("write intermediate results at log-scale fragment counts during each pass")
            .display_order(7))
}

fn parsed<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>> {
    match matches.value_of(name) {
        Some(value) => value.parse().map(Some)
            .map_err(|_| EmError::invalid_parameter(name, format!("cannot parse '{}'", value))),
        None => Ok(None),
    }
}

fn set<T: FromStr>(matches: &ArgMatches, name: &str, field: &mut T) -> Result<()> {
    if let Some(value) = parsed(matches, name)? {
        *field = value;
    }
    Ok(())
}

// defaults, then the config file, then whatever was given on the command line
fn build_config(matches: &ArgMatches) -> Result<EmConfig> {
    let mut config = match matches.value_of("config") {
        Some(path) => EmConfig::load(Path::new(path))?,
        None => EmConfig::default(),
    };
    set(matches, "output-dir", &mut config.output_dir)?;
    set(matches, "threads", &mut config.num_threads)?;
    set(matches, "forget-param", &mut config.ff_param)?;
    set(matches, "burn-in", &mut config.burn_in)?;
    set(matches, "burn-out", &mut config.burn_out)?;
    set(matches, "stop-at", &mut config.stop_at)?;
    set(matches, "expr-alpha", &mut config.expr_alpha)?;
    set(matches, "fld-alpha", &mut config.fld_alpha)?;
    set(matches, "bias-alpha", &mut config.bias_alpha)?;
    set(matches, "mm-alpha", &mut config.mm_alpha)?;
    set(matches, "frag-len-max", &mut config.fl_max)?;
    set(matches, "frag-len-mean", &mut config.fl_mean)?;
    set(matches, "frag-len-stddev", &mut config.fl_stddev)?;

    if let Some(rounds) = parsed(matches, "additional-online")? {
        config.remaining_rounds = rounds;
        config.online_additional = true;
    }
    if let Some(rounds) = parsed(matches, "additional-batch")? {
        config.remaining_rounds = rounds;
        config.online_additional = false;
    }
    if let Some(path) = matches.value_of("prior-params") {
        config.priors_file = Some(path.to_string());
    }
    if matches.is_present("both") { config.both = true; }
    if matches.is_present("no-error-model") { config.error_model = false; }
    if matches.is_present("no-bias-correct") { config.bias_correct = false; }
    if matches.is_present("edit-detect") { config.edit_detect = true; }
    if matches.is_present("output-running-rounds") { config.output_running_rounds = true; }
    if matches.is_present("output-running-reads") { config.output_running_reads = true; }
    if matches.is_present("fr-stranded") { config.direction = Direction::Fr; }
    if matches.is_present("rf-stranded") { config.direction = Direction::Rf; }
    if matches.is_present("output-align-prob") { config.output_align = AlignOutput::Probabilities; }
    if matches.is_present("output-align-samp") { config.output_align = AlignOutput::Sampled; }
    Ok(config)
}

// every file must list the same targets, with the same lengths, in the same order
fn load_targets(files: &[String], config: &EmConfig) -> Result<TargetTable> {
    let entries = read_header(&files[0])?;
    for pair in files.windows(2) {
        if read_header(&pair[1])? != entries {
            return Err(EmError::HeaderMismatch { first: pair[0].clone(), second: pair[1].clone() });
        }
    }
    let alphas = config.priors_file.as_deref().map(parse_priors).transpose()?;
    let prior_fld = Fld::new(config.fld_alpha, config.fl_max, config.fl_mean, config.fl_stddev);
    Ok(TargetTable::new(entries, alphas.as_ref(), config.expr_alpha, &prior_fld))
}

fn build_libraries(files: &[String], num_targets: usize, config: &EmConfig) -> Result<Vec<Library>> {
    // every library starts from the bias expectations of the first one
    let mut bias_tables: Vec<Option<BiasTable>> = files.iter()
        .map(|_| config.bias_correct.then(|| BiasTable::new(config.bias_alpha)))
        .collect();
    if let Some((Some(first), rest)) = bias_tables.split_first() {
        for table in rest.iter().flatten() {
            table.copy_expectations(first);
        }
    }

    let output_dir = Path::new(&config.output_dir);
    let mut libs = Vec::with_capacity(files.len());
    for (i, (file, bias)) in files.iter().zip(bias_tables.drain(..)).enumerate() {
        let writer = match config.output_align {
            AlignOutput::None => None,
            AlignOutput::Probabilities => Some(AlignmentWriter::create(&output_dir.join(format!("hits.{}.prob", i + 1)), config.output_align)?),
            AlignOutput::Sampled => Some(AlignmentWriter::create(&output_dir.join(format!("hits.{}.samp", i + 1)), config.output_align)?),
        };
        let parser = MapParser::new(Box::new(BamSource::new(file, num_targets, config.direction)), writer, config.single_round());
        let models = LibraryModels {
            fld: Box::new(Fld::new(config.fld_alpha, config.fl_max, config.fl_mean, config.fl_stddev)),
            mismatch: config.error_model.then(|| Box::new(MismatchTable::new(config.mm_alpha)) as Box<dyn MismatchModel>),
            bias: bias.map(|b| Box::new(b) as Box<dyn BiasModel>),
        };
        libs.push(Library::new(file.clone(), parser, models));
    }
    Ok(libs)
}

fn run() -> Result<()> {
    let matches = cli().get_matches();
    let config = build_config(&matches)?;
    config.validate()?;
    if let Some(path) = matches.value_of("write-config") {
        config.store(Path::new(path))?;
        info!("Stored run parameters in {}", path);
    }

    let files: Vec<String> = matches.value_of("alignments").unwrap_or_default()
        .split(',')
        .filter(|f| !f.is_empty())
        .map(|f| f.to_string())
        .collect();
    if files.is_empty() {
        return Err(EmError::invalid_parameter("alignments", "no alignment files given"));
    }
    let output_dir = Path::new(&config.output_dir);
    fs::create_dir_all(output_dir)?;

    let start = Instant::now();
    let targets = Arc::new(load_targets(&files, &config)?);
    let libs = build_libraries(&files, targets.size(), &config)?;
    let propagator = Box::new(RhoPropagator::new(Arc::clone(&targets)));
    let mut librarian = Librarian::new(libs, targets, propagator);
    info!("Time took to load targets: {:?}", start.elapsed());

    let start = Instant::now();
    let tot_counts = RoundController::new(&config).run(
        &mut librarian,
        |libs, round| calc_abundances(libs, round, &config),
        |libs, tot, remaining| output_results(output_dir, libs, tot, Some(remaining)),
    )?;
    info!("Time took to estimate abundances: {:?}", start.elapsed());

    info!("Writing results to {}", output_dir.display());
    output_results(output_dir, &librarian, tot_counts, None)?;
    info!("Done");
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    if let Err(e) = run() {
        error!("{}", e);
        std::process::exit(1);
    }
}
