mod apply;
mod classify;
mod config;
mod coordinator;
mod d4j;
mod exec;
mod logger;
mod output;
mod patch_id;
mod state;
mod summary;
mod worker;

use std::{error::Error, io::Read, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing::{debug, info, warn};

use crate::{
    classify::D4jTextClassifier,
    config::{default_config_path, Config, ConfigBuilder},
    coordinator::{Coordinator, SubprocessRunner, WorkerEnvelope},
    d4j::Defects4j,
    worker::Worker,
};

#[derive(Parser)]
#[command(
    name = "patchbench",
    version,
    about = "Validate candidate program-repair patches against Defects4J bugs."
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Apply and test every candidate patch in a JSON input file
    Validate(ValidateArgs),

    /// Validate a single bug read from stdin (spawned by `validate`)
    #[command(hide = true)]
    Worker,

    /// Report pass@k over a directory of result files
    Summary(SummaryArgs),
}

#[derive(Args, Debug, Clone)]
struct ValidateArgs {
    #[arg(long, help = "JSON file mapping patch ids to candidate patches")]
    patch_file: PathBuf,

    #[arg(long, help = "Patch granularity: line | file")]
    level: Option<String>,

    #[arg(long, help = "Tests to run: trigger | relevant | all")]
    tests: Option<String>,

    #[arg(long, help = "Validate only the first N input entries")]
    num_examples: Option<usize>,

    #[arg(long, help = "Concurrent bugs (0 = one per core)")]
    workers: Option<usize>,

    #[arg(long, help = "TOML config file")]
    config: Option<PathBuf>,

    #[arg(long = "set", value_name = "KEY=VALUE", help = "Override a config key")]
    overrides: Vec<String>,
}

#[derive(Args, Debug, Clone)]
struct SummaryArgs {
    #[arg(long, help = "Directory holding -validated.jsonl files")]
    input: PathBuf,

    #[arg(
        long,
        default_value_t = false,
        help = "Leave uncompilable patches out of the sample count"
    )]
    prune_compilation: bool,

    #[arg(long, help = "Bugs to average over (default: number of result files)")]
    total_bugs: Option<usize>,
}

fn main() -> Result<(), Box<dyn Error>> {
    logger::init();

    match Cli::parse().command {
        CliCommand::Validate(args) => run_validate(args),
        CliCommand::Worker => run_worker(),
        CliCommand::Summary(args) => run_summary(args),
    }
}

fn build_config(args: &ValidateArgs) -> Result<Config, Box<dyn Error>> {
    let mut builder = ConfigBuilder::new();

    match &args.config {
        Some(path) => {
            builder.load_file(path)?;
        }
        None => {
            let path = default_config_path();
            if path.is_file() {
                builder.load_file(&path)?;
            }
        }
    }

    for pair in &args.overrides {
        builder.set_override(pair)?;
    }

    if let Some(level) = &args.level {
        builder.set("patch_granularity", level)?;
    }
    if let Some(tests) = &args.tests {
        builder.set("tests", tests)?;
    }
    if let Some(workers) = args.workers {
        builder.set("workers", &workers.to_string())?;
    }

    Ok(builder.build()?)
}

fn run_validate(args: ValidateArgs) -> Result<(), Box<dyn Error>> {
    let cfg = build_config(&args)?;
    cfg.log_summary();

    let tasks = output::load_candidates(&args.patch_file, args.num_examples)?;
    let candidates: usize = tasks.iter().map(|t| t.candidate_count()).sum();
    info!(
        file = %args.patch_file.display(),
        bugs = tasks.len(),
        candidates,
        "loaded candidates"
    );

    let workers = cfg.worker_count();
    let output_dir = cfg.output_dir.clone();
    let runner = SubprocessRunner::current_exe(cfg)?;
    let summary = Coordinator::new(&runner, workers).validate(tasks);

    for (bug, reason) in &summary.crashed {
        warn!(bug = %bug, "no results: {}", reason);
    }
    if !summary.timed_out.is_empty() {
        warn!(bugs = %summary.timed_out.join(", "), "timed out before writing results");
    }
    info!(
        bugs = summary.total(),
        output_dir = %output_dir.display(),
        "done"
    );

    Ok(())
}

fn run_worker() -> Result<(), Box<dyn Error>> {
    let mut raw = String::new();
    std::io::stdin().read_to_string(&mut raw)?;
    let WorkerEnvelope { config, task } = serde_json::from_str(&raw)?;

    let harness = Defects4j::new(config.defects4j.clone());
    let classifier = D4jTextClassifier;
    let report = Worker::new(&config, &harness, &classifier).validate_bug(&task)?;

    info!(
        bug = %report.bug,
        records = report.record_count(),
        skipped = report.skipped,
        "worker finished"
    );
    Ok(())
}

fn run_summary(args: SummaryArgs) -> Result<(), Box<dyn Error>> {
    if !args.input.is_dir() {
        return Err(format!("{} is not a directory", args.input.display()).into());
    }

    let scores = summary::collect_scores(&args.input, args.prune_compilation);
    let total_bugs = args.total_bugs.unwrap_or(scores.len());
    let correct_bugs = scores.iter().filter(|s| s.correct > 0).count();
    for s in &scores {
        debug!(file = %s.file.display(), total = s.total, correct = s.correct, "scored");
    }

    println!("result files : {}", scores.len());
    println!("bugs         : {}", total_bugs);
    println!("with a fix   : {}", correct_bugs);
    if args.prune_compilation {
        println!("(uncompilable patches excluded)");
    }
    for k in summary::REPORTED_K {
        println!(
            "pass@{:<4}   : {:.4}",
            k,
            summary::average_pass_at_k(&scores, k, total_bugs)
        );
    }

    Ok(())
}
