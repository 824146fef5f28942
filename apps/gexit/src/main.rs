mod config;
mod output;
mod targets;

use anyhow::{anyhow, Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Args, Parser, Subcommand};
use config::{ConfigSummary, ProbeArgs, RunConfig};
use gexit_classify::{classify_all, read_hop_table_path, status_counts, write_classification_table};
use gexit_model::ClassificationResult;
use gexit_trace::{
    run_traces, CacheStats, CsvHopSink, EnrichmentCache, IpInfoClient, RunSummary, SystemResolver,
    TraceContext, UdpProbe,
};
use output::{atomic_write, write_json, StagedFile};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use targets::TargetArgs;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gexit", version, about = "Google exit-point traceroute survey")]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Trace(TraceArgs),
    Classify(ClassifyArgs),
    Run(RunArgs),
}

#[derive(Args)]
#[command(
    about = "Probe destinations and write the raw hop table. Needs raw-socket privileges; only probe networks you may test."
)]
struct TraceArgs {
    #[command(flatten)]
    targets: TargetArgs,

    #[command(flatten)]
    probe: ProbeArgs,

    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
#[command(about = "Classify a raw hop table into Google exit points.")]
struct ClassifyArgs {
    #[arg(long = "in")]
    in_path: PathBuf,

    #[arg(long)]
    out: PathBuf,
}

#[derive(Args)]
#[command(about = "Trace, classify and write a run receipt into one output directory.")]
struct RunArgs {
    #[command(flatten)]
    targets: TargetArgs,

    #[command(flatten)]
    probe: ProbeArgs,

    #[arg(long)]
    out_dir: Option<PathBuf>,

    #[arg(long)]
    force: bool,
}

#[derive(Serialize)]
struct RunOutputs {
    hops: PathBuf,
    exits: PathBuf,
    run: PathBuf,
}

#[derive(Serialize)]
struct HostInfo {
    os: String,
    arch: String,
}

#[derive(Serialize)]
struct RunReceipt {
    version: String,
    started_at_utc: String,
    finished_at_utc: String,
    targets_file: Option<PathBuf>,
    destinations: usize,
    settings: ConfigSummary,
    outputs: RunOutputs,
    traces: RunSummary,
    statuses: BTreeMap<&'static str, usize>,
    cache: CacheStats,
    host: HostInfo,
}

struct TraceReport {
    summary: RunSummary,
    cache: CacheStats,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(cli.command) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Trace(args) => run_trace(args).map(|_| ()),
        Commands::Classify(args) => run_classify(&args.in_path, &args.out).map(|_| ()),
        Commands::Run(args) => run_run(args),
    }
}

fn run_trace(args: TraceArgs) -> Result<TraceReport> {
    let destinations = args.targets.collect()?;
    let config = args.probe.resolve()?;
    trace_to_table(&destinations, &config, &args.out)
}

/// Probes every destination and streams hop rows into `out`, which only
/// appears once the whole run has finished.
fn trace_to_table(destinations: &[String], config: &RunConfig, out: &Path) -> Result<TraceReport> {
    UdpProbe::check_privileges()?;

    let client = IpInfoClient::new(config.lookup.clone())
        .map_err(|err| anyhow!("failed to build lookup client: {err}"))?;
    let cache = Arc::new(EnrichmentCache::new(Arc::new(client)));
    let ctx = TraceContext {
        primitive: Arc::new(UdpProbe::new()),
        resolver: Arc::new(SystemResolver),
        cache: Arc::clone(&cache),
    };

    let staged = StagedFile::create(out)?;
    let sink = Arc::new(CsvHopSink::new(staged.try_clone_file()?)?);

    info!(
        destinations = destinations.len(),
        workers = config.schedule.workers,
        max_hops = config.trace.max_hops,
        "starting traces"
    );
    let scheduled = run_traces(
        destinations,
        &config.trace,
        &config.schedule,
        &ctx,
        sink.clone(),
    )?;
    sink.flush()?;

    let stats = cache.stats();
    info!(
        entries = stats.entries,
        hits = stats.hits,
        fetches = stats.fetches,
        failures = stats.failures,
        "enrichment cache"
    );
    if scheduled.summary.sink_errors > 0 {
        return Err(anyhow!(
            "{} hop rows could not be written to {:?}",
            scheduled.summary.sink_errors,
            out
        ));
    }
    staged.commit()?;
    info!(path = ?out, "hop table written");

    Ok(TraceReport {
        summary: scheduled.summary,
        cache: stats,
    })
}

fn run_classify(in_path: &Path, out: &Path) -> Result<Vec<ClassificationResult>> {
    let traces = read_hop_table_path(in_path)?;
    let results = classify_all(&traces);

    let mut table = Vec::new();
    write_classification_table(&mut table, &results)?;
    atomic_write(out, &table)?;

    for (status, count) in status_counts(&results) {
        info!(status = status.as_str(), count, "classification");
    }
    info!(destinations = results.len(), path = ?out, "classification table written");
    Ok(results)
}

fn run_run(args: RunArgs) -> Result<()> {
    let started_at_utc = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let destinations = args.targets.collect()?;
    let config = args.probe.resolve()?;

    let out_dir = args.out_dir.clone().unwrap_or_else(default_out_dir);
    prepare_out_dir(&out_dir, args.force)?;

    let hops_path = out_dir.join("hops.csv");
    let exits_path = out_dir.join("exits.csv");
    let run_path = out_dir.join("run.json");

    let report = trace_to_table(&destinations, &config, &hops_path)?;
    let results = run_classify(&hops_path, &exits_path)?;

    let statuses = status_counts(&results)
        .into_iter()
        .map(|(status, count)| (status.as_str(), count))
        .collect();

    let finished_at_utc = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let receipt = RunReceipt {
        version: env!("CARGO_PKG_VERSION").to_string(),
        started_at_utc,
        finished_at_utc,
        targets_file: args.targets.targets.clone(),
        destinations: destinations.len(),
        settings: config.summary(),
        outputs: RunOutputs {
            hops: hops_path,
            exits: exits_path,
            run: run_path.clone(),
        },
        traces: report.summary,
        statuses,
        cache: report.cache,
        host: HostInfo {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        },
    };

    write_json(&run_path, &receipt)?;
    info!(path = ?run_path, "run receipt written");
    Ok(())
}

fn prepare_out_dir(out_dir: &Path, force: bool) -> Result<()> {
    if out_dir.exists() {
        if !out_dir.is_dir() {
            return Err(anyhow!(
                "output path {:?} exists and is not a directory",
                out_dir
            ));
        }
        if !force {
            return Err(anyhow!(
                "output directory {:?} already exists (use --force)",
                out_dir
            ));
        }
        return Ok(());
    }
    fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {out_dir:?}"))
}

fn default_out_dir() -> PathBuf {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
    PathBuf::from("output").join(stamp)
}
