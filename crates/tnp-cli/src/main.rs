//! tnphist CLI

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tnp_core::{ConfigFile, SampleKind};
use tnp_hist::{FillJob, HistogramSet, JobShard, collect_job_files, merge_job_files, output_stem};

#[derive(Parser)]
#[command(name = "tnphist")]
#[command(about = "tnphist - Tag-and-probe pass/fail histogram production")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List channels and the configurations each sample expands into
    Configs {
        /// Configuration file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fill pass/fail histograms for one channel and sample
    Fill {
        /// Configuration file (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Channel name inside the configuration file
        #[arg(long)]
        channel: String,

        /// Sample kind: data or sim
        #[arg(long)]
        sample: SampleKind,

        /// Number of jobs the sample is split into
        #[arg(long, default_value = "1")]
        job_count: usize,

        /// Index of the job to run
        #[arg(long, conflicts_with = "all_jobs", required_unless_present = "all_jobs")]
        job_index: Option<usize>,

        /// Run every job in-process, in parallel
        #[arg(long)]
        all_jobs: bool,

        /// Process only the first 1/R of the events
        #[arg(long, default_value = "1")]
        reduction: f64,

        /// Threads for --all-jobs (0 = auto)
        #[arg(long, default_value = "0")]
        threads: usize,

        /// Output directory for job files
        #[arg(long)]
        out_dir: PathBuf,
    },

    /// Sum job files into one histogram file
    Merge {
        /// Merged output file
        #[arg(short, long)]
        output: PathBuf,

        /// Job files, or `.d` directories of job files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Repair negative bins (10 smearing passes, then a floor at zero)
    Postprocess {
        /// Merged histogram file
        #[arg(short, long)]
        input: PathBuf,

        /// Output file. Defaults to replacing the input in place.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON results.
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Configs { config, output } => cmd_configs(&config, output.as_ref()),
        Commands::Fill {
            config,
            channel,
            sample,
            job_count,
            job_index,
            all_jobs,
            reduction,
            threads,
            out_dir,
        } => cmd_fill(
            &config,
            &channel,
            sample,
            job_count,
            if all_jobs { None } else { job_index },
            reduction,
            threads,
            &out_dir,
        ),
        Commands::Merge { output, inputs } => cmd_merge(&output, &inputs),
        Commands::Postprocess { input, output } => cmd_postprocess(&input, output.as_ref()),
    }
}

fn load_config(path: &Path) -> Result<ConfigFile> {
    tracing::info!(path = %path.display(), "loading configuration");
    let cfg = ConfigFile::from_path(path)
        .with_context(|| format!("failed to load configuration {}", path.display()))?;
    tracing::info!(channels = cfg.channels.len(), "configuration loaded");
    Ok(cfg)
}

fn cmd_configs(config: &Path, output: Option<&PathBuf>) -> Result<()> {
    let cfg = load_config(config)?;

    let mut channels = serde_json::Map::new();
    for (name, ch) in &cfg.channels {
        let mut samples = serde_json::Map::new();
        for kind in [SampleKind::Data, SampleKind::Sim] {
            if ch.sample(kind).is_none() {
                continue;
            }
            let groups = ch
                .fill_groups(kind)
                .with_context(|| format!("channel '{name}', sample '{kind}'"))?;
            let groups: Vec<serde_json::Value> = groups
                .iter()
                .map(|g| {
                    serde_json::json!({
                        "sample": g.sample.display().to_string(),
                        "stem": output_stem(ch.output_stem(name), kind, g.label()),
                        "configs": g.configs.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                    })
                })
                .collect();
            samples.insert(kind.to_string(), serde_json::Value::Array(groups));
        }
        channels.insert(name.clone(), serde_json::Value::Object(samples));
    }

    write_json(output, serde_json::json!({ "channels": channels }))
}

#[allow(clippy::too_many_arguments)]
fn cmd_fill(
    config: &Path,
    channel: &str,
    sample: SampleKind,
    job_count: usize,
    job_index: Option<usize>,
    reduction: f64,
    threads: usize,
    out_dir: &Path,
) -> Result<()> {
    let cfg = load_config(config)?;
    let ch = cfg.channel(channel)?;
    let groups = ch.fill_groups(sample).with_context(|| format!("channel '{channel}'"))?;

    if job_index.is_none() && threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }

    let mut written = Vec::new();
    for group in groups {
        let stem = output_stem(ch.output_stem(channel), sample, group.label());
        tracing::info!(
            stem = %stem,
            configs = group.configs.len(),
            sample = %group.sample.display(),
            "fill group"
        );
        let job = FillJob::new(group)
            .with_context(|| format!("failed to prepare '{stem}'"))?
            .with_reduction(reduction);

        match job_index {
            Some(index) => {
                let shard = JobShard::new(job_count, index)?;
                let (path, stats) = job
                    .run_to_file(shard, out_dir, &stem)
                    .with_context(|| format!("job {index} of '{stem}' failed"))?;
                tracing::info!(fills = stats.fills, non_finite = stats.non_finite_weights, "job done");
                written.push(path);
            }
            None => {
                let (paths, stats) = job
                    .run_all(job_count, out_dir, &stem)
                    .with_context(|| format!("jobs of '{stem}' failed"))?;
                tracing::info!(
                    jobs = paths.len(),
                    events = stats.events_read,
                    fills = stats.fills,
                    non_finite = stats.non_finite_weights,
                    "all jobs done"
                );
                written.extend(paths);
            }
        }
    }

    let files: Vec<String> = written.iter().map(|p| p.display().to_string()).collect();
    write_json(None, serde_json::json!({ "job_files": files }))
}

fn cmd_merge(output: &Path, inputs: &[PathBuf]) -> Result<()> {
    let files = collect_job_files(inputs)?;
    if files.is_empty() {
        bail!("no input files to merge");
    }
    tracing::info!(files = files.len(), "merging job files");

    let merged = merge_job_files(&files)?;
    merged
        .write_json(output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}

fn cmd_postprocess(input: &Path, output: Option<&PathBuf>) -> Result<()> {
    let mut set = HistogramSet::read_json(input)?;
    set.postprocess();
    tracing::info!(histograms = set.len(), "negative bins repaired");
    let target = output.map(PathBuf::as_path).unwrap_or(input);
    set.write_json(target).with_context(|| format!("failed to write {}", target.display()))?;
    Ok(())
}

fn write_json(output: Option<&PathBuf>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
