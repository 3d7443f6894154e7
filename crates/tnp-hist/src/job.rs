//! One fill job: sample resolution, sharding, event loop and output.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tnp_core::FillGroup;

use crate::error::Result;
use crate::filler::{FillStats, HistogramAccumulator};
use crate::parquet::{ParquetChain, resolve_sample};
use crate::shard::{JobShard, ShardPolicy, reduced_entries};
use crate::source::{DEFAULT_BATCH_SIZE, EventSource};
use crate::store::{HistogramSet, JobTag, job_output_path};

/// Fills the histograms of one fill group from its Parquet sample.
#[derive(Debug, Clone)]
pub struct FillJob {
    sample: PathBuf,
    accumulator: HistogramAccumulator,
    reduction: f64,
    batch_size: usize,
}

impl FillJob {
    /// Compile the group's configurations.
    pub fn new(group: FillGroup) -> Result<Self> {
        Ok(Self {
            sample: group.sample,
            accumulator: HistogramAccumulator::new(group.configs)?,
            reduction: 1.0,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Process only the first `1 / reduction` of the events.
    pub fn with_reduction(mut self, reduction: f64) -> Self {
        self.reduction = reduction;
        self
    }

    /// Events per decoded batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// The compiled accumulator.
    pub fn accumulator(&self) -> &HistogramAccumulator {
        &self.accumulator
    }

    /// Run the event loop for one shard.
    pub fn run(&self, shard: JobShard) -> Result<(HistogramSet, FillStats)> {
        let files = resolve_sample(&self.sample)?;
        let assignment = shard.assign(&files);
        tracing::info!(
            job = shard.job_index(),
            jobs = shard.job_count(),
            files = assignment.files.len(),
            split_events = assignment.policy == ShardPolicy::SplitEvents,
            sample = %self.sample.display(),
            "starting fill job"
        );

        let mut chain = ParquetChain::open(&assignment.files)?.with_batch_size(self.batch_size);
        let total = chain.total_entries();
        let n_events = reduced_entries(total, self.reduction)?;
        if n_events != total {
            tracing::info!("reduction: {total} -> {n_events}");
        }
        let range = shard.event_range(assignment.policy, n_events);
        self.accumulator.run(&mut chain, range)
    }

    /// Run one shard and write `<out_dir>/<stem>.d/job<index>.json`, tagged
    /// with the shard's index and job count.
    pub fn run_to_file(&self, shard: JobShard, out_dir: &Path, stem: &str) -> Result<(PathBuf, FillStats)> {
        let (set, stats) = self.run(shard)?;
        let path = job_output_path(out_dir, stem, shard.job_index());
        set.with_job(JobTag { index: shard.job_index(), count: shard.job_count() }).write_json(&path)?;
        Ok((path, stats))
    }

    /// Run every shard of a `job_count`-way split in parallel, one output file each.
    ///
    /// Returns the job files in index order and the summed counters.
    pub fn run_all(&self, job_count: usize, out_dir: &Path, stem: &str) -> Result<(Vec<PathBuf>, FillStats)> {
        let results: Vec<Result<(PathBuf, FillStats)>> = JobShard::all(job_count)?
            .into_par_iter()
            .map(|shard| self.run_to_file(shard, out_dir, stem))
            .collect();

        let mut paths = Vec::with_capacity(results.len());
        let mut total = FillStats::default();
        for r in results {
            let (path, stats) = r?;
            total.absorb(&stats);
            paths.push(path);
        }
        Ok((paths, total))
    }
}
