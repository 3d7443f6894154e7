//! Partitioning of a sample across parallel jobs.
//!
//! With at least as many files as jobs, files are dealt round-robin and each
//! job reads its files completely. With fewer files than jobs, every job
//! reads all files and takes one contiguous block of the event range.

use std::ops::Range;

use crate::error::{HistError, Result};

/// How a job's share of the input is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardPolicy {
    /// File `i` belongs to job `i % job_count`.
    RoundRobinFiles,
    /// All files are read; the event range is split into contiguous blocks.
    SplitEvents,
}

/// The input assigned to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment<T> {
    /// Active policy for this run.
    pub policy: ShardPolicy,
    /// Files the job opens, in sample order.
    pub files: Vec<T>,
}

/// One job out of `job_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobShard {
    job_count: usize,
    job_index: usize,
}

impl JobShard {
    /// Validate and create a shard descriptor.
    pub fn new(job_count: usize, job_index: usize) -> Result<Self> {
        if job_count == 0 {
            return Err(HistError::Shard("job count must be at least 1".into()));
        }
        if job_index >= job_count {
            return Err(HistError::Shard(format!(
                "job index {job_index} out of range for {job_count} jobs"
            )));
        }
        Ok(Self { job_count, job_index })
    }

    /// The single job of an unsharded run.
    pub fn single() -> Self {
        Self { job_count: 1, job_index: 0 }
    }

    /// Every shard of a `job_count`-way split, in index order.
    pub fn all(job_count: usize) -> Result<Vec<Self>> {
        (0..job_count.max(1)).map(|i| Self::new(job_count, i)).collect()
    }

    /// Total number of jobs.
    pub fn job_count(&self) -> usize {
        self.job_count
    }

    /// Index of this job.
    pub fn job_index(&self) -> usize {
        self.job_index
    }

    /// Select the files this job reads and the policy in force.
    pub fn assign<T: Clone>(&self, files: &[T]) -> Assignment<T> {
        if files.len() < self.job_count {
            return Assignment { policy: ShardPolicy::SplitEvents, files: files.to_vec() };
        }
        let files = files
            .iter()
            .enumerate()
            .filter(|(i, _)| i % self.job_count == self.job_index)
            .map(|(_, f)| f.clone())
            .collect();
        Assignment { policy: ShardPolicy::RoundRobinFiles, files }
    }

    /// Contiguous block `[i * (n / count), (i + 1) * (n / count))`; the last
    /// job's block ends at `n`.
    pub fn event_block(&self, n_events: u64) -> Range<u64> {
        let count = self.job_count as u64;
        let index = self.job_index as u64;
        let size = n_events / count;
        let start = index * size;
        let end = if index + 1 == count { n_events } else { (index + 1) * size };
        start..end
    }

    /// Event range this job processes out of the `n_events` it can see.
    pub fn event_range(&self, policy: ShardPolicy, n_events: u64) -> Range<u64> {
        match policy {
            ShardPolicy::RoundRobinFiles => 0..n_events,
            ShardPolicy::SplitEvents => self.event_block(n_events),
        }
    }
}

/// Length of the processed prefix, `floor(total / reduction)`.
pub fn reduced_entries(total: u64, reduction: f64) -> Result<u64> {
    if !(reduction.is_finite() && reduction >= 1.0) {
        return Err(HistError::Shard(format!("reduction factor must be >= 1, got {reduction}")));
    }
    if reduction == 1.0 {
        return Ok(total);
    }
    Ok(((total as f64 / reduction).floor() as u64).min(total))
}
