//! # tnp-hist
//!
//! Pass/fail histogram production for tag-and-probe efficiency measurements.
//!
//! Reads columnar event samples (Parquet), classifies every probe into
//! pass/fail and truth-matching categories per kinematic bin, fills weighted
//! mass histograms, and repairs negative bins left by negative event weights.
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use tnp_core::{ConfigFile, SampleKind};
//! use tnp_hist::{FillJob, JobShard};
//!
//! let cfg = ConfigFile::from_path(Path::new("tnp.yaml")).unwrap();
//! let channel = cfg.channel("ID").unwrap();
//! for group in channel.fill_groups(SampleKind::Sim).unwrap() {
//!     let job = FillJob::new(group).unwrap();
//!     let (mut hists, stats) = job.run(JobShard::single()).unwrap();
//!     println!("{} fills into {} histograms", stats.fills, hists.len());
//!     hists.postprocess();
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binning;
pub mod category;
pub mod error;
pub mod expr;
pub mod fields;
pub mod filler;
pub mod histogram;
pub mod job;
pub mod parquet;
pub mod shard;
pub mod smear;
pub mod source;
pub mod store;

pub use binning::BinningIndex;
pub use category::{CategoryKey, GenMatch, WeightTerms, categories_for, enumerate_categories};
pub use error::{HistError, Result};
pub use expr::{BoundExpr, CompiledExpr};
pub use fields::{FieldSet, referenced_fields};
pub use filler::{FillStats, HistogramAccumulator, clamp_weight};
pub use histogram::WeightedHistogram;
pub use job::FillJob;
pub use parquet::{ParquetChain, resolve_sample};
pub use shard::{Assignment, JobShard, ShardPolicy, reduced_entries};
pub use smear::{postprocess, remove_negative_bins, smear_negative_bins};
pub use source::{EventBatch, EventRecord, EventSource, MemorySource, Row};
pub use store::{
    HistogramKey, HistogramSet, JobTag, SCHEMA_VERSION, collect_job_files, job_output_path,
    merge_job_files, merged_output_path, output_stem,
};
