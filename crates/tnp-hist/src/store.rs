//! Keyed histogram collections and their JSON storage.
//!
//! In memory every histogram is identified by a typed [`HistogramKey`].
//! String paths (`<config>/<category>/bin<id>`) only appear in the stored
//! document, which nests histograms as `config → category → bin`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tnp_core::SampleKind;

use crate::category::CategoryKey;
use crate::error::{HistError, Result};
use crate::histogram::WeightedHistogram;
use crate::parquet::natural_cmp;
use crate::smear;

/// Schema tag written into every histogram file.
pub const SCHEMA_VERSION: &str = "tnp_hists_v1";

const BIN_PREFIX: &str = "bin";

/// Identity of one output histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistogramKey {
    /// Index into the configuration list.
    pub config: usize,
    /// Flat kinematic bin id.
    pub bin: usize,
    /// Statistical category.
    pub category: CategoryKey,
}

/// Name of a kinematic bin in storage paths.
pub fn bin_name(bin: usize) -> String {
    format!("{BIN_PREFIX}{bin}")
}

fn parse_bin_name(name: &str) -> Result<usize> {
    name.strip_prefix(BIN_PREFIX)
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| HistError::Store(format!("invalid bin name '{name}'")))
}

type Tree = BTreeMap<String, BTreeMap<String, BTreeMap<String, WeightedHistogram>>>;

/// Position of a job file within its split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTag {
    /// Job index, `0..count`.
    pub index: usize,
    /// Number of jobs in the split.
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSet {
    schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    job: Option<JobTag>,
    configs: Vec<String>,
    bins: usize,
    histograms: Tree,
}

/// Histograms of one job (or of several merged jobs).
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSet {
    configs: Vec<String>,
    n_bins: usize,
    job: Option<JobTag>,
    hists: BTreeMap<HistogramKey, WeightedHistogram>,
}

impl HistogramSet {
    /// Empty set for the given configuration names and kinematic bin count.
    pub fn new(configs: Vec<String>, n_bins: usize) -> Self {
        Self { configs, n_bins, job: None, hists: BTreeMap::new() }
    }

    /// Mark the set as the output of one job of a split.
    pub fn with_job(mut self, job: JobTag) -> Self {
        self.job = Some(job);
        self
    }

    /// Job that produced this set. `None` for merged sets.
    pub fn job(&self) -> Option<JobTag> {
        self.job
    }

    /// Configuration names in index order.
    pub fn configs(&self) -> &[String] {
        &self.configs
    }

    /// Number of kinematic bins.
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Number of histograms.
    pub fn len(&self) -> usize {
        self.hists.len()
    }

    /// Whether the set holds no histograms.
    pub fn is_empty(&self) -> bool {
        self.hists.is_empty()
    }

    /// Add or replace a histogram.
    pub fn insert(&mut self, key: HistogramKey, hist: WeightedHistogram) -> Result<()> {
        if key.config >= self.configs.len() || key.bin >= self.n_bins {
            return Err(HistError::Store(format!(
                "key (config {}, bin {}) outside {} configs x {} bins",
                key.config,
                key.bin,
                self.configs.len(),
                self.n_bins
            )));
        }
        self.hists.insert(key, hist);
        Ok(())
    }

    /// Histogram for `key`.
    pub fn get(&self, key: &HistogramKey) -> Option<&WeightedHistogram> {
        self.hists.get(key)
    }

    /// Look up by configuration name.
    pub fn find(&self, config: &str, bin: usize, category: CategoryKey) -> Option<&WeightedHistogram> {
        let config = self.configs.iter().position(|c| c == config)?;
        self.hists.get(&HistogramKey { config, bin, category })
    }

    /// Histograms in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&HistogramKey, &WeightedHistogram)> {
        self.hists.iter()
    }

    /// Storage path of a key, e.g. `nominal/pass_genmatching/bin3`.
    pub fn path(&self, key: &HistogramKey) -> Result<String> {
        let config = self.configs.get(key.config).ok_or_else(|| {
            HistError::Store(format!("no configuration with index {}", key.config))
        })?;
        Ok(format!("{config}/{}/{}", key.category.name(), bin_name(key.bin)))
    }

    /// Bin-wise sum of `other` into `self`.
    ///
    /// Both sets must hold exactly the same keys with identical axes.
    pub fn merge(&mut self, other: &HistogramSet) -> Result<()> {
        if self.configs != other.configs || self.n_bins != other.n_bins {
            return Err(HistError::Store(format!(
                "cannot merge sets with configs {:?} x {} bins and {:?} x {} bins",
                self.configs, self.n_bins, other.configs, other.n_bins
            )));
        }
        if self.hists.len() != other.hists.len() {
            return Err(HistError::Store(format!(
                "cannot merge sets of {} and {} histograms",
                self.hists.len(),
                other.hists.len()
            )));
        }
        for (key, h) in &other.hists {
            let path = self.path(key)?;
            let mine = self
                .hists
                .get_mut(key)
                .ok_or_else(|| HistError::Store(format!("histogram {path} missing from merge target")))?;
            mine.add(h).map_err(|e| HistError::Store(format!("{path}: {e}")))?;
        }
        self.job = None;
        Ok(())
    }

    /// Merge several sets into one. At least one set is required.
    pub fn merge_all<I>(sets: I) -> Result<HistogramSet>
    where
        I: IntoIterator<Item = HistogramSet>,
    {
        let mut iter = sets.into_iter();
        let mut acc = iter
            .next()
            .ok_or_else(|| HistError::Store("nothing to merge".into()))?;
        for set in iter {
            acc.merge(&set)?;
        }
        Ok(acc)
    }

    /// Repair negative bins of every histogram.
    pub fn postprocess(&mut self) {
        for h in self.hists.values_mut() {
            smear::postprocess(h);
        }
        tracing::debug!(histograms = self.hists.len(), "negative bins repaired");
    }

    fn to_stored(&self) -> Result<StoredSet> {
        let mut histograms = Tree::new();
        for (key, h) in &self.hists {
            let config = &self.configs[key.config];
            histograms
                .entry(config.clone())
                .or_default()
                .entry(key.category.name())
                .or_default()
                .insert(bin_name(key.bin), h.clone());
        }
        Ok(StoredSet {
            schema_version: SCHEMA_VERSION.to_string(),
            job: self.job,
            configs: self.configs.clone(),
            bins: self.n_bins,
            histograms,
        })
    }

    fn from_stored(doc: StoredSet) -> Result<Self> {
        if doc.schema_version != SCHEMA_VERSION {
            return Err(HistError::Store(format!(
                "unsupported schema_version '{}', expected '{SCHEMA_VERSION}'",
                doc.schema_version
            )));
        }
        let mut set = HistogramSet::new(doc.configs, doc.bins);
        set.job = doc.job;
        for (config_name, categories) in doc.histograms {
            let config = set.configs.iter().position(|c| *c == config_name).ok_or_else(|| {
                HistError::Store(format!("histograms for undeclared configuration '{config_name}'"))
            })?;
            for (category_name, bins) in categories {
                let category: CategoryKey = category_name.parse()?;
                for (bin, h) in bins {
                    let bin = parse_bin_name(&bin)?;
                    h.validate().map_err(|e| {
                        HistError::Store(format!("{config_name}/{category_name}/{}: {e}", bin_name(bin)))
                    })?;
                    set.insert(HistogramKey { config, bin, category }, h)?;
                }
            }
        }
        Ok(set)
    }

    /// Serialize to a JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_stored()?)?)
    }

    /// Parse from a JSON string.
    pub fn from_json(s: &str) -> Result<Self> {
        Self::from_stored(serde_json::from_str(s)?)
    }

    /// Write to `path`, creating parent directories.
    ///
    /// The document goes to a `.tmp` sibling first and is renamed over
    /// `path`, so an existing file is either fully replaced or left intact.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = self.to_json()?;
        let tmp = temp_sibling(path)?;
        std::fs::write(&tmp, json).map_err(|e| {
            HistError::Store(format!("failed to write {}: {e}", tmp.display()))
        })?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(HistError::Store(format!("failed to replace {}: {e}", path.display())));
        }
        tracing::info!(path = %path.display(), histograms = self.hists.len(), "wrote histograms");
        Ok(())
    }

    /// Read a set written by [`HistogramSet::write_json`].
    pub fn read_json(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).map_err(|e| {
            HistError::Store(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&s).map_err(|e| HistError::Store(format!("{}: {e}", path.display())))
    }
}

fn temp_sibling(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| HistError::Store(format!("{} is not a file path", path.display())))?;
    let mut tmp = name.to_os_string();
    tmp.push(".tmp");
    Ok(path.with_file_name(tmp))
}

/// Read and sum histogram files.
///
/// Job files must all come from one split: the same job count, every index
/// exactly once. Leftovers of an earlier run with a different `--job-count`
/// are rejected instead of being summed twice. Untagged (merged) files are
/// summed as they are.
pub fn merge_job_files(files: &[PathBuf]) -> Result<HistogramSet> {
    let mut merged: Option<HistogramSet> = None;
    let mut split: Option<(usize, &Path)> = None;
    let mut seen: BTreeMap<usize, &Path> = BTreeMap::new();

    for path in files {
        let set = HistogramSet::read_json(path)?;
        if let Some(tag) = set.job() {
            let (count, first) = *split.get_or_insert((tag.count, path.as_path()));
            if tag.count != count || tag.index >= tag.count {
                return Err(HistError::Store(format!(
                    "{} is job {} of a {}-job split, but {} belongs to a {count}-job split \
                     (stale job files from an earlier run?)",
                    path.display(),
                    tag.index,
                    tag.count,
                    first.display()
                )));
            }
            if let Some(prev) = seen.insert(tag.index, path.as_path()) {
                return Err(HistError::Store(format!(
                    "job {} appears twice: {} and {}",
                    tag.index,
                    prev.display(),
                    path.display()
                )));
            }
        }
        match merged.as_mut() {
            Some(acc) => acc
                .merge(&set)
                .map_err(|e| HistError::Store(format!("merging {}: {e}", path.display())))?,
            None => merged = Some(set),
        }
    }

    if let Some((count, _)) = split {
        let missing: Vec<usize> = (0..count).filter(|i| !seen.contains_key(i)).collect();
        if !missing.is_empty() {
            return Err(HistError::Store(format!("missing job files for jobs {missing:?} of {count}")));
        }
    }
    let mut merged = merged.ok_or_else(|| HistError::Store("nothing to merge".into()))?;
    merged.job = None;
    Ok(merged)
}

/// Output stem of one fill group: `<channel stem>_<sample kind>_<group label>`.
pub fn output_stem(channel_stem: &str, kind: SampleKind, label: &str) -> String {
    format!("{channel_stem}_{kind}_{label}")
}

/// Path of one job's file: `<out_dir>/<stem>.d/job<index>.json`.
pub fn job_output_path(out_dir: &Path, stem: &str, job_index: usize) -> PathBuf {
    out_dir.join(format!("{stem}.d")).join(format!("job{job_index}.json"))
}

/// Path of the merged file: `<out_dir>/<stem>.json`.
pub fn merged_output_path(out_dir: &Path, stem: &str) -> PathBuf {
    out_dir.join(format!("{stem}.json"))
}

/// Expand merge inputs: files are kept, directories contribute their
/// `job*.json` files in natural order.
///
/// A directory may hold files of an older split; [`merge_job_files`]
/// catches that.
pub fn collect_job_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut jobs: Vec<PathBuf> = std::fs::read_dir(input)?
                .map(|e| e.map(|e| e.path()))
                .collect::<std::io::Result<Vec<_>>>()?
                .into_iter()
                .filter(|p| {
                    p.is_file()
                        && p.extension().and_then(|e| e.to_str()) == Some("json")
                        && p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with("job"))
                })
                .collect();
            if jobs.is_empty() {
                return Err(HistError::Store(format!("no job files in {}", input.display())));
            }
            jobs.sort_by(|a, b| natural_cmp(&a.to_string_lossy(), &b.to_string_lossy()));
            out.extend(jobs);
        } else if input.is_file() {
            out.push(input.clone());
        } else {
            return Err(HistError::Store(format!("{} doesn't exist", input.display())));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{GenMatch, enumerate_categories};

    fn sample_set(scale: f64) -> HistogramSet {
        let mut set = HistogramSet::new(vec!["nominal".into(), "altMC".into()], 2);
        for config in 0..2 {
            for bin in 0..2 {
                for category in enumerate_categories(true, false) {
                    let mut h = WeightedHistogram::new(3, 70.0, 130.0);
                    h.fill(91.0, scale * (bin + 1) as f64);
                    set.insert(HistogramKey { config, bin, category }, h).unwrap();
                }
            }
        }
        set
    }

    #[test]
    fn paths_follow_config_category_bin() {
        let set = sample_set(1.0);
        let key = HistogramKey {
            config: 1,
            bin: 1,
            category: CategoryKey { is_pass: true, gen_match: GenMatch::NotMatched, gen_mass: false },
        };
        assert_eq!(set.path(&key).unwrap(), "altMC/pass_notgenmatching/bin1");
        assert_eq!(set.len(), 2 * 2 * 6);
    }

    #[test]
    fn json_round_trip_preserves_keys_and_contents() {
        let set = sample_set(0.5);
        let back = HistogramSet::from_json(&set.to_json().unwrap()).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn merge_sums_bin_contents() {
        let mut a = sample_set(1.0);
        a.merge(&sample_set(2.0)).unwrap();
        let fail = CategoryKey { is_pass: false, gen_match: GenMatch::Unset, gen_mass: false };
        let h = a.find("altMC", 1, fail).unwrap();
        // 91 lies in [90, 110), bin 2
        assert_eq!(h.content(2), 6.0);
        assert_eq!(h.variance(2), 4.0 + 16.0);
        assert_eq!(h.entries, 2);
    }

    #[test]
    fn merge_rejects_mismatched_sets() {
        let mut a = sample_set(1.0);
        let mut b = HistogramSet::new(vec!["nominal".into()], 2);
        assert!(matches!(a.merge(&b), Err(HistError::Store(_))));

        b = sample_set(1.0);
        let key = *b.iter().next().unwrap().0;
        b.insert(key, WeightedHistogram::new(4, 70.0, 130.0)).unwrap();
        assert!(a.merge(&b).is_err());
        assert!(HistogramSet::merge_all(Vec::new()).is_err());
    }

    #[test]
    fn unknown_schema_rejected() {
        let json = sample_set(1.0).to_json().unwrap().replace(SCHEMA_VERSION, "other_v9");
        assert!(HistogramSet::from_json(&json).is_err());
    }

    #[test]
    fn job_paths_and_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let stem = output_stem("muon_id", SampleKind::Sim, "nominal");
        assert_eq!(stem, "muon_id_sim_nominal");
        for job in [10, 2, 1] {
            sample_set(1.0).write_json(&job_output_path(dir.path(), &stem, job)).unwrap();
        }
        let files = collect_job_files(&[dir.path().join(format!("{stem}.d"))]).unwrap();
        let names: Vec<String> =
            files.iter().map(|p| p.file_name().unwrap().to_string_lossy().into_owned()).collect();
        assert_eq!(names, vec!["job1.json", "job2.json", "job10.json"]);

        let merged = HistogramSet::merge_all(
            files.iter().map(|p| HistogramSet::read_json(p)).collect::<Result<Vec<_>>>().unwrap(),
        )
        .unwrap();
        assert_eq!(merged.len(), 24);
        assert!(collect_job_files(&[dir.path().join("missing")]).is_err());
    }

    #[test]
    fn write_json_replaces_or_keeps_the_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.json");
        sample_set(1.0).write_json(&path).unwrap();
        sample_set(3.0).write_json(&path).unwrap();
        assert_eq!(HistogramSet::read_json(&path).unwrap(), sample_set(3.0));
        let names: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names, vec![std::ffi::OsString::from("merged.json")]);

        // A failed write leaves the previous document untouched.
        std::fs::create_dir(dir.path().join("merged.json.tmp")).unwrap();
        assert!(sample_set(5.0).write_json(&path).is_err());
        assert_eq!(HistogramSet::read_json(&path).unwrap(), sample_set(3.0));
    }

    #[test]
    fn job_files_must_form_one_complete_split() {
        let dir = tempfile::tempdir().unwrap();
        let write = |index: usize, count: usize| {
            let path = dir.path().join(format!("job{index}_of{count}.json"));
            sample_set(1.0).with_job(JobTag { index, count }).write_json(&path).unwrap();
            path
        };
        let (a, b, c) = (write(0, 3), write(1, 3), write(2, 3));
        let stale = write(3, 5);

        let merged = merge_job_files(&[a.clone(), b.clone(), c.clone()]).unwrap();
        assert_eq!(merged.job(), None);
        let fail = CategoryKey { is_pass: false, gen_match: GenMatch::Unset, gen_mass: false };
        assert_eq!(merged.find("nominal", 1, fail).unwrap().content(2), 6.0);
        assert_eq!(HistogramSet::read_json(&a).unwrap().job(), Some(JobTag { index: 0, count: 3 }));

        let err = merge_job_files(&[a.clone(), b.clone(), c.clone(), stale]).unwrap_err();
        assert!(err.to_string().contains("stale"), "{err}");
        let err = merge_job_files(&[a.clone(), c.clone()]).unwrap_err();
        assert!(err.to_string().contains("missing job files for jobs [1] of 3"), "{err}");
        let err = merge_job_files(&[a.clone(), a, b, c]).unwrap_err();
        assert!(err.to_string().contains("appears twice"), "{err}");

        // Already merged (untagged) files are plain summands.
        let untagged = dir.path().join("merged.json");
        sample_set(1.0).write_json(&untagged).unwrap();
        assert_eq!(merge_job_files(&[untagged]).unwrap(), sample_set(1.0));
    }
}
