//! Configuration model for tag-and-probe histogram production.
//!
//! A configuration file declares named analysis channels ([`TnpConfig`]). Each
//! channel expands, per sample kind, into an ordered list of [`HistConfig`]:
//! the nominal configuration followed by one derived configuration per
//! systematic variation. A `HistConfig` is the read-only view the histogram
//! engine consumes.
//!
//! ```yaml
//! channels:
//!   ID:
//!     data: /ntuples/data
//!     sim: /ntuples/amc
//!     sim_weight: genWeight
//!     sim_maxweight: 10000
//!     sim_genmatching: tag_isMatchedGen && probe_isMatchedGen
//!     sim_genmass: genMass
//!     mass: pair_mass
//!     bins:
//!       - { var: "fabs(probe_eta)", type: float, bins: [0.0, 0.9, 1.2, 2.1, 2.4] }
//!       - { var: probe_pt, type: float, bins: [15, 20, 25, 30, 40, 50, 60, 120] }
//!     preselection: probe_isTracker
//!     expr: tag_pt > 26 && tag_isTight
//!     test: probe_isTight
//!     hist_nbins: 60
//!     hist_range: [70, 130]
//!     systematic:
//!       - [{ title: altMC, sim.replace: [amc, mg] }]
//!       - [{ title: massbin50, hist_nbins: 50 }, { title: massbin75, hist_nbins: 75 }]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name given to the unvaried configuration of a channel.
pub const NOMINAL: &str = "nominal";

/// Which sample of a channel is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    /// Recorded data: no sample weight, no truth information.
    Data,
    /// Simulation: sample weight, weight cap and truth expressions apply.
    Sim,
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKind::Data => f.write_str("data"),
            SampleKind::Sim => f.write_str("sim"),
        }
    }
}

impl FromStr for SampleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "data" => Ok(SampleKind::Data),
            "sim" => Ok(SampleKind::Sim),
            other => Err(Error::Validation(format!(
                "unknown sample kind '{other}' (expected 'data' or 'sim')"
            ))),
        }
    }
}

/// Value type of a binning variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    /// Floating-point variable.
    #[default]
    Float,
    /// Integer-valued variable.
    Int,
}

/// One binning dimension: an expression and its bin edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinSpec {
    /// Expression evaluated per event to obtain the binning value.
    pub var: String,
    /// Type tag of the variable.
    #[serde(rename = "type", default)]
    pub var_type: VarType,
    /// Strictly increasing bin edges (at least two).
    pub bins: Vec<f64>,
    /// Axis title (display only).
    #[serde(default)]
    pub title: Option<String>,
}

impl BinSpec {
    /// Create a floating-point binning dimension.
    pub fn new(var: impl Into<String>, edges: &[f64]) -> Self {
        Self { var: var.into(), var_type: VarType::Float, bins: edges.to_vec(), title: None }
    }

    /// Set the axis title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Number of bins along this dimension.
    pub fn n_bins(&self) -> usize {
        self.bins.len().saturating_sub(1)
    }

    /// Check the edge invariants: at least two finite, strictly increasing edges.
    pub fn validate(&self) -> Result<()> {
        if self.var.trim().is_empty() {
            return Err(Error::Validation("bin variable expression must be non-empty".into()));
        }
        if self.bins.len() < 2 {
            return Err(Error::Validation(format!(
                "bin variable '{}' needs at least two edges, got {}",
                self.var,
                self.bins.len()
            )));
        }
        if self.bins.iter().any(|e| !e.is_finite()) {
            return Err(Error::Validation(format!(
                "bin variable '{}' has non-finite edges",
                self.var
            )));
        }
        if self.bins.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::Validation(format!(
                "bin edges of '{}' must be strictly increasing: {:?}",
                self.var, self.bins
            )));
        }
        Ok(())
    }
}

/// One or more `(from, to)` substring replacements.
///
/// Accepts either a single pair (`[from, to]`) or a list of pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Replacement {
    /// A single replacement pair.
    One((String, String)),
    /// Several replacement pairs, applied in order.
    Many(Vec<(String, String)>),
}

impl Replacement {
    /// Apply all replacement pairs to `input`, in order.
    pub fn apply(&self, input: &str) -> String {
        match self {
            Replacement::One((from, to)) => input.replace(from.as_str(), to),
            Replacement::Many(pairs) => pairs
                .iter()
                .fold(input.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to)),
        }
    }
}

/// A systematic variation: a partial override of a channel's fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    /// Variation name; becomes the configuration identifier in the output.
    pub title: String,
    /// Substring replacement applied to the data sample path.
    #[serde(rename = "data.replace", default)]
    pub data_replace: Option<Replacement>,
    /// Substring replacement applied to the simulation sample path.
    #[serde(rename = "sim.replace", default)]
    pub sim_replace: Option<Replacement>,
    /// Substring replacement applied to the selection expression.
    #[serde(rename = "expr.replace", default)]
    pub expr_replace: Option<Replacement>,
    /// Substring replacement applied to the test expression.
    #[serde(rename = "test.replace", default)]
    pub test_replace: Option<Replacement>,
    /// Override of the simulation weight expression.
    #[serde(default)]
    pub sim_weight: Option<String>,
    /// Override of the simulation weight cap.
    #[serde(default)]
    pub sim_maxweight: Option<f64>,
    /// Override of the mass histogram range.
    #[serde(default)]
    pub hist_range: Option<(f64, f64)>,
    /// Override of the mass histogram bin count.
    #[serde(default)]
    pub hist_nbins: Option<usize>,
}

impl Variation {
    /// Create an empty variation with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Default::default() }
    }
}

fn default_maxweight() -> f64 {
    f64::INFINITY
}

/// Declarative description of one analysis channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TnpConfig {
    /// Data sample: a file or a directory of event files.
    #[serde(default)]
    pub data: Option<PathBuf>,
    /// Simulation sample: a file or a directory of event files.
    #[serde(default)]
    pub sim: Option<PathBuf>,
    /// Per-event weight expression for simulation.
    #[serde(default)]
    pub sim_weight: Option<String>,
    /// Absolute cap on the composed per-event weight for simulation.
    #[serde(default = "default_maxweight")]
    pub sim_maxweight: f64,
    /// Truth-matching predicate for simulation.
    #[serde(default)]
    pub sim_genmatching: Option<String>,
    /// Explicit truth-unmatched predicate; defaults to the negated match predicate.
    #[serde(default)]
    pub sim_notgenmatching: Option<String>,
    /// Truth-mass field for simulation.
    #[serde(default)]
    pub sim_genmass: Option<String>,
    /// Reconstructed mass field (histogram x-axis).
    pub mass: String,
    /// Binning dimensions.
    #[serde(default)]
    pub bins: Vec<BinSpec>,
    /// Predicate shared by every configuration of the channel.
    #[serde(default)]
    pub preselection: Option<String>,
    /// Overall selection expression.
    pub expr: String,
    /// Pass/fail predicate.
    pub test: String,
    /// Number of mass histogram bins.
    pub hist_nbins: usize,
    /// Mass histogram range `[lo, hi)`.
    pub hist_range: (f64, f64),
    /// Output file stem; defaults to the channel name.
    #[serde(default)]
    pub hist_file: Option<String>,
    /// Groups of systematic variations.
    #[serde(default)]
    pub systematic: Vec<Vec<Variation>>,
}

/// Fully resolved configuration consumed by the histogram engine.
#[derive(Debug, Clone, PartialEq)]
pub struct HistConfig {
    /// Configuration identifier (`nominal` or a variation title).
    pub name: String,
    /// Sample path this configuration reads.
    pub sample: PathBuf,
    /// Reconstructed mass expression.
    pub mass: String,
    /// Pass/fail predicate.
    pub test: String,
    /// Overall selection expression.
    pub expr: String,
    /// Optional per-event sample weight.
    pub weight: Option<String>,
    /// Truth-matching predicate; `None` disables truth-matched categories.
    pub genmatching: Option<String>,
    /// Explicit truth-unmatched predicate.
    pub notgenmatching: Option<String>,
    /// Truth-mass expression; `None` disables truth-mass categories.
    pub genmass: Option<String>,
    /// Absolute weight cap.
    pub maxweight: f64,
    /// Number of mass bins.
    pub hist_nbins: usize,
    /// Mass range `[lo, hi)`.
    pub hist_range: (f64, f64),
    /// Binning dimensions.
    pub bins: Vec<BinSpec>,
    /// Shared preselection predicate.
    pub preselection: Option<String>,
}

/// Configurations that read the same sample and can share one event loop.
#[derive(Debug, Clone, PartialEq)]
pub struct FillGroup {
    /// Sample path shared by every configuration of the group.
    pub sample: PathBuf,
    /// Configurations in canonical order.
    pub configs: Vec<HistConfig>,
}

impl FillGroup {
    /// Name identifying the group's output (the first configuration's name).
    pub fn label(&self) -> &str {
        self.configs.first().map(|c| c.name.as_str()).unwrap_or(NOMINAL)
    }
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_ref().map(|v| v.trim()).filter(|v| !v.is_empty()).map(str::to_string)
}

fn replace_path(path: &Path, rep: Option<&Replacement>) -> PathBuf {
    match rep {
        Some(r) => PathBuf::from(r.apply(&path.to_string_lossy())),
        None => path.to_path_buf(),
    }
}

impl TnpConfig {
    /// Create a channel with the required expressions and mass histogram axis.
    pub fn new(
        mass: impl Into<String>,
        expr: impl Into<String>,
        test: impl Into<String>,
        hist_nbins: usize,
        hist_range: (f64, f64),
    ) -> Self {
        Self {
            data: None,
            sim: None,
            sim_weight: None,
            sim_maxweight: default_maxweight(),
            sim_genmatching: None,
            sim_notgenmatching: None,
            sim_genmass: None,
            mass: mass.into(),
            bins: Vec::new(),
            preselection: None,
            expr: expr.into(),
            test: test.into(),
            hist_nbins,
            hist_range,
            hist_file: None,
            systematic: Vec::new(),
        }
    }

    /// Set the output file stem.
    pub fn hist_file(mut self, stem: impl Into<String>) -> Self {
        self.hist_file = Some(stem.into());
        self
    }

    /// Output file stem for a channel, falling back to the channel name.
    pub fn output_stem<'a>(&'a self, channel: &'a str) -> &'a str {
        self.hist_file.as_deref().map(str::trim).filter(|s| !s.is_empty()).unwrap_or(channel)
    }

    /// Set the data sample path.
    pub fn data(mut self, path: impl Into<PathBuf>) -> Self {
        self.data = Some(path.into());
        self
    }

    /// Set the simulation sample path.
    pub fn sim(mut self, path: impl Into<PathBuf>) -> Self {
        self.sim = Some(path.into());
        self
    }

    /// Set the simulation weight expression.
    pub fn sim_weight(mut self, expr: impl Into<String>) -> Self {
        self.sim_weight = Some(expr.into());
        self
    }

    /// Set the simulation weight cap.
    pub fn sim_maxweight(mut self, maxweight: f64) -> Self {
        self.sim_maxweight = maxweight;
        self
    }

    /// Set the truth-matching predicate.
    pub fn sim_genmatching(mut self, expr: impl Into<String>) -> Self {
        self.sim_genmatching = Some(expr.into());
        self
    }

    /// Set the explicit truth-unmatched predicate.
    pub fn sim_notgenmatching(mut self, expr: impl Into<String>) -> Self {
        self.sim_notgenmatching = Some(expr.into());
        self
    }

    /// Set the truth-mass expression.
    pub fn sim_genmass(mut self, expr: impl Into<String>) -> Self {
        self.sim_genmass = Some(expr.into());
        self
    }

    /// Append a binning dimension.
    pub fn add_bin(mut self, bin: BinSpec) -> Self {
        self.bins.push(bin);
        self
    }

    /// Set the shared preselection.
    pub fn preselection(mut self, expr: impl Into<String>) -> Self {
        self.preselection = Some(expr.into());
        self
    }

    /// Append a group of systematic variations.
    pub fn add_systematic(mut self, group: Vec<Variation>) -> Self {
        self.systematic.push(group);
        self
    }

    /// Sample path for the given kind, if configured.
    pub fn sample(&self, kind: SampleKind) -> Option<&Path> {
        match kind {
            SampleKind::Data => self.data.as_deref(),
            SampleKind::Sim => self.sim.as_deref(),
        }
    }

    /// Expand the channel into its ordered configurations for one sample kind.
    ///
    /// The nominal configuration comes first, then every variation of every
    /// group in declaration order.
    pub fn hist_configs(&self, kind: SampleKind) -> Result<Vec<HistConfig>> {
        let sample = self.sample(kind).ok_or_else(|| {
            Error::Validation(format!("no '{kind}' sample configured for this channel"))
        })?;

        let nominal = self.resolve(kind, sample, NOMINAL);
        nominal.validate()?;

        let mut out = vec![nominal];
        for variation in self.systematic.iter().flatten() {
            if variation.title.trim().is_empty() || variation.title == NOMINAL {
                return Err(Error::Validation(format!(
                    "systematic variation title '{}' is empty or reserved",
                    variation.title
                )));
            }
            if out.iter().any(|c| c.name == variation.title) {
                return Err(Error::Validation(format!(
                    "duplicate systematic variation title '{}'",
                    variation.title
                )));
            }
            let cfg = self.apply_variation(kind, sample, variation);
            cfg.validate()?;
            out.push(cfg);
        }
        Ok(out)
    }

    /// Expand and group configurations by the sample they read.
    ///
    /// Groups appear in order of first occurrence; configuration order inside a
    /// group follows [`TnpConfig::hist_configs`].
    pub fn fill_groups(&self, kind: SampleKind) -> Result<Vec<FillGroup>> {
        let mut groups: Vec<FillGroup> = Vec::new();
        for cfg in self.hist_configs(kind)? {
            match groups.iter_mut().find(|g| g.sample == cfg.sample) {
                Some(g) => g.configs.push(cfg),
                None => groups.push(FillGroup { sample: cfg.sample.clone(), configs: vec![cfg] }),
            }
        }
        Ok(groups)
    }

    fn resolve(&self, kind: SampleKind, sample: &Path, name: &str) -> HistConfig {
        let sim = kind == SampleKind::Sim;
        HistConfig {
            name: name.to_string(),
            sample: sample.to_path_buf(),
            mass: self.mass.clone(),
            test: self.test.clone(),
            expr: self.expr.clone(),
            weight: if sim { non_empty(&self.sim_weight) } else { None },
            genmatching: if sim { non_empty(&self.sim_genmatching) } else { None },
            notgenmatching: if sim { non_empty(&self.sim_notgenmatching) } else { None },
            genmass: if sim { non_empty(&self.sim_genmass) } else { None },
            maxweight: if sim { self.sim_maxweight } else { f64::INFINITY },
            hist_nbins: self.hist_nbins,
            hist_range: self.hist_range,
            bins: self.bins.clone(),
            preselection: non_empty(&self.preselection),
        }
    }

    fn apply_variation(&self, kind: SampleKind, sample: &Path, v: &Variation) -> HistConfig {
        let sample = match kind {
            SampleKind::Data => replace_path(sample, v.data_replace.as_ref()),
            SampleKind::Sim => replace_path(sample, v.sim_replace.as_ref()),
        };
        let mut cfg = self.resolve(kind, &sample, &v.title);
        if let Some(r) = &v.expr_replace {
            cfg.expr = r.apply(&cfg.expr);
        }
        if let Some(r) = &v.test_replace {
            cfg.test = r.apply(&cfg.test);
        }
        if kind == SampleKind::Sim {
            if let Some(w) = &v.sim_weight {
                cfg.weight = non_empty(&Some(w.clone()));
            }
            if let Some(m) = v.sim_maxweight {
                cfg.maxweight = m;
            }
        }
        if let Some(range) = v.hist_range {
            cfg.hist_range = range;
        }
        if let Some(n) = v.hist_nbins {
            cfg.hist_nbins = n;
        }
        cfg
    }
}

impl HistConfig {
    /// Whether truth-matched/unmatched categories are produced.
    pub fn has_genmatching(&self) -> bool {
        self.genmatching.is_some()
    }

    /// Whether truth-mass categories are produced.
    pub fn has_genmass(&self) -> bool {
        self.genmass.is_some()
    }

    /// Every expression string this configuration evaluates per event.
    pub fn expressions(&self) -> Vec<&str> {
        let mut out = vec![self.mass.as_str(), self.expr.as_str(), self.test.as_str()];
        out.extend(self.weight.as_deref());
        out.extend(self.genmatching.as_deref());
        out.extend(self.notgenmatching.as_deref());
        out.extend(self.genmass.as_deref());
        out.extend(self.preselection.as_deref());
        out.extend(self.bins.iter().map(|b| b.var.as_str()));
        out
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("mass", &self.mass), ("expr", &self.expr), ("test", &self.test)] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "config '{}': '{field}' must be non-empty",
                    self.name
                )));
            }
        }
        if self.hist_nbins == 0 {
            return Err(Error::Validation(format!(
                "config '{}': hist_nbins must be > 0",
                self.name
            )));
        }
        let (lo, hi) = self.hist_range;
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(Error::Validation(format!(
                "config '{}': invalid hist_range ({lo}, {hi})",
                self.name
            )));
        }
        if self.maxweight.is_nan() || self.maxweight <= 0.0 {
            return Err(Error::Validation(format!(
                "config '{}': maxweight must be positive, got {}",
                self.name, self.maxweight
            )));
        }
        if self.notgenmatching.is_some() && self.genmatching.is_none() {
            return Err(Error::Validation(format!(
                "config '{}': notgenmatching requires genmatching",
                self.name
            )));
        }
        for bin in &self.bins {
            bin.validate()?;
        }
        Ok(())
    }
}

/// Top-level configuration file: named channels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Channels by name.
    pub channels: BTreeMap<String, TnpConfig>,
}

impl ConfigFile {
    /// Parse a configuration from YAML bytes. JSON parses too, being a YAML subset.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Ok(serde_yaml_ng::from_slice(bytes)?)
    }

    /// Read and parse a configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Look up a channel by name.
    pub fn channel(&self, name: &str) -> Result<&TnpConfig> {
        self.channels.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.channels.keys().map(String::as_str).collect();
            Error::Validation(format!("unknown channel '{name}' (known: {})", known.join(", ")))
        })
    }
}
