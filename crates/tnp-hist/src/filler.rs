//! Single-pass filling of pass/fail histograms for every configuration of a
//! fill group.
//!
//! Per event: shared preselection, then per configuration the selection
//! expression, the kinematic bin lookup and one weighted fill per category.
//! Predicate terms are evaluated once per configuration and combined per
//! category, so the cost does not grow with the number of categories.

use std::ops::Range;
use std::time::Instant;

use tnp_core::HistConfig;

use crate::binning::BinningIndex;
use crate::category::{CategoryKey, WeightTerms, categories_for};
use crate::error::{HistError, Result};
use crate::expr::{BoundExpr, CompiledExpr};
use crate::fields::{FieldSet, referenced_fields};
use crate::histogram::WeightedHistogram;
use crate::source::{EventSource, Row};
use crate::store::{HistogramKey, HistogramSet};

/// Number of progress messages over a job's event range.
const PROGRESS_STEPS: u64 = 20;

/// Limit `|weight|` to `maxweight`, keeping the sign.
#[inline]
pub fn clamp_weight(weight: f64, maxweight: f64) -> f64 {
    if weight.abs() > maxweight { maxweight.copysign(weight) } else { weight }
}

/// Counters reported at the end of an event loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillStats {
    /// Events visited.
    pub events_read: u64,
    /// Events passing the shared preselection.
    pub events_preselected: u64,
    /// Histogram fills performed.
    pub fills: u64,
    /// (event, category) contributions dropped for a NaN or infinite weight.
    pub non_finite_weights: u64,
    /// (event, configuration) pairs outside every kinematic bin.
    pub bin_misses: u64,
}

impl FillStats {
    /// Add another loop's counters.
    pub fn absorb(&mut self, other: &FillStats) {
        self.events_read += other.events_read;
        self.events_preselected += other.events_preselected;
        self.fills += other.fills;
        self.non_finite_weights += other.non_finite_weights;
        self.bin_misses += other.bin_misses;
    }
}

#[derive(Debug, Clone)]
struct ConfigPlan {
    expr: CompiledExpr,
    test: CompiledExpr,
    genmatching: Option<CompiledExpr>,
    notgenmatching: Option<CompiledExpr>,
    weight: Option<CompiledExpr>,
    mass: CompiledExpr,
    genmass: Option<CompiledExpr>,
    categories: Vec<CategoryKey>,
}

struct BoundPlan {
    expr: BoundExpr,
    test: BoundExpr,
    genmatching: Option<BoundExpr>,
    notgenmatching: Option<BoundExpr>,
    weight: Option<BoundExpr>,
    mass: BoundExpr,
    genmass: Option<BoundExpr>,
}

fn compile(cfg: &HistConfig, what: &str, src: &str) -> Result<CompiledExpr> {
    CompiledExpr::compile(src)
        .map_err(|e| HistError::Expression(format!("config '{}' {what}: {e}", cfg.name)))
}

fn compile_opt(cfg: &HistConfig, what: &str, src: Option<&str>) -> Result<Option<CompiledExpr>> {
    src.map(|s| compile(cfg, what, s)).transpose()
}

fn bind_opt(e: &Option<CompiledExpr>, fields: &FieldSet) -> Result<Option<BoundExpr>> {
    e.as_ref().map(|e| e.bind(fields)).transpose()
}

#[inline]
fn eval_opt(e: &Option<BoundExpr>, row: &Row<'_>) -> Option<f64> {
    e.as_ref().map(|e| e.eval(row))
}

/// Fills pass/fail histograms for configurations that share a sample,
/// a binning and a preselection.
#[derive(Debug, Clone)]
pub struct HistogramAccumulator {
    configs: Vec<HistConfig>,
    binning: BinningIndex,
    bin_vars: Vec<CompiledExpr>,
    preselection: Option<CompiledExpr>,
    plans: Vec<ConfigPlan>,
    fields: FieldSet,
}

impl HistogramAccumulator {
    /// Compile every expression of `configs`.
    ///
    /// The binning and preselection of the first configuration apply to all
    /// of them; a configuration with different bins is rejected.
    pub fn new(configs: Vec<HistConfig>) -> Result<Self> {
        let first = configs
            .first()
            .ok_or_else(|| HistError::Binning("no configurations to fill".into()))?;
        for cfg in &configs {
            cfg.validate()?;
            if cfg.bins != first.bins {
                return Err(HistError::Binning(format!(
                    "config '{}' has a different binning than '{}'",
                    cfg.name, first.name
                )));
            }
        }

        let binning = BinningIndex::new(&first.bins)?;
        let bin_vars = first
            .bins
            .iter()
            .map(|b| compile(first, "bin variable", &b.var))
            .collect::<Result<Vec<_>>>()?;
        let preselection = compile_opt(first, "preselection", first.preselection.as_deref())?;

        let plans = configs
            .iter()
            .map(|cfg| {
                Ok(ConfigPlan {
                    expr: compile(cfg, "expr", &cfg.expr)?,
                    test: compile(cfg, "test", &cfg.test)?,
                    genmatching: compile_opt(cfg, "genmatching", cfg.genmatching.as_deref())?,
                    notgenmatching: compile_opt(
                        cfg,
                        "notgenmatching",
                        cfg.notgenmatching.as_deref(),
                    )?,
                    weight: compile_opt(cfg, "weight", cfg.weight.as_deref())?,
                    mass: compile(cfg, "mass", &cfg.mass)?,
                    genmass: compile_opt(cfg, "genmass", cfg.genmass.as_deref())?,
                    categories: categories_for(cfg),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let fields = referenced_fields(configs.iter().flat_map(|c| c.expressions()));
        Ok(Self { configs, binning, bin_vars, preselection, plans, fields })
    }

    /// Configurations in index order.
    pub fn configs(&self) -> &[HistConfig] {
        &self.configs
    }

    /// The kinematic binning.
    pub fn binning(&self) -> &BinningIndex {
        &self.binning
    }

    /// Fields referenced by any expression.
    pub fn required_fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Number of histograms a run produces.
    pub fn n_histograms(&self) -> usize {
        self.plans.iter().map(|p| p.categories.len()).sum::<usize>() * self.binning.n_bins()
    }

    fn empty_histograms(&self) -> Vec<Vec<WeightedHistogram>> {
        self.configs
            .iter()
            .zip(&self.plans)
            .map(|(cfg, plan)| {
                let (lo, hi) = cfg.hist_range;
                vec![
                    WeightedHistogram::new(cfg.hist_nbins, lo, hi);
                    self.binning.n_bins() * plan.categories.len()
                ]
            })
            .collect()
    }

    /// Run the event loop over `range` of `source`.
    pub fn run<S: EventSource + ?Sized>(
        &self,
        source: &mut S,
        range: Range<u64>,
    ) -> Result<(HistogramSet, FillStats)> {
        let mut fields = self.fields.clone();
        fields.retain(|name| source.has_field(name));
        tracing::debug!(fields = fields.len(), names = ?fields.names(), "materialized fields");

        let bin_vars =
            self.bin_vars.iter().map(|e| e.bind(&fields)).collect::<Result<Vec<_>>>()?;
        let preselection = self.preselection.as_ref().map(|e| e.bind(&fields)).transpose()?;
        let plans = self
            .plans
            .iter()
            .map(|p| {
                Ok(BoundPlan {
                    expr: p.expr.bind(&fields)?,
                    test: p.test.bind(&fields)?,
                    genmatching: bind_opt(&p.genmatching, &fields)?,
                    notgenmatching: bind_opt(&p.notgenmatching, &fields)?,
                    weight: bind_opt(&p.weight, &fields)?,
                    mass: p.mass.bind(&fields)?,
                    genmass: bind_opt(&p.genmass, &fields)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut hists = self.empty_histograms();
        let mut stats = FillStats::default();
        let mut bin_values = vec![0.0; bin_vars.len()];
        let n_events = range.end.saturating_sub(range.start);
        let step = (n_events / PROGRESS_STEPS).max(1);
        let start = range.start;

        tracing::info!(
            configs = self.configs.len(),
            bins = self.binning.n_bins(),
            histograms = self.n_histograms(),
            events = n_events,
            "starting event loop"
        );
        let t0 = Instant::now();

        source.read_range(&fields, range, &mut |batch| {
            for row in batch.rows() {
                let done = row.entry() - start;
                if done % step == 0 {
                    tracing::info!("{done} / {n_events}");
                }
                stats.events_read += 1;

                if let Some(p) = &preselection
                    && p.eval(&row) == 0.0
                {
                    continue;
                }
                stats.events_preselected += 1;

                let mut bin: Option<Option<usize>> = None;
                for (ic, (plan, bound)) in self.plans.iter().zip(&plans).enumerate() {
                    let sel = bound.expr.eval(&row);
                    if sel == 0.0 {
                        continue;
                    }
                    let ib = *bin.get_or_insert_with(|| {
                        for (v, e) in bin_values.iter_mut().zip(&bin_vars) {
                            *v = e.eval(&row);
                        }
                        self.binning.find_bin(&bin_values)
                    });
                    let Some(ib) = ib else {
                        stats.bin_misses += 1;
                        continue;
                    };

                    let terms = WeightTerms {
                        test: bound.test.eval(&row),
                        genmatching: eval_opt(&bound.genmatching, &row),
                        notgenmatching: eval_opt(&bound.notgenmatching, &row),
                        weight: eval_opt(&bound.weight, &row),
                    };
                    let mass = bound.mass.eval(&row);
                    let genmass = eval_opt(&bound.genmass, &row);
                    let maxweight = self.configs[ic].maxweight;
                    let n_cat = plan.categories.len();

                    for (ih, cat) in plan.categories.iter().enumerate() {
                        let w = cat.weight(&terms);
                        if w == 0.0 {
                            continue;
                        }
                        let value = sel * clamp_weight(w, maxweight);
                        if !w.is_finite() || !value.is_finite() {
                            stats.non_finite_weights += 1;
                            tracing::warn!(
                                config = %self.configs[ic].name,
                                category = %cat,
                                entry = row.entry(),
                                weight = w,
                                "non-finite weight, skipping"
                            );
                            continue;
                        }
                        let x = match (cat.gen_mass, genmass) {
                            (true, Some(g)) => g,
                            _ => mass,
                        };
                        hists[ic][ib * n_cat + ih].fill(x, value);
                        stats.fills += 1;
                    }
                }
            }
            Ok(())
        })?;

        let elapsed = t0.elapsed();
        tracing::info!(
            events = stats.events_read,
            preselected = stats.events_preselected,
            fills = stats.fills,
            non_finite = stats.non_finite_weights,
            elapsed_s = elapsed.as_secs_f64(),
            "event loop done"
        );

        let mut set = HistogramSet::new(
            self.configs.iter().map(|c| c.name.clone()).collect(),
            self.binning.n_bins(),
        );
        for (ic, (plan, per_config)) in self.plans.iter().zip(hists).enumerate() {
            let n_cat = plan.categories.len();
            for (i, h) in per_config.into_iter().enumerate() {
                let key = HistogramKey { config: ic, bin: i / n_cat, category: plan.categories[i % n_cat] };
                set.insert(key, h)?;
            }
        }
        Ok((set, stats))
    }
}
