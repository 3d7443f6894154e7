//! Statistical categories: pass/fail × truth-match status × truth-mass flag.
//!
//! The enumeration order defined by [`enumerate_categories`] is the storage
//! order downstream steps rely on; it matches the derived `Ord` of
//! [`CategoryKey`].

use std::fmt;
use std::str::FromStr;

use tnp_core::HistConfig;

use crate::error::{HistError, Result};

/// Truth-matching status of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GenMatch {
    /// No truth requirement (inclusive).
    Unset,
    /// Truth-unmatched probes.
    NotMatched,
    /// Truth-matched probes.
    Matched,
}

/// Identity of one pass/fail histogram flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CategoryKey {
    /// Probe satisfies the test predicate.
    pub is_pass: bool,
    /// Truth-matching requirement.
    pub gen_match: GenMatch,
    /// Histogram the truth mass instead of the reconstructed mass.
    pub gen_mass: bool,
}

/// Enumerate valid categories in canonical order.
///
/// Iterates pass ∈ {fail, pass}, then match ∈ {unset, unmatched, matched},
/// then mass ∈ {reco, truth}. Truth-mass categories exist only for matched
/// probes; disabled capabilities are skipped entirely.
pub fn enumerate_categories(genmatching: bool, genmass: bool) -> Vec<CategoryKey> {
    let mut out = Vec::new();
    for is_pass in [false, true] {
        for gen_match in [GenMatch::Unset, GenMatch::NotMatched, GenMatch::Matched] {
            for gen_mass in [false, true] {
                let key = CategoryKey { is_pass, gen_match, gen_mass };
                if key.is_valid(genmatching, genmass) {
                    out.push(key);
                }
            }
        }
    }
    out
}

/// Categories produced for a configuration.
pub fn categories_for(cfg: &HistConfig) -> Vec<CategoryKey> {
    enumerate_categories(cfg.has_genmatching(), cfg.has_genmass())
}

/// Per-event values of the terms a category weight is composed from.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightTerms {
    /// Value of the test expression.
    pub test: f64,
    /// Value of the truth-matching expression, when enabled.
    pub genmatching: Option<f64>,
    /// Value of the explicit truth-unmatched expression, when provided.
    pub notgenmatching: Option<f64>,
    /// Value of the sample weight expression, when configured.
    pub weight: Option<f64>,
}

#[inline]
fn not(v: f64) -> f64 {
    if v == 0.0 { 1.0 } else { 0.0 }
}

impl CategoryKey {
    /// Whether the key may appear given the configuration's capabilities.
    pub fn is_valid(&self, genmatching: bool, genmass: bool) -> bool {
        if !genmatching && self.gen_match != GenMatch::Unset {
            return false;
        }
        if !genmass && self.gen_mass {
            return false;
        }
        !(self.gen_mass && self.gen_match != GenMatch::Matched)
    }

    /// Storage name, e.g. `pass`, `fail_notgenmatching`, `pass_genmatching_genmass`.
    pub fn name(&self) -> String {
        let mut s = String::from(if self.is_pass { "pass" } else { "fail" });
        match self.gen_match {
            GenMatch::Unset => {}
            GenMatch::NotMatched => s.push_str("_notgenmatching"),
            GenMatch::Matched => s.push_str("_genmatching"),
        }
        if self.gen_mass {
            s.push_str("_genmass");
        }
        s
    }

    /// Composed weight expression text for this category.
    ///
    /// Evaluating this string gives the same value as [`CategoryKey::weight`]
    /// on the individually evaluated terms.
    pub fn weight_expression(&self, cfg: &HistConfig) -> String {
        let mut w = if self.is_pass { format!("({})", cfg.test) } else { format!("!({})", cfg.test) };
        match (self.gen_match, cfg.genmatching.as_deref()) {
            (GenMatch::Matched, Some(gm)) => w.push_str(&format!("*({gm})")),
            (GenMatch::NotMatched, Some(gm)) => match cfg.notgenmatching.as_deref() {
                Some(ngm) => w.push_str(&format!("*({ngm})")),
                None => w.push_str(&format!("*!({gm})")),
            },
            _ => {}
        }
        if let Some(sw) = cfg.weight.as_deref() {
            w.push_str(&format!("*({sw})"));
        }
        w
    }

    /// Expression providing the histogram x value.
    pub fn fill_variable<'c>(&self, cfg: &'c HistConfig) -> &'c str {
        match (self.gen_mass, cfg.genmass.as_deref()) {
            (true, Some(genmass)) => genmass,
            _ => &cfg.mass,
        }
    }

    /// Category weight from the per-event term values.
    #[inline]
    pub fn weight(&self, terms: &WeightTerms) -> f64 {
        let mut w = if self.is_pass { terms.test } else { not(terms.test) };
        match self.gen_match {
            GenMatch::Unset => {}
            GenMatch::Matched => {
                if let Some(gm) = terms.genmatching {
                    w *= gm;
                }
            }
            GenMatch::NotMatched => match (terms.notgenmatching, terms.genmatching) {
                (Some(ngm), _) => w *= ngm,
                (None, Some(gm)) => w *= not(gm),
                (None, None) => {}
            },
        }
        if let Some(sw) = terms.weight {
            w *= sw;
        }
        w
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for CategoryKey {
    type Err = HistError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || HistError::Store(format!("invalid category name '{s}'"));
        let (is_pass, rest) = if let Some(rest) = s.strip_prefix("pass") {
            (true, rest)
        } else if let Some(rest) = s.strip_prefix("fail") {
            (false, rest)
        } else {
            return Err(bad());
        };
        let (gen_mass, rest) = match rest.strip_suffix("_genmass") {
            Some(r) => (true, r),
            None => (false, rest),
        };
        let gen_match = match rest {
            "" => GenMatch::Unset,
            "_notgenmatching" => GenMatch::NotMatched,
            "_genmatching" => GenMatch::Matched,
            _ => return Err(bad()),
        };
        let key = CategoryKey { is_pass, gen_match, gen_mass };
        if gen_mass && gen_match != GenMatch::Matched {
            return Err(bad());
        }
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CompiledExpr;
    use tnp_core::{SampleKind, TnpConfig};

    fn sim_config(notgen: bool) -> HistConfig {
        let mut ch = TnpConfig::new("pair_mass", "tag_pt > 26", "probe_isTight", 60, (70.0, 130.0))
            .sim("/s")
            .sim_weight("genWeight")
            .sim_genmatching("probe_isMatchedGen")
            .sim_genmass("genMass");
        if notgen {
            ch = ch.sim_notgenmatching("probe_isFake");
        }
        ch.hist_configs(SampleKind::Sim).unwrap().remove(0)
    }

    #[test]
    fn full_enumeration_order() {
        let names: Vec<String> = enumerate_categories(true, true).iter().map(|c| c.name()).collect();
        assert_eq!(
            names,
            vec![
                "fail",
                "fail_notgenmatching",
                "fail_genmatching",
                "fail_genmatching_genmass",
                "pass",
                "pass_notgenmatching",
                "pass_genmatching",
                "pass_genmatching_genmass",
            ]
        );
        let cats = enumerate_categories(true, true);
        assert!(cats.iter().all(|c| !c.gen_mass || c.gen_match == GenMatch::Matched));
        let mut sorted = cats.clone();
        sorted.sort();
        assert_eq!(sorted, cats);
    }

    #[test]
    fn disabled_truth_matching_has_no_match_categories() {
        let cats = enumerate_categories(false, false);
        assert_eq!(cats.len(), 2);
        assert!(cats.iter().all(|c| c.gen_match == GenMatch::Unset && !c.gen_mass));

        // Truth mass without truth matching can never be produced.
        let cats = enumerate_categories(false, true);
        assert_eq!(cats.len(), 2);
        assert!(cats.iter().all(|c| c.gen_match == GenMatch::Unset));

        let cats = enumerate_categories(true, false);
        assert_eq!(cats.len(), 6);
        assert!(cats.iter().all(|c| !c.gen_mass));
    }

    #[test]
    fn names_round_trip() {
        for c in enumerate_categories(true, true) {
            assert_eq!(c.name().parse::<CategoryKey>().unwrap(), c);
        }
        assert!("pass_genmass".parse::<CategoryKey>().is_err());
        assert!("maybe".parse::<CategoryKey>().is_err());
    }

    #[test]
    fn weight_expression_composition() {
        let cfg = sim_config(false);
        let cats = categories_for(&cfg);
        let exprs: Vec<String> = cats.iter().map(|c| c.weight_expression(&cfg)).collect();
        assert_eq!(exprs[0], "!(probe_isTight)*(genWeight)");
        assert_eq!(exprs[1], "!(probe_isTight)*!(probe_isMatchedGen)*(genWeight)");
        assert_eq!(exprs[2], "!(probe_isTight)*(probe_isMatchedGen)*(genWeight)");
        assert_eq!(exprs[7], "(probe_isTight)*(probe_isMatchedGen)*(genWeight)");

        let cfg = sim_config(true);
        let fail_unmatched = CategoryKey { is_pass: false, gen_match: GenMatch::NotMatched, gen_mass: false };
        assert_eq!(
            fail_unmatched.weight_expression(&cfg),
            "!(probe_isTight)*(probe_isFake)*(genWeight)"
        );
    }

    #[test]
    fn factorized_weight_matches_composed_expression() {
        for notgen in [false, true] {
            let cfg = sim_config(notgen);
            for test in [0.0, 1.0] {
                for matched in [0.0, 1.0] {
                    for genw in [-0.7, 2.5] {
                        let terms = WeightTerms {
                            test,
                            genmatching: Some(matched),
                            notgenmatching: notgen.then_some(1.0 - matched),
                            weight: Some(genw),
                        };
                        for cat in categories_for(&cfg) {
                            let e = CompiledExpr::compile(&cat.weight_expression(&cfg)).unwrap();
                            let vals: Vec<f64> = e
                                .required_branches
                                .iter()
                                .map(|b| match b.as_str() {
                                    "probe_isTight" => test,
                                    "probe_isMatchedGen" => matched,
                                    "probe_isFake" => 1.0 - matched,
                                    "genWeight" => genw,
                                    other => panic!("unexpected field {other}"),
                                })
                                .collect();
                            assert_eq!(e.eval_row(&vals), cat.weight(&terms), "{cat}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn fill_variable_switches_to_truth_mass() {
        let cfg = sim_config(false);
        let reco = CategoryKey { is_pass: true, gen_match: GenMatch::Matched, gen_mass: false };
        let truth = CategoryKey { gen_mass: true, ..reco };
        assert_eq!(reco.fill_variable(&cfg), "pair_mass");
        assert_eq!(truth.fill_variable(&cfg), "genMass");
    }
}
