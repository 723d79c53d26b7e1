// Heuristic price estimator.
//
// Combines the catalog baseline (or the legacy table) with age, capacity,
// condition, mileage, and battery-health factors into a reference price and
// a dynamic clamp width for any AI suggestion. The estimate is both the
// fallback answer and the sanity envelope around the AI.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Datelike;
use serde::Serialize;
use tracing::{debug, error};
use valuecast_core::config::HeuristicConstants;
use valuecast_core::price::bounded_price;
use valuecast_core::query::{compact, is_blank, Condition, PriceQuery};

use crate::catalog::CatalogStore;
use crate::depreciation::{
    DepreciationPolicy, DepreciationPolicySource, PolicyKind, StructuredPolicySource,
};
use crate::legacy::legacy_baseline;
use crate::resolver::{BaselineResolver, MatchKind};

/// Bounds on the allowed-range half width.
pub const MIN_CLAMP_PERCENT: f64 = 0.07;
pub const MAX_CLAMP_PERCENT: f64 = 0.18;
/// Narrowing applied when the catalog matched the specific model.
const SPECIFIC_MATCH_NARROWING: f64 = 0.02;
/// Widening applied when all five key fields are missing.
const MISSING_FIELDS_WIDENING: f64 = 0.05;
const KEY_FIELD_COUNT: u32 = 5;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Per-factor multipliers applied on top of the (depreciated) base.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FactorBreakdown {
    pub age: f64,
    pub capacity: f64,
    pub condition: f64,
    pub mileage: f64,
    pub health: f64,
    pub near_new: f64,
}

impl FactorBreakdown {
    fn neutral() -> Self {
        Self {
            age: 1.0,
            capacity: 1.0,
            condition: 1.0,
            mileage: 1.0,
            health: 1.0,
            near_new: 1.0,
        }
    }

    fn product(&self) -> f64 {
        self.age * self.capacity * self.condition * self.mileage * self.health * self.near_new
    }
}

/// The catalog row the estimate was anchored on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedEntry {
    pub brand: String,
    pub model: String,
    pub variant: String,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeuristicOutcome {
    /// Reference price before depreciation: the catalog baseline when the
    /// brand is known, otherwise the legacy table value.
    pub baseline: i64,
    /// Set only when a catalog entry was resolved; final prices never exceed it.
    pub catalog_baseline: Option<i64>,
    /// Baseline after the depreciation policy (or legacy age factor).
    pub depreciated_base: i64,
    pub rounded_estimate: i64,
    pub factors: FactorBreakdown,
    pub dynamic_clamp_percent: f64,
    pub policy: Option<DepreciationPolicy>,
    pub matched: Option<MatchedEntry>,
    pub missing_field_count: u32,
    pub age_years: i32,
    /// Model inferred from the title when the query had none.
    pub inferred_model: Option<String>,
    pub depreciation_applied: bool,
}

impl HeuristicOutcome {
    /// Returned when the estimate cannot be computed.
    pub fn zero() -> Self {
        Self {
            baseline: 0,
            catalog_baseline: None,
            depreciated_base: 0,
            rounded_estimate: 0,
            factors: FactorBreakdown::neutral(),
            dynamic_clamp_percent: 0.0,
            policy: None,
            matched: None,
            missing_field_count: KEY_FIELD_COUNT,
            age_years: 0,
            inferred_model: None,
            depreciation_applied: false,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.rounded_estimate == 0
    }

    pub fn specific_model_match(&self) -> bool {
        self.matched.as_ref().is_some_and(|m| m.kind != MatchKind::BrandFallback)
    }

    /// One-line factor summary for prompts and logs.
    pub fn summary(&self) -> String {
        let f = &self.factors;
        let policy = self
            .policy
            .map(|p| p.describe())
            .unwrap_or_else(|| "legacy table".to_string());
        format!(
            "baseline={} depreciated={} age={}y policy={} factors: age x{:.3}, capacity x{:.3}, \
             condition x{:.3}, mileage x{:.3}, health x{:.3}, near-new x{:.3}; clamp={:.1}%",
            self.baseline,
            self.depreciated_base,
            self.age_years,
            policy,
            f.age,
            f.capacity,
            f.condition,
            f.mileage,
            f.health,
            f.near_new,
            self.dynamic_clamp_percent * 100.0
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EstimateError {
    #[error("non-finite value at {stage}")]
    NonFinite { stage: &'static str },
}

// ---------------------------------------------------------------------------
// HeuristicEstimator
// ---------------------------------------------------------------------------

pub struct HeuristicEstimator {
    resolver: BaselineResolver,
    policy_source: Arc<dyn DepreciationPolicySource>,
    constants: HeuristicConstants,
    base_clamp_percent: f64,
    current_year: i32,
}

impl HeuristicEstimator {
    pub fn new(
        catalog: Arc<CatalogStore>,
        constants: HeuristicConstants,
        base_clamp_percent: f64,
    ) -> Self {
        Self {
            resolver: BaselineResolver::new(catalog),
            policy_source: Arc::new(StructuredPolicySource),
            constants,
            base_clamp_percent,
            current_year: chrono::Local::now().year(),
        }
    }

    pub fn with_policy_source(mut self, source: Arc<dyn DepreciationPolicySource>) -> Self {
        self.policy_source = source;
        self
    }

    /// Pin the year ages are computed against.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = year;
        self
    }

    pub fn resolver(&self) -> &BaselineResolver {
        &self.resolver
    }

    /// Estimate a price for `query`. Never fails: an internal error is logged
    /// and yields [`HeuristicOutcome::zero`].
    pub fn estimate(&self, query: &PriceQuery) -> HeuristicOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.try_estimate(query))) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(error = %e, "heuristic estimate failed");
                HeuristicOutcome::zero()
            }
            Err(_) => {
                error!("heuristic estimate panicked");
                HeuristicOutcome::zero()
            }
        }
    }

    fn try_estimate(&self, query: &PriceQuery) -> Result<HeuristicOutcome, EstimateError> {
        let c = &self.constants;

        // 1. Model, inferred from the title when missing.
        let inferred_model = if is_blank(query.model.as_deref()) {
            self.infer_model(query.brand.as_deref(), query.title.as_deref())
        } else {
            None
        };
        let model = query
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .or(inferred_model.as_deref());

        // 2. Age; future years count as new.
        let age_years = query
            .year
            .map_or(0, |y| self.current_year.saturating_sub(y).max(0));

        let mut factors = FactorBreakdown::neutral();
        let resolved = self
            .resolver
            .find_best_match(query.brand.as_deref(), model, query.variant.as_deref());

        // 3-4. Baseline and depreciation.
        let (baseline, catalog_baseline, depreciated_base, policy, matched, depreciation_applied) =
            match resolved {
                Some(hit) => {
                    let baseline = hit.entry.baseline_price;
                    let policy = self.policy_source.policy_for(hit.entry);
                    let depreciated = policy.apply(baseline, age_years).min(baseline);
                    let matched = MatchedEntry {
                        brand: hit.entry.brand.clone(),
                        model: hit.entry.model.clone(),
                        variant: hit.entry.variant.clone(),
                        kind: hit.kind,
                    };
                    let applied = age_years > 0 && policy.kind != PolicyKind::None;
                    (baseline, Some(baseline), depreciated, Some(policy), Some(matched), applied)
                }
                None => {
                    let legacy = legacy_baseline(
                        query.category.as_deref(),
                        query.brand.as_deref(),
                        model,
                        query.variant.as_deref(),
                        query.title.as_deref(),
                    );
                    let capped_age = age_years.min(c.legacy_max_age_years as i32);
                    factors.age = c.legacy_yearly_retention.powi(capped_age);
                    let legacy = legacy.round() as i64;
                    (legacy, None, legacy, None, None, age_years > 0)
                }
            };

        // 5. Multiplicative factors.
        if let Some(capacity) = query.battery_capacity.filter(|v| *v > 0.0) {
            let bonus = ((capacity - c.capacity_reference).max(0.0) * c.capacity_slope)
                .min(c.capacity_max_bonus);
            factors.capacity = 1.0 + bonus;
        }

        let condition = query.parsed_condition();
        factors.condition = match condition {
            Some(Condition::Excellent) => c.condition_excellent,
            Some(Condition::Good) => c.condition_good,
            Some(Condition::Fair) => c.condition_fair,
            Some(Condition::Poor) => c.condition_poor,
            Some(Condition::NeedsMaintenance) => c.condition_needs_maintenance,
            None => 1.0,
        };

        if let Some(mileage) = query.mileage {
            let used = (mileage.max(0.0) / c.mileage_full_discount_at).min(1.0);
            factors.mileage = 1.0 - c.mileage_max_discount * used;
        }

        if let Some(health) = query.health_percentage.filter(|h| *h > 0.0) {
            factors.health = 0.7 + 0.3 * health.clamp(0.0, 100.0) / 100.0;
        }

        // 6. Near-new bonus.
        let low_mileage = query.mileage.map_or(true, |m| m < c.near_new_max_mileage);
        let good_shape = matches!(condition, Some(Condition::Good | Condition::Excellent));
        if age_years == 0 && low_mileage && good_shape {
            factors.near_new = c.near_new_bonus;
        }

        // 7. Bound and round.
        let raw = depreciated_base as f64 * factors.product();
        if !raw.is_finite() {
            return Err(EstimateError::NonFinite { stage: "raw estimate" });
        }
        let rounded_estimate = bounded_price(raw);

        // 8. Dynamic clamp width.
        let missing_field_count = [
            is_blank(query.brand.as_deref()),
            model.is_none(),
            query.year.is_none(),
            query.battery_capacity.map_or(true, |v| v <= 0.0),
            query.health_percentage.map_or(true, |v| v <= 0.0),
        ]
        .iter()
        .filter(|missing| **missing)
        .count() as u32;

        let specific = matched.as_ref().is_some_and(|m| m.kind != MatchKind::BrandFallback);
        let dynamic_clamp_percent = (self.base_clamp_percent
            - SPECIFIC_MATCH_NARROWING * if specific { 1.0 } else { 0.0 }
            + MISSING_FIELDS_WIDENING * missing_field_count as f64 / KEY_FIELD_COUNT as f64)
            .clamp(MIN_CLAMP_PERCENT, MAX_CLAMP_PERCENT);

        let outcome = HeuristicOutcome {
            baseline,
            catalog_baseline,
            depreciated_base,
            rounded_estimate,
            factors,
            dynamic_clamp_percent,
            policy,
            matched,
            missing_field_count,
            age_years,
            inferred_model,
            depreciation_applied,
        };

        // 9. Factor summary.
        debug!(summary = %outcome.summary(), "heuristic estimate");
        Ok(outcome)
    }

    /// Best-effort model from the listing title: the longest catalog model of
    /// the same brand that appears in the title, else the first token that
    /// contains a digit.
    fn infer_model(&self, brand: Option<&str>, title: Option<&str>) -> Option<String> {
        let title = title.filter(|t| !t.trim().is_empty())?;
        let compact_title = compact(title);

        let from_catalog = brand
            .map(|b| self.resolver.catalog().entries_for_brand(b))
            .unwrap_or_default()
            .iter()
            .filter(|e| {
                let m = compact(&e.model);
                !m.is_empty() && compact_title.contains(&m)
            })
            .max_by_key(|e| compact(&e.model).len())
            .map(|e| e.model.clone());

        from_catalog.or_else(|| {
            title
                .split_whitespace()
                .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()))
                .find(|t| {
                    t.chars().any(|c| c.is_ascii_digit()) && t.chars().any(|c| c.is_alphabetic())
                })
                .map(str::to_string)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
