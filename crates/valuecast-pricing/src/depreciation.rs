// Depreciation policies.
//
// A policy maps (baseline, age) to an age-adjusted price. Policies come from
// a `DepreciationPolicySource`: either parsed out of the catalog's free-text
// notes or read from an explicit structured field.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogEntry;

/// Yearly rate when no pattern matches.
pub const DEFAULT_LINEAR_RATE: f64 = 0.07;
/// Retention used when an exponential base is outside (0, 1).
pub const DEFAULT_EXPONENTIAL_BASE: f64 = 0.92;
/// Ceiling on linear depreciation when no cap is configured.
pub const UNCAPPED_LINEAR_CEILING: f64 = 0.95;

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyKind {
    #[serde(alias = "linear")]
    Linear,
    #[serde(alias = "exponential")]
    Exponential,
    #[serde(alias = "none")]
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepreciationPolicy {
    pub kind: PolicyKind,
    /// Yearly fraction for LINEAR, retention base for EXPONENTIAL.
    pub rate: f64,
    /// Cap on total depreciation as a fraction; 0 means uncapped.
    pub max_depreciation: f64,
}

impl Default for DepreciationPolicy {
    fn default() -> Self {
        Self {
            kind: PolicyKind::Linear,
            rate: DEFAULT_LINEAR_RATE,
            max_depreciation: 0.0,
        }
    }
}

impl DepreciationPolicy {
    pub fn none() -> Self {
        Self {
            kind: PolicyKind::None,
            rate: 0.0,
            max_depreciation: 0.0,
        }
    }

    /// Derive a policy from free-text catalog notes.
    pub fn from_notes(notes: &str) -> Self {
        if NONE_RE.is_match(notes) {
            return Self::none();
        }

        let linear = LINEAR_RE.captures(notes).and_then(|c| {
            let m = c.get(1)?;
            Some((m.as_str().parse::<f64>().ok()? / 100.0, m.range()))
        });
        let max_depreciation = parse_cap(notes, linear.as_ref().map(|(_, span)| span.clone()));

        if let Some((rate, _)) = linear {
            return Self {
                kind: PolicyKind::Linear,
                rate,
                max_depreciation,
            };
        }

        if let Some(base) = EXPONENTIAL_RE
            .captures(notes)
            .and_then(|c| c.get(1)?.as_str().parse::<f64>().ok())
        {
            return Self {
                kind: PolicyKind::Exponential,
                rate: sane_exponential_base(base),
                max_depreciation,
            };
        }

        Self {
            max_depreciation,
            ..Self::default()
        }
    }

    /// Age-adjusted price, rounded to the nearest unit and floored at 1.
    /// Callers still enforce `result <= baseline`.
    pub fn apply(&self, baseline: i64, age_years: i32) -> i64 {
        if age_years <= 0 || self.kind == PolicyKind::None {
            return baseline;
        }
        let base = baseline as f64;
        let age = age_years as f64;

        let value = match self.kind {
            PolicyKind::Linear => {
                let ceiling = if self.max_depreciation > 0.0 {
                    self.max_depreciation
                } else {
                    UNCAPPED_LINEAR_CEILING
                };
                let fraction = (age * self.rate).min(ceiling).max(0.0);
                base * (1.0 - fraction)
            }
            PolicyKind::Exponential => {
                let value = base * self.rate.powf(age);
                if self.max_depreciation > 0.0 {
                    value.max(base * (1.0 - self.max_depreciation))
                } else {
                    value
                }
            }
            PolicyKind::None => base,
        };

        (value.round() as i64).max(1)
    }

    /// Short human-readable form for prompts and logs.
    pub fn describe(&self) -> String {
        let cap = if self.max_depreciation > 0.0 {
            format!(", max {:.0}%", self.max_depreciation * 100.0)
        } else {
            String::new()
        };
        match self.kind {
            PolicyKind::Linear => format!("LINEAR {:.1}%/year{cap}", self.rate * 100.0),
            PolicyKind::Exponential => format!("EXPONENTIAL {:.2}^age{cap}", self.rate),
            PolicyKind::None => "NONE".to_string(),
        }
    }
}

fn sane_exponential_base(base: f64) -> f64 {
    if base > 0.0 && base < 1.0 {
        base
    } else {
        DEFAULT_EXPONENTIAL_BASE
    }
}

// ---------------------------------------------------------------------------
// Note patterns
// ---------------------------------------------------------------------------

static NONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(no depreciation|non-depreciating)\b").unwrap());

static CAP_MAX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bmax\w*[^\d%]{0,30}?(\d+(?:\.\d+)?)\s*%").unwrap());

static CAP_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*%\s*depreciation").unwrap());

static LINEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:linear|lin)\b[^\d%]{0,30}?(\d+(?:\.\d+)?)\s*%").unwrap()
});

static EXPONENTIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d*\.\d+)\s*\^\s*\(?\s*(?:age|years?)\b").unwrap());

/// Cap from "max ... NN%" or "NN% depreciation". The suffix form is ignored
/// when it is the linear rate itself ("linear 10% depreciation per year").
fn parse_cap(notes: &str, linear_span: Option<std::ops::Range<usize>>) -> f64 {
    let from_max = CAP_MAX_RE
        .captures(notes)
        .and_then(|c| c.get(1)?.as_str().parse::<f64>().ok());

    let from_suffix = || {
        CAP_SUFFIX_RE.captures_iter(notes).find_map(|c| {
            let m = c.get(1)?;
            if linear_span.as_ref() == Some(&m.range()) {
                return None;
            }
            m.as_str().parse::<f64>().ok()
        })
    };

    from_max
        .or_else(from_suffix)
        .map(|pct| (pct / 100.0).clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Policy sources
// ---------------------------------------------------------------------------

/// Explicit policy as it appears in a catalog row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredDepreciation {
    #[serde(rename = "type")]
    pub kind: PolicyKind,
    #[serde(default)]
    pub rate: f64,
    #[serde(default)]
    pub max_depreciation: f64,
}

impl From<StructuredDepreciation> for DepreciationPolicy {
    fn from(s: StructuredDepreciation) -> Self {
        let rate = match s.kind {
            PolicyKind::Exponential => sane_exponential_base(s.rate),
            PolicyKind::Linear if s.rate > 0.0 => s.rate,
            PolicyKind::Linear => DEFAULT_LINEAR_RATE,
            PolicyKind::None => 0.0,
        };
        Self {
            kind: s.kind,
            rate,
            max_depreciation: s.max_depreciation.clamp(0.0, 1.0),
        }
    }
}

/// Where the estimator gets a catalog entry's depreciation policy from.
pub trait DepreciationPolicySource: Send + Sync {
    fn policy_for(&self, entry: &CatalogEntry) -> DepreciationPolicy;
}

/// Parses the free-text `notes` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexPolicySource;

impl DepreciationPolicySource for RegexPolicySource {
    fn policy_for(&self, entry: &CatalogEntry) -> DepreciationPolicy {
        DepreciationPolicy::from_notes(&entry.notes)
    }
}

/// Uses the structured `depreciation` field, falling back to the notes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredPolicySource;

impl DepreciationPolicySource for StructuredPolicySource {
    fn policy_for(&self, entry: &CatalogEntry) -> DepreciationPolicy {
        match entry.depreciation {
            Some(structured) => structured.into(),
            None => RegexPolicySource.policy_for(entry),
        }
    }
}
