// Suggestion result returned by the orchestrator and serialized verbatim by
// the web layer.

use serde::{Deserialize, Serialize};

/// Which path produced the final price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Heuristic,
    Ai,
}

/// Interval around the heuristic into which any AI suggestion is forced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedRange {
    pub min: i64,
    pub max: i64,
}

impl AllowedRange {
    /// Clamp `price` into the range. Returns the clamped value and whether it
    /// moved.
    pub fn clamp(&self, price: i64) -> (i64, bool) {
        let clamped = price.clamp(self.min, self.max);
        (clamped, clamped != price)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionResult {
    pub final_price: i64,
    pub mode: Mode,
    pub heuristic_price: i64,
    pub allowed_range: AllowedRange,
    pub clamped: bool,
    /// In [0, 1].
    pub confidence: f64,
    pub delta_percent: f64,
    pub evidence: Vec<String>,
    pub prompt_version: String,
    pub cache_hit: bool,
    /// Why the result is degraded, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Free-text reasoning returned by the AI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// AI price before rounding, clamping, or capping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_raw_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
    pub attempts: u32,
    /// Heuristic factor breakdown for the request log. Kept with cached
    /// results, never serialized.
    #[serde(skip)]
    pub factor_summary: String,
}
