// Closed evidence vocabulary.
//
// Tags describe which factors influenced a suggestion. Anything outside the
// vocabulary is dropped; "age" is accepted as a synonym for "depreciation".

pub const EVIDENCE_VOCABULARY: [&str; 10] = [
    "baseline",
    "depreciation",
    "capacity",
    "mileage",
    "condition",
    "health",
    "market",
    "adjustment",
    "clamp",
    "heuristic",
];

/// Added by the orchestrator when the catalog baseline caps the final price.
pub const BASELINE_CAP: &str = "baseline-cap";

/// Map a raw tag onto the vocabulary. Returns `None` for unknown tags.
pub fn canonical_tag(raw: &str) -> Option<&'static str> {
    let tag = raw.trim().to_lowercase();
    let tag = if tag == "age" { "depreciation" } else { tag.as_str() };
    EVIDENCE_VOCABULARY.iter().copied().find(|known| *known == tag)
}

/// Append `tag` unless it is already present, preserving first-seen order.
pub fn push_unique(evidence: &mut Vec<String>, tag: &str) {
    if !evidence.iter().any(|t| t == tag) {
        evidence.push(tag.to_string());
    }
}
