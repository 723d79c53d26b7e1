// AI response parsing.
//
// The endpoint returns an envelope of candidates, each holding content parts
// with text fragments. The fragments are joined and searched for a JSON
// object carrying `suggestedPrice`; failing that, the first number with at
// least four digits is taken as the price.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use valuecast_core::evidence::{canonical_tag, push_unique};

pub const NUMBER_FALLBACK_REASONING: &str = "Parsed number fallback";
pub const NO_PRICE_REASONING: &str = "No price parsed";

const MIN_FALLBACK_DIGITS: usize = 4;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed AI response envelope: {0}")]
    MalformedEnvelope(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AiParseOutcome {
    pub price: Option<f64>,
    pub reasoning: String,
    /// Closed-vocabulary tags in first-seen order.
    pub evidence: Vec<String>,
    pub raw_text: String,
    pub json_parsed: bool,
    pub number_fallback: bool,
}

impl AiParseOutcome {
    pub fn is_usable(&self) -> bool {
        self.price.is_some()
    }
}

/// Parse a raw response body. Fails only when the body is not a JSON
/// envelope at all.
pub fn parse_response(body: &str) -> Result<AiParseOutcome, ParseError> {
    let envelope: Value =
        serde_json::from_str(body).map_err(|e| ParseError::MalformedEnvelope(e.to_string()))?;
    if !envelope.is_object() {
        return Err(ParseError::MalformedEnvelope(
            "expected a JSON object".to_string(),
        ));
    }
    Ok(parse_text(&aggregate_text(&envelope)))
}

/// Every `candidates[].content.parts[].text` fragment in document order,
/// newline-joined.
pub fn aggregate_text(envelope: &Value) -> String {
    envelope
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|candidate| candidate.get("content")?.get("parts")?.as_array())
        .flatten()
        .filter_map(|part| part.get("text")?.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract price, reasoning, and evidence from the aggregated text.
pub fn parse_text(text: &str) -> AiParseOutcome {
    if let Some(outcome) = parse_json_slice(text) {
        return outcome;
    }

    if let Some(price) = first_long_number(text) {
        return AiParseOutcome {
            price: Some(price),
            reasoning: NUMBER_FALLBACK_REASONING.to_string(),
            evidence: Vec::new(),
            raw_text: text.to_string(),
            json_parsed: false,
            number_fallback: true,
        };
    }

    AiParseOutcome {
        price: None,
        reasoning: NO_PRICE_REASONING.to_string(),
        evidence: Vec::new(),
        raw_text: text.to_string(),
        json_parsed: false,
        number_fallback: false,
    }
}

/// Parse the span between the first `{` and the last `}`. Returns `None`
/// unless it holds a positive `suggestedPrice`.
fn parse_json_slice(text: &str) -> Option<AiParseOutcome> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&text[start..=end]).ok()?;

    let price = match value.get("suggestedPrice")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => digits_only(s),
        _ => None,
    }
    .filter(|p| p.is_finite() && *p > 0.0)?;

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut evidence = Vec::new();
    for tag in value
        .get("evidence")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter_map(canonical_tag)
    {
        push_unique(&mut evidence, tag);
    }

    Some(AiParseOutcome {
        price: Some(price),
        reasoning,
        evidence,
        raw_text: text.to_string(),
        json_parsed: true,
        number_fallback: false,
    })
}

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d(?:[\d.,_]*\d)?").unwrap());

fn first_long_number(text: &str) -> Option<f64> {
    NUMBER_RE
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|token| token.chars().filter(char::is_ascii_digit).count() >= MIN_FALLBACK_DIGITS)
        .find_map(digits_only)
        .filter(|p| *p > 0.0)
}

fn digits_only(text: &str) -> Option<f64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse::<u64>().ok().map(|n| n as f64)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
