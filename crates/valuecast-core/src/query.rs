// Price query: the listing attributes a suggestion is computed from.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Text normalization
// ---------------------------------------------------------------------------

/// Lowercase, trim, and collapse internal whitespace runs to one space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalized text with every non-alphanumeric character removed, so that
/// "VF 8" and "vf-8" both become "vf8".
pub fn compact(text: &str) -> String {
    normalize(text)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// True when the option is `None` or only whitespace.
pub fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Condition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Condition {
    Excellent,
    Good,
    Fair,
    Poor,
    NeedsMaintenance,
}

impl Condition {
    /// Parse a free-form condition label ("good", "Needs maintenance",
    /// "NEEDS_MAINTENANCE"). Unknown labels return `None`.
    pub fn parse(label: &str) -> Option<Condition> {
        let key: String = label
            .trim()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c.to_ascii_uppercase() })
            .collect();
        match key.as_str() {
            "EXCELLENT" => Some(Condition::Excellent),
            "GOOD" => Some(Condition::Good),
            "FAIR" => Some(Condition::Fair),
            "POOR" => Some(Condition::Poor),
            "NEEDS_MAINTENANCE" => Some(Condition::NeedsMaintenance),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// PriceQuery
// ---------------------------------------------------------------------------

/// A listing to price. Every field is optional; the estimator widens its
/// allowed range as fields go missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PriceQuery {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub variant: Option<String>,
    pub category: Option<String>,
    /// Manufacturing year.
    pub year: Option<i32>,
    pub battery_capacity: Option<f64>,
    pub condition: Option<String>,
    pub mileage: Option<f64>,
    pub health_percentage: Option<f64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub province: Option<String>,
    pub district: Option<String>,
}

impl PriceQuery {
    pub fn parsed_condition(&self) -> Option<Condition> {
        self.condition.as_deref().and_then(Condition::parse)
    }

    /// Fingerprint used to deduplicate identical pricing requests.
    ///
    /// Fields are normalized and joined with `|` in a fixed order so that
    /// cosmetic differences (case, extra spaces) share one cache slot. The
    /// variant is part of the key since the resolver prices variants apart.
    pub fn cache_key(&self) -> String {
        let text = |v: &Option<String>| v.as_deref().map(normalize).unwrap_or_default();
        let num = |v: Option<f64>| v.map(|n| format!("{n}")).unwrap_or_default();

        [
            text(&self.category),
            text(&self.brand),
            text(&self.model),
            text(&self.variant),
            self.year.map(|y| y.to_string()).unwrap_or_default(),
            num(self.battery_capacity),
            text(&self.condition),
            num(self.health_percentage),
            num(self.mileage),
            text(&self.province),
            text(&self.district),
        ]
        .join("|")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize("  VinFast   VF8  Plus "), "vinfast vf8 plus");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn compact_strips_separators() {
        assert_eq!(compact("VF 8"), "vf8");
        assert_eq!(compact("vf-8"), "vf8");
        assert_eq!(compact("Model S/P100D"), "modelsp100d");
    }

    #[test]
    fn condition_parse_accepts_label_variants() {
        assert_eq!(Condition::parse("good"), Some(Condition::Good));
        assert_eq!(
            Condition::parse("Needs maintenance"),
            Some(Condition::NeedsMaintenance)
        );
        assert_eq!(
            Condition::parse("NEEDS_MAINTENANCE"),
            Some(Condition::NeedsMaintenance)
        );
        assert_eq!(Condition::parse("like new"), None);
    }

    #[test]
    fn cache_key_ignores_cosmetic_differences() {
        let a = PriceQuery {
            brand: Some("VinFast".into()),
            model: Some("VF8  Plus".into()),
            year: Some(2023),
            mileage: Some(12000.0),
            ..Default::default()
        };
        let b = PriceQuery {
            brand: Some("  vinfast".into()),
            model: Some("vf8 plus".into()),
            year: Some(2023),
            mileage: Some(12000.0),
            title: Some("different title".into()),
            ..Default::default()
        };
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn cache_key_distinguishes_year() {
        let a = PriceQuery {
            brand: Some("VinFast".into()),
            year: Some(2022),
            ..Default::default()
        };
        let b = PriceQuery {
            year: Some(2023),
            ..a.clone()
        };
        assert_ne!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn cache_key_distinguishes_variant() {
        let eco = PriceQuery {
            brand: Some("VinFast".into()),
            model: Some("VF8".into()),
            variant: Some("Eco".into()),
            year: Some(2023),
            ..Default::default()
        };
        let plus = PriceQuery {
            variant: Some(" PLUS ".into()),
            ..eco.clone()
        };
        assert_ne!(eco.cache_key(), plus.cache_key());
        assert_eq!(
            plus.cache_key(),
            PriceQuery {
                variant: Some("plus".into()),
                ..eco.clone()
            }
            .cache_key()
        );
    }

    #[test]
    fn deserializes_camel_case_with_missing_fields() {
        let q: PriceQuery = serde_json::from_str(
            r#"{"brand":"VinFast","batteryCapacity":82,"healthPercentage":95}"#,
        )
        .unwrap();
        assert_eq!(q.brand.as_deref(), Some("VinFast"));
        assert_eq!(q.battery_capacity, Some(82.0));
        assert_eq!(q.health_percentage, Some(95.0));
        assert!(q.model.is_none());
    }
}
