// Legacy baseline table used when the catalog has no entry for a brand.
//
// Coarse reference prices: a per-category default, brand defaults, and
// brand+model overrides matched on compact model text. Premium trims get a
// fixed bump.

use valuecast_core::query::{compact, normalize};

const DEFAULT_VEHICLE_PRICE: f64 = 600_000_000.0;
const DEFAULT_MOTORBIKE_PRICE: f64 = 30_000_000.0;
const DEFAULT_BATTERY_PRICE: f64 = 40_000_000.0;

/// Multiplier applied when the variant or title names a premium trim.
pub const VARIANT_BUMP: f64 = 1.08;

const PREMIUM_VARIANT_MARKERS: [&str; 5] = ["plus", "premium", "performance", "long range", "pro"];

/// (brand, compact model fragment, price). An empty fragment is the brand
/// default. More specific fragments must come before shorter ones they
/// contain.
const OVERRIDES: &[(&str, &str, f64)] = &[
    ("vinfast", "vfe34", 710_000_000.0),
    ("vinfast", "vf3", 299_000_000.0),
    ("vinfast", "vf5", 468_000_000.0),
    ("vinfast", "vf6", 689_000_000.0),
    ("vinfast", "vf7", 799_000_000.0),
    ("vinfast", "vf8", 1_019_000_000.0),
    ("vinfast", "vf9", 1_491_000_000.0),
    ("vinfast", "klara", 36_000_000.0),
    ("vinfast", "feliz", 24_000_000.0),
    ("vinfast", "evo", 18_000_000.0),
    ("vinfast", "", 700_000_000.0),
    ("tesla", "model3", 1_500_000_000.0),
    ("tesla", "modely", 1_700_000_000.0),
    ("tesla", "", 1_600_000_000.0),
    ("byd", "atto3", 766_000_000.0),
    ("byd", "dolphin", 659_000_000.0),
    ("byd", "", 700_000_000.0),
];

/// Reference price for a listing the catalog does not know.
pub fn legacy_baseline(
    category: Option<&str>,
    brand: Option<&str>,
    model: Option<&str>,
    variant: Option<&str>,
    title: Option<&str>,
) -> f64 {
    let brand = brand.map(normalize).unwrap_or_default();
    let model = model.map(compact).unwrap_or_default();

    let base = OVERRIDES
        .iter()
        .find(|(b, fragment, _)| {
            !brand.is_empty()
                && brand.contains(b)
                && (fragment.is_empty() || (!model.is_empty() && model.contains(fragment)))
        })
        .map(|(_, _, price)| *price)
        .unwrap_or_else(|| category_default(category));

    if is_premium_variant(variant, title) {
        base * VARIANT_BUMP
    } else {
        base
    }
}

fn category_default(category: Option<&str>) -> f64 {
    let category = category.map(normalize).unwrap_or_default();
    if category.contains("battery") || category.contains("pin") {
        DEFAULT_BATTERY_PRICE
    } else if ["motorbike", "motorcycle", "scooter", "xe may"]
        .iter()
        .any(|k| category.contains(k))
    {
        DEFAULT_MOTORBIKE_PRICE
    } else {
        DEFAULT_VEHICLE_PRICE
    }
}

fn is_premium_variant(variant: Option<&str>, title: Option<&str>) -> bool {
    let raw = format!("{} {}", variant.unwrap_or_default(), title.unwrap_or_default());
    let words: String = raw
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    // Pad so every marker is matched on word boundaries.
    let padded = format!(" {} ", normalize(&words));
    PREMIUM_VARIANT_MARKERS
        .iter()
        .any(|marker| padded.contains(&format!(" {marker} ")))
}
