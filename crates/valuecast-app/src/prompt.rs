// Prompt construction for price suggestions.
//
// The prompt carries the pre-computed heuristic, the allowed range, and the
// depreciation policy so the model only has to judge the listing against
// them. The output contract is a single line of JSON with tags drawn from a
// closed vocabulary.

use valuecast_core::evidence::EVIDENCE_VOCABULARY;
use valuecast_core::query::PriceQuery;
use valuecast_core::suggestion::AllowedRange;
use valuecast_pricing::HeuristicOutcome;

/// Appended to the original prompt for the one corrective follow-up call.
pub const JSON_ONLY_SUFFIX: &str = "\n\n## IMPORTANT\n\
     Your previous answer could not be parsed. Reply with JSON only: one line, \
     no markdown, no code fences, no text before or after the object.";

/// Static instructions and output contract.
pub fn output_contract() -> String {
    format!(
        "You are a pricing assistant for a Vietnamese second-hand marketplace of \
         electric vehicles, motorbikes, and batteries. Prices are in VND.\n\
         Respond with exactly one line of JSON in this shape:\n\
         {{\"suggestedPrice\": <integer VND>, \"reasoning\": \"<one short sentence>\", \
         \"evidence\": [<tags>]}}\n\
         Allowed evidence tags: {}.\n\
         Stay inside the allowed range unless the listing clearly justifies otherwise.\n",
        EVIDENCE_VOCABULARY.join(", ")
    )
}

/// Build the full prompt for one listing.
pub fn build_price_prompt(
    query: &PriceQuery,
    heuristic: &HeuristicOutcome,
    range: &AllowedRange,
) -> String {
    let mut prompt = String::with_capacity(1536);

    prompt.push_str(&output_contract());
    prompt.push('\n');

    prompt.push_str(&format!(
        "## REFERENCE\n\
         Heuristic price: {} VND\n\
         Allowed range: {} - {} VND ({:.1}% either side)\n",
        heuristic.rounded_estimate,
        range.min,
        range.max,
        heuristic.dynamic_clamp_percent * 100.0,
    ));
    match (&heuristic.matched, &heuristic.policy) {
        (Some(matched), Some(policy)) => {
            prompt.push_str(&format!(
                "Catalog match: {} {} {} (baseline {} VND, {:?} match)\n\
                 Depreciation policy: {}\n",
                matched.brand,
                matched.model,
                matched.variant,
                heuristic.baseline,
                matched.kind,
                policy.describe(),
            ));
        }
        _ => {
            prompt.push_str(&format!(
                "Catalog match: none (legacy reference {} VND)\n\
                 Depreciation policy: legacy yearly retention\n",
                heuristic.baseline,
            ));
        }
    }
    prompt.push_str(&format!("Factors: {}\n\n", heuristic.summary()));

    prompt.push_str("## LISTING\n");
    prompt.push_str(&format_listing(query, heuristic.inferred_model.as_deref()));

    prompt
}

/// The original prompt followed by the strict JSON-only instruction.
pub fn corrective_prompt(original: &str) -> String {
    format!("{original}{JSON_ONLY_SUFFIX}")
}

fn format_listing(query: &PriceQuery, inferred_model: Option<&str>) -> String {
    let mut lines = String::new();
    let mut field = |label: &str, value: Option<String>| {
        if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
            lines.push_str(&format!("{label}: {v}\n"));
        }
    };

    field("Category", query.category.clone());
    field("Brand", query.brand.clone());
    field(
        "Model",
        query
            .model
            .clone()
            .or_else(|| inferred_model.map(|m| format!("{m} (inferred from title)"))),
    );
    field("Variant", query.variant.clone());
    field("Year", query.year.map(|y| y.to_string()));
    field("Battery capacity (kWh)", query.battery_capacity.map(|c| format!("{c}")));
    field("Condition", query.condition.clone());
    field("Mileage (km)", query.mileage.map(|m| format!("{m:.0}")));
    field("Battery health (%)", query.health_percentage.map(|h| format!("{h}")));
    field("Title", query.title.clone());
    field("Description", query.description.clone());
    let location = [query.district.as_deref(), query.province.as_deref()]
        .into_iter()
        .flatten()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    field("Location", Some(location));

    if lines.is_empty() {
        lines.push_str("(no listing details provided)\n");
    }
    lines
}
