// Baseline resolver: fuzzy catalog matching with a deterministic tie-break
// ladder.
//
// For a brand's entries, the first hit wins in this order:
// 1. exact normalized model (and variant, when the query has one)
// 2. compact model equality ("VF8" vs "VF 8")
// 3. substring containment on normalized or compact forms, either direction
// 4. the brand's first entry

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};
use valuecast_core::query::{compact, is_blank, normalize};

use crate::catalog::{CatalogEntry, CatalogStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Compact,
    Substring,
    BrandFallback,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogMatch<'a> {
    pub entry: &'a CatalogEntry,
    pub kind: MatchKind,
}

impl CatalogMatch<'_> {
    /// True for every rung except the brand fallback.
    pub fn is_specific(&self) -> bool {
        self.kind != MatchKind::BrandFallback
    }
}

#[derive(Debug, Clone)]
pub struct BaselineResolver {
    catalog: Arc<CatalogStore>,
}

impl BaselineResolver {
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    /// Resolve a query against the catalog. Returns `None` when the brand is
    /// blank or has no entries; never substitutes another brand.
    pub fn find_best_match(
        &self,
        brand: Option<&str>,
        model: Option<&str>,
        variant: Option<&str>,
    ) -> Option<CatalogMatch<'_>> {
        let brand = brand.filter(|b| !b.trim().is_empty())?;
        let entries = self.catalog.entries_for_brand(brand);
        let first = entries.first()?;

        if !is_blank(model) {
            let model = model.unwrap_or_default();
            if let Some(found) = match_model(entries, model, variant) {
                debug!(brand, model, kind = ?found.kind, "catalog match");
                return Some(found);
            }
        }

        info!(
            brand,
            model = model.unwrap_or_default(),
            fallback_model = %first.model,
            "catalog brand fallback hit"
        );
        Some(CatalogMatch {
            entry: first,
            kind: MatchKind::BrandFallback,
        })
    }
}

fn match_model<'a>(
    entries: &'a [CatalogEntry],
    model: &str,
    variant: Option<&str>,
) -> Option<CatalogMatch<'a>> {
    let q_model = normalize(model);
    let q_compact = compact(model);
    let q_variant = variant.map(normalize).unwrap_or_default();

    let hit = |entry: &'a CatalogEntry, kind| Some(CatalogMatch { entry, kind });

    // 1. Exact model, variant blank or equal.
    if let Some(entry) = entries.iter().find(|e| {
        normalize(&e.model) == q_model
            && (q_variant.is_empty() || normalize(&e.variant) == q_variant)
    }) {
        return hit(entry, MatchKind::Exact);
    }

    // 2. Compact equality.
    if !q_compact.is_empty() {
        if let Some(entry) = entries.iter().find(|e| compact(&e.model) == q_compact) {
            return hit(entry, MatchKind::Compact);
        }
    }

    // 3. Containment either way, normalized then compact.
    let contains_either =
        |a: &str, b: &str| !a.is_empty() && !b.is_empty() && (a.contains(b) || b.contains(a));
    if let Some(entry) = entries.iter().find(|e| {
        contains_either(&normalize(&e.model), &q_model)
            || contains_either(&compact(&e.model), &q_compact)
    }) {
        return hit(entry, MatchKind::Substring);
    }

    None
}
