// Baseline catalog store.
//
// Reads the reference dataset (`{ "baselinePrices": [...] }`) once at
// startup and indexes it by normalized brand. The store is read-only after
// construction and is shared across requests behind an `Arc`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use valuecast_core::query::normalize;

use crate::depreciation::StructuredDepreciation;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One reference item: brand/model/variant with its new-price baseline and a
/// free-text depreciation hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub brand: String,
    pub model: String,
    #[serde(default)]
    pub variant: String,
    #[serde(default)]
    pub category: String,
    pub baseline_price: i64,
    #[serde(default)]
    pub notes: String,
    /// Explicit policy; takes precedence over `notes` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depreciation: Option<StructuredDepreciation>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid catalog JSON in {path}: {source}")]
    Json {
        path: String,
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogFile {
    #[serde(default)]
    baseline_prices: Vec<CatalogEntry>,
}

// ---------------------------------------------------------------------------
// CatalogStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct CatalogStore {
    by_brand: HashMap<String, Vec<CatalogEntry>>,
    entry_count: usize,
}

impl CatalogStore {
    /// Load the catalog at `path`. Any I/O or parse failure is logged and an
    /// empty store is returned so startup can continue on the legacy table.
    pub fn load(path: impl AsRef<Path>) -> Self {
        match Self::try_load(path.as_ref()) {
            Ok(store) => {
                info!(
                    entries = store.len(),
                    brands = store.brand_count(),
                    "baseline catalog loaded"
                );
                store
            }
            Err(e) => {
                error!(error = %e, "baseline catalog unavailable, continuing with empty store");
                Self::default()
            }
        }
    }

    pub fn try_load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|source| CatalogError::Json {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let file: CatalogFile = serde_json::from_str(text)?;
        Ok(Self::from_entries(file.baseline_prices))
    }

    /// Index entries by normalized brand, preserving dataset order within
    /// each brand. Rows without a brand or with a non-positive baseline are
    /// skipped.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        let mut by_brand: HashMap<String, Vec<CatalogEntry>> = HashMap::new();
        let mut entry_count = 0;

        for entry in entries {
            let key = normalize(&entry.brand);
            if key.is_empty() || entry.baseline_price <= 0 {
                warn!(
                    brand = %entry.brand,
                    model = %entry.model,
                    baseline = entry.baseline_price,
                    "skipping invalid catalog row"
                );
                continue;
            }
            by_brand.entry(key).or_default().push(entry);
            entry_count += 1;
        }

        Self {
            by_brand,
            entry_count,
        }
    }

    /// Entries for a brand, in dataset order. The brand is normalized before
    /// lookup; unknown brands yield an empty slice.
    pub fn entries_for_brand(&self, brand: &str) -> &[CatalogEntry] {
        self.by_brand
            .get(&normalize(brand))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn brand_count(&self) -> usize {
        self.by_brand.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "baselinePrices": [
            {"brand": "VinFast", "model": "VF8", "variant": "Eco", "category": "car",
             "baselinePrice": 1019000000, "notes": "linear 10%/year; max 80% depreciation"},
            {"brand": "vinfast ", "model": "VF8", "variant": "Plus", "category": "car",
             "baselinePrice": 1199000000, "notes": ""},
            {"brand": "Tesla", "model": "Model 3", "baselinePrice": 1500000000},
            {"brand": "", "model": "Ghost", "baselinePrice": 100},
            {"brand": "Broken", "model": "Zero", "baselinePrice": 0}
        ]
    }"#;

    #[test]
    fn indexes_by_normalized_brand_in_order() {
        let store = CatalogStore::from_json_str(SAMPLE).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.brand_count(), 2);

        let vinfast = store.entries_for_brand("  VINFAST ");
        assert_eq!(vinfast.len(), 2);
        assert_eq!(vinfast[0].variant, "Eco");
        assert_eq!(vinfast[1].variant, "Plus");
    }

    #[test]
    fn unknown_brand_is_empty() {
        let store = CatalogStore::from_json_str(SAMPLE).unwrap();
        assert!(store.entries_for_brand("BYD").is_empty());
        assert!(store.entries_for_brand("").is_empty());
    }

    #[test]
    fn skips_invalid_rows() {
        let store = CatalogStore::from_json_str(SAMPLE).unwrap();
        assert!(store.entries_for_brand("broken").is_empty());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let store = CatalogStore::load(file.path());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn load_missing_file_yields_empty_store() {
        let store = CatalogStore::load("/definitely/not/here.json");
        assert!(store.is_empty());
    }

    #[test]
    fn load_corrupt_file_yields_empty_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let store = CatalogStore::load(file.path());
        assert!(store.is_empty());
        assert!(matches!(
            CatalogStore::try_load(file.path()),
            Err(CatalogError::Json { .. })
        ));
    }
}
