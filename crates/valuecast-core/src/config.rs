// Configuration loading and parsing (valuecast.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that overrides `ai_api_key` from credentials.toml.
pub const API_KEY_ENV: &str = "VALUECAST_AI_API_KEY";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub ai: AiConfig,
    pub pricing: PricingConfig,
    pub cache: CacheConfig,
    pub heuristic: HeuristicConstants,
    pub credentials: CredentialsConfig,
}

impl Config {
    /// The AI credential, if one is configured and non-empty.
    pub fn api_key(&self) -> Option<&str> {
        self.credentials
            .ai_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
    }
}

/// Raw deserialization target for valuecast.toml. Every section is optional
/// and falls back to the built-in defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    ai: AiConfig,
    pricing: PricingConfig,
    cache: CacheConfig,
    heuristic: HeuristicConstants,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub model: String,
    /// Used for the remaining attempts after repeated 500/503 responses.
    pub fallback_model: Option<String>,
    /// Base URL of the generateContent API.
    pub endpoint: String,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.0-flash".into(),
            fallback_model: Some("gemini-1.5-flash".into()),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".into(),
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 4_000,
            request_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub catalog_path: String,
    /// Base width of the allowed range before specificity/missing-field
    /// adjustments.
    pub default_clamp_percent: f64,
    pub prompt_version: String,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            catalog_path: "data/baseline_prices.json".into(),
            default_clamp_percent: 0.12,
            prompt_version: "price-suggest-v3".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 500,
        }
    }
}

/// Empirically tuned factors used by the heuristic estimator. The defaults
/// are the production values; none has a documented derivation, so they are
/// exposed here for product review rather than hard-coded.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeuristicConstants {
    pub condition_excellent: f64,
    pub condition_good: f64,
    pub condition_fair: f64,
    pub condition_poor: f64,
    pub condition_needs_maintenance: f64,
    /// Multiplier for age 0, low mileage, GOOD/EXCELLENT listings.
    pub near_new_bonus: f64,
    pub near_new_max_mileage: f64,
    /// Mileage at which the full mileage discount applies.
    pub mileage_full_discount_at: f64,
    pub mileage_max_discount: f64,
    pub capacity_reference: f64,
    pub capacity_slope: f64,
    pub capacity_max_bonus: f64,
    /// Yearly retention used when the catalog has no entry.
    pub legacy_yearly_retention: f64,
    pub legacy_max_age_years: u32,
}

impl Default for HeuristicConstants {
    fn default() -> Self {
        Self {
            condition_excellent: 1.00,
            condition_good: 0.99,
            condition_fair: 0.90,
            condition_poor: 0.80,
            condition_needs_maintenance: 0.70,
            near_new_bonus: 1.015,
            near_new_max_mileage: 10_000.0,
            mileage_full_discount_at: 120_000.0,
            mileage_max_discount: 0.50,
            capacity_reference: 50.0,
            capacity_slope: 0.005,
            capacity_max_bonus: 0.30,
            legacy_yearly_retention: 0.92,
            legacy_max_age_years: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub ai_api_key: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/valuecast.toml` and
/// (optionally) `config/credentials.toml`, both relative to `base_dir`.
///
/// The `VALUECAST_AI_API_KEY` environment variable, when set and non-empty,
/// takes precedence over the credentials file.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- valuecast.toml (required) ---
    let main_path = config_dir.join("valuecast.toml");
    let main_text = read_file(&main_path)?;
    let file: ConfigFile = toml::from_str(&main_text).map_err(|e| ConfigError::ParseError {
        path: main_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let mut credentials: CredentialsConfig = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            credentials.ai_api_key = Some(key);
        }
    }

    let config = Config {
        ai: file.ai,
        pricing: file.pricing,
        cache: file.cache,
        heuristic: file.heuristic,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Locate the directory holding `config/`: the working directory when it has
/// one, otherwise the per-user config directory.
pub fn default_base_dir() -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if cwd.join("config").is_dir() {
        return cwd;
    }
    directories::ProjectDirs::from("", "", "valuecast")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or(cwd)
}

/// Convenience wrapper: loads config from [`default_base_dir`].
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&default_base_dir())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.ai.max_attempts == 0 {
        return Err(ConfigError::ValidationError {
            field: "ai.max_attempts".into(),
            message: "must be at least 1".into(),
        });
    }

    if config.ai.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "ai.request_timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.ai.model.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "ai.model".into(),
            message: "must not be empty".into(),
        });
    }

    let pct = config.pricing.default_clamp_percent;
    if !(0.07..=0.18).contains(&pct) {
        return Err(ConfigError::ValidationError {
            field: "pricing.default_clamp_percent".into(),
            message: format!("must be between 0.07 and 0.18 inclusive, got {pct}"),
        });
    }

    if config.cache.enabled && config.cache.max_size == 0 {
        return Err(ConfigError::ValidationError {
            field: "cache.max_size".into(),
            message: "must be > 0 when the cache is enabled".into(),
        });
    }

    let h = &config.heuristic;
    let factors: &[(&str, f64)] = &[
        ("heuristic.condition_excellent", h.condition_excellent),
        ("heuristic.condition_good", h.condition_good),
        ("heuristic.condition_fair", h.condition_fair),
        ("heuristic.condition_poor", h.condition_poor),
        (
            "heuristic.condition_needs_maintenance",
            h.condition_needs_maintenance,
        ),
        ("heuristic.near_new_bonus", h.near_new_bonus),
        ("heuristic.legacy_yearly_retention", h.legacy_yearly_retention),
    ];
    for (name, val) in factors {
        if *val <= 0.0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: format!("must be > 0, got {val}"),
            });
        }
    }

    if h.mileage_full_discount_at <= 0.0 {
        return Err(ConfigError::ValidationError {
            field: "heuristic.mileage_full_discount_at".into(),
            message: format!("must be > 0, got {}", h.mileage_full_discount_at),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
