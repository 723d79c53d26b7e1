// Suggestion orchestrator.
//
// One request runs: cache check, heuristic, then either the heuristic-only
// answer or the AI path (prompt, retried call, parse, one corrective call),
// followed by finalization against the allowed range and the catalog
// baseline, cache store, and a single structured log event. Every failure on
// the way degrades to a heuristic-mode result carrying a reason.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use valuecast_core::cache::{self, SuggestionCache};
use valuecast_core::config::{AiConfig, Config};
use valuecast_core::evidence::{push_unique, BASELINE_CAP};
use valuecast_core::price::{bounded_price, round_to_step};
use valuecast_core::query::PriceQuery;
use valuecast_core::suggestion::{AllowedRange, Mode, SuggestionResult};
use valuecast_llm::{
    generate_with_retry, parse_response, AiError, AiParseOutcome, LlmClient, ParseError,
    RetryPolicy,
};
use valuecast_pricing::{CatalogStore, HeuristicEstimator, HeuristicOutcome};

use crate::prompt::{build_price_prompt, corrective_prompt};

/// Relative deviation of the raw AI price from the heuristic above which
/// confidence is penalized.
const DEVIATION_THRESHOLD: f64 = 0.10;
const DEVIATION_PENALTY: f64 = 0.10;
const MIN_PENALIZED_CONFIDENCE: f64 = 0.10;

// ---------------------------------------------------------------------------
// Degradation reasons
// ---------------------------------------------------------------------------

/// Why a request fell back to the heuristic. The `Display` text becomes the
/// result's `reason`.
#[derive(Debug, Error)]
pub enum SuggestError {
    #[error("AI credential not configured; heuristic only")]
    AiDisabled,

    #[error("AI service overloaded (HTTP {status}) after {attempts} attempts; heuristic only")]
    Overloaded { status: u16, attempts: u32 },

    #[error("AI request failed after {attempts} attempts: {source}; heuristic only")]
    Ai {
        #[source]
        source: AiError,
        attempts: u32,
    },

    #[error("{0}; heuristic only")]
    Envelope(#[from] ParseError),

    #[error("AI response had no usable price after a corrective retry; heuristic only")]
    Unparseable,

    #[error("heuristic estimate unavailable")]
    HeuristicUnavailable,

    #[error("internal error: {0}; heuristic only")]
    Internal(String),
}

impl SuggestError {
    /// Transient outages are not cached so the next request can reach the AI.
    fn is_cacheable(&self) -> bool {
        matches!(self, SuggestError::AiDisabled | SuggestError::Unparseable)
    }
}

/// Attempts and model across every AI call of one request.
#[derive(Debug, Default)]
struct AiTrace {
    attempts: u32,
    model_used: Option<String>,
}

// ---------------------------------------------------------------------------
// Finalization
// ---------------------------------------------------------------------------

/// `[h × (1 − pct), h × (1 + pct)]`, rounded and bounded like every price.
pub fn allowed_range(heuristic: i64, clamp_percent: f64) -> AllowedRange {
    let h = heuristic as f64;
    AllowedRange {
        min: bounded_price(h * (1.0 - clamp_percent)),
        max: bounded_price(h * (1.0 + clamp_percent)),
    }
}

/// Turn a heuristic outcome and an optional parsed AI answer into the final
/// result. Pure: no metadata beyond what the inputs carry.
pub fn finalize(
    heuristic: &HeuristicOutcome,
    ai: Option<&AiParseOutcome>,
    prompt_version: &str,
) -> SuggestionResult {
    let h = heuristic.rounded_estimate;
    let range = allowed_range(h, heuristic.dynamic_clamp_percent);

    let ai_raw = ai.and_then(|a| a.price).filter(|p| p.is_finite() && *p > 0.0);
    let mode = if ai_raw.is_some() { Mode::Ai } else { Mode::Heuristic };
    let proposed = ai_raw.map(round_to_step).unwrap_or(h);

    let (mut final_price, range_clamped) = range.clamp(proposed);
    let mut baseline_capped = false;
    if let Some(baseline) = heuristic.catalog_baseline {
        if final_price > baseline {
            final_price = baseline;
            baseline_capped = true;
        }
    }

    let (delta_percent, mut confidence) = if h > 0 {
        let delta = (final_price - h) as f64 / h as f64;
        (delta * 100.0, 1.0 - delta.abs().min(1.0))
    } else {
        (0.0, 0.0)
    };
    if let Some(raw) = ai_raw {
        if h > 0 && (raw - h as f64).abs() / h as f64 > DEVIATION_THRESHOLD {
            confidence = (confidence - DEVIATION_PENALTY).max(MIN_PENALIZED_CONFIDENCE);
        }
    }

    let mut evidence = vec!["baseline".to_string(), "heuristic".to_string()];
    if heuristic.depreciation_applied {
        push_unique(&mut evidence, "depreciation");
    }
    for tag in ai.map(|a| a.evidence.as_slice()).unwrap_or_default() {
        push_unique(&mut evidence, tag);
    }
    if range_clamped {
        push_unique(&mut evidence, "clamp");
    }
    if baseline_capped {
        push_unique(&mut evidence, BASELINE_CAP);
    }

    SuggestionResult {
        final_price,
        mode,
        heuristic_price: h,
        allowed_range: range,
        clamped: range_clamped || baseline_capped,
        confidence: confidence.clamp(0.0, 1.0),
        delta_percent,
        evidence,
        prompt_version: prompt_version.to_string(),
        cache_hit: false,
        reason: None,
        reasoning: ai.filter(|_| ai_raw.is_some()).map(|a| a.reasoning.clone()),
        ai_raw_price: ai_raw.map(|p| p.round() as i64),
        model_used: None,
        attempts: 0,
        factor_summary: heuristic.summary(),
    }
}

// ---------------------------------------------------------------------------
// SuggestionService
// ---------------------------------------------------------------------------

pub struct SuggestionService {
    estimator: HeuristicEstimator,
    llm: LlmClient,
    cache: Arc<dyn SuggestionCache>,
    retry: RetryPolicy,
    primary_model: String,
    fallback_model: Option<String>,
    prompt_version: String,
}

impl SuggestionService {
    pub fn new(
        estimator: HeuristicEstimator,
        llm: LlmClient,
        cache: Arc<dyn SuggestionCache>,
        ai: &AiConfig,
        prompt_version: impl Into<String>,
    ) -> Self {
        Self {
            estimator,
            llm,
            cache,
            retry: RetryPolicy::from_config(ai),
            primary_model: ai.model.clone(),
            fallback_model: ai.fallback_model.clone().filter(|m| !m.trim().is_empty()),
            prompt_version: prompt_version.into(),
        }
    }

    /// Wire every component from config around an already loaded catalog.
    pub fn from_config(config: &Config, catalog: Arc<CatalogStore>) -> Self {
        let estimator = HeuristicEstimator::new(
            catalog,
            config.heuristic.clone(),
            config.pricing.default_clamp_percent,
        );
        Self::new(
            estimator,
            LlmClient::from_config(config),
            cache::from_config(&config.cache),
            &config.ai,
            config.pricing.prompt_version.clone(),
        )
    }

    pub fn cache(&self) -> &Arc<dyn SuggestionCache> {
        &self.cache
    }

    /// Price one listing. Never fails: errors and panics degrade to a
    /// heuristic-mode result whose `reason` says why.
    pub async fn suggest_price(&self, query: &PriceQuery) -> SuggestionResult {
        let key = query.cache_key();

        if let Some(mut hit) = self.cache.get(&key) {
            hit.cache_hit = true;
            log_suggestion(&key, &hit);
            return hit;
        }

        let run = AssertUnwindSafe(self.compute(query)).catch_unwind().await;
        let (result, cacheable) = match run {
            Ok(done) => done,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(cache_key = %key, panic = %message, "suggestion panicked, degrading");
                // `estimate` catches its own panics and yields a zero outcome.
                let heuristic = self.estimator.estimate(query);
                let mut result = finalize(&heuristic, None, &self.prompt_version);
                result.reason = Some(SuggestError::Internal(message).to_string());
                (result, false)
            }
        };

        if cacheable {
            self.cache.put(key.clone(), result.clone());
        }
        log_suggestion(&key, &result);
        result
    }

    async fn compute(&self, query: &PriceQuery) -> (SuggestionResult, bool) {
        let heuristic = self.estimator.estimate(query);

        if heuristic.is_zero() {
            let mut result = finalize(&heuristic, None, &self.prompt_version);
            result.reason = Some(SuggestError::HeuristicUnavailable.to_string());
            return (result, false);
        }

        let mut trace = AiTrace::default();
        let answer = if self.llm.is_active() {
            self.ask_ai(query, &heuristic, &mut trace).await
        } else {
            Err(SuggestError::AiDisabled)
        };

        let (mut result, cacheable) = match answer {
            Ok(parsed) => (finalize(&heuristic, Some(&parsed), &self.prompt_version), true),
            Err(reason) => {
                if !matches!(reason, SuggestError::AiDisabled) {
                    warn!(
                        reason = %reason,
                        attempts = trace.attempts,
                        "AI path degraded to heuristic"
                    );
                }
                let cacheable = reason.is_cacheable();
                let mut result = finalize(&heuristic, None, &self.prompt_version);
                result.reason = Some(reason.to_string());
                (result, cacheable)
            }
        };
        result.attempts = trace.attempts;
        result.model_used = trace.model_used;
        (result, cacheable)
    }

    async fn ask_ai(
        &self,
        query: &PriceQuery,
        heuristic: &HeuristicOutcome,
        trace: &mut AiTrace,
    ) -> Result<AiParseOutcome, SuggestError> {
        let range = allowed_range(heuristic.rounded_estimate, heuristic.dynamic_clamp_percent);
        let prompt = build_price_prompt(query, heuristic, &range);

        let parsed = parse_response(&self.call(&prompt, trace).await?)?;
        if parsed.is_usable() {
            return Ok(parsed);
        }

        debug!(raw = %parsed.raw_text, "AI answer unusable, sending corrective prompt");
        let parsed = parse_response(&self.call(&corrective_prompt(&prompt), trace).await?)?;
        if parsed.is_usable() {
            Ok(parsed)
        } else {
            Err(SuggestError::Unparseable)
        }
    }

    async fn call(&self, prompt: &str, trace: &mut AiTrace) -> Result<String, SuggestError> {
        let outcome = generate_with_retry(
            &self.llm,
            &self.retry,
            &self.primary_model,
            self.fallback_model.as_deref(),
            prompt,
        )
        .await;

        match outcome {
            Ok(done) => {
                trace.attempts += done.attempts;
                trace.model_used = Some(done.model_used);
                Ok(done.text)
            }
            Err(failed) => {
                trace.attempts += failed.attempts;
                trace.model_used = Some(failed.model_used);
                Err(match failed.error {
                    AiError::Disabled => SuggestError::AiDisabled,
                    e if e.is_overload() => SuggestError::Overloaded {
                        status: e.status().unwrap_or_default(),
                        attempts: trace.attempts,
                    },
                    e => SuggestError::Ai {
                        source: e,
                        attempts: trace.attempts,
                    },
                })
            }
        }
    }
}

fn log_suggestion(key: &str, result: &SuggestionResult) {
    let json = serde_json::to_string(result).unwrap_or_default();
    info!(
        target: "valuecast::suggest",
        cache_key = %key,
        attempts = result.attempts,
        model_used = result.model_used.as_deref().unwrap_or("-"),
        mode = ?result.mode,
        final_price = result.final_price,
        heuristic_price = result.heuristic_price,
        allowed_min = result.allowed_range.min,
        allowed_max = result.allowed_range.max,
        clamped = result.clamped,
        confidence = result.confidence,
        delta_percent = result.delta_percent,
        evidence = ?result.evidence,
        factors = %result.factor_summary,
        cache_hit = result.cache_hit,
        reason = result.reason.as_deref().unwrap_or(""),
        result = %json,
        "price suggestion"
    );
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use valuecast_core::config::HeuristicConstants;
    use valuecast_core::LruSuggestionCache;
    use valuecast_llm::TextGenerator;
    use valuecast_pricing::{CatalogEntry, DepreciationPolicy, DepreciationPolicySource};

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn outcome(estimate: i64, pct: f64, catalog_baseline: Option<i64>) -> HeuristicOutcome {
        HeuristicOutcome {
            baseline: catalog_baseline.unwrap_or(estimate),
            catalog_baseline,
            depreciated_base: estimate,
            rounded_estimate: estimate,
            dynamic_clamp_percent: pct,
            ..HeuristicOutcome::zero()
        }
    }

    fn ai_price(price: f64, evidence: &[&str]) -> AiParseOutcome {
        AiParseOutcome {
            price: Some(price),
            reasoning: "comparable listings".into(),
            evidence: evidence.iter().map(|s| s.to_string()).collect(),
            raw_text: String::new(),
            json_parsed: true,
            number_fallback: false,
        }
    }

    // -- finalize --

    #[test]
    fn heuristic_only_scenario() {
        let result = finalize(&outcome(500_000_000, 0.12, None), None, "v");
        assert_eq!(result.mode, Mode::Heuristic);
        assert_eq!(result.final_price, 500_000_000);
        assert_eq!(
            result.allowed_range,
            AllowedRange {
                min: 440_000_000,
                max: 560_000_000
            }
        );
        assert!(!result.clamped);
        assert!(approx_eq(result.confidence, 1.0));
        assert!(approx_eq(result.delta_percent, 0.0));
        assert_eq!(result.evidence, vec!["baseline", "heuristic"]);
        assert_eq!(result.reasoning, None);
    }

    #[test]
    fn ai_price_above_baseline_is_capped() {
        let heuristic = outcome(1_000_000_000, 0.18, Some(1_019_000_000));
        let result = finalize(&heuristic, Some(&ai_price(1_330_035_000.0, &[])), "v");
        assert_eq!(result.mode, Mode::Ai);
        assert_eq!(result.final_price, 1_019_000_000);
        assert!(result.clamped);
        assert!(result.evidence.contains(&"clamp".to_string()));
        assert!(result.evidence.contains(&BASELINE_CAP.to_string()));
        assert_eq!(result.ai_raw_price, Some(1_330_035_000));
    }

    #[test]
    fn range_max_binds_when_below_baseline() {
        let heuristic = outcome(500_000_000, 0.12, Some(900_000_000));
        let result = finalize(&heuristic, Some(&ai_price(700_000_000.0, &[])), "v");
        assert_eq!(result.final_price, 560_000_000);
        assert!(result.clamped);
        assert!(result.evidence.contains(&"clamp".to_string()));
        assert!(!result.evidence.contains(&BASELINE_CAP.to_string()));
    }

    #[test]
    fn ai_price_within_range_is_rounded_and_kept() {
        let heuristic = outcome(500_000_000, 0.12, None);
        let ai = ai_price(520_400_600.0, &["market", "mileage"]);
        let result = finalize(&heuristic, Some(&ai), "v");
        assert_eq!(result.final_price, 520_401_000);
        assert!(!result.clamped);
        assert!(approx_eq(result.delta_percent, 4.0802));
        assert!(approx_eq(result.confidence, 1.0 - 0.040802));
        assert_eq!(result.evidence, vec!["baseline", "heuristic", "market", "mileage"]);
        assert_eq!(result.reasoning.as_deref(), Some("comparable listings"));
    }

    #[test]
    fn large_raw_deviation_penalizes_confidence() {
        let heuristic = outcome(500_000_000, 0.12, None);
        // Raw 30% above; clamped to +12%.
        let result = finalize(&heuristic, Some(&ai_price(650_000_000.0, &[])), "v");
        assert_eq!(result.final_price, 560_000_000);
        assert!(approx_eq(result.confidence, 1.0 - 0.12 - 0.10));
    }

    #[test]
    fn depreciation_tag_follows_heuristic() {
        let mut heuristic = outcome(500_000_000, 0.12, None);
        heuristic.depreciation_applied = true;
        let ai = ai_price(500_000_000.0, &["depreciation"]);
        let result = finalize(&heuristic, Some(&ai), "v");
        assert_eq!(result.evidence, vec!["baseline", "heuristic", "depreciation"]);
    }

    #[test]
    fn zero_heuristic_lands_on_price_floor() {
        let result = finalize(&HeuristicOutcome::zero(), None, "v");
        assert_eq!(result.final_price, valuecast_core::price::MIN_PRICE);
        assert!(approx_eq(result.confidence, 0.0));
        assert!(approx_eq(result.delta_percent, 0.0));
    }

    // -- Service with scripted generator --

    struct Scripted {
        responses: Mutex<VecDeque<Result<String, AiError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, AiError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, _model: &str, prompt: &str) -> Result<String, AiError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(AiError::Status {
                    status: 500,
                    body: String::new(),
                })
            })
        }
    }

    struct Panicking;

    #[async_trait]
    impl TextGenerator for Panicking {
        async fn generate(&self, _model: &str, _prompt: &str) -> Result<String, AiError> {
            panic!("generator exploded");
        }
    }

    struct ExplodingPolicy;

    impl DepreciationPolicySource for ExplodingPolicy {
        fn policy_for(&self, _entry: &CatalogEntry) -> DepreciationPolicy {
            panic!("policy lookup failed");
        }
    }

    fn envelope(text: &str) -> String {
        serde_json::json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
            .to_string()
    }

    fn vf8_estimator() -> HeuristicEstimator {
        let store = CatalogStore::from_entries(vec![CatalogEntry {
            brand: "VinFast".into(),
            model: "VF8".into(),
            variant: "Plus".into(),
            category: "car".into(),
            baseline_price: 1_019_000_000,
            notes: "linear 10%/year; max 80% depreciation".into(),
            depreciation: None,
        }]);
        HeuristicEstimator::new(Arc::new(store), HeuristicConstants::default(), 0.12)
            .with_current_year(2025)
    }

    fn service(llm: LlmClient) -> SuggestionService {
        service_with(vf8_estimator(), llm)
    }

    fn service_with(estimator: HeuristicEstimator, llm: LlmClient) -> SuggestionService {
        SuggestionService::new(
            estimator,
            llm,
            Arc::new(LruSuggestionCache::new(16)),
            &AiConfig::default(),
            "test-v1",
        )
    }

    fn vf8() -> PriceQuery {
        PriceQuery {
            brand: Some("VinFast".into()),
            model: Some("VF8".into()),
            variant: Some("Plus".into()),
            year: Some(2023),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn disabled_ai_returns_heuristic_with_reason() {
        let result = service(LlmClient::Disabled).suggest_price(&vf8()).await;
        assert_eq!(result.mode, Mode::Heuristic);
        assert_eq!(result.final_price, 815_200_000);
        assert_eq!(result.attempts, 0);
        assert!(result.reason.unwrap().contains("credential"));
    }

    #[tokio::test]
    async fn unusable_answer_triggers_one_corrective_call() {
        let scripted = Scripted::new(vec![
            Ok(envelope("I am not sure.")),
            Ok(envelope(r#"{"suggestedPrice": 800000000, "evidence": ["age"]}"#)),
        ]);
        let result = service(LlmClient::Active(scripted.clone())).suggest_price(&vf8()).await;

        assert_eq!(result.mode, Mode::Ai);
        assert_eq!(result.final_price, 800_000_000);
        assert_eq!(result.attempts, 2);
        let prompts = scripted.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].ends_with(crate::prompt::JSON_ONLY_SUFFIX));
    }

    #[tokio::test]
    async fn still_unusable_after_correction_degrades() {
        let scripted = Scripted::new(vec![Ok(envelope("no idea")), Ok(envelope("still no idea"))]);
        let result = service(LlmClient::Active(scripted)).suggest_price(&vf8()).await;
        assert_eq!(result.mode, Mode::Heuristic);
        assert_eq!(result.final_price, 815_200_000);
        assert!(result.reason.unwrap().contains("corrective"));
    }

    #[tokio::test]
    async fn malformed_envelope_degrades_without_correction() {
        let scripted = Scripted::new(vec![Ok("<html>oops</html>".into())]);
        let result = service(LlmClient::Active(scripted.clone())).suggest_price(&vf8()).await;
        assert_eq!(result.mode, Mode::Heuristic);
        assert!(result.reason.unwrap().contains("malformed"));
        assert_eq!(scripted.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn permanent_status_degrades_with_description() {
        let scripted = Scripted::new(vec![Err(AiError::Status {
            status: 403,
            body: "forbidden".into(),
        })]);
        let result = service(LlmClient::Active(scripted)).suggest_price(&vf8()).await;
        assert_eq!(result.mode, Mode::Heuristic);
        assert_eq!(result.attempts, 1);
        assert!(result.reason.unwrap().contains("403"));
    }

    #[tokio::test]
    async fn panic_in_generator_degrades_and_is_not_cached() {
        let svc = service(LlmClient::Active(Arc::new(Panicking)));
        let result = svc.suggest_price(&vf8()).await;
        assert_eq!(result.mode, Mode::Heuristic);
        assert_eq!(result.final_price, 815_200_000);
        assert!(result.reason.unwrap().contains("generator exploded"));
        assert!(svc.cache().is_empty());
    }

    #[tokio::test]
    async fn ai_result_is_cached_and_served_on_repeat() {
        let scripted = Scripted::new(vec![Ok(envelope(r#"{"suggestedPrice": 830000000}"#))]);
        let svc = service(LlmClient::Active(scripted.clone()));

        let first = svc.suggest_price(&vf8()).await;
        let second = svc.suggest_price(&vf8()).await;
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.final_price, second.final_price);
        assert!(first.factor_summary.starts_with("baseline=1019000000"));
        assert_eq!(second.factor_summary, first.factor_summary);
        assert_eq!(scripted.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn estimator_panic_does_not_escape() {
        let estimator = vf8_estimator().with_policy_source(Arc::new(ExplodingPolicy));
        let svc = service_with(estimator, LlmClient::Disabled);
        let result = svc.suggest_price(&vf8()).await;

        assert_eq!(result.mode, Mode::Heuristic);
        assert_eq!(result.final_price, valuecast_core::price::MIN_PRICE);
        assert_eq!(result.reason.as_deref(), Some("heuristic estimate unavailable"));
        assert!(svc.cache().is_empty());
    }

    #[tokio::test]
    async fn extreme_year_still_answers() {
        let query = PriceQuery {
            year: Some(i32::MIN),
            ..vf8()
        };
        let result = service(LlmClient::Disabled).suggest_price(&query).await;

        assert_eq!(result.mode, Mode::Heuristic);
        assert!(result.heuristic_price > 0);
        assert!(result.final_price >= valuecast_core::price::MIN_PRICE);
        assert!(result.reason.unwrap().contains("credential"));
    }
}
