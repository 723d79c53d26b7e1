// Bounded retries with exponential backoff and model fallback.
//
// `RetryPolicy::decide` is a pure transition from the latest failure to the
// next step, so the policy can be tested without a network. The async loop in
// `generate_with_retry` only executes those decisions.

use std::time::Duration;

use tracing::warn;
use valuecast_core::config::AiConfig;

use crate::client::{AiError, LlmClient};

/// Consecutive 500/503 responses after which the fallback model is used.
pub const OVERLOAD_STREAK_FOR_FALLBACK: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetrySame,
    RetryFallback,
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AiConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(ai: &AiConfig) -> Self {
        Self {
            max_attempts: ai.max_attempts.max(1),
            initial_backoff: Duration::from_millis(ai.initial_backoff_ms),
            max_backoff: Duration::from_millis(ai.max_backoff_ms),
        }
    }

    /// Next step after attempt number `attempt` (1-based) failed with `error`.
    ///
    /// `overload_streak` counts consecutive 500/503 failures including this
    /// one; `fallback_available` is true when a distinct fallback model is
    /// configured.
    pub fn decide(
        &self,
        error: &AiError,
        attempt: u32,
        overload_streak: u32,
        fallback_available: bool,
    ) -> RetryDecision {
        if !error.is_transient() || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        if error.is_overload()
            && overload_streak >= OVERLOAD_STREAK_FOR_FALLBACK
            && fallback_available
        {
            return RetryDecision::RetryFallback;
        }
        RetryDecision::RetrySame
    }

    /// Delay before the attempt following `attempt`: base * 2^(attempt-1),
    /// capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

// ---------------------------------------------------------------------------
// Retry loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub text: String,
    pub attempts: u32,
    pub model_used: String,
}

#[derive(Debug)]
pub struct CallFailure {
    pub error: AiError,
    pub attempts: u32,
    pub model_used: String,
}

/// Call the AI with bounded retries. Transient failures are retried with
/// backoff while attempts remain; repeated overloads move the remaining
/// attempts to `fallback`.
pub async fn generate_with_retry(
    client: &LlmClient,
    policy: &RetryPolicy,
    primary: &str,
    fallback: Option<&str>,
    prompt: &str,
) -> Result<CallOutcome, CallFailure> {
    let mut model = primary;
    let mut attempt = 0;
    let mut overload_streak = 0;

    loop {
        attempt += 1;
        let error = match client.generate(model, prompt).await {
            Ok(text) => {
                return Ok(CallOutcome {
                    text,
                    attempts: attempt,
                    model_used: model.to_string(),
                })
            }
            Err(e) => e,
        };

        overload_streak = if error.is_overload() {
            overload_streak + 1
        } else {
            0
        };
        let fallback_model = fallback.filter(|f| !f.is_empty() && *f != model);

        match policy.decide(&error, attempt, overload_streak, fallback_model.is_some()) {
            RetryDecision::GiveUp => {
                return Err(CallFailure {
                    error,
                    attempts: attempt,
                    model_used: model.to_string(),
                })
            }
            RetryDecision::RetryFallback => {
                if let Some(next) = fallback_model {
                    warn!(
                        attempt,
                        from = model,
                        to = next,
                        error = %error,
                        "switching to fallback model"
                    );
                    model = next;
                }
            }
            RetryDecision::RetrySame => {
                warn!(attempt, model, error = %error, "transient AI failure, retrying");
            }
        }

        tokio::time::sleep(policy.backoff(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::TextGenerator;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn status(code: u16) -> AiError {
        AiError::Status {
            status: code,
            body: String::new(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
        }
    }

    /// Replays scripted responses and records which model each call used.
    struct Scripted {
        responses: Mutex<VecDeque<Result<String, AiError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<String, AiError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, model: &str, _prompt: &str) -> Result<String, AiError> {
            self.calls.lock().unwrap().push(model.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(status(500)))
        }
    }

    // -- Pure transitions --

    #[test]
    fn permanent_errors_give_up_immediately() {
        assert_eq!(policy().decide(&status(400), 1, 0, true), RetryDecision::GiveUp);
        assert_eq!(policy().decide(&AiError::Disabled, 1, 0, true), RetryDecision::GiveUp);
    }

    #[test]
    fn transient_errors_retry_while_attempts_remain() {
        assert_eq!(policy().decide(&status(429), 1, 0, true), RetryDecision::RetrySame);
        assert_eq!(policy().decide(&status(503), 1, 1, true), RetryDecision::RetrySame);
        assert_eq!(policy().decide(&status(503), 3, 3, true), RetryDecision::GiveUp);
    }

    #[test]
    fn repeated_overload_switches_to_fallback() {
        assert_eq!(policy().decide(&status(500), 2, 2, true), RetryDecision::RetryFallback);
        assert_eq!(policy().decide(&status(500), 2, 2, false), RetryDecision::RetrySame);
        // 429 is transient but not an overload.
        assert_eq!(policy().decide(&status(429), 2, 0, true), RetryDecision::RetrySame);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(500));
        assert_eq!(p.backoff(2), Duration::from_millis(1000));
        assert_eq!(p.backoff(3), Duration::from_millis(2000));
        assert_eq!(p.backoff(4), Duration::from_secs(4));
        assert_eq!(p.backoff(40), Duration::from_secs(4));
    }

    // -- Loop behaviour (paused clock so backoff is instant) --

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failure() {
        let scripted = Scripted::new(vec![Err(status(429)), Ok("body".into())]);
        let client = LlmClient::Active(scripted.clone());

        let outcome = generate_with_retry(&client, &policy(), "primary", Some("backup"), "p")
            .await
            .expect("second attempt should succeed");
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.model_used, "primary");
        assert_eq!(scripted.calls(), vec!["primary", "primary"]);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_503_moves_to_fallback_then_gives_up() {
        let scripted = Scripted::new(vec![Err(status(503)), Err(status(503)), Err(status(503))]);
        let client = LlmClient::Active(scripted.clone());

        let failure = generate_with_retry(&client, &policy(), "primary", Some("backup"), "p")
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error.status(), Some(503));
        assert_eq!(failure.model_used, "backup");
        assert_eq!(scripted.calls(), vec!["primary", "primary", "backup"]);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_model_can_succeed() {
        let scripted = Scripted::new(vec![Err(status(500)), Err(status(503)), Ok("fine".into())]);
        let client = LlmClient::Active(scripted.clone());

        let outcome = generate_with_retry(&client, &policy(), "primary", Some("backup"), "p")
            .await
            .unwrap();
        assert_eq!(outcome.model_used, "backup");
        assert_eq!(outcome.text, "fine");
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_error_is_not_retried() {
        let scripted = Scripted::new(vec![Err(status(401))]);
        let client = LlmClient::Active(scripted.clone());

        let failure = generate_with_retry(&client, &policy(), "primary", None, "p")
            .await
            .unwrap_err();
        assert_eq!(failure.attempts, 1);
        assert_eq!(scripted.calls().len(), 1);
    }

    #[tokio::test]
    async fn disabled_client_gives_up_without_retry() {
        let failure = generate_with_retry(&LlmClient::Disabled, &policy(), "m", None, "p")
            .await
            .unwrap_err();
        assert!(matches!(failure.error, AiError::Disabled));
        assert_eq!(failure.attempts, 1);
    }
}
