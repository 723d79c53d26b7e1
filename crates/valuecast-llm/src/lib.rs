// Generative-AI integration: the text-generation client, bounded retries
// with model fallback, and parsing of the AI's free-text answer.

pub mod client;
pub mod parser;
pub mod retry;

pub use client::{AiError, GeminiClient, LlmClient, TextGenerator};
pub use parser::{parse_response, AiParseOutcome, ParseError};
pub use retry::{generate_with_retry, CallFailure, CallOutcome, RetryDecision, RetryPolicy};
