// Application layer: prompt construction and the suggestion orchestrator.
// The `valuecast` binary and integration tests build on these.

pub mod prompt;
pub mod suggest;

pub use suggest::{allowed_range, finalize, SuggestError, SuggestionService};
