// Shared building blocks for the price-suggestion engine: configuration,
// the request/response data model, price rounding rules, the evidence
// vocabulary, and the result cache.

pub mod cache;
pub mod config;
pub mod evidence;
pub mod price;
pub mod query;
pub mod suggestion;

pub use cache::{LruSuggestionCache, NoopCache, SuggestionCache};
pub use config::Config;
pub use query::{Condition, PriceQuery};
pub use suggestion::{AllowedRange, Mode, SuggestionResult};
