// Pricing engine: baseline catalog, fuzzy resolution, depreciation policies,
// and the multi-factor heuristic estimator.

pub mod catalog;
pub mod depreciation;
pub mod heuristic;
pub mod legacy;
pub mod resolver;

pub use catalog::{CatalogEntry, CatalogStore};
pub use depreciation::{DepreciationPolicy, DepreciationPolicySource, PolicyKind};
pub use heuristic::{HeuristicEstimator, HeuristicOutcome};
pub use resolver::{BaselineResolver, CatalogMatch, MatchKind};
