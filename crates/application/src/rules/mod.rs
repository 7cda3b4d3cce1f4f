pub mod evaluator;
pub mod index;
pub mod rate_limiter;

pub use evaluator::{FiringDecision, RuleEvaluator};
pub use index::RuleIndex;
pub use rate_limiter::RateLimiter;
