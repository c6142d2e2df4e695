//! Rate limiting logic and state management.

mod counter;
mod limiter;
mod rules;

pub use counter::HitCounter;
pub use limiter::RateLimiter;
pub use rules::{QuotaRule, RouteRules, RuleNode, RuleSet, SharedRules};
