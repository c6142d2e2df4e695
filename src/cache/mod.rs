//! Token caching with TTL expiry and background sweeping.

mod token_cache;

pub use token_cache::{SweeperHandle, TokenCache};
