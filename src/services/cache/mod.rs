pub mod fingerprint;
pub mod response_cache;

pub use fingerprint::{fingerprint, params, Fingerprint, OperationParams};
pub use response_cache::{CacheEntry, Lookup, ResponseCache};
