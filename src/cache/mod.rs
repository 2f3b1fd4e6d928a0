//! Content-keyed result caching and in-flight request deduplication.

pub mod fingerprint;
pub mod inflight;
pub mod result_cache;

pub use fingerprint::{fingerprint, Fingerprint};
pub use inflight::{InFlightCoordinator, LeaderGuard, Marker, Role, WaitOutcome};
pub use result_cache::{CacheStats, ResultCache};
