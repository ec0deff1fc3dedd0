//! Rate-limited, cached access to the upstream entity API.
//!
//! All upstream traffic funnels through one [`FetchClient`]: lookups hit the
//! TTL cache first, misses join a single FIFO queue drained by one worker
//! that spaces dispatches at least `min_interval` apart and never has more
//! than one request in flight. Many independently scheduled entities can
//! therefore poll upstream data without collectively exceeding its request
//! budget.

pub mod cache;
pub mod client;
pub mod error;
pub mod wire;

pub use cache::TtlCache;
pub use client::{EntitySource, FetchClient, FetchOptions, HttpEntitySource};
pub use error::FetchError;
pub use wire::UpstreamEntity;
