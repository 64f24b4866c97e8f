//! relaycheck-state — persistent probe-result cache.
//!
//! Backed by [redb](https://docs.rs/redb). Each entry maps a probe cache
//! key to either a recorded latency or a recorded failure, stamped with
//! the time it was written. Entries older than the store's TTL read as
//! absent, which the prober treats as "unknown, must probe".
//!
//! The `CacheStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across probe tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::{CacheEntry, CacheStore, ResultCache};
