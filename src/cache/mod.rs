//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! pipeline
//!     → orchestrator.rs (lookup / store / purge, failures swallowed)
//!     → policy.rs (eligibility, TTL, synthesized redirect cache-control)
//!     → pooled CacheConnection (pool::Pool<StoreManager>)
//!     → store.rs backend (MemoryStore or any CacheStore)
//! ```
//!
//! # Design Decisions
//! - The store is constructed by the caller and injected; no global instance
//! - Key = normalized URL + build target
//! - Cache errors never reach the client

pub mod entry;
pub mod orchestrator;
pub mod policy;
pub mod store;

pub use entry::{CacheEntry, CacheKey};
pub use orchestrator::Cache;
pub use policy::{is_cache_eligible, is_redirect, TtlPolicy};
pub use store::{CacheConnection, CacheError, CacheStore, MemoryStore};
