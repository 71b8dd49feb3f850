//! Bounded resource pools.
//!
//! # Data Flow
//! ```text
//! acquire()
//!     → wait for a permit (backpressure at `max`)
//!     → reuse an idle resource, or create one via the Manager
//!     → Pooled<R> guard (exclusive borrow)
//! drop(guard)
//!     → usable?  back to the idle set
//!     → broken / discarded / pool drained?  destroyed
//! reaper (every evict_interval)
//!     → evict resources idle past idle_timeout, down to `min`
//! ```
//!
//! # Design Decisions
//! - One semaphore permit per borrowed resource bounds `size` by `max`
//! - Release happens in `Drop`, so failure paths cannot leak a slot
//! - Counters are plain atomics; sampling them never mutates the pool

pub mod bounded;
pub mod manager;
pub mod reaper;

pub use bounded::{Pool, PoolError, PoolStatus, Pooled};
pub use manager::Manager;
pub use reaper::run_reaper;
