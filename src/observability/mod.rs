//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, histograms, sampled pool gauges)
//!     → tracing spans around pipeline steps (pipeline, upstream, transform, fast_path)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all subsystems
//! - Spans and metrics never alter control flow

pub mod logging;
pub mod metrics;
