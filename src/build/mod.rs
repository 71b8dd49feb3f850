//! Build offload subsystem.
//!
//! # Data Flow
//! ```text
//! pipeline (script response, not raw)
//!     → service.rs (pool acquire, cancellation)
//!     → worker.rs (dedicated thread, job queue)
//!     → transform.rs engine (external command or identity)
//! ```

pub mod service;
pub mod transform;
pub mod worker;

pub use service::BuildService;
pub use transform::{
    CommandTransform, IdentityTransform, SourceMap, Transform, TransformError, TransformInput,
    TransformOptions, TransformOutput,
};
pub use worker::{Worker, WorkerManager};
