//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, request ID, body buffering, cancellation)
//!     → pipeline.rs (resolve, cache, upstream, transform, cache writes)
//!         → upstream.rs (reqwest, filtered headers)
//!         → headers.rs (request / response filter chains)
//!     → fast_path.rs (redirects resolved through the cache)
//!     → Send to client
//! ```

pub mod fast_path;
pub mod headers;
pub mod pipeline;
pub mod server;
pub mod upstream;

pub use fast_path::FastPath;
pub use pipeline::{Pipeline, ProxyRequest, ProxyResponse, Source};
pub use server::{AppState, HttpServer, StatusReport};
pub use upstream::{UpstreamClient, UpstreamResponse};
