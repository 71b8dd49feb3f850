//! Origin resolution and URL rewriting.
//!
//! # Data Flow
//! ```text
//! inbound URL + headers
//!     → resolver.rs (base path strip, trusted origin, upstream URL)
//!     → target.rs (User-Agent → build target)
//!     → RequestContext { urls, rewriter, target, flags }
//!
//! upstream body / headers
//!     → rewrite.rs (origin replacement, absolute path prefixing)
//! ```

pub mod resolver;
pub mod rewrite;
pub mod target;

pub use resolver::{OriginResolver, RequestContext};
pub use rewrite::Rewriter;
pub use target::{BuildTarget, SPOOFED_USER_AGENT};
