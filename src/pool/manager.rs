//! Resource lifecycle hooks for a [`Pool`](crate::pool::Pool).

use async_trait::async_trait;

/// Creates, checks and destroys the resources a pool hands out.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    type Resource: Send + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a new resource.
    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    /// Whether a resource may be handed out again.
    fn is_usable(&self, _resource: &Self::Resource) -> bool {
        true
    }

    /// Tear a resource down. Called at most once per resource.
    fn destroy(&self, resource: Self::Resource) {
        drop(resource);
    }
}
