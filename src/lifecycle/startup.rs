//! Startup orchestration.
//!
//! # Responsibilities
//! - Pick the transform engine from configuration
//! - Bind the listener before any traffic is served
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::build::{CommandTransform, IdentityTransform, Transform};
use crate::config::{ListenerConfig, WorkerConfig};

/// The configured external command, or the identity engine.
pub fn transform_from_config(config: &WorkerConfig) -> Arc<dyn Transform> {
    match config.command.as_deref().and_then(CommandTransform::new) {
        Some(command) => {
            tracing::info!(command = ?config.command, "Using external transform command");
            Arc::new(command)
        }
        None => {
            tracing::warn!("No transform command configured, scripts pass through untransformed");
            Arc::new(IdentityTransform)
        }
    }
}

pub async fn bind(config: &ListenerConfig) -> std::io::Result<TcpListener> {
    let listener = TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");
    Ok(listener)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::TransformInput;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_defaults_to_identity() {
        let engine = transform_from_config(&WorkerConfig::default());
        let input = TransformInput {
            code: "export {}".into(),
            source_url: "https://p/a.mjs".into(),
            options: Default::default(),
        };
        let out = engine.transform(&input, &CancellationToken::new()).unwrap();
        assert_eq!(out.code, "export {}");
    }

    #[tokio::test]
    async fn test_bind_ephemeral() {
        let listener = bind(&ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            ..ListenerConfig::default()
        })
        .await
        .unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }
}
