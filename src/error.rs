//! Request-level errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::build::TransformError;

/// Client closed the connection before the response was ready.
pub const STATUS_CLIENT_CLOSED: u16 = 499;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error(transparent)]
    Transform(TransformError),

    #[error("request aborted")]
    Aborted,
}

impl From<TransformError> for ProxyError {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Cancelled => ProxyError::Aborted,
            other => ProxyError::Transform(other),
        }
    }
}

/// Failure while assembling the server from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid upstream origin: {0}")]
    UpstreamOrigin(#[from] url::ParseError),

    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Transform(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Aborted => {
                StatusCode::from_u16(STATUS_CLIENT_CLOSED).unwrap_or(StatusCode::BAD_REQUEST)
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::from(TransformError::Failed("bad".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert!(matches!(
            ProxyError::from(TransformError::Cancelled),
            ProxyError::Aborted
        ));
        assert_eq!(ProxyError::Aborted.status().as_u16(), 499);
    }
}
