//! Error types for the request pipeline.
//!
//! Every variant is scoped to the single request that produced it. Upstream
//! HTTP error statuses are not represented here: they are relayed to the
//! caller like any other response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("URL is required")]
    MissingTarget,

    #[error("Invalid target URL `{url}`: {reason}")]
    MalformedTarget { url: String, reason: String },

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Request body exceeds {limit} bytes")]
    RequestBodyTooLarge { limit: usize },

    #[error("WebSocket target must use ws, wss, http or https: {0}")]
    WebSocketTarget(String),

    #[error("WebSocket tunneling requires a session-scoped address")]
    WebSocketRequiresSession,

    #[error("Upstream request to {host} timed out")]
    UpstreamTimeout { host: String },

    #[error("Error fetching the URL: {0}")]
    UpstreamTransport(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingTarget
            | Self::MalformedTarget { .. }
            | Self::WebSocketTarget(_)
            | Self::WebSocketRequiresSession => StatusCode::BAD_REQUEST,
            Self::UnknownSession(_) => StatusCode::NOT_FOUND,
            Self::RequestBodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Classify a reqwest failure for `target` into timeout vs transport.
    pub fn from_upstream(target: &url::Url, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::UpstreamTimeout {
                host: target.host_str().unwrap_or_default().to_string(),
            }
        } else {
            Self::UpstreamTransport(err.to_string())
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!("proxy error: {}", self);
        } else {
            tracing::debug!("rejected request: {}", self);
        }
        (
            status,
            [("Access-Control-Allow-Origin", "*")],
            self.to_string(),
        )
            .into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
