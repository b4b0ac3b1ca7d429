//! Gateway error taxonomy
//!
//! Every variant is converted into a JSON error response at the dispatch
//! boundary; none of them escape to the connection layer.

use std::time::Duration;

use thiserror::Error;

use crate::http::response::Response;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// No configured prefix matches the request path
    #[error("no route matches path {path}")]
    NoRouteMatch { path: String },

    /// The upstream could not be reached or did not produce a usable response
    #[error("upstream {upstream} unreachable: {reason:#}")]
    UpstreamUnreachable {
        upstream: String,
        reason: anyhow::Error,
    },

    /// The upstream did not answer within the configured bound
    #[error("upstream {upstream} timed out after {after:?}")]
    UpstreamTimeout { upstream: String, after: Duration },
}

impl GatewayError {
    /// Whether the failure lies with the infrastructure rather than the caller
    pub fn is_upstream_failure(&self) -> bool {
        !matches!(self, GatewayError::NoRouteMatch { .. })
    }

    /// The client-facing response for this error
    pub fn to_response(&self) -> Response {
        match self {
            GatewayError::NoRouteMatch { .. } => Response::not_found(),
            GatewayError::UpstreamUnreachable { .. } | GatewayError::UpstreamTimeout { .. } => {
                Response::upstream_unavailable()
            }
        }
    }
}
