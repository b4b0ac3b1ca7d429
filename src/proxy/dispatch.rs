//! Request dispatch
//!
//! Ties routing and forwarding together: match the path, build the outbound
//! request, call the upstream once and relay what it returns. Every failure
//! is turned into a JSON error response here.

use std::time::Instant;

use anyhow::Result;

use crate::config::Config;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::proxy::error::GatewayError;
use crate::proxy::upstream::{OutboundRequest, UpstreamClient};
use crate::routing::RouteTable;

/// Routes inbound requests to their upstream and relays the answer.
///
/// Holds no per-request state, so one instance is shared by all connections.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    routes: RouteTable,
    client: UpstreamClient,
}

impl Dispatcher {
    pub fn new(routes: RouteTable, client: UpstreamClient) -> Self {
        Self { routes, client }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let routes = RouteTable::from_config(&config.routes)?;
        let client = UpstreamClient::from_config(&config.upstream);
        Ok(Self::new(routes, client))
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Handle one request. Never fails; errors become 404/502 responses.
    pub async fn dispatch(&self, request: &Request) -> Response {
        let started = Instant::now();

        match self.try_dispatch(request).await {
            Ok(response) => {
                tracing::info!(
                    method = %request.method,
                    path = %request.path,
                    status = response.status.as_u16(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Request relayed"
                );
                response
            }
            Err(e) => {
                if e.is_upstream_failure() {
                    tracing::warn!(
                        method = %request.method,
                        path = %request.path,
                        error = %e,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Upstream unavailable"
                    );
                } else {
                    tracing::debug!(method = %request.method, path = %request.path, "No route matched");
                }
                e.to_response()
            }
        }
    }

    /// Match, forward and relay, reporting failures as `GatewayError`
    pub async fn try_dispatch(&self, request: &Request) -> Result<Response, GatewayError> {
        let path = request.path_only();

        let matched = self
            .routes
            .resolve(path)
            .ok_or_else(|| GatewayError::NoRouteMatch { path: path.to_string() })?;

        let outbound = OutboundRequest::from_inbound(request, &matched).await;
        self.client.send(matched.route, &outbound).await
    }
}
