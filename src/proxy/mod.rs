//! Request forwarding
//!
//! This module implements the gateway's dispatch path: building the upstream
//! request from a matched route, exchanging it with the upstream, and mapping
//! failures to client responses.

pub mod dispatch;
pub mod error;
pub mod form;
pub mod upstream;

pub use dispatch::Dispatcher;
pub use error::GatewayError;
pub use form::FormFields;
pub use upstream::{OutboundRequest, UpstreamClient};
