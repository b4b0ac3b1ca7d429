//! Waypoint - prefix-routing HTTP gateway
//!
//! Receives HTTP requests, picks the upstream service that owns the path
//! prefix, forwards the request with the prefix stripped and relays the
//! upstream's response.

pub mod config;
pub mod http;
pub mod proxy;
pub mod routing;
pub mod server;
