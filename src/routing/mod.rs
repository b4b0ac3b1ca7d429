//! Prefix routing
//!
//! Maps an inbound request path to the upstream that owns it. The table is
//! built once from configuration and is read-only afterwards, so it can be
//! shared between connection tasks without locking.

pub mod table;

pub use table::{Route, RouteMatch, RouteTable};
