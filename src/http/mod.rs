//! HTTP protocol implementation.
//!
//! This module implements the client-facing HTTP/1.1 side of the gateway,
//! with support for keep-alive connections.
//!
//! # Architecture
//!
//! - **`connection`**: The per-connection request-response state machine
//! - **`parser`**: Parses incoming HTTP requests from byte buffers
//! - **`request`**: HTTP request representation and accessors
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes and writes HTTP responses to the client
//!
//! # Connection lifecycle
//!
//! A connection loops `Reading -> Processing -> Writing` until the client
//! asks to close or hangs up:
//!
//! | State        | Leaves on                        | Next state            |
//! |--------------|----------------------------------|-----------------------|
//! | `Reading`    | complete request                 | `Processing`          |
//! |              | malformed or oversized request   | `Writing` (then close)|
//! |              | EOF                              | `Closed`              |
//! | `Processing` | upstream answered or failed      | `Writing`             |
//! |              | client hung up (upstream dropped)| `Closed`              |
//! | `Writing`    | response flushed                 | `Reading` or `Closed` |

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
