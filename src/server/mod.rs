//! TCP front end
//!
//! Accepts client connections and hands each one to its own task.

pub mod listener;
