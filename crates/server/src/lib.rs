//! HTTP layer for the Relaygate relay gateway.
//!
//! The binary in `main.rs` wires configuration into core services and serves
//! the router; this library exposes the router, middleware, and shared state
//! so integration tests can drive the full HTTP surface in-process.

pub mod middleware;
pub mod router;
pub mod state;
