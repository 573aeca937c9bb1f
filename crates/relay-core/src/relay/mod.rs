//! Relay path: upstream forwarding and per-call accounting.
//!
//! [`Forwarder`] owns the HTTP mechanics (pooled client, timeouts, envelope
//! synthesis); [`RelayEngine`] composes it with the endpoint registry and
//! usage recorder and enforces the settle-then-record ordering.

pub mod engine;
pub mod forwarder;

pub use engine::{RelayEngine, RelayError, RelayOutcome};
pub use forwarder::{DEFAULT_RELAY_TIMEOUT, Forwarded, Forwarder, ForwarderError, PROBE_TIMEOUT};
