//! Integration tests for the Relaygate relay gateway.
//!
//! Test modules:
//!
//! - `rate_limit_tests`: fixed-window admission properties across the
//!   limiter and both counter stores
//! - `usage_tests`: relay accounting, monthly buckets, billing derivation,
//!   and hourly aggregation
//! - `relay_flow_tests`: the full HTTP path (limiter → forwarder → recorder)
//!   against mock upstreams, including the 429 and error-envelope contracts
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```
//!
//! The relay flow tests start mock upstream servers on ephemeral local ports;
//! no external services are required.

#[cfg(test)]
mod rate_limit_tests;

#[cfg(test)]
mod relay_flow_tests;

#[cfg(test)]
mod usage_tests;
