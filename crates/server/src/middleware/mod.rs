//! HTTP middleware components for the relay server.
//!
//! Axum adapters that wrap the business logic from `relay_core`: the
//! middleware here handles HTTP-specific concerns (status codes, headers)
//! while admission decisions live in `relay_core::ratelimit`.

pub mod rate_limit;

pub use rate_limit::rate_limit_middleware;
