//! # Relay Core
//!
//! Core library for the Relaygate JSON-RPC relay gateway.
//!
//! This crate provides the foundational components for:
//!
//! - **[`ratelimit`]**: Fixed-window admission control with a pluggable
//!   counter store (in-process map or shared Redis) and a degrade-not-fail
//!   fallback policy.
//!
//! - **[`relay`]**: The forwarding engine: upstream HTTP calls with bounded
//!   timeouts, JSON-RPC error envelope synthesis, and guaranteed once-per-call
//!   usage accounting.
//!
//! - **[`usage`]**: Per-endpoint relay accounting (all-time and monthly
//!   counters, bounded recent-call rings, billing cost derivation) and
//!   periodic hourly aggregation.
//!
//! - **[`registry`]**: Endpoint id → upstream resolution with get/upsert
//!   semantics.
//!
//! - **[`metrics`]**: Prometheus metrics collection for monitoring and
//!   observability.
//!
//! - **[`config`]**: Layered TOML + environment configuration.
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌──────────────┐
//! │ Rate Limiter │ ─── Over quota ──► 429 + Retry-After
//! └──────┬───────┘
//!        │ admitted
//!        ▼
//! ┌──────────────┐
//! │ RelayEngine  │ ─── Unknown id ──► 404
//! │  (resolve)   │
//! └──────┬───────┘
//!        │
//!        ▼
//! ┌──────────────┐      network failure ──► -32603 envelope
//! │  Forwarder   │ ───  non-JSON body  ──► -32700 envelope
//! └──────┬───────┘      anything else  ──► body passthrough
//!        │ settled
//!        ▼
//! ┌──────────────┐
//! │UsageRecorder │  exactly once per call, success or failure
//! └──────┬───────┘
//!        │
//!        ▼
//!  Response + X-Total-Relays / X-Monthly-Relays headers
//! ```
//!
//! The only cross-component ordering guarantees are the ones in the diagram:
//! the limiter settles before the forwarder runs, and the recorder runs after
//! the forwarder settles. Nothing is ordered across distinct inbound requests.

pub mod config;
pub mod metrics;
pub mod ratelimit;
pub mod registry;
pub mod relay;
pub mod types;
pub mod usage;
