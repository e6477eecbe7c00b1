//! Scorta: a pluggable server-side response cache for static-asset
//! endpoints.
//!
//! The [`cache`] module is the core: a capability interface over
//! heterogeneous key-value backends, a serializable response snapshot, a
//! configurable cache-key rule, and the per-request decision logic exposed
//! as an axum middleware. [`config`] loads layered settings and [`infra`]
//! carries telemetry plus the filesystem asset handler the bundled server
//! fronts.

pub mod cache;
pub mod config;
pub mod infra;
