#![deny(missing_docs)]

//! Shared configuration, error types, and observability primitives for pulse crates.
//!
//! Architecture role:
//! - defines engine configuration passed across planner and record layers
//! - provides common [`PulseError`] / [`Result`] contracts
//! - hosts the metrics registry shared by planner and builders
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`metrics`]

/// Shared engine configuration types.
pub mod config;
/// Shared error taxonomy.
pub mod error;
/// Metrics registry and Prometheus rendering helpers.
pub mod metrics;

pub use config::EngineConfig;
pub use error::{PulseError, Result};
pub use metrics::MetricsRegistry;
