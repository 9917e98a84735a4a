//! Observability infrastructure.
//!
//! Provides:
//! - Structured tracing setup
//! - OpenTelemetry metrics for broadcasts and effect outcomes

pub mod metrics;
pub mod tracing;
