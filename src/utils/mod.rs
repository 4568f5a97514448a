//! # Utility Modules
//!
//! Ambient concerns shared by both roles.
//!
//! ## Components
//! - **Logging**: global `tracing` subscriber built from configuration
//! - **Metrics**: per-instance atomic counters with serializable snapshots

pub mod logging;
pub mod metrics;

pub use metrics::{DropReason, Metrics, MetricsSnapshot};
