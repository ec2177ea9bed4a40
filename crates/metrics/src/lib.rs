//! Metrics facade for wagate.
//!
//! Crates record through the re-exported `metrics` macros behind their own
//! `metrics` feature; with the `prometheus` feature the gateway installs a
//! recorder and serves the rendered snapshot.

pub mod definitions;
#[cfg(feature = "prometheus")]
pub mod recorder;

pub use metrics::{counter, gauge, histogram};
