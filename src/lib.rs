//! Volume Scanner Backend Library
//!
//! Exchange connectors, the scan pipeline and the HTTP query surface.
//! The `volscan` binary wires these together.

pub mod aggregator;
pub mod api;
pub mod chart;
pub mod classifier;
pub mod config;
pub mod exchanges;
pub mod indicators;
pub mod models;
pub mod registry;
pub mod scanner;
pub mod scheduler;
pub mod scoring;
