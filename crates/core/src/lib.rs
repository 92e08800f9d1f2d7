//! Core library for asdf-strides: builds a strided array, stores it through a
//! file format and a storage backend, and reads it back for comparison.

pub mod config;
pub mod metrics;
pub mod runner;
pub mod sample;

pub use config::{ArraySpec, RoundTripConfig};
pub use metrics::Metrics;
pub use runner::{run_round_trip, RoundTripReport, Runner};
