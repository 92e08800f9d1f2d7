// crates/core/src/config/mod.rs
pub mod round_trip;

pub use round_trip::{ArraySpec, BackendKind, RoundTripConfig, DEFAULT_OUTPUT};
