//! EnvSense agent: library crate for the sampling runtime.
//!
//! Re-exports all modules so external crates (e.g. `es-e2e-tests`) can
//! drive the `SamplingLoop` and `Publisher` against mock transports.

pub mod config;
pub mod publisher;
pub mod sampling;
