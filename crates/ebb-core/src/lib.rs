//! ebb-core — configuration and telemetry shared by the ebb crates.

pub mod config;
pub mod telemetry;

pub use config::{parse_duration, AwaitConfig, EbbConfig, EventLoopConfig, SerializerConfig};
