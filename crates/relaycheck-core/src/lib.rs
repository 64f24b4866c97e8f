//! relaycheck-core — shared types for the relaycheck probe pipeline.
//!
//! Holds the endpoint descriptor passed through the pipeline, the probe
//! outcome taxonomy, and the check configuration with its validated form.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CheckConfig, ProbeMethod, ProbeSettings, TelegramTarget};
pub use error::ConfigError;
pub use types::*;
