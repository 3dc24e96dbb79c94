//! Configuration loading for the protogate gateway.
//!
//! Uses figment to layer built-in defaults, a YAML file and `PROTOGATE_`
//! environment variables. Configuration is read once at startup.

pub mod schema;

pub use schema::{BackendConfig, Config, ConfigError, LogConfig, TranslatorConfig};
