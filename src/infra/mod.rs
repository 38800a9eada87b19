//! Infrastructure - configuration, logging, metrics, and broker
//!
//! - `config` - Application configuration (TOML loading, defaults)
//! - `logging` - tracing subscriber setup
//! - `metrics` - Lock-free metrics collection
//! - `broker` - Embedded MQTT broker (rumqttd) for the mock service

pub mod broker;
pub mod config;
pub mod logging;
pub mod metrics;

// Re-export commonly used types
pub use config::{Config, TransportKind};
pub use metrics::Metrics;
