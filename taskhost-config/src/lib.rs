//! Configuration management for taskhost
//!
//! A configuration document lists the task types the supervisor can run and
//! how it logs. Loading is structural: filesystem safety of executables and
//! working directories is checked by the execution layer, not here.

pub mod domains;
pub mod error;
pub mod loader;
pub mod validation;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::{default_config_path, ConfigFormat, ConfigLoader};
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    logging::{LogFormat, LogLevel, LoggingConfig},
    task::{TaskConfig, ORIGINAL_VALUE_PLACEHOLDER},
    TaskhostConfig,
};

// Re-export utilities
pub use domains::utils::{serde_duration, serde_duration_millis};
