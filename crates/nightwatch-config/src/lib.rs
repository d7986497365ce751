//! # Nightwatch Configuration
//!
//! Typed YAML configuration with environment-variable substitution and
//! semantic validation. Loaded once at startup; an invalid configuration
//! fails the process with a clear diagnostic (exit code 2).
//!
//! ```yaml
//! system:
//!   log_level: info
//! detectors:
//!   radar:
//!     enabled: true
//!     device: /dev/ttyAMA0
//! fusion:
//!   rules:
//!     - signal: respiration_rate
//!       strategy: weighted_average
//!       sources:
//!         - { detector: radar, field: respiration_rate, weight: 1.0 }
//!         - { detector: audio, field: breathing_rate, weight: 0.8 }
//! ```

#![forbid(unsafe_code)]

mod load;
mod model;

pub use load::{load_file, load_str, substitute_env};
pub use model::*;

use thiserror::Error;

/// Configuration errors. Structural problems come from the YAML layer,
/// semantic ones from [`NightwatchConfig::validate`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// YAML was malformed or did not match the schema.
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The configuration parsed but fails semantic validation.
    #[error("configuration invalid:\n{}", .0.join("\n"))]
    Invalid(Vec<String>),
}
