//! Configuration failures

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid YAML: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("!secret {key}: no such key in secrets.yaml")]
    MissingSecret { key: String },

    #[error("!include {path}: {reason}")]
    BadInclude { path: String, reason: String },

    #[error("{path} includes itself")]
    CircularInclude { path: PathBuf },

    #[error("!env_var {var}: not set and no default given")]
    MissingEnvVar { var: String },

    #[error("'{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// A section does not have the expected shape
    #[error("invalid '{section}' section: {source}")]
    Schema {
        section: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// A plate failed validation and will not be set up
    #[error("plate '{plate}': {reason}")]
    InvalidPlate { plate: String, reason: String },
}
