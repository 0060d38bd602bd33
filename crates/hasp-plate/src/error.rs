//! Error types for plate operations

use hasp_core::{EntityIdError, ObjectId};
use hasp_template::TemplateError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for plate operations
pub type PlateResult<T> = Result<T, PlateError>;

/// Result type for the collaborators a plate talks through
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum PlateError {
    #[error("page {page} is outside 1..={max}")]
    InvalidPage { page: u32, max: u32 },

    #[error("template for {object}.{property} does not compile: {source}")]
    InvalidTemplate {
        object: ObjectId,
        property: String,
        #[source]
        source: TemplateError,
    },

    #[error("plate name is not a valid entity id: {0}")]
    InvalidName(#[from] EntityIdError),

    #[error("{} is not in allowlist_external_dirs", .0.display())]
    PathNotAllowed(PathBuf),

    #[error("{} is not a regular file", .0.display())]
    NotAFile(PathBuf),

    #[error("cannot read {}: {source}", path.display())]
    PagesFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {service} call: {reason}")]
    InvalidCommand { service: String, reason: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures of the MQTT client, the service backend or the restore store
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("MQTT publish to {topic} failed: {message}")]
    Publish { topic: String, message: String },

    #[error("service {service} failed: {message}")]
    Service { service: String, message: String },

    #[error("restore state: {0}")]
    Storage(String),
}
