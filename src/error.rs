use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::domain::ArtifactKind;

#[derive(Debug, Error, Diagnostic)]
pub enum MmitError {
    #[error("invalid sample record #{index}: {reason}")]
    InvalidSampleShape { index: usize, reason: String },

    #[error("dataset {dataset} has no {kind} path")]
    MissingArtifactPath { dataset: String, kind: ArtifactKind },

    #[error("invalid artifact path: {0}")]
    InvalidArtifactPath(String),

    #[error("failed to read input file at {0}")]
    InputRead(PathBuf),

    #[error("failed to parse input JSON: {0}")]
    InputParse(String),

    #[error("no store given and no store.bucket configured in mmit.json")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("object store request failed: {0}")]
    StoreHttp(String),

    #[error("object store returned status {status}: {message}")]
    StoreStatus { status: u16, message: String },

    #[error("payload of {0} is not valid UTF-8")]
    TextDecode(String),

    #[error("annotation service request failed: {0}")]
    ServiceHttp(String),

    #[error("annotation service returned status {status}: {message}")]
    ServiceStatus { status: u16, message: String },

    #[error("malformed annotation service response: {0}")]
    ServiceResponse(String),

    #[error("dataset not found in annotation service: {0}")]
    DatasetNotFound(String),

    #[error("failed to decode isotope image: {0}")]
    ImageDecode(String),

    #[error("failed to serialize study document: {0}")]
    Serialization(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

/// Coarse grouping used for reporting and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Data,
    Transfer,
    Service,
    Serialization,
    Config,
    Io,
}

impl MmitError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MmitError::InvalidSampleShape { .. }
            | MmitError::MissingArtifactPath { .. }
            | MmitError::InvalidArtifactPath(_)
            | MmitError::InputRead(_)
            | MmitError::InputParse(_) => ErrorClass::Data,
            MmitError::ObjectNotFound(_)
            | MmitError::StoreHttp(_)
            | MmitError::StoreStatus { .. }
            | MmitError::TextDecode(_) => ErrorClass::Transfer,
            MmitError::ServiceHttp(_)
            | MmitError::ServiceStatus { .. }
            | MmitError::ServiceResponse(_)
            | MmitError::DatasetNotFound(_)
            | MmitError::ImageDecode(_) => ErrorClass::Service,
            MmitError::Serialization(_) => ErrorClass::Serialization,
            MmitError::MissingConfig | MmitError::ConfigRead(_) | MmitError::ConfigParse(_) => {
                ErrorClass::Config
            }
            MmitError::Filesystem(_) => ErrorClass::Io,
        }
    }
}
