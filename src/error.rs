//! Error type shared by every pipeline stage.

use thiserror::Error;

use crate::tracker::TargetKey;

#[derive(Error, Debug)]
pub enum PoseError {
    /// Invalid or unsupported configuration. For targets, no id was assigned.
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Unknown target {0}")]
    UnknownTarget(TargetKey),
    #[error("Target {0} is not registered with the tracker")]
    NotRegistered(TargetKey),
    #[error("Registration finished without reporting a result")]
    RegistrationAborted,
    #[error("Failed to parse pipeline configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PoseError>;
