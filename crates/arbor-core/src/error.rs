//! Error types for Arbor Core

use crate::model::ModelId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using Arbor's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Optional capabilities a model may or may not provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Validate,
    Save,
    Reload,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validate => write!(f, "validate"),
            Self::Save => write!(f, "save"),
            Self::Reload => write!(f, "reload"),
        }
    }
}

/// Arbor error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Model already disposed: {0}")]
    Disposed(ModelId),

    #[error("Model {child} is already registered under parent {parent}")]
    AlreadyParented { child: ModelId, parent: ModelId },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Capability not supported: {0}")]
    Unsupported(Capability),

    #[error("Timed out after {timeout:?} waiting for the field lock of {model}")]
    LockTimeout { model: ModelId, timeout: Duration },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// True when the error only signals a capability the model does not provide
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}
