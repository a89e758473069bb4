//! Error types for the twin core.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TwinError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Model not trained: {0}")]
    NotTrained(&'static str),

    #[error("Model artifact not found: {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("Numeric fault: {0}")]
    NumericFault(String),

    #[error("Invalid training data: {0}")]
    InvalidTrainingData(String),

    #[error("Feature schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("Unknown fault kind: {0}")]
    UnknownFault(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl TwinError {
    /// Process exit status for a fatal error, following sysexits(3)
    pub fn code(&self) -> i32 {
        match self {
            TwinError::UnknownFault(_) => 64,
            TwinError::InvalidTrainingData(_) | TwinError::Json(_) => 65,
            TwinError::DataUnavailable(_) => 66,
            TwinError::NotTrained(_) => 69,
            TwinError::NumericFault(_) => 70,
            TwinError::ModelNotFound(_) => 72,
            TwinError::Io(_) => 74,
            TwinError::SchemaMismatch { .. } => 76,
            TwinError::Configuration(_) | TwinError::Toml(_) => 78,
        }
    }

    /// Whether a running pipeline can substitute a degraded output and carry on.
    ///
    /// Only static-description and schema problems are fatal; everything else
    /// is converted into a logged, degraded tick.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            TwinError::Configuration(_) | TwinError::SchemaMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TwinError>;
