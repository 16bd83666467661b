//! Errores del binario y su código de salida.

use reel_core::{classify_error, ErrorClass, OrchestratorError};
use reel_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("store error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid argument: {0}")]
    Usage(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    /// 2 uso/validación, 3 no encontrado, 4 conflicto, 5 almacenamiento o interno.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Orchestrator(e) => match classify_error(e) {
                ErrorClass::Validation => 2,
                ErrorClass::NotFound => 3,
                ErrorClass::Conflict => 4,
                ErrorClass::Storage | ErrorClass::Internal => 5,
            },
            AppError::Config(_) | AppError::Usage(_) | AppError::Json(_) => 2,
            AppError::Persistence(_) | AppError::Io(_) => 5,
        }
    }
}
