//! Errores de persistencia.
//! Mapea errores de IO / serialización a variantes semánticas y luego al
//! `StoreError` del core.

use std::path::{Path, PathBuf};

use reel_core::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("serialization error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid name: {0}")]
    InvalidName(String),
}

impl PersistenceError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json { path: path.to_path_buf(), source }
    }
}

impl From<PersistenceError> for StoreError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::Io { path, source } => {
                StoreError::Io(std::io::Error::new(source.kind(), format!("{}: {}", path.display(), source)))
            }
            PersistenceError::Json { path, source } => StoreError::Corrupt(format!("{}: {}", path.display(), source)),
            PersistenceError::Encode(e) => StoreError::Serde(e),
            PersistenceError::NotFound(what) => StoreError::NotFound(what),
            PersistenceError::AlreadyExists(what) => StoreError::AlreadyExists(what),
            PersistenceError::InvalidName(name) => StoreError::Corrupt(format!("invalid name '{name}'")),
        }
    }
}
