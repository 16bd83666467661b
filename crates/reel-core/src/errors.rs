//! Errores del core.
//!
//! `OrchestratorError` es el error que cruza la superficie de control; el
//! resto son errores de subsistema (store, patch, eventos, stage) que se
//! convierten con `From` para poder propagar con `?`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fallo del backend de persistencia (in-memory o archivos).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("store lock poisoned")]
    Poisoned,
}

/// Patch inválido o imposible de aplicar. Nunca deja artifacts a medio escribir.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PatchError {
    #[error("malformed patch: {0}")]
    Malformed(String),
    #[error("unsupported patch type '{0}'")]
    Unsupported(String),
    #[error("stage '{stage}' has no {target} artifact to patch")]
    NoTarget { stage: String, target: String },
    #[error("text not found in artifact: '{0}'")]
    TextNotFound(String),
    #[error("section '{0}' not found")]
    SectionNotFound(String),
    #[error("beat '{0}' not found")]
    BeatNotFound(String),
    #[error("invalid duration for beat '{beat}': {duration_ms}ms")]
    InvalidDuration { beat: String, duration_ms: i64 },
    #[error("level change {0}dB out of range")]
    LevelOutOfRange(f64),
    #[error("artifact is not patchable: {0}")]
    MalformedArtifact(String),
}

/// Evento rechazado en la frontera del bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("event is missing required field 'type'")]
    MissingType,
    #[error("unknown event type '{0}'")]
    UnknownType(String),
    #[error("heartbeat events are synthetic and cannot be emitted")]
    SyntheticType,
    #[error("event type '{0}' is reserved for the orchestrator")]
    Reserved(String),
    #[error("malformed event: {0}")]
    Malformed(String),
}

/// Fallo de un stage. Serializable: viaja en el payload de `stage_failed`.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageError {
    #[error("stage failed: {0}")]
    Failed(String),
    #[error("stage timed out after {0}ms")]
    Timeout(u64),
    #[error("stage canceled")]
    Canceled,
    #[error("no implementation registered for stage '{0}'")]
    Missing(String),
    #[error("artifact persistence failed: {0}")]
    Artifacts(String),
}

/// Error de la superficie de control del orquestador.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("job not found: {0}")]
    NotFound(String),
    /// La operación no aplica al estado actual (gate ya decidido, job terminal...).
    /// Nunca muta estado.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("registry error: {0}")]
    Registry(String),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error(transparent)]
    Event(#[from] EventError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl OrchestratorError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, OrchestratorError::Conflict(_))
    }
}

/// Clase gruesa de un error, usada por la CLI para elegir el código de salida.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NotFound,
    Conflict,
    Validation,
    Storage,
    Internal,
}

pub fn classify_error(err: &OrchestratorError) -> ErrorClass {
    match err {
        OrchestratorError::NotFound(_) => ErrorClass::NotFound,
        OrchestratorError::Store(StoreError::NotFound(_)) => ErrorClass::NotFound,
        OrchestratorError::Conflict(_) => ErrorClass::Conflict,
        OrchestratorError::Invalid(_) | OrchestratorError::Registry(_) | OrchestratorError::Patch(_) | OrchestratorError::Event(_) => ErrorClass::Validation,
        OrchestratorError::Store(_) => ErrorClass::Storage,
        OrchestratorError::Timeout(_) | OrchestratorError::Internal(_) => ErrorClass::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_variants() {
        assert_eq!(classify_error(&OrchestratorError::Conflict("x".into())), ErrorClass::Conflict);
        assert_eq!(classify_error(&OrchestratorError::Patch(PatchError::TextNotFound("foo".into()))), ErrorClass::Validation);
        assert_eq!(classify_error(&StoreError::NotFound("job".into()).into()), ErrorClass::NotFound);
        assert_eq!(classify_error(&StoreError::Poisoned.into()), ErrorClass::Storage);
    }

    #[test]
    fn stage_error_serializes() {
        let e = StageError::Timeout(1500);
        let v = serde_json::to_value(&e).unwrap();
        let back: StageError = serde_json::from_value(v).unwrap();
        assert_eq!(back, e);
        assert_eq!(e.to_string(), "stage timed out after 1500ms");
    }
}
