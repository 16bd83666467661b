//! Persistencia del estado de jobs.
//!
//! `JobStore` agrupa todo lo que el orquestador necesita persistir: el job,
//! su log de eventos, gates, decisiones y artifacts. Es síncrono: los backends
//! de archivo hacen IO corto y nunca se llama mientras se espera a un stage.

mod memory;

pub use memory::InMemoryJobStore;

use uuid::Uuid;

use crate::errors::StoreError;
use crate::event::JobEvent;
use crate::model::{Artifact, ArtifactDraft, ArtifactUpdate, DecisionRecord, Gate, Job};

pub trait JobStore: Send + Sync {
    /// Registra un job nuevo. Falla con `AlreadyExists` si el id ya existe.
    fn insert_job(&self, job: &Job) -> Result<(), StoreError>;
    /// Sobrescribe el estado de un job existente.
    fn save_job(&self, job: &Job) -> Result<(), StoreError>;
    fn load_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;
    /// Todos los jobs, ordenados por fecha de creación.
    fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;

    fn append_event(&self, job_id: Uuid, event: &JobEvent) -> Result<(), StoreError>;
    /// Eventos del job en orden ascendente de `seq`.
    fn list_events(&self, job_id: Uuid) -> Result<Vec<JobEvent>, StoreError>;
    /// Conserva solo los últimos `keep_last` eventos. Devuelve cuántos eliminó.
    fn compact_events(&self, job_id: Uuid, keep_last: usize) -> Result<usize, StoreError>;

    /// Inserta o actualiza un gate (clave: `gate.id`).
    fn save_gate(&self, gate: &Gate) -> Result<(), StoreError>;
    fn list_gates(&self, job_id: Uuid) -> Result<Vec<Gate>, StoreError>;
    /// Guarda la última decisión del stage (reemplaza la anterior).
    fn save_decision(&self, record: &DecisionRecord) -> Result<(), StoreError>;
    fn list_decisions(&self, job_id: Uuid) -> Result<Vec<DecisionRecord>, StoreError>;

    /// Escribe (o reescribe) un artifact del stage.
    fn put_artifact(&self, job_id: Uuid, stage: &str, draft: &ArtifactDraft) -> Result<Artifact, StoreError>;
    fn list_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>, StoreError>;
    fn read_artifact(&self, job_id: Uuid, locator: &str) -> Result<Vec<u8>, StoreError>;
    /// Reemplaza el contenido de varios artifacts existentes. Todo o nada:
    /// si algún locator no existe no se escribe ninguno.
    fn replace_artifacts(&self, job_id: Uuid, updates: &[ArtifactUpdate]) -> Result<Vec<Artifact>, StoreError>;
}
