use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::StageError;
use crate::model::{Artifact, ArtifactDraft};
use crate::store::JobStore;

/// Señal cooperativa de cancelación. El stage debe consultarla en puntos
/// seguros; el runner descarta el resultado si se activó.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Contexto entregado a un stage en cada ejecución.
#[derive(Clone)]
pub struct StageContext {
    pub job_id: Uuid,
    pub slug: String,
    pub stage: String,
    pub stage_index: usize,
    /// Número de ejecución de este stage (1 = primera).
    pub attempt: u32,
    /// Snapshot de configuración del job.
    pub config: Value,
    /// Artifacts ya producidos por stages anteriores.
    pub inputs: Vec<Artifact>,
    pub cancel: CancelFlag,
    store: Arc<dyn JobStore>,
}

impl StageContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(job_id: Uuid,
                      slug: String,
                      stage: String,
                      stage_index: usize,
                      attempt: u32,
                      config: Value,
                      inputs: Vec<Artifact>,
                      cancel: CancelFlag,
                      store: Arc<dyn JobStore>)
                      -> Self {
        Self { job_id, slug, stage, stage_index, attempt, config, inputs, cancel, store }
    }

    /// Lee el contenido de un artifact de entrada.
    pub fn read_input(&self, artifact: &Artifact) -> Result<Vec<u8>, StageError> {
        self.store.read_artifact(self.job_id, &artifact.locator).map_err(|e| StageError::Failed(format!("cannot read {}: {e}", artifact.locator)))
    }

    /// Primer artifact de entrada producido por `stage`.
    pub fn input_from(&self, stage: &str) -> Option<&Artifact> {
        self.inputs.iter().find(|a| a.stage == stage)
    }

    /// Valor de configuración de nivel superior.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn check_canceled(&self) -> Result<(), StageError> {
        if self.cancel.is_canceled() {
            Err(StageError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Implementación concreta de un stage.
///
/// Las implementaciones son intercambiables: el orquestador solo conoce este
/// contrato. Deben ser idempotentes respecto a su contexto.
#[async_trait]
pub trait StageImplementation: Send + Sync {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError>;
}
