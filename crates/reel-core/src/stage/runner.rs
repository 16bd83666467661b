//! Ejecución de un stage: reutilización de artifacts, timeout y persistencia
//! de resultados.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use log::{debug, info, warn};

use super::definition::{CancelFlag, StageContext, StageImplementation};
use super::sanitize::sanitize_message;
use crate::errors::{OrchestratorError, StageError};
use crate::model::{Artifact, Job, StageRegistry, StageSpec};
use crate::store::JobStore;

/// Resultado de ejecutar (o reutilizar) un stage.
#[derive(Debug, Clone)]
pub struct StageRun {
    pub artifacts: Vec<Artifact>,
    /// `true` si no se ejecutó la implementación porque ya había artifacts.
    pub reused: bool,
    pub elapsed: Duration,
}

pub struct StageRunner {
    implementations: IndexMap<String, Arc<dyn StageImplementation>>,
    store: Arc<dyn JobStore>,
}

impl StageRunner {
    pub fn new(store: Arc<dyn JobStore>, implementations: IndexMap<String, Arc<dyn StageImplementation>>) -> Self {
        Self { implementations, store }
    }

    /// Cada stage del registro debe tener implementación.
    pub fn validate(&self, registry: &StageRegistry) -> Result<(), OrchestratorError> {
        let missing: Vec<String> = registry.iter().filter(|s| !self.implementations.contains_key(&s.name)).map(|s| s.name.clone()).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::Registry(format!("no implementation for stages: {}", missing.join(", "))))
        }
    }

    /// Ejecuta el stage actual del job.
    ///
    /// Si el stage ya tiene artifacts y no se fuerza, se reutilizan sin llamar
    /// a la implementación. Los errores vuelven sanitizados.
    pub async fn run(&self, job: &Job, spec: &StageSpec, force: bool, cancel: CancelFlag) -> Result<StageRun, StageError> {
        let started = Instant::now();
        let all = self.store
                      .list_artifacts(job.id)
                      .map_err(|e| StageError::Artifacts(sanitize_message(&e.to_string())))?;
        let (existing, inputs): (Vec<Artifact>, Vec<Artifact>) = all.into_iter().partition(|a| a.stage == spec.name);
        if !existing.is_empty() && !force {
            info!("stage:reuse job={} stage={} artifacts={}", job.id, spec.name, existing.len());
            return Ok(StageRun { artifacts: existing, reused: true, elapsed: started.elapsed() });
        }

        let implementation = self.implementations.get(&spec.name).cloned().ok_or_else(|| StageError::Missing(spec.name.clone()))?;
        let ctx = StageContext::new(job.id,
                                    job.slug.clone(),
                                    spec.name.clone(),
                                    job.stage_index,
                                    job.attempt(&spec.name),
                                    job.config.clone(),
                                    inputs,
                                    cancel.clone(),
                                    self.store.clone());
        debug!("stage:run:start job={} stage={} force={} timeout={:?}", job.id, spec.name, force, spec.timeout);

        // Tarea propia: un panic del stage se convierte en fallo del stage.
        let mut handle = tokio::spawn(async move { implementation.run(ctx).await });
        let joined = match spec.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.cancel();
                    handle.abort();
                    warn!("stage:run:timeout job={} stage={} after={:?}", job.id, spec.name, limit);
                    return Err(StageError::Timeout(limit.as_millis() as u64));
                }
            },
            None => (&mut handle).await,
        };
        let drafts = match joined {
            Ok(Ok(drafts)) => drafts,
            Ok(Err(e)) => return Err(sanitize_error(e)),
            Err(join) if join.is_panic() => return Err(StageError::Failed(format!("stage '{}' panicked", spec.name))),
            Err(_) => return Err(StageError::Canceled),
        };
        if cancel.is_canceled() {
            return Err(StageError::Canceled);
        }

        let mut artifacts = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let stored = self.store
                             .put_artifact(job.id, &spec.name, draft)
                             .map_err(|e| StageError::Artifacts(sanitize_message(&e.to_string())))?;
            artifacts.push(stored);
        }
        info!("stage:run:done job={} stage={} artifacts={} elapsed_ms={}", job.id, spec.name, artifacts.len(), started.elapsed().as_millis());
        Ok(StageRun { artifacts, reused: false, elapsed: started.elapsed() })
    }
}

fn sanitize_error(err: StageError) -> StageError {
    match err {
        StageError::Failed(m) => StageError::Failed(sanitize_message(&m)),
        StageError::Artifacts(m) => StageError::Artifacts(sanitize_message(&m)),
        other => other,
    }
}
