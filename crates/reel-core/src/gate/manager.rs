//! Gestor de gates.
//!
//! Mantiene el invariante "como mucho un gate PENDING por job", registra
//! decisiones y aplica patches sobre los artifacts de un stage. No emite
//! eventos ni cambia el estado del job: eso es responsabilidad del
//! orquestador, que llama aquí con el lock del job tomado.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use uuid::Uuid;

use crate::errors::OrchestratorError;
use crate::model::{Artifact, DecisionRecord, Gate, GateStatus, StageGateState, StageGateStatus, StageRegistry};
use crate::patch::{apply_patch, Patch};
use crate::store::JobStore;

/// Datos de una decisión humana o automática.
#[derive(Debug, Clone)]
pub struct Decision {
    pub status: GateStatus,
    pub decided_by: String,
    pub notes: Option<String>,
    pub patch: Option<Patch>,
    pub patch_applied: bool,
}

pub struct GateManager {
    store: Arc<dyn JobStore>,
}

impl GateManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn pending(&self, job_id: Uuid) -> Result<Option<Gate>, OrchestratorError> {
        Ok(self.store.list_gates(job_id)?.into_iter().find(Gate::is_pending))
    }

    pub fn list(&self, job_id: Uuid) -> Result<Vec<Gate>, OrchestratorError> {
        Ok(self.store.list_gates(job_id)?)
    }

    /// Abre un gate para el stage. Conflicto si ya hay uno pendiente.
    pub fn open(&self, job_id: Uuid, stage: &str, stage_index: usize) -> Result<Gate, OrchestratorError> {
        if let Some(existing) = self.pending(job_id)? {
            return Err(OrchestratorError::Conflict(format!("job {job_id} already has a pending gate for '{}'", existing.stage)));
        }
        let gate = Gate::open(job_id, stage, stage_index);
        self.store.save_gate(&gate)?;
        debug!("gate:open job={} stage={} gate={}", job_id, stage, gate.id);
        Ok(gate)
    }

    /// Resuelve un gate pendiente y guarda el registro de decisión del stage.
    pub fn decide(&self, gate: &Gate, decision: Decision) -> Result<(Gate, DecisionRecord), OrchestratorError> {
        let current = self.store
                          .list_gates(gate.job_id)?
                          .into_iter()
                          .find(|g| g.id == gate.id)
                          .ok_or_else(|| OrchestratorError::NotFound(format!("gate {}", gate.id)))?;
        if !current.is_pending() {
            return Err(OrchestratorError::Conflict(format!("gate for '{}' already resolved", current.stage)));
        }
        if decision.status == GateStatus::Pending {
            return Err(OrchestratorError::Invalid("a decision cannot leave the gate pending".into()));
        }
        let now = Utc::now();
        let resolved = Gate { status: decision.status,
                              decided_by: Some(decision.decided_by.clone()),
                              decided_at: Some(now),
                              notes: decision.notes.clone(),
                              ..current };
        let record = DecisionRecord { job_id: resolved.job_id,
                                      gate_id: resolved.id,
                                      stage: resolved.stage.clone(),
                                      decision: decision.status,
                                      decided_by: decision.decided_by,
                                      decided_at: now,
                                      notes: decision.notes,
                                      patch: decision.patch,
                                      patch_applied: decision.patch_applied };
        self.store.save_gate(&resolved)?;
        if resolved.status != GateStatus::Canceled {
            self.store.save_decision(&record)?;
        }
        info!("gate:decide job={} stage={} status={:?} by={}", resolved.job_id, resolved.stage, resolved.status, record.decided_by);
        Ok((resolved, record))
    }

    /// Aplica un patch a los artifacts del stage. Todo o nada: si el patch no
    /// valida contra algún artifact, ninguno se modifica.
    pub fn apply_patch(&self, job_id: Uuid, stage: &str, patch: &Patch) -> Result<Vec<Artifact>, OrchestratorError> {
        let mut current = Vec::new();
        for artifact in self.store.list_artifacts(job_id)?.into_iter().filter(|a| a.stage == stage) {
            let content = self.store.read_artifact(job_id, &artifact.locator)?;
            current.push((artifact, content));
        }
        let updates = apply_patch(patch, stage, &current)?;
        let written = self.store.replace_artifacts(job_id, &updates)?;
        info!("gate:patch job={} stage={} type={} artifacts={}", job_id, stage, patch.patch_type(), written.len());
        Ok(written)
    }

    pub fn decisions(&self, job_id: Uuid) -> Result<Vec<DecisionRecord>, OrchestratorError> {
        Ok(self.store.list_decisions(job_id)?)
    }

    /// Estado de gate por stage: pendiente, última decisión o nada.
    pub fn status(&self, job_id: Uuid, registry: &StageRegistry) -> Result<Vec<StageGateStatus>, OrchestratorError> {
        let pending = self.pending(job_id)?;
        let decisions = self.decisions(job_id)?;
        Ok(registry.iter()
                   .map(|spec| {
                       let state = match (&pending, decisions.iter().find(|d| d.stage == spec.name)) {
                           (Some(g), _) if g.stage == spec.name => StageGateState::Pending { gate_id: g.id, since: g.created_at },
                           (_, Some(d)) => StageGateState::Decided { decision: d.clone() },
                           _ => StageGateState::None,
                       };
                       StageGateStatus { stage: spec.name.clone(), gate_required: spec.gate_required, state }
                   })
                   .collect())
    }
}
