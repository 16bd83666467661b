//! Orquestador de jobs.
//!
//! Dueño de la máquina de estados. Toda transición de un job ocurre con el
//! lock de ese job tomado y se persiste antes de emitir el evento que la
//! describe; la ejecución de un stage ocurre fuera del lock y dentro de la
//! ranura de ejecución (`ExecutionLane`).

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, OwnedMutexGuard};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::constants::{ENGINE_VERSION, SYSTEM_DECIDER, TIMER_DECIDER};
use crate::errors::{OrchestratorError, StageError};
use crate::event::{EventBus, EventDraft, EventType, JobEvent, Subscription};
use crate::gate::manager::Decision;
use crate::gate::GateManager;
use crate::lane::ExecutionLane;
use crate::model::{Artifact, DecisionRecord, Gate, GateStatus, Job, JobStatus, StageGateStatus, StageRegistry, StageSpec};
use crate::patch::{supported_patch_types, Patch, PatchTypeInfo};
use crate::stage::{CancelFlag, StageRunner};
use crate::store::JobStore;

pub(crate) struct Inner {
    pub(crate) registry: StageRegistry,
    pub(crate) runner: StageRunner,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) bus: EventBus,
    pub(crate) gates: GateManager,
    pub(crate) lane: ExecutionLane,
    pub(crate) config: EngineConfig,
    pub(crate) queue_tx: mpsc::UnboundedSender<Uuid>,
    pub(crate) queue_rx: Mutex<Option<mpsc::UnboundedReceiver<Uuid>>>,
    pub(crate) job_locks: DashMap<Uuid, Arc<tokio::sync::Mutex<()>>>,
    pub(crate) cancel_flags: DashMap<Uuid, CancelFlag>,
}

/// Orquestador. Barato de clonar: todas las copias comparten estado.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<Inner>,
}

/// Resultado de un barrido de timeouts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    /// (job, stage) auto-aprobados en este barrido.
    pub auto_approved: Vec<(Uuid, String)>,
    /// Jobs PAUSED cancelados por expiración.
    pub expired: Vec<Uuid>,
}

/// Resultado de la recuperación al arrancar.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub interrupted: Vec<Uuid>,
    pub requeued: Vec<Uuid>,
}

fn elapsed_since(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (now - then).to_std().unwrap_or(Duration::ZERO)
}

impl Orchestrator {
    pub fn registry(&self) -> &StageRegistry {
        &self.inner.registry
    }

    pub fn lane(&self) -> &ExecutionLane {
        &self.inner.lane
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.inner.store.clone()
    }

    // ---------------------------------------------------------------------
    // Helpers internos
    // ---------------------------------------------------------------------

    async fn lock_job(&self, job_id: Uuid) -> OwnedMutexGuard<()> {
        let lock = self.inner.job_locks.entry(job_id).or_default().value().clone();
        lock.lock_owned().await
    }

    fn load_job(&self, job_id: Uuid) -> Result<Job, OrchestratorError> {
        self.inner.store.load_job(job_id)?.ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))
    }

    fn save(&self, job: &mut Job) -> Result<(), OrchestratorError> {
        job.touch();
        self.inner.store.save_job(job)?;
        Ok(())
    }

    fn emit(&self, job_id: Uuid, draft: EventDraft) -> Result<JobEvent, OrchestratorError> {
        self.inner.bus.emit(job_id, draft)
    }

    /// Borrador de evento asociado al stage actual del job (si existe).
    fn job_event(&self, job: &Job, event_type: EventType, message: impl Into<String>) -> EventDraft {
        let draft = EventDraft::new(event_type, message).status(job.status);
        match self.inner.registry.get(job.stage_index) {
            Some(spec) => draft.stage(spec.name.clone()),
            None => draft,
        }
    }

    fn enqueue(&self, job_id: Uuid) {
        if self.inner.queue_tx.send(job_id).is_err() {
            warn!("engine:enqueue dropped job={} (worker stopped)", job_id);
        } else {
            debug!("engine:enqueue job={}", job_id);
        }
    }

    fn retain_events(&self, job_id: Uuid) {
        let Some(keep) = self.inner.config.event_retention else { return };
        match self.inner.store.compact_events(job_id, keep) {
            Ok(0) => {}
            Ok(dropped) => debug!("engine:retention job={} dropped={}", job_id, dropped),
            Err(e) => warn!("engine:retention job={} failed: {}", job_id, e),
        }
    }

    /// Suelta el estado en memoria de un job terminal: lock, canal y cursor
    /// del bus. Se llama sin el lock del job tomado.
    fn release_if_terminal(&self, job_id: Uuid, status: JobStatus) {
        if !status.is_terminal() {
            return;
        }
        self.inner.job_locks.remove_if(&job_id, |_, lock| Arc::strong_count(lock) == 1);
        self.inner.bus.release(job_id);
        debug!("engine:release job={} status={}", job_id, status);
    }

    /// Jobs con estado en memoria (locks o canales de eventos).
    pub fn live_jobs(&self) -> usize {
        self.inner.job_locks.len().max(self.inner.bus.live_jobs())
    }

    fn validate_decider(by: &str) -> Result<(), OrchestratorError> {
        if by.trim().is_empty() {
            return Err(OrchestratorError::Invalid("decided_by must not be empty".into()));
        }
        Ok(())
    }

    fn check_stage(&self, stage: &str) -> Result<(), OrchestratorError> {
        if self.inner.registry.index_of(stage).is_none() {
            return Err(OrchestratorError::Invalid(format!("unknown stage '{stage}'")));
        }
        Ok(())
    }

    /// Gate pendiente que corresponde al stage indicado. Conflicto si no hay
    /// gate pendiente o si no coincide.
    fn pending_gate_for(&self, job: &Job, stage: &str) -> Result<Gate, OrchestratorError> {
        if job.status != JobStatus::NeedsApproval {
            return Err(OrchestratorError::Conflict(format!("job {} is {}, not awaiting approval", job.id, job.status)));
        }
        let gate = self.inner
                       .gates
                       .pending(job.id)?
                       .ok_or_else(|| OrchestratorError::Conflict(format!("job {} has no pending gate", job.id)))?;
        if gate.stage != stage || gate.stage_index != job.stage_index {
            return Err(OrchestratorError::Conflict(format!("pending gate is for stage '{}', not '{}'", gate.stage, stage)));
        }
        Ok(gate)
    }

    // ---------------------------------------------------------------------
    // Ciclo de vida
    // ---------------------------------------------------------------------

    /// Crea un job nuevo para `slug` y lo encola.
    pub fn submit(&self, slug: &str, config: Value) -> Result<Job, OrchestratorError> {
        self.start(Job::new(slug, config))
    }

    /// Persiste el job como QUEUED, emite `job_started` y lo encola.
    pub fn start(&self, mut job: Job) -> Result<Job, OrchestratorError> {
        if job.slug.trim().is_empty() {
            return Err(OrchestratorError::Invalid("slug must not be empty".into()));
        }
        if !job.config.is_object() {
            return Err(OrchestratorError::Invalid("config must be a JSON object".into()));
        }
        self.inner.runner.validate(&self.inner.registry)?;
        job.status = JobStatus::Queued;
        job.stage_index = 0;
        self.inner.store.insert_job(&job)?;
        let draft = EventDraft::new(EventType::JobStarted, format!("job '{}' started", job.slug))
            .status(JobStatus::Queued)
            .payload(json!({
                "slug": job.slug,
                "config_hash": job.config_hash,
                "stages": self.inner.registry.names(),
                "engine_version": ENGINE_VERSION,
            }));
        self.emit(job.id, draft)?;
        info!("engine:start job={} slug={}", job.id, job.slug);
        self.enqueue(job.id);
        Ok(job)
    }

    /// Avanza el job tomando la ranura de ejecución hasta que se estaciona,
    /// falla, termina o se cancela. Devuelve el estado final observado.
    pub async fn advance(&self, job_id: Uuid) -> Result<JobStatus, OrchestratorError> {
        let _permit = self.inner.lane.acquire().await?;
        let status = self.drive(job_id).await?;
        self.release_if_terminal(job_id, status);
        Ok(status)
    }

    async fn drive(&self, job_id: Uuid) -> Result<JobStatus, OrchestratorError> {
        let mut entered = false;
        loop {
            let (job, spec, force, cancel) = {
                let _guard = self.lock_job(job_id).await;
                let mut job = self.load_job(job_id)?;
                let runnable = match job.status {
                    JobStatus::Queued => true,
                    JobStatus::Running => entered,
                    _ => false,
                };
                if !runnable {
                    debug!("engine:advance:skip job={} status={}", job_id, job.status);
                    return Ok(job.status);
                }
                entered = true;
                let Some(spec) = self.inner.registry.get(job.stage_index).cloned() else {
                    self.complete(&mut job)?;
                    return Ok(job.status);
                };
                let force = std::mem::take(&mut job.force_rerun);
                *job.attempts.entry(spec.name.clone()).or_insert(0) += 1;
                job.status = JobStatus::Running;
                job.error = None;
                self.save(&mut job)?;
                let cancel = CancelFlag::new();
                self.inner.cancel_flags.insert(job_id, cancel.clone());
                let draft = self.job_event(&job, EventType::StageStarted, format!("stage '{}' started", spec.name))
                                .payload(json!({
                                    "stage_index": job.stage_index,
                                    "attempt": job.attempt(&spec.name),
                                    "force": force,
                                }));
                self.emit(job_id, draft)?;
                (job, spec, force, cancel)
            };

            let outcome = self.inner.runner.run(&job, &spec, force, cancel).await;
            self.inner.cancel_flags.remove(&job_id);

            let _guard = self.lock_job(job_id).await;
            let mut job = self.load_job(job_id)?;
            if job.status != JobStatus::Running {
                // Cancelado mientras el stage corría: el resultado se descarta.
                info!("engine:advance:discard job={} stage={} status={}", job_id, spec.name, job.status);
                return Ok(job.status);
            }
            let run = match outcome {
                Ok(run) => run,
                Err(err) => {
                    self.fail(&mut job, &spec, err)?;
                    return Ok(job.status);
                }
            };
            let locators: Vec<&str> = run.artifacts.iter().map(|a| a.locator.as_str()).collect();
            let draft = self.job_event(&job, EventType::StageCompleted, format!("stage '{}' completed", spec.name))
                            .payload(json!({
                                "stage_index": job.stage_index,
                                "reused": run.reused,
                                "artifacts": locators,
                                "elapsed_ms": run.elapsed.as_millis() as u64,
                            }));
            self.emit(job_id, draft)?;

            if spec.gate_required {
                let gate = match self.inner.gates.pending(job_id)? {
                    // Abierto antes de un reinicio que cortó la transición a NEEDS_APPROVAL.
                    Some(g) if g.stage == spec.name && g.stage_index == job.stage_index => g,
                    _ => self.inner.gates.open(job_id, &spec.name, job.stage_index)?,
                };
                if spec.auto_approve && spec.auto_approve_after.is_zero() {
                    self.approve_locked(&mut job, gate, TIMER_DECIDER, Some("auto-approved on arrival".into()), None, false)?;
                    if job.status.is_terminal() {
                        return Ok(job.status);
                    }
                    continue;
                }
                job.status = JobStatus::NeedsApproval;
                self.save(&mut job)?;
                let draft = self.job_event(&job, EventType::GatePause, format!("stage '{}' awaiting approval", spec.name))
                                .payload(json!({
                                    "gate_id": gate.id,
                                    "stage_index": job.stage_index,
                                    "auto_approve": spec.auto_approve,
                                    "auto_approve_after_secs": spec.auto_approve_after.as_secs_f64(),
                                }));
                self.emit(job_id, draft)?;
                info!("engine:advance:gate job={} stage={}", job_id, spec.name);
                return Ok(job.status);
            }

            job.stage_index += 1;
            if job.stage_index >= self.inner.registry.len() {
                self.complete(&mut job)?;
                return Ok(job.status);
            }
            self.save(&mut job)?;
        }
    }

    fn fail(&self, job: &mut Job, spec: &StageSpec, err: StageError) -> Result<(), OrchestratorError> {
        job.status = JobStatus::Failed;
        job.error = Some(err.to_string());
        self.save(job)?;
        let draft = self.job_event(job, EventType::StageFailed, err.to_string())
                        .payload(json!({ "stage_index": job.stage_index, "error": err }));
        self.emit(job.id, draft)?;
        warn!("engine:advance:failed job={} stage={} error={}", job.id, spec.name, err);
        self.retain_events(job.id);
        Ok(())
    }

    fn complete(&self, job: &mut Job) -> Result<(), OrchestratorError> {
        job.status = JobStatus::Completed;
        self.save(job)?;
        let draft = EventDraft::new(EventType::JobCompleted, format!("job '{}' completed", job.slug))
            .status(JobStatus::Completed)
            .payload(json!({ "stages": self.inner.registry.len() }));
        self.emit(job.id, draft)?;
        info!("engine:complete job={}", job.id);
        self.retain_events(job.id);
        Ok(())
    }

    /// Camino único de aprobación (humana o por timer). Requiere el lock del job.
    fn approve_locked(&self,
                      job: &mut Job,
                      gate: Gate,
                      by: &str,
                      notes: Option<String>,
                      patch: Option<Patch>,
                      requeue: bool)
                      -> Result<(), OrchestratorError> {
        let written = match &patch {
            Some(p) => Some(self.inner.gates.apply_patch(job.id, &gate.stage, p)?),
            None => None,
        };
        let decision = Decision { status: GateStatus::Approved,
                                  decided_by: by.to_string(),
                                  notes: notes.clone(),
                                  patch: patch.clone(),
                                  patch_applied: written.is_some() };
        let (resolved, _) = self.inner.gates.decide(&gate, decision)?;

        job.stage_index += 1;
        let finished = job.stage_index >= self.inner.registry.len();
        if !finished {
            job.status = JobStatus::Queued;
            self.save(job)?;
        }

        if let (Some(p), Some(written)) = (&patch, &written) {
            self.emit_patch_applied(job.id, &gate.stage, gate.stage_index, p, written)?;
        }
        if by == TIMER_DECIDER {
            let waited = elapsed_since(Utc::now(), gate.created_at);
            let draft = EventDraft::new(EventType::GateAutoApproved, format!("stage '{}' auto-approved", gate.stage))
                .stage(gate.stage.clone())
                .payload(json!({ "gate_id": gate.id, "stage_index": gate.stage_index, "waited_ms": waited.as_millis() as u64 }));
            self.emit(job.id, draft)?;
        }
        let draft = EventDraft::new(EventType::GateApproved, format!("stage '{}' approved by {}", gate.stage, by))
            .stage(gate.stage.clone())
            .payload(json!({
                "gate_id": resolved.id,
                "stage_index": gate.stage_index,
                "decided_by": by,
                "notes": notes,
            }));
        self.emit(job.id, draft)?;

        if finished {
            self.complete(job)?;
        } else if requeue {
            self.enqueue(job.id);
        }
        Ok(())
    }

    fn patch_payload(stage: &str, stage_index: usize, patch: &Patch, written: &[Artifact], direct: bool) -> Value {
        let locators: Vec<&str> = written.iter().map(|a| a.locator.as_str()).collect();
        json!({
            "target": patch.target(),
            "type": patch.patch_type(),
            "artifacts": locators,
            "patched_stage": stage,
            "stage_index": stage_index,
            "direct": direct,
        })
    }

    fn emit_patch_applied(&self, job_id: Uuid, stage: &str, stage_index: usize, patch: &Patch, written: &[Artifact]) -> Result<(), OrchestratorError> {
        let draft = EventDraft::new(EventType::PatchApplied, format!("{} patch applied to '{}'", patch.patch_type(), stage))
            .stage(stage)
            .payload(Self::patch_payload(stage, stage_index, patch, written, false));
        self.emit(job_id, draft)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Decisiones y control
    // ---------------------------------------------------------------------

    /// Aprueba el gate pendiente de `stage`. Con patch, se aplica antes de
    /// registrar la decisión; si el patch falla no se decide nada.
    pub async fn approve(&self, job_id: Uuid, stage: &str, by: &str, notes: Option<String>, patch: Option<Patch>) -> Result<Job, OrchestratorError> {
        Self::validate_decider(by)?;
        self.check_stage(stage)?;
        let job = {
            let _guard = self.lock_job(job_id).await;
            let mut job = self.load_job(job_id)?;
            let gate = self.pending_gate_for(&job, stage)?;
            self.approve_locked(&mut job, gate, by, notes, patch, true)?;
            job
        };
        self.release_if_terminal(job_id, job.status);
        Ok(job)
    }

    /// Rechaza el gate pendiente de `stage`. Con patch: reintento del mismo
    /// stage sobre los artifacts parcheados. Sin patch: el job queda PAUSED.
    pub async fn reject(&self, job_id: Uuid, stage: &str, by: &str, notes: Option<String>, patch: Option<Patch>) -> Result<Job, OrchestratorError> {
        Self::validate_decider(by)?;
        self.check_stage(stage)?;
        let _guard = self.lock_job(job_id).await;
        let mut job = self.load_job(job_id)?;
        let gate = self.pending_gate_for(&job, stage)?;
        let written = match &patch {
            Some(p) => Some(self.inner.gates.apply_patch(job_id, stage, p)?),
            None => None,
        };
        let decision = Decision { status: GateStatus::Rejected,
                                  decided_by: by.to_string(),
                                  notes: notes.clone(),
                                  patch: patch.clone(),
                                  patch_applied: written.is_some() };
        let (resolved, _) = self.inner.gates.decide(&gate, decision)?;

        job.status = if written.is_some() { JobStatus::Queued } else { JobStatus::Paused };
        self.save(&mut job)?;

        let draft = self.job_event(&job, EventType::GateRejected, format!("stage '{}' rejected by {}", stage, by))
                        .payload(json!({
                            "gate_id": resolved.id,
                            "stage_index": gate.stage_index,
                            "decided_by": by,
                            "notes": notes,
                            "with_patch": written.is_some(),
                        }));
        self.emit(job_id, draft)?;

        match (&patch, &written) {
            (Some(p), Some(written)) => {
                self.emit_patch_applied(job_id, stage, gate.stage_index, p, written)?;
                let draft = self.job_event(&job, EventType::StageRetry, format!("retrying stage '{}'", stage))
                                .payload(json!({ "stage_index": job.stage_index, "next_attempt": job.attempt(stage) + 1 }));
                self.emit(job_id, draft)?;
                info!("engine:reject:retry job={} stage={}", job_id, stage);
                self.enqueue(job_id);
            }
            _ => {
                let draft = self.job_event(&job, EventType::JobPaused, format!("job paused after rejecting '{}'", stage))
                                .payload(json!({ "stage_index": job.stage_index, "reason": "rejected" }));
                self.emit(job_id, draft)?;
                info!("engine:reject:paused job={} stage={}", job_id, stage);
            }
        }
        Ok(job)
    }

    /// Reanuda un job PAUSED (incluidos los interrumpidos por un reinicio).
    pub async fn resume(&self, job_id: Uuid, force: bool) -> Result<Job, OrchestratorError> {
        let _guard = self.lock_job(job_id).await;
        let mut job = self.load_job(job_id)?;
        if job.status != JobStatus::Paused {
            return Err(OrchestratorError::Conflict(format!("job {} is {}, only PAUSED jobs can be resumed", job_id, job.status)));
        }
        let was_interrupted = job.interrupted;
        job.status = JobStatus::Queued;
        job.force_rerun = force;
        job.interrupted = false;
        self.save(&mut job)?;
        let draft = self.job_event(&job, EventType::JobResumed, "job resumed")
                        .payload(json!({ "stage_index": job.stage_index, "force": force, "was_interrupted": was_interrupted }));
        self.emit(job_id, draft)?;
        info!("engine:resume job={} force={}", job_id, force);
        self.enqueue(job_id);
        Ok(job)
    }

    /// Cancela el job. Si está ejecutando, la parada es cooperativa y el
    /// resultado del stage en curso se descarta.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job, OrchestratorError> {
        let job = self.cancel_with(job_id, None, "canceled by operator").await?;
        self.release_if_terminal(job_id, job.status);
        Ok(job)
    }

    async fn cancel_with(&self, job_id: Uuid, expected: Option<JobStatus>, reason: &str) -> Result<Job, OrchestratorError> {
        let _guard = self.lock_job(job_id).await;
        let mut job = self.load_job(job_id)?;
        if job.status.is_terminal() {
            return Err(OrchestratorError::Conflict(format!("job {} is already {}", job_id, job.status)));
        }
        if let Some(expected) = expected {
            if job.status != expected {
                return Err(OrchestratorError::Conflict(format!("job {} is {}, expected {}", job_id, job.status, expected)));
            }
        }
        let previous = job.status;
        if let Some(gate) = self.inner.gates.pending(job_id)? {
            let decision = Decision { status: GateStatus::Canceled,
                                      decided_by: SYSTEM_DECIDER.to_string(),
                                      notes: Some(reason.to_string()),
                                      patch: None,
                                      patch_applied: false };
            self.inner.gates.decide(&gate, decision)?;
        }
        job.status = JobStatus::Canceled;
        self.save(&mut job)?;
        let cooperative = previous == JobStatus::Running;
        if cooperative {
            if let Some(flag) = self.inner.cancel_flags.get(&job_id) {
                flag.cancel();
            }
        }
        let draft = self.job_event(&job, EventType::JobCanceled, reason)
                        .payload(json!({ "previous_status": previous, "stage_index": job.stage_index, "cooperative": cooperative }));
        self.emit(job_id, draft)?;
        info!("engine:cancel job={} previous={}", job_id, previous);
        self.retain_events(job_id);
        Ok(job)
    }

    /// Aplica un patch directamente sobre los artifacts de un stage, fuera de
    /// una decisión de gate. El job no puede estar ejecutando.
    pub async fn apply_patch(&self, job_id: Uuid, stage: &str, patch: Patch) -> Result<Vec<Artifact>, OrchestratorError> {
        self.check_stage(stage)?;
        let _guard = self.lock_job(job_id).await;
        let job = self.load_job(job_id)?;
        if job.status == JobStatus::Running || job.status.is_terminal() {
            return Err(OrchestratorError::Conflict(format!("job {job_id} is {}, patches need a parked job", job.status)));
        }
        let written = self.inner.gates.apply_patch(job_id, stage, &patch)?;
        let stage_index = self.inner.registry.index_of(stage).unwrap_or(job.stage_index);
        // El evento va bajo el stage actual; el stage parcheado queda en el payload.
        let draft = self.job_event(&job, EventType::PatchApplied, format!("{} patch applied to '{}'", patch.patch_type(), stage))
                        .payload(Self::patch_payload(stage, stage_index, &patch, &written, true));
        self.emit(job_id, draft)?;
        Ok(written)
    }

    /// Barrido periódico: auto-aprueba gates vencidos y expira jobs PAUSED
    /// según la política configurada. No usa la ranura de ejecución.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<SweepReport, OrchestratorError> {
        let mut report = SweepReport::default();
        for job in self.inner.store.list_jobs()? {
            match job.status {
                JobStatus::NeedsApproval => {
                    let Some(gate) = self.inner.gates.pending(job.id)? else { continue };
                    let Some(spec) = self.inner.registry.by_name(&gate.stage) else { continue };
                    if !spec.auto_approve {
                        continue;
                    }
                    let waited = elapsed_since(now, gate.created_at);
                    if waited < spec.auto_approve_after {
                        continue;
                    }
                    let notes = format!("auto-approved after {}s", waited.as_secs());
                    match self.approve(job.id, &gate.stage, TIMER_DECIDER, Some(notes), None).await {
                        Ok(_) => report.auto_approved.push((job.id, gate.stage.clone())),
                        Err(e) if e.is_conflict() => debug!("engine:sweep job={} gate resolved concurrently", job.id),
                        Err(e) => warn!("engine:sweep job={} auto-approve failed: {}", job.id, e),
                    }
                }
                JobStatus::Paused => {
                    let Some(expiry) = self.inner.config.paused_expiry else { continue };
                    if elapsed_since(now, job.updated_at) < expiry {
                        continue;
                    }
                    match self.cancel_with(job.id, Some(JobStatus::Paused), "paused job expired").await {
                        Ok(canceled) => {
                            self.release_if_terminal(job.id, canceled.status);
                            report.expired.push(job.id);
                        }
                        Err(e) if e.is_conflict() => debug!("engine:sweep job={} no longer paused", job.id),
                        Err(e) => warn!("engine:sweep job={} expiry failed: {}", job.id, e),
                    }
                }
                _ => {}
            }
        }
        if !report.auto_approved.is_empty() || !report.expired.is_empty() {
            info!("engine:sweep auto_approved={} expired={}", report.auto_approved.len(), report.expired.len());
        }
        Ok(report)
    }

    /// Recuperación tras reinicio: RUNNING pasa a PAUSED interrumpido (se
    /// reanuda a mano); QUEUED se vuelve a encolar.
    pub async fn recover(&self) -> Result<RecoveryReport, OrchestratorError> {
        let mut report = RecoveryReport::default();
        for listed in self.inner.store.list_jobs()? {
            match listed.status {
                JobStatus::Running => {
                    let _guard = self.lock_job(listed.id).await;
                    let mut job = self.load_job(listed.id)?;
                    if job.status != JobStatus::Running {
                        continue;
                    }
                    job.status = JobStatus::Paused;
                    job.interrupted = true;
                    self.save(&mut job)?;
                    let draft = self.job_event(&job, EventType::JobInterrupted, "job interrupted by restart")
                                    .payload(json!({ "stage_index": job.stage_index }));
                    self.emit(job.id, draft)?;
                    warn!("engine:recover interrupted job={} stage_index={}", job.id, job.stage_index);
                    report.interrupted.push(job.id);
                }
                JobStatus::Queued => {
                    self.enqueue(listed.id);
                    report.requeued.push(listed.id);
                }
                _ => {}
            }
        }
        Ok(report)
    }

    /// Espera a que el job quede estacionado (NEEDS_APPROVAL, PAUSED) o terminal.
    pub async fn wait_settled(&self, job_id: Uuid, timeout: Duration) -> Result<Job, OrchestratorError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut sub = self.inner.bus.subscribe(job_id, None)?;
        loop {
            let job = self.load_job(job_id)?;
            if job.status.is_settled() {
                return Ok(job);
            }
            match tokio::time::timeout_at(deadline, sub.next()).await {
                Ok(Some(_)) => {}
                Ok(None) => sub = self.inner.bus.subscribe(job_id, None)?,
                Err(_) => return Err(OrchestratorError::Timeout(format!("job {job_id} still {} after {:?}", job.status, timeout))),
            }
        }
    }

    // ---------------------------------------------------------------------
    // Eventos
    // ---------------------------------------------------------------------

    /// Emite un evento externo (JSON libre). Se rechaza si no trae `type`, si
    /// el tipo pertenece al ciclo de vida del job o si el job ya terminó.
    pub async fn emit_event(&self, job_id: Uuid, value: &Value) -> Result<JobEvent, OrchestratorError> {
        let draft = EventDraft::from_value(value)?;
        let _guard = self.lock_job(job_id).await;
        let job = self.load_job(job_id)?;
        if job.status.is_terminal() {
            return Err(OrchestratorError::Conflict(format!("job {job_id} is {}, its event log is closed", job.status)));
        }
        self.emit(job_id, draft)
    }

    pub fn poll_events(&self, job_id: Uuid, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<JobEvent>, OrchestratorError> {
        self.load_job(job_id)?;
        self.inner.bus.poll(job_id, since, limit)
    }

    pub fn subscribe(&self, job_id: Uuid, since: Option<DateTime<Utc>>) -> Result<Subscription, OrchestratorError> {
        self.inner.bus.subscribe(job_id, since)
    }

    // ---------------------------------------------------------------------
    // Consultas
    // ---------------------------------------------------------------------

    pub fn get_job(&self, job_id: Uuid) -> Result<Job, OrchestratorError> {
        self.load_job(job_id)
    }

    pub fn list_jobs(&self) -> Result<Vec<Job>, OrchestratorError> {
        Ok(self.inner.store.list_jobs()?)
    }

    pub fn gate_status(&self, job_id: Uuid) -> Result<Vec<StageGateStatus>, OrchestratorError> {
        self.load_job(job_id)?;
        self.inner.gates.status(job_id, &self.inner.registry)
    }

    pub fn pending_gate(&self, job_id: Uuid) -> Result<Option<Gate>, OrchestratorError> {
        self.load_job(job_id)?;
        self.inner.gates.pending(job_id)
    }

    pub fn gates(&self, job_id: Uuid) -> Result<Vec<Gate>, OrchestratorError> {
        self.load_job(job_id)?;
        self.inner.gates.list(job_id)
    }

    pub fn decisions(&self, job_id: Uuid) -> Result<Vec<DecisionRecord>, OrchestratorError> {
        self.load_job(job_id)?;
        self.inner.gates.decisions(job_id)
    }

    pub fn artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>, OrchestratorError> {
        self.load_job(job_id)?;
        Ok(self.inner.store.list_artifacts(job_id)?)
    }

    pub fn read_artifact(&self, job_id: Uuid, locator: &str) -> Result<Vec<u8>, OrchestratorError> {
        Ok(self.inner.store.read_artifact(job_id, locator)?)
    }

    pub fn supported_patch_types() -> Vec<PatchTypeInfo> {
        supported_patch_types()
    }
}
