//! Tareas en segundo plano: el worker de la cola de ejecución y el barrido
//! periódico de timeouts.

use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::core::Orchestrator;
use crate::errors::OrchestratorError;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Handle de las tareas de fondo. Soltarlo detiene ambas.
pub struct BackgroundHandle {
    worker: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl BackgroundHandle {
    pub fn is_running(&self) -> bool {
        !self.worker.is_finished() && !self.sweeper.is_finished()
    }

    /// Detiene worker y barrido. Un stage en curso no se espera: su job queda
    /// RUNNING y la recuperación del próximo arranque lo marca interrumpido.
    pub fn shutdown(self) {
        info!("engine:background shutdown");
    }
}

impl Drop for BackgroundHandle {
    fn drop(&mut self) {
        self.worker.abort();
        self.sweeper.abort();
    }
}

impl Orchestrator {
    /// Arranca el worker único de la cola y el barrido de timeouts en el
    /// runtime de tokio actual. Solo puede llamarse una vez por orquestador.
    pub fn spawn_background(&self) -> Result<BackgroundHandle, OrchestratorError> {
        let rx = self.inner
                     .queue_rx
                     .lock()
                     .map_err(|_| OrchestratorError::Internal("queue lock poisoned".into()))?
                     .take()
                     .ok_or_else(|| OrchestratorError::Conflict("background tasks already started".into()))?;
        let worker = tokio::spawn(run_worker(self.clone(), rx));
        let sweeper = tokio::spawn(run_sweeper(self.clone()));
        info!("engine:background started sweep_interval={:?}", self.inner.config.sweep_interval);
        Ok(BackgroundHandle { worker, sweeper })
    }
}

async fn run_worker(orch: Orchestrator, mut rx: mpsc::UnboundedReceiver<Uuid>) {
    while let Some(job_id) = rx.recv().await {
        match orch.advance(job_id).await {
            Ok(status) => debug!("engine:worker job={} parked={}", job_id, status),
            Err(e) => warn!("engine:worker job={} advance failed: {}", job_id, e),
        }
    }
}

async fn run_sweeper(orch: Orchestrator) {
    let mut ticker = tokio::time::interval(orch.inner.config.sweep_interval.max(MIN_SWEEP_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = orch.sweep_timeouts(Utc::now()).await {
            warn!("engine:sweep failed: {}", e);
        }
    }
}
