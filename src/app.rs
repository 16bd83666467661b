//! Ensamblado del motor para el binario: store en disco, registro de stages,
//! catálogo de demostración y configuración del motor.

use std::sync::Arc;

use log::info;
use reel_adapters::content_pipeline;
use reel_core::{Job, JobStore, Orchestrator, RecoveryReport};
use reel_persistence::FileJobStore;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::AppError;

pub struct App {
    pub config: AppConfig,
    pub orchestrator: Orchestrator,
}

impl App {
    pub fn open(config: AppConfig) -> Result<Self, AppError> {
        let store: Arc<dyn JobStore> = Arc::new(FileJobStore::open(&config.store)?);
        let orchestrator = Orchestrator::builder(store).registry(config.registry()?)
                                                       .stages(content_pipeline())
                                                       .config(config.engine.clone())
                                                       .build()?;
        info!("app:open data_dir={} stages={}", config.store.data_dir.display(), orchestrator.registry().len());
        Ok(Self { config, orchestrator })
    }

    /// Marca como interrumpidos los jobs que quedaron RUNNING en un proceso anterior.
    pub async fn recover(&self) -> Result<RecoveryReport, AppError> {
        let report = self.orchestrator.recover().await?;
        if !report.interrupted.is_empty() {
            info!("app:recover interrupted={:?}", report.interrupted);
        }
        Ok(report)
    }

    /// Conduce el job hasta que se estaciona o termina y devuelve su estado.
    pub async fn drive(&self, job_id: Uuid) -> Result<Job, AppError> {
        self.orchestrator.advance(job_id).await?;
        Ok(self.orchestrator.get_job(job_id)?)
    }
}
