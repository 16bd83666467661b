//! Job: una ejecución del pipeline para un proyecto (`slug`).
//!
//! El estado del job es la única fuente de verdad para decidir qué hacer a
//! continuación; los eventos lo describen pero no se reproducen para
//! reconstruirlo.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::hashing::hash_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Esperando la ranura de ejecución.
    Queued,
    Running,
    /// Estacionado en un gate pendiente.
    NeedsApproval,
    /// Estacionado tras un rechazo sin patch o una interrupción.
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled)
    }

    /// Estados en los que el job no avanza sin intervención externa.
    pub fn is_settled(self) -> bool {
        self.is_terminal() || matches!(self, JobStatus::NeedsApproval | JobStatus::Paused)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::NeedsApproval => "NEEDS_APPROVAL",
            JobStatus::Paused => "PAUSED",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub slug: String,
    /// Snapshot de configuración tomado al crear el job (inmutable).
    pub config: Value,
    pub config_hash: String,
    pub status: JobStatus,
    /// Índice del stage actual dentro del registro. Nunca decrece.
    pub stage_index: usize,
    /// Número de ejecuciones por stage (incluye reintentos).
    #[serde(default)]
    pub attempts: BTreeMap<String, u32>,
    /// Marcado por la recuperación al arrancar si el job estaba RUNNING.
    #[serde(default)]
    pub interrupted: bool,
    /// La próxima ejecución del stage actual regenera aunque existan artifacts.
    #[serde(default)]
    pub force_rerun: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(slug: impl Into<String>, config: Value) -> Self {
        let now = Utc::now();
        let config_hash = hash_value(&config);
        Self { id: Uuid::new_v4(),
               slug: slug.into(),
               config,
               config_hash,
               status: JobStatus::Queued,
               stage_index: 0,
               attempts: BTreeMap::new(),
               interrupted: false,
               force_rerun: false,
               error: None,
               created_at: now,
               updated_at: now }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn attempt(&self, stage: &str) -> u32 {
        self.attempts.get(stage).copied().unwrap_or(0)
    }
}
