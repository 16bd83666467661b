//! Gates de aprobación humana y registros de decisión.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::patch::Patch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Pending,
    Approved,
    Rejected,
    /// Cerrado por el sistema al cancelar el job.
    Canceled,
}

/// Un gate por (job, stage gated) y visita. Como mucho uno PENDING por job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gate {
    pub id: Uuid,
    pub job_id: Uuid,
    pub stage: String,
    pub stage_index: usize,
    pub status: GateStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Gate {
    pub fn open(job_id: Uuid, stage: &str, stage_index: usize) -> Self {
        Self { id: Uuid::new_v4(),
               job_id,
               stage: stage.to_string(),
               stage_index,
               status: GateStatus::Pending,
               created_at: Utc::now(),
               decided_by: None,
               decided_at: None,
               notes: None }
    }

    pub fn is_pending(&self) -> bool {
        self.status == GateStatus::Pending
    }
}

/// Última decisión sobre el stage. Se sobrescribe en cada nueva decisión.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub job_id: Uuid,
    pub gate_id: Uuid,
    pub stage: String,
    pub decision: GateStatus,
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<Patch>,
    #[serde(default)]
    pub patch_applied: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StageGateState {
    /// Stage sin gate o aún no alcanzado.
    None,
    Pending { gate_id: Uuid, since: DateTime<Utc> },
    Decided { decision: DecisionRecord },
}

/// Vista por stage para `gate_status`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageGateStatus {
    pub stage: String,
    pub gate_required: bool,
    #[serde(flatten)]
    pub state: StageGateState,
}
