//! Tipos de evento y estructura `JobEvent`.
//!
//! Rol en el flujo:
//! - El orquestador emite un evento por cada transición observable.
//! - El log por job es append-only; `seq` es denso y `ts` estrictamente
//!   creciente dentro de un job, lo que permite reanudar lecturas por `since`.
//! - `heartbeat` es sintético: solo lo genera una suscripción y nunca se
//!   persiste.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::EventError;
use crate::model::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JobStarted,
    StageStarted,
    StageCompleted,
    StageFailed,
    StageRetry,
    GatePause,
    GateApproved,
    GateAutoApproved,
    GateRejected,
    PatchApplied,
    JobPaused,
    JobResumed,
    JobInterrupted,
    JobCanceled,
    JobCompleted,
    Heartbeat,
}

impl EventType {
    /// Eventos tras los cuales el job ya no emite nada más.
    pub fn is_terminal(self) -> bool {
        matches!(self, EventType::JobCompleted | EventType::JobCanceled | EventType::StageFailed)
    }

    /// Tipos que reflejan una transición de estado del job. Solo los emite el
    /// orquestador; un evento externo de estos tipos se rechaza.
    pub fn is_lifecycle(self) -> bool {
        !matches!(self, EventType::StageStarted | EventType::StageCompleted | EventType::StageRetry | EventType::PatchApplied | EventType::Heartbeat)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::JobStarted => "job_started",
            EventType::StageStarted => "stage_started",
            EventType::StageCompleted => "stage_completed",
            EventType::StageFailed => "stage_failed",
            EventType::StageRetry => "stage_retry",
            EventType::GatePause => "gate_pause",
            EventType::GateApproved => "gate_approved",
            EventType::GateAutoApproved => "gate_auto_approved",
            EventType::GateRejected => "gate_rejected",
            EventType::PatchApplied => "patch_applied",
            EventType::JobPaused => "job_paused",
            EventType::JobResumed => "job_resumed",
            EventType::JobInterrupted => "job_interrupted",
            EventType::JobCanceled => "job_canceled",
            EventType::JobCompleted => "job_completed",
            EventType::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string())).map_err(|_| EventError::UnknownType(s.to_string()))
    }
}

/// Evento del log de un job.
///
/// Un `heartbeat` repite el `seq` del último evento entregado en su
/// suscripción y lleva `payload.last_seq`; no forma parte del log, así que un
/// cliente que deduplica debe usar el par (`seq`, `type`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEvent {
    pub seq: u64,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// Evento aún sin `seq`/`ts` (los asigna el bus al emitir).
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub event_type: EventType,
    pub stage: Option<String>,
    pub status: Option<JobStatus>,
    pub message: String,
    pub payload: Option<Value>,
}

impl EventDraft {
    pub fn new(event_type: EventType, message: impl Into<String>) -> Self {
        Self { event_type, stage: None, status: None, message: message.into(), payload: None }
    }

    pub fn stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Valida un evento recibido como JSON libre (frontera externa del bus).
    pub fn from_value(value: &Value) -> Result<Self, EventError> {
        let obj = value.as_object().ok_or_else(|| EventError::Malformed("event must be a JSON object".into()))?;
        let event_type: EventType = match obj.get("type") {
            None | Some(Value::Null) => return Err(EventError::MissingType),
            Some(Value::String(s)) if s.trim().is_empty() => return Err(EventError::MissingType),
            Some(Value::String(s)) => s.parse()?,
            Some(other) => return Err(EventError::Malformed(format!("'type' must be a string, got {other}"))),
        };
        if event_type == EventType::Heartbeat {
            return Err(EventError::SyntheticType);
        }
        if event_type.is_lifecycle() {
            return Err(EventError::Reserved(event_type.as_str().to_string()));
        }
        let stage = obj.get("stage").and_then(Value::as_str).map(str::to_string);
        let status = match obj.get("status") {
            None | Some(Value::Null) => None,
            Some(v) => Some(serde_json::from_value(v.clone()).map_err(|e| EventError::Malformed(format!("invalid status: {e}")))?),
        };
        let message = obj.get("message").and_then(Value::as_str).unwrap_or_default().to_string();
        let payload = obj.get("payload").filter(|v| !v.is_null()).cloned();
        Ok(Self { event_type, stage, status, message, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_uses_type_key() {
        let ev = JobEvent { seq: 3,
                            ts: Utc::now(),
                            event_type: EventType::GatePause,
                            stage: Some("script".into()),
                            status: Some(JobStatus::NeedsApproval),
                            message: "waiting".into(),
                            payload: None };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "gate_pause");
        assert_eq!(v["status"], "NEEDS_APPROVAL");
        assert!(v.get("payload").is_none());
        let back: JobEvent = serde_json::from_value(v).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn draft_from_value_requires_type() {
        assert_eq!(EventDraft::from_value(&json!({"message": "hi"})), Err(EventError::MissingType));
        assert_eq!(EventDraft::from_value(&json!({"type": ""})), Err(EventError::MissingType));
        assert_eq!(EventDraft::from_value(&json!({"type": "nope"})), Err(EventError::UnknownType("nope".into())));
        assert_eq!(EventDraft::from_value(&json!({"type": "heartbeat"})), Err(EventError::SyntheticType));
        assert_eq!(EventDraft::from_value(&json!({"type": "job_completed"})), Err(EventError::Reserved("job_completed".into())));
        assert_eq!(EventDraft::from_value(&json!({"type": "gate_approved"})), Err(EventError::Reserved("gate_approved".into())));
        let d = EventDraft::from_value(&json!({"type": "stage_started", "stage": "outline", "payload": {"k": 1}})).unwrap();
        assert_eq!(d.event_type, EventType::StageStarted);
        assert_eq!(d.stage.as_deref(), Some("outline"));
        assert_eq!(d.payload, Some(json!({"k": 1})));
    }

    #[test]
    fn only_annotation_types_are_open_to_callers() {
        let open: Vec<EventType> = [EventType::JobStarted, EventType::StageStarted, EventType::StageCompleted, EventType::StageFailed,
                                    EventType::StageRetry, EventType::GatePause, EventType::PatchApplied, EventType::JobPaused,
                                    EventType::JobCanceled, EventType::JobCompleted]
            .into_iter()
            .filter(|t| !t.is_lifecycle())
            .collect();
        assert_eq!(open, vec![EventType::StageStarted, EventType::StageCompleted, EventType::StageRetry, EventType::PatchApplied]);
        assert!(EventType::StageFailed.is_lifecycle());
    }
}
