//! Artifacts producidos por los stages.
//!
//! Un stage devuelve `ArtifactDraft`s (contenido en memoria); el store los
//! persiste y devuelve `Artifact`s con locator, checksum y revisión. El
//! contenido nunca viaja dentro de eventos, solo los locators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::hashing::hash_bytes;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Outline,
    Research,
    /// Markdown; patchable con `text_replace` / `section_replace`.
    Script,
    /// JSON `{beats: [{id, duration_ms}], total_duration_ms}`.
    Storyboard,
    Asset,
    Svg,
    /// JSON `{level_db}`.
    Audio,
    Video,
    Package,
    Generic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub job_id: Uuid,
    pub stage: String,
    pub name: String,
    pub kind: ArtifactKind,
    /// Ruta relativa al job: `artifacts/<stage>/<name>`.
    pub locator: String,
    pub checksum: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Se incrementa con cada reescritura (regeneración o patch).
    pub revision: u32,
    pub updated_at: DateTime<Utc>,
}

impl Artifact {
    pub fn locator_for(stage: &str, name: &str) -> String {
        format!("artifacts/{stage}/{name}")
    }

    /// Registro para un contenido recién escrito. `previous` conserva la revisión.
    pub fn record(job_id: Uuid, stage: &str, draft: &ArtifactDraft, previous: Option<&Artifact>) -> Self {
        Self { job_id,
               stage: stage.to_string(),
               name: draft.name.clone(),
               kind: draft.kind,
               locator: Self::locator_for(stage, &draft.name),
               checksum: hash_bytes(&draft.content),
               size: draft.content.len() as u64,
               metadata: draft.metadata.clone(),
               revision: previous.map(|p| p.revision + 1).unwrap_or(1),
               updated_at: Utc::now() }
    }

    /// Mismo artifact tras reemplazar su contenido.
    pub fn rewritten(&self, content: &[u8]) -> Self {
        Self { checksum: hash_bytes(content),
               size: content.len() as u64,
               revision: self.revision + 1,
               updated_at: Utc::now(),
               ..self.clone() }
    }
}

/// Contenido producido por un stage, aún sin persistir.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactDraft {
    pub name: String,
    pub kind: ArtifactKind,
    pub content: Vec<u8>,
    pub metadata: Option<Value>,
}

impl ArtifactDraft {
    pub fn text(name: impl Into<String>, kind: ArtifactKind, text: impl Into<String>) -> Self {
        Self { name: name.into(), kind, content: text.into().into_bytes(), metadata: None }
    }

    pub fn json(name: impl Into<String>, kind: ArtifactKind, value: &Value) -> Self {
        // `Value` siempre serializa; el pretty-print facilita la revisión humana.
        let content = serde_json::to_vec_pretty(value).unwrap_or_else(|_| value.to_string().into_bytes());
        Self { name: name.into(), kind, content, metadata: None }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Reemplazo de contenido de un artifact existente (aplicación de patch).
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactUpdate {
    pub locator: String,
    pub content: Vec<u8>,
}
