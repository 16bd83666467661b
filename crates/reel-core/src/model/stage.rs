//! Registro ordenado de stages.
//!
//! El orden de inserción define el orden de ejecución. Cada stage declara si
//! requiere gate humano, si admite auto-aprobación (y tras cuánto tiempo) y un
//! timeout opcional de ejecución.

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSpec {
    pub name: String,
    #[serde(default)]
    pub gate_required: bool,
    #[serde(default)]
    pub auto_approve: bool,
    /// Segundos que un gate debe llevar pendiente antes de auto-aprobarse.
    #[serde(default, with = "secs")]
    pub auto_approve_after: Duration,
    #[serde(default, with = "opt_millis", rename = "timeout_ms", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               gate_required: false,
               auto_approve: false,
               auto_approve_after: Duration::ZERO,
               timeout: None }
    }

    pub fn gated(mut self) -> Self {
        self.gate_required = true;
        self
    }

    pub fn auto_approve_after(mut self, after: Duration) -> Self {
        self.gate_required = true;
        self.auto_approve = true;
        self.auto_approve_after = after;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let v = f64::deserialize(d)?;
        Duration::try_from_secs_f64(v).map_err(serde::de::Error::custom)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    stages: Vec<StageSpec>,
}

/// Registro inmutable de stages, indexado por nombre y por posición.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRegistry {
    stages: IndexMap<String, StageSpec>,
}

impl StageRegistry {
    pub fn from_specs(specs: Vec<StageSpec>) -> Result<Self, OrchestratorError> {
        let mut stages = IndexMap::with_capacity(specs.len());
        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(OrchestratorError::Registry("stage name must not be empty".into()));
            }
            if spec.auto_approve && !spec.gate_required {
                return Err(OrchestratorError::Registry(format!("stage '{}' auto-approves but has no gate", spec.name)));
            }
            if stages.contains_key(&spec.name) {
                return Err(OrchestratorError::Registry(format!("duplicate stage '{}'", spec.name)));
            }
            stages.insert(spec.name.clone(), spec);
        }
        if stages.is_empty() {
            return Err(OrchestratorError::Registry("registry has no stages".into()));
        }
        Ok(Self { stages })
    }

    /// Carga `{"stages": [...]}` desde JSON.
    pub fn from_json_str(raw: &str) -> Result<Self, OrchestratorError> {
        let file: RegistryFile = serde_json::from_str(raw).map_err(|e| OrchestratorError::Registry(format!("invalid registry document: {e}")))?;
        Self::from_specs(file.stages)
    }

    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> Result<Self, OrchestratorError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| OrchestratorError::Registry(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Pipeline de contenido por defecto: nueve stages, cuatro con gate.
    pub fn content_pipeline() -> Self {
        let specs = vec![StageSpec::new("outline"),
                         StageSpec::new("research"),
                         StageSpec::new("script").gated(),
                         StageSpec::new("storyboard").gated(),
                         StageSpec::new("assets").gated(),
                         StageSpec::new("svg"),
                         StageSpec::new("audio").gated(),
                         StageSpec::new("video"),
                         StageSpec::new("package")];
        let stages = specs.into_iter().map(|s| (s.name.clone(), s)).collect();
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&StageSpec> {
        self.stages.get_index(index).map(|(_, s)| s)
    }

    pub fn by_name(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.stages.get_index_of(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.stages.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageSpec> {
        self.stages.values()
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::content_pipeline()
    }
}
