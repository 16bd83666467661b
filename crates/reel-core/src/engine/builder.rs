//! Builder para `Orchestrator`.
//!
//! Reúne store, registro de stages, catálogo de implementaciones, ranura de
//! ejecución y configuración. `build` valida que cada stage del registro
//! tenga implementación antes de crear nada.
//!
//! ```ignore
//! let orch = Orchestrator::in_memory()
//!     .registry(StageRegistry::content_pipeline())
//!     .stage("outline", OutlineStage)
//!     // ...
//!     .build()?;
//! ```

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use indexmap::IndexMap;
use tokio::sync::mpsc;

use super::core::{Inner, Orchestrator};
use crate::config::EngineConfig;
use crate::errors::OrchestratorError;
use crate::event::EventBus;
use crate::gate::GateManager;
use crate::lane::ExecutionLane;
use crate::model::StageRegistry;
use crate::stage::{StageImplementation, StageRunner};
use crate::store::{InMemoryJobStore, JobStore};

pub struct OrchestratorBuilder {
    store: Arc<dyn JobStore>,
    registry: StageRegistry,
    implementations: IndexMap<String, Arc<dyn StageImplementation>>,
    lane: Option<ExecutionLane>,
    config: EngineConfig,
}

impl OrchestratorBuilder {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store,
               registry: StageRegistry::content_pipeline(),
               implementations: IndexMap::new(),
               lane: None,
               config: EngineConfig::default() }
    }

    pub fn registry(mut self, registry: StageRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Registra la implementación de un stage por nombre (reemplaza si existe).
    pub fn stage<S>(self, name: impl Into<String>, stage: S) -> Self
        where S: StageImplementation + 'static
    {
        self.stage_arc(name, Arc::new(stage))
    }

    pub fn stage_arc(mut self, name: impl Into<String>, stage: Arc<dyn StageImplementation>) -> Self {
        self.implementations.insert(name.into(), stage);
        self
    }

    pub fn stages<I>(mut self, catalog: I) -> Self
        where I: IntoIterator<Item = (String, Arc<dyn StageImplementation>)>
    {
        self.implementations.extend(catalog);
        self
    }

    /// Ranura compartida con otros orquestadores (por defecto, una propia).
    pub fn lane(mut self, lane: ExecutionLane) -> Self {
        self.lane = Some(lane);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let runner = StageRunner::new(self.store.clone(), self.implementations);
        runner.validate(&self.registry)?;
        let bus = EventBus::new(self.store.clone(), self.config.heartbeat_interval, self.config.event_channel_capacity);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let inner = Inner { registry: self.registry,
                            runner,
                            gates: GateManager::new(self.store.clone()),
                            store: self.store,
                            bus,
                            lane: self.lane.unwrap_or_default(),
                            config: self.config,
                            queue_tx,
                            queue_rx: Mutex::new(Some(queue_rx)),
                            job_locks: DashMap::new(),
                            cancel_flags: DashMap::new() };
        Ok(Orchestrator { inner: Arc::new(inner) })
    }
}

impl Orchestrator {
    pub fn builder(store: Arc<dyn JobStore>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(store)
    }

    /// Builder sobre un store en memoria.
    pub fn in_memory() -> OrchestratorBuilder {
        OrchestratorBuilder::new(Arc::new(InMemoryJobStore::new()))
    }
}
