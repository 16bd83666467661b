//! reel-core: motor de orquestación de pipelines de contenido.
//!
//! Un job recorre un registro ordenado de stages; algunos stages terminan en
//! un gate humano (aprobar, rechazar, rechazar con patch). Todo cambio de
//! estado queda en un log de eventos por job que se puede leer por polling o
//! por suscripción en vivo.
pub mod config;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod event;
pub mod gate;
pub mod hashing;
pub mod lane;
pub mod model;
pub mod patch;
pub mod stage;
pub mod store;

pub use config::EngineConfig;
pub use engine::{BackgroundHandle, Orchestrator, OrchestratorBuilder, RecoveryReport, SweepReport};
pub use errors::{classify_error, ErrorClass, EventError, OrchestratorError, PatchError, StageError, StoreError};
pub use event::{EventBus, EventDraft, EventType, JobEvent, Subscription};
pub use gate::GateManager;
pub use lane::{ExecutionLane, LanePermit};
pub use model::{Artifact, ArtifactDraft, ArtifactKind, ArtifactUpdate, DecisionRecord, Gate, GateStatus, Job, JobStatus, StageGateState,
                StageGateStatus, StageRegistry, StageSpec};
pub use patch::{Patch, PatchTarget, PatchTypeInfo};
pub use stage::{CancelFlag, StageContext, StageImplementation, StageRun, StageRunner};
pub use store::{InMemoryJobStore, JobStore};
