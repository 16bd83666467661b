//! Modelos del dominio (Job, Stage, Gate, Artifact).

pub mod artifact;
pub mod gate;
pub mod job;
pub mod stage;

pub use artifact::{Artifact, ArtifactDraft, ArtifactKind, ArtifactUpdate};
pub use gate::{DecisionRecord, Gate, GateStatus, StageGateState, StageGateStatus};
pub use job::{Job, JobStatus};
pub use stage::{StageRegistry, StageSpec};
