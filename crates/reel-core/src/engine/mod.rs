//! Orquestador: máquina de estados de jobs y superficie de control.

pub mod background;
pub mod builder;
pub mod core;

pub use background::BackgroundHandle;
pub use builder::OrchestratorBuilder;
pub use self::core::{Orchestrator, RecoveryReport, SweepReport};
