//! Stages: contrato de implementación, ejecución con timeout y sanitizado
//! de errores.

pub mod definition;
pub mod runner;
pub mod sanitize;

pub use definition::{CancelFlag, StageContext, StageImplementation};
pub use runner::{StageRun, StageRunner};
pub use sanitize::sanitize_message;
