//! reel-adapters: implementaciones de stage de demostración.
//!
//! Este crate provee:
//! - Payloads tipados (`payloads`) que los stages serializan como artifacts.
//! - Un stage determinista por cada paso del pipeline de contenido por
//!   defecto (`stages`), derivado solo de `(slug, config)` y de los
//!   artifacts de stages anteriores.
//! - `catalog::content_pipeline()`: el catálogo nombre → implementación que
//!   consume `OrchestratorBuilder::stages`.
//!
//! Claves de config reconocidas por todos los stages:
//! - `fail_stage`: nombre del stage que debe fallar (prueba del camino de error).
//! - `stage_delay_ms`: trabajo simulado por stage; respeta la cancelación.

pub mod catalog;
pub mod payloads;
pub mod stages;

pub use catalog::{content_pipeline, stage_names};
