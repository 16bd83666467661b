//! Catálogo nombre → implementación para el pipeline de contenido.

use std::sync::Arc;

use reel_core::StageImplementation;

use crate::stages::{AssetsStage, AudioStage, OutlineStage, PackageStage, ResearchStage, ScriptStage, StoryboardStage, SvgStage, VideoStage};

/// Nombres en el orden del registro por defecto.
pub fn stage_names() -> Vec<&'static str> {
    content_pipeline_static().into_iter().map(|(name, _)| name).collect()
}

fn entry<S: StageImplementation + 'static>(name: &'static str, stage: S) -> (&'static str, Arc<dyn StageImplementation>) {
    (name, Arc::new(stage))
}

fn content_pipeline_static() -> Vec<(&'static str, Arc<dyn StageImplementation>)> {
    vec![entry("outline", OutlineStage),
         entry("research", ResearchStage),
         entry("script", ScriptStage),
         entry("storyboard", StoryboardStage),
         entry("assets", AssetsStage),
         entry("svg", SvgStage),
         entry("audio", AudioStage),
         entry("video", VideoStage),
         entry("package", PackageStage)]
}

/// Implementaciones para `StageRegistry::content_pipeline()`, listas para
/// `OrchestratorBuilder::stages`.
pub fn content_pipeline() -> Vec<(String, Arc<dyn StageImplementation>)> {
    content_pipeline_static().into_iter().map(|(name, imp)| (name.to_string(), imp)).collect()
}
