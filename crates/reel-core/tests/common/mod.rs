#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reel_core::{ArtifactDraft, ArtifactKind, JobEvent, Orchestrator, OrchestratorBuilder, StageContext, StageError, StageImplementation,
                StageRegistry, StageSpec};
use serde_json::json;

/// Cuenta invocaciones por stage y la concurrencia máxima observada.
#[derive(Default)]
pub struct Probe {
    calls: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Probe {
    pub fn calls(&self, stage: &str) -> usize {
        self.calls.lock().unwrap().get(stage).copied().unwrap_or(0)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

pub fn draft_for(stage: &str, slug: &str) -> ArtifactDraft {
    match stage {
        "script" => ArtifactDraft::text("script.md", ArtifactKind::Script, format!("# {slug}\n\n## Hook\nfoo opens the show\n\n## Body\nfoo again\n")),
        "storyboard" => ArtifactDraft::json("storyboard.json",
                                            ArtifactKind::Storyboard,
                                            &json!({"beats": [{"id": "b1", "duration_ms": 1200}, {"id": "b2", "duration_ms": 800}], "total_duration_ms": 2000})),
        "audio" => ArtifactDraft::json("mix.json", ArtifactKind::Audio, &json!({"level_db": -16.0})),
        other => ArtifactDraft::text(format!("{other}.txt"), ArtifactKind::Generic, format!("{other} for {slug}")),
    }
}

pub struct ScriptedStage {
    pub probe: Arc<Probe>,
    pub delay: Duration,
}

#[async_trait]
impl StageImplementation for ScriptedStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        *self.probe.calls.lock().unwrap().entry(ctx.stage.clone()).or_default() += 1;
        let now = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.probe.active.fetch_sub(1, Ordering::SeqCst);
        Ok(vec![draft_for(&ctx.stage, &ctx.slug)])
    }
}

pub struct FailingStage(pub String);

#[async_trait]
impl StageImplementation for FailingStage {
    async fn run(&self, _ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        Err(StageError::Failed(self.0.clone()))
    }
}

/// Espera hasta que se active la cancelación.
pub struct BlockingStage;

#[async_trait]
impl StageImplementation for BlockingStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        while !ctx.cancel.is_canceled() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(vec![draft_for(&ctx.stage, &ctx.slug)])
    }
}

pub struct SleepyStage(pub Duration);

#[async_trait]
impl StageImplementation for SleepyStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        tokio::time::sleep(self.0).await;
        Ok(vec![draft_for(&ctx.stage, &ctx.slug)])
    }
}

/// Builder en memoria con `ScriptedStage` para cada stage del registro.
pub fn scripted(registry: StageRegistry, probe: &Arc<Probe>, delay: Duration) -> OrchestratorBuilder {
    with_scripted(Orchestrator::in_memory(), registry, probe, delay)
}

pub fn with_scripted(builder: OrchestratorBuilder, registry: StageRegistry, probe: &Arc<Probe>, delay: Duration) -> OrchestratorBuilder {
    let mut b = builder.registry(registry.clone());
    for spec in registry.iter() {
        b = b.stage(spec.name.clone(), ScriptedStage { probe: probe.clone(), delay });
    }
    b
}

/// draft -> review (gate) -> publish
pub fn review_registry(review: StageSpec) -> StageRegistry {
    StageRegistry::from_specs(vec![StageSpec::new("draft"), review, StageSpec::new("publish")]).unwrap()
}

pub fn types(events: &[JobEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type.as_str()).collect()
}
