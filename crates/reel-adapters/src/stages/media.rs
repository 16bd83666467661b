//! audio → video → package.

use async_trait::async_trait;
use reel_core::{Artifact, ArtifactDraft, ArtifactKind, StageContext, StageError, StageImplementation};
use serde_json::json;

use super::{begin, read_json};
use crate::payloads::{AudioMix, PackageManifest, PackagedFile, RenderManifest, StoryboardDoc};

pub const DEFAULT_LEVEL_DB: f64 = -16.0;
const FPS: u32 = 30;

pub fn mix_for(board: &StoryboardDoc, voice: &str) -> AudioMix {
    AudioMix { voice: voice.to_string(), level_db: DEFAULT_LEVEL_DB, duration_ms: board.total_duration_ms }
}

pub fn render_manifest(board: &StoryboardDoc, mix: &AudioMix) -> RenderManifest {
    let duration_ms = board.total_duration_ms.max(mix.duration_ms);
    RenderManifest { width: 1920,
                     height: 1080,
                     fps: FPS,
                     frames: (duration_ms.max(0) as u64) * FPS as u64 / 1000,
                     duration_ms,
                     level_db: mix.level_db }
}

/// Manifiesto ordenado por locator de todo lo producido antes del empaquetado.
pub fn package_manifest(slug: &str, inputs: &[Artifact]) -> PackageManifest {
    let mut files: Vec<PackagedFile> = inputs.iter()
                                             .filter(|a| a.kind != ArtifactKind::Package)
                                             .map(|a| PackagedFile { locator: a.locator.clone(), checksum: a.checksum.clone(), size: a.size })
                                             .collect();
    files.sort_by(|a, b| a.locator.cmp(&b.locator));
    PackageManifest { slug: slug.to_string(), files }
}

pub struct AudioStage;

#[async_trait]
impl StageImplementation for AudioStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        begin(&ctx).await?;
        let board: StoryboardDoc = read_json(&ctx, "storyboard")?;
        let voice = ctx.config_str("voice").unwrap_or("narrator");
        Ok(vec![ArtifactDraft::json("mix.json", ArtifactKind::Audio, &json!(mix_for(&board, voice)))])
    }
}

pub struct VideoStage;

#[async_trait]
impl StageImplementation for VideoStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        begin(&ctx).await?;
        let board: StoryboardDoc = read_json(&ctx, "storyboard")?;
        let mix: AudioMix = read_json(&ctx, "audio")?;
        Ok(vec![ArtifactDraft::json("render.json", ArtifactKind::Video, &json!(render_manifest(&board, &mix)))])
    }
}

pub struct PackageStage;

#[async_trait]
impl StageImplementation for PackageStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        begin(&ctx).await?;
        let manifest = package_manifest(&ctx.slug, &ctx.inputs);
        Ok(vec![ArtifactDraft::json("package.json", ArtifactKind::Package, &json!(manifest))])
    }
}
