//! storyboard → assets → svg.

use async_trait::async_trait;
use reel_core::patch::script::slugify;
use reel_core::{ArtifactDraft, ArtifactKind, StageContext, StageError, StageImplementation};
use serde_json::json;

use super::{begin, read_json, read_text, seed};
use crate::payloads::{AssetItem, AssetManifest, Beat, StoryboardDoc};

const PALETTES: [&str; 5] = ["#1b263b", "#e76f51", "#2a9d8f", "#f4a261", "#6d597a"];
const MS_PER_WORD: i64 = 250;
const MIN_BEAT_MS: i64 = 1_000;

/// Un beat por sección `##` del guion; la duración sale del número de palabras.
pub fn storyboard_from_script(script: &str) -> StoryboardDoc {
    fn close(beats: &mut [Beat], words: i64) {
        if let Some(last) = beats.last_mut() {
            last.duration_ms = (words * MS_PER_WORD).max(MIN_BEAT_MS);
        }
    }

    let mut beats: Vec<Beat> = Vec::new();
    let mut words = 0i64;
    for line in script.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            close(&mut beats, words);
            words = 0;
            beats.push(Beat { id: format!("b{}", beats.len() + 1),
                              section: slugify(heading),
                              caption: heading.trim().to_string(),
                              duration_ms: MIN_BEAT_MS });
        } else if !beats.is_empty() {
            words += line.split_whitespace().count() as i64;
        }
    }
    close(&mut beats, words);
    let total_duration_ms = beats.iter().map(|b| b.duration_ms).sum();
    StoryboardDoc { beats, total_duration_ms }
}

pub fn plan_assets(board: &StoryboardDoc, seed: u64) -> AssetManifest {
    let assets = board.beats
                      .iter()
                      .enumerate()
                      .map(|(i, b)| AssetItem { beat_id: b.id.clone(),
                                                prompt: format!("illustration for '{}'", b.caption),
                                                palette: PALETTES[((seed as usize) + i) % PALETTES.len()].to_string() })
                      .collect();
    AssetManifest { assets }
}

pub fn render_svg(item: &AssetItem) -> String {
    format!("<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"1920\" height=\"1080\" viewBox=\"0 0 1920 1080\">\
             <rect width=\"1920\" height=\"1080\" fill=\"{}\"/>\
             <text x=\"96\" y=\"980\" font-size=\"48\" fill=\"#ffffff\">{}</text></svg>\n",
            item.palette,
            escape_xml(&item.prompt))
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;").replace('\'', "&apos;")
}

pub struct StoryboardStage;

#[async_trait]
impl StageImplementation for StoryboardStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        begin(&ctx).await?;
        let script = read_text(&ctx, "script")?;
        let board = storyboard_from_script(&script);
        if board.beats.is_empty() {
            return Err(StageError::Failed("script has no '##' sections".into()));
        }
        Ok(vec![ArtifactDraft::json("storyboard.json", ArtifactKind::Storyboard, &json!(board))])
    }
}

pub struct AssetsStage;

#[async_trait]
impl StageImplementation for AssetsStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        begin(&ctx).await?;
        let board: StoryboardDoc = read_json(&ctx, "storyboard")?;
        let manifest = plan_assets(&board, seed(&ctx.slug, &ctx.stage));
        Ok(vec![ArtifactDraft::json("assets.json", ArtifactKind::Asset, &json!(manifest))])
    }
}

pub struct SvgStage;

#[async_trait]
impl StageImplementation for SvgStage {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        begin(&ctx).await?;
        let manifest: AssetManifest = read_json(&ctx, "assets")?;
        let mut drafts = Vec::with_capacity(manifest.assets.len());
        for item in &manifest.assets {
            ctx.check_canceled()?;
            drafts.push(ArtifactDraft::text(format!("{}.svg", item.beat_id), ArtifactKind::Svg, render_svg(item)));
        }
        Ok(drafts)
    }
}
