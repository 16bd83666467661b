//! Stages deterministas del pipeline de contenido.
//!
//! Cada stage separa la generación (función pura, testeable) del envoltorio
//! async que lee entradas, simula trabajo y respeta la cancelación.

pub mod media;
pub mod visual;
pub mod writing;

use std::time::Duration;

use log::debug;
use reel_core::hashing::hash_str;
use reel_core::{StageContext, StageError};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use media::{AudioStage, PackageStage, VideoStage};
pub use visual::{AssetsStage, StoryboardStage, SvgStage};
pub use writing::{OutlineStage, ResearchStage, ScriptStage};

const WORK_SLICE: Duration = Duration::from_millis(10);

/// Preludio común: cancelación, fallo simulado y trabajo simulado.
pub(crate) async fn begin(ctx: &StageContext) -> Result<(), StageError> {
    ctx.check_canceled()?;
    if ctx.config_str("fail_stage") == Some(ctx.stage.as_str()) {
        return Err(StageError::Failed(format!("simulated failure in stage '{}'", ctx.stage)));
    }
    let delay = ctx.config.get("stage_delay_ms").and_then(Value::as_u64).unwrap_or(0);
    let mut remaining = Duration::from_millis(delay);
    while !remaining.is_zero() {
        let slice = remaining.min(WORK_SLICE);
        tokio::time::sleep(slice).await;
        remaining -= slice;
        ctx.check_canceled()?;
    }
    debug!("adapter:begin job={} stage={} attempt={}", ctx.job_id, ctx.stage, ctx.attempt);
    Ok(())
}

/// Semilla estable por (slug, stage).
pub(crate) fn seed(slug: &str, stage: &str) -> u64 {
    let h = hash_str(&format!("{slug}:{stage}"));
    u64::from_str_radix(&h[..16], 16).unwrap_or(0)
}

/// Tema del job: `config.topic` o el slug con espacios.
pub(crate) fn topic(ctx: &StageContext) -> String {
    ctx.config_str("topic").map(str::to_string).unwrap_or_else(|| ctx.slug.replace(|c| c == '-' || c == '_', " "))
}

pub(crate) fn read_text(ctx: &StageContext, stage: &str) -> Result<String, StageError> {
    let artifact = ctx.input_from(stage).ok_or_else(|| StageError::Failed(format!("missing input from stage '{stage}'")))?;
    let bytes = ctx.read_input(artifact)?;
    String::from_utf8(bytes).map_err(|_| StageError::Failed(format!("{} is not utf-8", artifact.locator)))
}

pub(crate) fn read_json<T: DeserializeOwned>(ctx: &StageContext, stage: &str) -> Result<T, StageError> {
    let text = read_text(ctx, stage)?;
    serde_json::from_str(&text).map_err(|e| StageError::Failed(format!("invalid {stage} artifact: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_stable_and_stage_dependent() {
        assert_eq!(seed("demo", "audio"), seed("demo", "audio"));
        assert_ne!(seed("demo", "audio"), seed("demo", "video"));
    }
}
