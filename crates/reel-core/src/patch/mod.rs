//! Patches estructurados aplicables a artifacts de un stage.
//!
//! Un patch se dirige a un tipo de artifact (`target`) y declara una
//! operación (`type`). La aplicación es todo-o-nada: se calcula el contenido
//! nuevo de todos los artifacts afectados en memoria y solo si todo valida se
//! devuelve la lista de reemplazos para que el store los escriba.

pub mod audio;
pub mod script;
pub mod storyboard;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PatchError;
use crate::model::{Artifact, ArtifactKind, ArtifactUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchTarget {
    Script,
    Storyboard,
    Audio,
}

impl PatchTarget {
    pub fn artifact_kind(self) -> ArtifactKind {
        match self {
            PatchTarget::Script => ArtifactKind::Script,
            PatchTarget::Storyboard => ArtifactKind::Storyboard,
            PatchTarget::Audio => ArtifactKind::Audio,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PatchTarget::Script => "script",
            PatchTarget::Storyboard => "storyboard",
            PatchTarget::Audio => "audio",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TextReplacement {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DurationAdjustment {
    pub beat_id: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScriptPatch {
    TextReplace { replacements: Vec<TextReplacement> },
    SectionReplace { section_id: String, new_text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoryboardPatch {
    DurationAdjust {
        #[serde(alias = "adjustments")]
        beat_adjustments: Vec<DurationAdjustment>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AudioPatch {
    LevelAdjust {
        #[serde(alias = "delta_db")]
        level_change_db: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum Patch {
    Script(ScriptPatch),
    Storyboard(StoryboardPatch),
    Audio(AudioPatch),
}

/// Descripción de un tipo de patch soportado (listado por la superficie de control).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PatchTypeInfo {
    pub target: PatchTarget,
    #[serde(rename = "type")]
    pub patch_type: &'static str,
    pub fields: &'static [&'static str],
}

pub fn supported_patch_types() -> Vec<PatchTypeInfo> {
    vec![PatchTypeInfo { target: PatchTarget::Script, patch_type: "text_replace", fields: &["replacements[].old", "replacements[].new"] },
         PatchTypeInfo { target: PatchTarget::Script, patch_type: "section_replace", fields: &["section_id", "new_text"] },
         PatchTypeInfo { target: PatchTarget::Storyboard, patch_type: "duration_adjust", fields: &["beat_adjustments[].beat_id", "beat_adjustments[].duration_ms"] },
         PatchTypeInfo { target: PatchTarget::Audio, patch_type: "level_adjust", fields: &["level_change_db"] }]
}

fn target_for_type(patch_type: &str) -> Option<PatchTarget> {
    supported_patch_types().into_iter().find(|p| p.patch_type == patch_type).map(|p| p.target)
}

impl Patch {
    /// Parsea un documento de patch. `target` es opcional: los nombres de
    /// `type` son únicos, así que se infiere si falta.
    pub fn from_value(value: Value) -> Result<Self, PatchError> {
        let Value::Object(mut map) = value else {
            return Err(PatchError::Malformed("patch must be a JSON object".into()));
        };
        let patch_type = match map.get("type") {
            Some(Value::String(t)) => t.clone(),
            Some(_) => return Err(PatchError::Malformed("'type' must be a string".into())),
            None => return Err(PatchError::Malformed("missing 'type'".into())),
        };
        let inferred = target_for_type(&patch_type).ok_or_else(|| PatchError::Unsupported(patch_type.clone()))?;
        match map.get("target").and_then(Value::as_str) {
            Some(t) if t != inferred.as_str() => {
                return Err(PatchError::Malformed(format!("patch type '{patch_type}' does not apply to target '{t}'")));
            }
            Some(_) => {}
            None => {
                map.insert("target".into(), Value::String(inferred.as_str().into()));
            }
        }
        serde_json::from_value(Value::Object(map)).map_err(|e| PatchError::Malformed(e.to_string()))
    }

    pub fn target(&self) -> PatchTarget {
        match self {
            Patch::Script(_) => PatchTarget::Script,
            Patch::Storyboard(_) => PatchTarget::Storyboard,
            Patch::Audio(_) => PatchTarget::Audio,
        }
    }

    pub fn patch_type(&self) -> &'static str {
        match self {
            Patch::Script(ScriptPatch::TextReplace { .. }) => "text_replace",
            Patch::Script(ScriptPatch::SectionReplace { .. }) => "section_replace",
            Patch::Storyboard(StoryboardPatch::DurationAdjust { .. }) => "duration_adjust",
            Patch::Audio(AudioPatch::LevelAdjust { .. }) => "level_adjust",
        }
    }
}

/// Calcula los reemplazos de contenido para los artifacts del stage.
///
/// `artifacts` son los artifacts actuales del stage con su contenido. Solo se
/// tocan los del tipo al que apunta el patch; si no hay ninguno es un error.
pub fn apply_patch(patch: &Patch, stage: &str, artifacts: &[(Artifact, Vec<u8>)]) -> Result<Vec<ArtifactUpdate>, PatchError> {
    let kind = patch.target().artifact_kind();
    let targets: Vec<&(Artifact, Vec<u8>)> = artifacts.iter().filter(|(a, _)| a.kind == kind).collect();
    if targets.is_empty() {
        return Err(PatchError::NoTarget { stage: stage.to_string(), target: patch.target().as_str().to_string() });
    }

    let mut updates = Vec::new();
    match patch {
        Patch::Script(ScriptPatch::TextReplace { replacements }) => {
            if replacements.is_empty() {
                return Err(PatchError::Malformed("text_replace needs at least one replacement".into()));
            }
            let mut hits = vec![0usize; replacements.len()];
            for (artifact, content) in targets {
                let text = utf8(artifact, content)?;
                let (next, counts) = script::replace_text(text, replacements)?;
                hits.iter_mut().zip(counts).for_each(|(h, c)| *h += c);
                if next != text {
                    updates.push(ArtifactUpdate { locator: artifact.locator.clone(), content: next.into_bytes() });
                }
            }
            if let Some(missing) = replacements.iter().zip(&hits).find(|(_, h)| **h == 0) {
                return Err(PatchError::TextNotFound(missing.0.old.clone()));
            }
        }
        Patch::Script(ScriptPatch::SectionReplace { section_id, new_text }) => {
            for (artifact, content) in targets {
                let text = utf8(artifact, content)?;
                if let Some(next) = script::replace_section(text, section_id, new_text) {
                    updates.push(ArtifactUpdate { locator: artifact.locator.clone(), content: next.into_bytes() });
                }
            }
            if updates.is_empty() {
                return Err(PatchError::SectionNotFound(section_id.clone()));
            }
        }
        Patch::Storyboard(StoryboardPatch::DurationAdjust { beat_adjustments: adjustments }) => {
            // Un beat debe existir en algún storyboard del stage.
            for adj in adjustments {
                if adj.duration_ms <= 0 {
                    return Err(PatchError::InvalidDuration { beat: adj.beat_id.clone(), duration_ms: adj.duration_ms });
                }
            }
            let mut found = vec![false; adjustments.len()];
            for (artifact, content) in targets {
                let mut doc = json_doc(artifact, content)?;
                let applicable: Vec<DurationAdjustment> = adjustments.iter()
                                                                     .enumerate()
                                                                     .filter(|(_, a)| storyboard::has_beat(&doc, &a.beat_id))
                                                                     .map(|(i, a)| {
                                                                         found[i] = true;
                                                                         a.clone()
                                                                     })
                                                                     .collect();
                if applicable.is_empty() {
                    continue;
                }
                storyboard::adjust_durations(&mut doc, &applicable)?;
                updates.push(ArtifactUpdate { locator: artifact.locator.clone(), content: to_pretty(&doc)? });
            }
            if let Some((adj, _)) = adjustments.iter().zip(&found).find(|(_, f)| !**f) {
                return Err(PatchError::BeatNotFound(adj.beat_id.clone()));
            }
        }
        Patch::Audio(AudioPatch::LevelAdjust { level_change_db }) => {
            for (artifact, content) in targets {
                let mut doc = json_doc(artifact, content)?;
                audio::adjust_level(&mut doc, *level_change_db)?;
                updates.push(ArtifactUpdate { locator: artifact.locator.clone(), content: to_pretty(&doc)? });
            }
        }
    }
    Ok(updates)
}

fn utf8<'a>(artifact: &Artifact, content: &'a [u8]) -> Result<&'a str, PatchError> {
    std::str::from_utf8(content).map_err(|_| PatchError::MalformedArtifact(format!("{} is not valid UTF-8", artifact.locator)))
}

fn json_doc(artifact: &Artifact, content: &[u8]) -> Result<Value, PatchError> {
    serde_json::from_slice(content).map_err(|e| PatchError::MalformedArtifact(format!("{}: {e}", artifact.locator)))
}

fn to_pretty(doc: &Value) -> Result<Vec<u8>, PatchError> {
    serde_json::to_vec_pretty(doc).map_err(|e| PatchError::MalformedArtifact(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactDraft;
    use serde_json::json;
    use uuid::Uuid;

    fn stored(stage: &str, draft: ArtifactDraft) -> (Artifact, Vec<u8>) {
        let a = Artifact::record(Uuid::new_v4(), stage, &draft, None);
        (a, draft.content)
    }

    #[test]
    fn parses_patch_without_target() {
        let p = Patch::from_value(json!({"type": "text_replace", "replacements": [{"old": "foo", "new": "bar"}]})).unwrap();
        assert_eq!(p.target(), PatchTarget::Script);
        assert_eq!(p.patch_type(), "text_replace");
        let wire = serde_json::to_value(&p).unwrap();
        assert_eq!(wire["target"], "script");
        assert_eq!(wire["type"], "text_replace");
        assert_eq!(Patch::from_value(wire).unwrap(), p);
    }

    #[test]
    fn rejects_unknown_or_mismatched_types() {
        assert!(matches!(Patch::from_value(json!({"type": "rewrite_all"})), Err(PatchError::Unsupported(_))));
        assert!(matches!(Patch::from_value(json!({"target": "audio", "type": "text_replace", "replacements": []})), Err(PatchError::Malformed(_))));
        assert!(matches!(Patch::from_value(json!({"replacements": []})), Err(PatchError::Malformed(_))));
        assert!(matches!(Patch::from_value(json!({"type": "level_adjust"})), Err(PatchError::Malformed(_))));
    }

    #[test]
    fn text_replace_across_script_artifacts() {
        let arts = vec![stored("script", ArtifactDraft::text("script.md", ArtifactKind::Script, "# Intro\nfoo and foo\n")),
                        stored("script", ArtifactDraft::json("notes.json", ArtifactKind::Generic, &json!({"foo": 1})))];
        let p = Patch::from_value(json!({"type": "text_replace", "replacements": [{"old": "foo", "new": "bar"}]})).unwrap();
        let updates = apply_patch(&p, "script", &arts).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].locator, "artifacts/script/script.md");
        assert_eq!(String::from_utf8(updates[0].content.clone()).unwrap(), "# Intro\nbar and bar\n");
    }

    #[test]
    fn missing_text_fails_whole_patch() {
        let arts = vec![stored("script", ArtifactDraft::text("script.md", ArtifactKind::Script, "foo"))];
        let p = Patch::from_value(json!({"type": "text_replace", "replacements": [{"old": "foo", "new": "x"}, {"old": "nope", "new": "y"}]})).unwrap();
        assert_eq!(apply_patch(&p, "script", &arts), Err(PatchError::TextNotFound("nope".into())));
    }

    #[test]
    fn patch_without_matching_artifact_kind() {
        let arts = vec![stored("script", ArtifactDraft::text("script.md", ArtifactKind::Script, "foo"))];
        let p = Patch::from_value(json!({"type": "level_adjust", "delta_db": 3.0})).unwrap();
        assert!(matches!(apply_patch(&p, "script", &arts), Err(PatchError::NoTarget { .. })));
    }

    #[test]
    fn storyboard_and_audio_patches() {
        let sb = stored("storyboard",
                        ArtifactDraft::json("storyboard.json",
                                            ArtifactKind::Storyboard,
                                            &json!({"beats": [{"id": "b1", "duration_ms": 1000}, {"id": "b2", "duration_ms": 2000}], "total_duration_ms": 3000})));
        let p = Patch::from_value(json!({"type": "duration_adjust", "beat_adjustments": [{"beat_id": "b2", "duration_ms": 500}]})).unwrap();
        let updates = apply_patch(&p, "storyboard", &[sb.clone()]).unwrap();
        let doc: Value = serde_json::from_slice(&updates[0].content).unwrap();
        assert_eq!(doc["total_duration_ms"], 1500);

        let bad = Patch::from_value(json!({"type": "duration_adjust", "adjustments": [{"beat_id": "b9", "duration_ms": 500}]})).unwrap();
        assert_eq!(apply_patch(&bad, "storyboard", &[sb]), Err(PatchError::BeatNotFound("b9".into())));

        let au = stored("audio", ArtifactDraft::json("mix.json", ArtifactKind::Audio, &json!({"level_db": -14.0})));
        let p = Patch::from_value(json!({"type": "level_adjust", "level_change_db": 2.5})).unwrap();
        let updates = apply_patch(&p, "audio", &[au]).unwrap();
        let doc: Value = serde_json::from_slice(&updates[0].content).unwrap();
        assert_eq!(doc["level_db"], json!(-11.5));
    }
}
