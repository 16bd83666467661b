//! Ajustes de duración sobre storyboards JSON.

use serde_json::Value;

use crate::errors::PatchError;

use super::DurationAdjustment;

fn beat_id(beat: &Value) -> Option<&str> {
    beat.get("id").or_else(|| beat.get("beat_id")).and_then(Value::as_str)
}

pub fn has_beat(doc: &Value, id: &str) -> bool {
    doc.get("beats").and_then(Value::as_array).is_some_and(|beats| beats.iter().any(|b| beat_id(b) == Some(id)))
}

/// Fija la duración de cada beat indicado y recalcula `total_duration_ms`.
pub fn adjust_durations(doc: &mut Value, adjustments: &[DurationAdjustment]) -> Result<(), PatchError> {
    if adjustments.is_empty() {
        return Err(PatchError::Malformed("duration_adjust needs at least one adjustment".into()));
    }
    let beats = doc.get_mut("beats")
                   .and_then(Value::as_array_mut)
                   .ok_or_else(|| PatchError::MalformedArtifact("storyboard has no 'beats' array".into()))?;
    for adj in adjustments {
        if adj.duration_ms <= 0 {
            return Err(PatchError::InvalidDuration { beat: adj.beat_id.clone(), duration_ms: adj.duration_ms });
        }
        let beat = beats.iter_mut()
                        .find(|b| beat_id(b) == Some(adj.beat_id.as_str()))
                        .ok_or_else(|| PatchError::BeatNotFound(adj.beat_id.clone()))?;
        beat["duration_ms"] = Value::from(adj.duration_ms);
    }
    let total: i64 = beats.iter().filter_map(|b| b.get("duration_ms").and_then(Value::as_i64)).sum();
    doc["total_duration_ms"] = Value::from(total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recomputes_total() {
        let mut doc = json!({"beats": [{"id": "a", "duration_ms": 100}, {"beat_id": "b", "duration_ms": 200}]});
        adjust_durations(&mut doc, &[DurationAdjustment { beat_id: "b".into(), duration_ms: 50 }]).unwrap();
        assert_eq!(doc["total_duration_ms"], 150);
        assert_eq!(doc["beats"][1]["duration_ms"], 50);
    }

    #[test]
    fn rejects_non_positive_and_missing_beats() {
        let mut doc = json!({"beats": [{"id": "a", "duration_ms": 100}]});
        let zero = [DurationAdjustment { beat_id: "a".into(), duration_ms: 0 }];
        assert!(matches!(adjust_durations(&mut doc, &zero), Err(PatchError::InvalidDuration { .. })));
        let missing = [DurationAdjustment { beat_id: "z".into(), duration_ms: 10 }];
        assert_eq!(adjust_durations(&mut doc, &missing), Err(PatchError::BeatNotFound("z".into())));
        let mut not_storyboard = json!({"scenes": []});
        assert!(matches!(adjust_durations(&mut not_storyboard, &[DurationAdjustment { beat_id: "a".into(), duration_ms: 1 }]),
                         Err(PatchError::MalformedArtifact(_))));
    }
}
