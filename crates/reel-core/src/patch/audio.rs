//! Ajuste de nivel sobre descriptores de audio JSON.

use serde_json::Value;

use crate::constants::MAX_LEVEL_CHANGE_DB;
use crate::errors::PatchError;

pub fn adjust_level(doc: &mut Value, delta_db: f64) -> Result<(), PatchError> {
    if !delta_db.is_finite() || delta_db.abs() > MAX_LEVEL_CHANGE_DB {
        return Err(PatchError::LevelOutOfRange(delta_db));
    }
    let current = doc.get("level_db")
                     .and_then(Value::as_f64)
                     .ok_or_else(|| PatchError::MalformedArtifact("audio descriptor has no numeric 'level_db'".into()))?;
    // Redondeo a centésimas para no acumular ruido de coma flotante.
    let next = ((current + delta_db) * 100.0).round() / 100.0;
    doc["level_db"] = Value::from(next);
    Ok(())
}
