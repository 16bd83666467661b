//! Hash helpers: abstracción sobre blake3 para no acoplar el resto del core
//! al algoritmo concreto.

use blake3::Hasher;
use serde_json::Value;

use super::to_canonical_json;

/// Hashea un string y devuelve hex.
pub fn hash_str(input: &str) -> String {
    hash_bytes(input.as_bytes())
}

/// Hashea bytes arbitrarios (contenido de artifacts) y devuelve hex.
pub fn hash_bytes(input: &[u8]) -> String {
    let mut h = Hasher::new();
    h.update(input);
    h.finalize().to_hex().to_string()
}

/// Hash del JSON canónico de un valor.
pub fn hash_value(value: &Value) -> String {
    hash_str(&to_canonical_json(value))
}
