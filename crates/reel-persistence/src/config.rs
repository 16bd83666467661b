//! Carga de configuración del store desde variables de entorno.
//! Usa `REELFLOW_DATA_DIR` y `REELFLOW_SYNC_WRITES`.

use std::env;
use std::path::PathBuf;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

pub const DEFAULT_DATA_DIR: &str = "./reelflow-data";

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// `fsync` tras cada escritura atómica.
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from(DEFAULT_DATA_DIR), sync_writes: false }
    }
}

impl StoreConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), ..Self::default() }
    }

    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let data_dir = env::var("REELFLOW_DATA_DIR").ok()
                                                    .filter(|v| !v.trim().is_empty())
                                                    .map(PathBuf::from)
                                                    .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let sync_writes = env::var("REELFLOW_SYNC_WRITES").ok().map(|v| parse_flag(&v)).unwrap_or(false);
        Self { data_dir, sync_writes }
    }
}

fn parse_flag(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("no"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn new_keeps_defaults() {
        let cfg = StoreConfig::new("/tmp/x");
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/x"));
        assert!(!cfg.sync_writes);
    }
}
