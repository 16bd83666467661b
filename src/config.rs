//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) una sola vez y arma la configuración del
//! store, del motor y del registro de stages.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use reel_core::{EngineConfig, StageRegistry};
use reel_persistence::StoreConfig;

use crate::errors::AppError;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv();
});

pub const DEFAULT_LOG_FILTER: &str = "info";

/// Configuración completa del binario.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub engine: EngineConfig,
    /// Registro de stages en JSON. `None`: pipeline de contenido por defecto.
    pub stages_file: Option<PathBuf>,
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { store: StoreConfig::default(),
               engine: EngineConfig::default(),
               stages_file: None,
               log_filter: DEFAULT_LOG_FILTER.to_string() }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Lazy::force(&DOTENV_LOADED);
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero leyendo de una función (tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
        where F: Fn(&str) -> Option<String>
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(dir) = get("REELFLOW_DATA_DIR") {
            cfg.store.data_dir = PathBuf::from(dir);
        }
        if let Some(v) = get("REELFLOW_SYNC_WRITES") {
            cfg.store.sync_writes = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }
        if let Some(secs) = parse::<u64>("REELFLOW_HEARTBEAT_SECS", get("REELFLOW_HEARTBEAT_SECS"))? {
            if secs == 0 {
                return Err(AppError::Config("REELFLOW_HEARTBEAT_SECS must be greater than 0".into()));
            }
            cfg.engine.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse::<u64>("REELFLOW_SWEEP_INTERVAL_MS", get("REELFLOW_SWEEP_INTERVAL_MS"))? {
            cfg.engine.sweep_interval = Duration::from_millis(ms);
        }
        cfg.engine.paused_expiry = parse::<u64>("REELFLOW_PAUSED_EXPIRY_SECS", get("REELFLOW_PAUSED_EXPIRY_SECS"))?.map(Duration::from_secs);
        cfg.engine.event_retention = parse::<usize>("REELFLOW_EVENT_RETENTION", get("REELFLOW_EVENT_RETENTION"))?;
        cfg.stages_file = get("REELFLOW_STAGES_FILE").map(PathBuf::from);
        if let Some(filter) = get("REELFLOW_LOG").or_else(|| get("RUST_LOG")) {
            cfg.log_filter = filter;
        }
        Ok(cfg)
    }

    pub fn registry(&self) -> Result<StageRegistry, AppError> {
        match &self.stages_file {
            Some(path) => Ok(StageRegistry::from_json_file(path)?),
            None => Ok(StageRegistry::content_pipeline()),
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>, AppError> {
    match raw {
        None => Ok(None),
        Some(v) => v.parse::<T>().map(Some).map_err(|_| AppError::Config(format!("{key}: cannot parse '{v}'"))),
    }
}
