//! reel-persistence
//!
//! Store durable de jobs sobre el sistema de archivos: un directorio por job
//! con el registro del job, el log de eventos append-only, gates, decisiones
//! y artifacts. Implementa el contrato `JobStore` de `reel-core` con la misma
//! semántica que el backend en memoria.
//!
//! Módulos:
//! - `file`: `FileJobStore` y el layout en disco.
//! - `config`: carga de configuración desde `.env` / entorno.
//! - `error`: errores de IO/serialización y su mapeo a `StoreError`.

pub mod config;
pub mod error;
pub mod file;

pub use config::{init_dotenv, StoreConfig};
pub use error::PersistenceError;
pub use file::FileJobStore;
