//! reelflow
//!
//! Binario y librería de ensamblado del motor de pipelines:
//! - `config`: configuración desde `.env` / entorno.
//! - `app`: store en disco + registro + stages de demostración.
//! - `cli`: comandos de la superficie de control.
//! - `errors` y `logging`: error del binario (con código de salida) y logs.

pub mod app;
pub mod cli;
pub mod config;
pub mod errors;
pub mod logging;

pub use app::App;
pub use config::AppConfig;
pub use errors::AppError;
