//! Inicialización de logs: `tracing-subscriber` con filtro por entorno.
//! Los crates de librería usan la fachada `log`; el subscriber la captura.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Instala el subscriber global escribiendo en stderr (stdout queda para la
/// salida JSON de los comandos). Una segunda llamada no hace nada.
pub fn init(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(crate::config::DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::registry().with(filter)
                                          .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(true))
                                          .try_init();
}
