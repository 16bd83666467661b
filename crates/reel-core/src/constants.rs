//! Constantes del motor de orquestación.
//!
//! Valores estáticos compartidos por el orquestador, el bus de eventos y el
//! gestor de gates. Los identificadores de "decisor" forman parte del
//! contrato observable (aparecen en eventos y registros de decisión).

/// Versión lógica del motor. Se incluye en el payload de `job_started`.
pub const ENGINE_VERSION: &str = "1.0";

/// Decisor usado por el barrido de timeouts (auto-aprobación).
pub const TIMER_DECIDER: &str = "timer";

/// Decisor usado cuando el propio motor cierra un gate (p.ej. al cancelar).
pub const SYSTEM_DECIDER: &str = "system";

/// Intervalo por defecto sin actividad tras el cual un suscriptor recibe un
/// `heartbeat` sintético.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 5;

/// Intervalo por defecto del barrido de timeouts.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

/// Capacidad del canal broadcast por job.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Límite de caracteres de un mensaje de error de stage tras sanitizar.
pub const MAX_STAGE_MESSAGE_CHARS: usize = 512;

/// Máximo ajuste de nivel aceptado por un patch de audio (en dB, valor absoluto).
pub const MAX_LEVEL_CHANGE_DB: f64 = 24.0;
