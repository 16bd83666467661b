//! Parámetros de ejecución del motor.

use std::time::Duration;

use crate::constants::{DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_HEARTBEAT_SECS, DEFAULT_SWEEP_INTERVAL_MS};

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Inactividad tras la cual un suscriptor recibe `heartbeat`.
    pub heartbeat_interval: Duration,
    /// Periodo del barrido de timeouts en segundo plano.
    pub sweep_interval: Duration,
    /// Jobs PAUSED más tiempo que esto se cancelan en el barrido. `None`: nunca.
    pub paused_expiry: Option<Duration>,
    /// Al terminar un job, conservar solo los últimos N eventos. `None`: todos.
    pub event_retention: Option<usize>,
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
               sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
               paused_expiry: None,
               event_retention: None,
               event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY }
    }
}
