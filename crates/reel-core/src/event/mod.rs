//! Eventos de job y bus de distribución.

pub mod bus;
pub mod types;

pub use bus::{EventBus, Subscription};
pub use types::{EventDraft, EventType, JobEvent};
