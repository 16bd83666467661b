//! Ranura de ejecución de capacidad 1.
//!
//! Como mucho un job ejecuta trabajo de stage a la vez en todo el proceso.
//! La ranura se libera al soltar el `LanePermit`, también ante errores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::errors::OrchestratorError;

#[derive(Debug, Clone)]
pub struct ExecutionLane {
    semaphore: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Default for ExecutionLane {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionLane {
    pub fn new() -> Self {
        Self { semaphore: Arc::new(Semaphore::new(1)),
               active: Arc::new(AtomicUsize::new(0)),
               peak: Arc::new(AtomicUsize::new(0)) }
    }

    pub async fn acquire(&self) -> Result<LanePermit, OrchestratorError> {
        let permit = self.semaphore
                         .clone()
                         .acquire_owned()
                         .await
                         .map_err(|_| OrchestratorError::Internal("execution lane closed".into()))?;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(LanePermit { _permit: permit, active: self.active.clone() })
    }

    /// Holders actuales (0 o 1).
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Máximo de holders simultáneos observado desde la creación.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct LanePermit {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for LanePermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn never_more_than_one_holder() {
        let lane = ExecutionLane::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lane = lane.clone();
            handles.push(tokio::spawn(async move {
                             let _p = lane.acquire().await.unwrap();
                             assert_eq!(lane.active(), 1);
                             tokio::time::sleep(Duration::from_millis(5)).await;
                         }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(lane.peak(), 1);
        assert_eq!(lane.active(), 0);
    }
}
