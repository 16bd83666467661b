//! Bus de eventos por job: persistencia append-only + difusión en vivo.
//!
//! `emit` asigna `seq`/`ts`, persiste y difunde bajo un lock por job, de modo
//! que el orden de difusión coincide con el orden del log. `subscribe`
//! registra el receptor bajo ese mismo lock antes de leer el backlog: ningún
//! evento queda en el hueco entre lo leído y lo recibido en vivo.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{debug, warn};
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use uuid::Uuid;

use super::types::{EventDraft, EventType, JobEvent};
use crate::errors::{EventError, OrchestratorError};
use crate::model::JobStatus;
use crate::store::JobStore;

#[derive(Debug, Default)]
struct Cursor {
    last_seq: Option<u64>,
    last_ts: Option<DateTime<Utc>>,
}

struct BusInner {
    store: Arc<dyn JobStore>,
    channels: DashMap<Uuid, broadcast::Sender<JobEvent>>,
    cursors: DashMap<Uuid, Arc<Mutex<Cursor>>>,
    heartbeat: Duration,
    capacity: usize,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(store: Arc<dyn JobStore>, heartbeat: Duration, capacity: usize) -> Self {
        Self { inner: Arc::new(BusInner { store,
                                          channels: DashMap::new(),
                                          cursors: DashMap::new(),
                                          heartbeat,
                                          capacity: capacity.max(1) }) }
    }

    fn cursor(&self, job_id: Uuid) -> Result<Arc<Mutex<Cursor>>, OrchestratorError> {
        if let Some(c) = self.inner.cursors.get(&job_id) {
            return Ok(c.value().clone());
        }
        // Tras un reinicio el cursor se reconstruye desde el último evento persistido.
        let events = self.inner.store.list_events(job_id)?;
        let cursor = Cursor { last_seq: events.last().map(|e| e.seq), last_ts: events.last().map(|e| e.ts) };
        Ok(self.inner.cursors.entry(job_id).or_insert_with(|| Arc::new(Mutex::new(cursor))).value().clone())
    }

    fn sender(&self, job_id: Uuid) -> broadcast::Sender<JobEvent> {
        self.inner.channels.entry(job_id).or_insert_with(|| broadcast::channel(self.inner.capacity).0).value().clone()
    }

    /// Asigna `seq` y `ts`, persiste y difunde. Si la persistencia falla el
    /// evento no se difunde y el cursor no avanza.
    pub fn emit(&self, job_id: Uuid, draft: EventDraft) -> Result<JobEvent, OrchestratorError> {
        if draft.event_type == EventType::Heartbeat {
            return Err(EventError::SyntheticType.into());
        }
        let cursor = self.cursor(job_id)?;
        let mut c = cursor.lock().map_err(|_| OrchestratorError::Internal("event cursor poisoned".into()))?;
        let seq = c.last_seq.map(|s| s + 1).unwrap_or(0);
        let mut ts = Utc::now();
        if let Some(prev) = c.last_ts {
            if ts <= prev {
                ts = prev + chrono::Duration::microseconds(1);
            }
        }
        let event = JobEvent { seq,
                               ts,
                               event_type: draft.event_type,
                               stage: draft.stage,
                               status: draft.status,
                               message: draft.message,
                               payload: draft.payload };
        self.inner.store.append_event(job_id, &event)?;
        c.last_seq = Some(seq);
        c.last_ts = Some(ts);
        // Sin receptores `send` falla; no es un error.
        let _ = self.sender(job_id).send(event.clone());
        debug!("event:emit job={} seq={} type={}", job_id, seq, event.event_type);
        Ok(event)
    }

    /// Emite un evento recibido como JSON libre. Falla si falta `type`.
    pub fn emit_value(&self, job_id: Uuid, value: &Value) -> Result<JobEvent, OrchestratorError> {
        let draft = EventDraft::from_value(value)?;
        self.emit(job_id, draft)
    }

    /// Descarta el canal y el cursor de un job terminal. Los receptores vivos
    /// drenan lo que ya tienen en cola y luego ven el canal cerrado.
    pub fn release(&self, job_id: Uuid) {
        self.inner.cursors.remove(&job_id);
        if let Some((_, tx)) = self.inner.channels.remove(&job_id) {
            debug!("event:release job={} receivers={}", job_id, tx.receiver_count());
        }
    }

    /// Jobs con canal o cursor en memoria.
    pub fn live_jobs(&self) -> usize {
        self.inner.channels.len().max(self.inner.cursors.len())
    }

    /// Eventos estrictamente posteriores a `since` (hasta `limit`), o los
    /// últimos `limit` si no hay `since`.
    pub fn poll(&self, job_id: Uuid, since: Option<DateTime<Utc>>, limit: usize) -> Result<Vec<JobEvent>, OrchestratorError> {
        let events = self.inner.store.list_events(job_id)?;
        Ok(match since {
            Some(t) => events.into_iter().filter(|e| e.ts > t).take(limit).collect(),
            None => {
                let skip = events.len().saturating_sub(limit);
                events.into_iter().skip(skip).collect()
            }
        })
    }

    /// Suscripción en vivo. Con `since` entrega primero el backlog posterior a
    /// esa marca; sin él, solo lo emitido desde ahora.
    pub fn subscribe(&self, job_id: Uuid, since: Option<DateTime<Utc>>) -> Result<Subscription, OrchestratorError> {
        let job = self.inner
                      .store
                      .load_job(job_id)?
                      .ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            // Log cerrado: solo backlog, sin registrar canal ni cursor.
            let backlog: VecDeque<JobEvent> = match since {
                Some(t) => self.inner.store.list_events(job_id)?.into_iter().filter(|e| e.ts > t).collect(),
                None => VecDeque::new(),
            };
            let last_seq = backlog.front().and_then(|first| first.seq.checked_sub(1));
            let (_, rx) = broadcast::channel(1);
            return Ok(Subscription { job_id,
                                     store: self.inner.store.clone(),
                                     rx,
                                     backlog,
                                     last_seq,
                                     heartbeat: self.inner.heartbeat,
                                     job_terminal: true,
                                     done: false });
        }
        let cursor = self.cursor(job_id)?;
        let c = cursor.lock().map_err(|_| OrchestratorError::Internal("event cursor poisoned".into()))?;
        let rx = self.sender(job_id).subscribe();
        let backlog: VecDeque<JobEvent> = match since {
            Some(t) => self.inner.store.list_events(job_id)?.into_iter().filter(|e| e.ts > t).collect(),
            None => VecDeque::new(),
        };
        let last_seq = match backlog.front() {
            Some(first) => first.seq.checked_sub(1),
            None => c.last_seq,
        };
        drop(c);
        debug!("event:subscribe job={} backlog={} since={:?}", job_id, backlog.len(), since);
        Ok(Subscription { job_id,
                          store: self.inner.store.clone(),
                          rx,
                          backlog,
                          last_seq,
                          heartbeat: self.inner.heartbeat,
                          job_terminal: false,
                          done: false })
    }
}

/// Stream de eventos de un job. Termina tras un evento terminal o cuando el
/// job ya es terminal y no quedan eventos pendientes.
pub struct Subscription {
    job_id: Uuid,
    store: Arc<dyn JobStore>,
    rx: broadcast::Receiver<JobEvent>,
    backlog: VecDeque<JobEvent>,
    last_seq: Option<u64>,
    heartbeat: Duration,
    job_terminal: bool,
    done: bool,
}

impl Subscription {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Siguiente evento. Tras `heartbeat` sin actividad devuelve un evento
    /// `heartbeat` sintético (no persistido) cuyo `seq` repite el del último
    /// evento entregado. `None` al terminar.
    pub async fn next(&mut self) -> Option<JobEvent> {
        loop {
            if self.done {
                return None;
            }
            if let Some(ev) = self.backlog.pop_front() {
                if self.accept(&ev) {
                    return Some(ev);
                }
                continue;
            }
            if self.job_terminal {
                match self.rx.try_recv() {
                    Ok(ev) => {
                        if self.accept(&ev) {
                            return Some(ev);
                        }
                    }
                    Err(TryRecvError::Lagged(_)) => self.refill(),
                    Err(_) => {
                        self.done = true;
                        return None;
                    }
                }
                continue;
            }
            match tokio::time::timeout(self.heartbeat, self.rx.recv()).await {
                Ok(Ok(ev)) => {
                    if self.accept(&ev) {
                        return Some(ev);
                    }
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!("event:subscribe lagged job={} skipped={}, re-reading log", self.job_id, skipped);
                    self.refill();
                }
                Ok(Err(RecvError::Closed)) => {
                    self.done = true;
                    return None;
                }
                Err(_) => match self.store.load_job(self.job_id) {
                    Ok(Some(job)) if job.status.is_terminal() => self.job_terminal = true,
                    Ok(Some(job)) => return Some(self.heartbeat_event(Some(job.status))),
                    Ok(None) => {
                        self.done = true;
                        return None;
                    }
                    Err(e) => {
                        warn!("event:subscribe status check failed job={}: {}", self.job_id, e);
                        return Some(self.heartbeat_event(None));
                    }
                },
            }
        }
    }

    fn accept(&mut self, ev: &JobEvent) -> bool {
        if self.last_seq.is_some_and(|s| ev.seq <= s) {
            return false;
        }
        self.last_seq = Some(ev.seq);
        if ev.event_type.is_terminal() {
            self.done = true;
        }
        true
    }

    // Recupera desde el log lo que el canal descartó por lag.
    fn refill(&mut self) {
        match self.store.list_events(self.job_id) {
            Ok(events) => {
                let last = self.last_seq;
                self.backlog.extend(events.into_iter().filter(|e| last.map_or(true, |s| e.seq > s)));
            }
            Err(e) => warn!("event:refill failed job={}: {}", self.job_id, e),
        }
    }

    fn heartbeat_event(&self, status: Option<JobStatus>) -> JobEvent {
        JobEvent { seq: self.last_seq.unwrap_or(0),
                   ts: Utc::now(),
                   event_type: EventType::Heartbeat,
                   stage: None,
                   status,
                   message: "heartbeat".into(),
                   payload: Some(json!({ "last_seq": self.last_seq })) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Job;
    use crate::store::InMemoryJobStore;
    use serde_json::json;

    fn setup() -> (EventBus, Arc<InMemoryJobStore>, Uuid) {
        let store = Arc::new(InMemoryJobStore::new());
        let job = Job::new("demo", json!({}));
        store.insert_job(&job).unwrap();
        let bus = EventBus::new(store.clone(), Duration::from_millis(50), 16);
        (bus, store, job.id)
    }

    #[test]
    fn seq_dense_and_ts_strictly_increasing() {
        let (bus, _store, id) = setup();
        for _ in 0..20 {
            bus.emit(id, EventDraft::new(EventType::StageStarted, "x")).unwrap();
        }
        let all = bus.poll(id, None, 100).unwrap();
        assert_eq!(all.len(), 20);
        for (i, w) in all.windows(2).enumerate() {
            assert_eq!(w[0].seq, i as u64);
            assert!(w[1].ts > w[0].ts);
        }
    }

    #[test]
    fn poll_since_and_limit() {
        let (bus, _store, id) = setup();
        let evs: Vec<JobEvent> = (0..5).map(|i| bus.emit(id, EventDraft::new(EventType::StageStarted, format!("e{i}"))).unwrap()).collect();
        let after = bus.poll(id, Some(evs[1].ts), 2).unwrap();
        assert_eq!(after.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![2, 3]);
        let tail = bus.poll(id, None, 2).unwrap();
        assert_eq!(tail.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn emit_value_without_type_is_rejected() {
        let (bus, _store, id) = setup();
        let err = bus.emit_value(id, &json!({"message": "no type"})).unwrap_err();
        assert!(matches!(err, OrchestratorError::Event(EventError::MissingType)));
        assert!(bus.poll(id, None, 10).unwrap().is_empty());
        let err = bus.emit_value(id, &json!({"type": "job_completed"})).unwrap_err();
        assert!(matches!(err, OrchestratorError::Event(EventError::Reserved(_))));
        assert_eq!(bus.emit_value(id, &json!({"type": "stage_started"})).unwrap().seq, 0);
    }

    #[test]
    fn cursor_resumes_from_store() {
        let (bus, store, id) = setup();
        bus.emit(id, EventDraft::new(EventType::JobStarted, "a")).unwrap();
        let fresh = EventBus::new(store, Duration::from_millis(50), 16);
        assert_eq!(fresh.emit(id, EventDraft::new(EventType::StageStarted, "b")).unwrap().seq, 1);
    }

    #[tokio::test]
    async fn subscribe_replays_backlog_then_live_then_ends() {
        let (bus, _store, id) = setup();
        let first = bus.emit(id, EventDraft::new(EventType::JobStarted, "start")).unwrap();
        bus.emit(id, EventDraft::new(EventType::StageStarted, "s1")).unwrap();
        let mut sub = bus.subscribe(id, Some(first.ts)).unwrap();
        bus.emit(id, EventDraft::new(EventType::JobCompleted, "done")).unwrap();

        let a = sub.next().await.unwrap();
        let b = sub.next().await.unwrap();
        assert_eq!((a.seq, a.event_type), (1, EventType::StageStarted));
        assert_eq!((b.seq, b.event_type), (2, EventType::JobCompleted));
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn idle_subscription_yields_heartbeat() {
        let (bus, _store, id) = setup();
        let mut sub = bus.subscribe(id, None).unwrap();
        let hb = sub.next().await.unwrap();
        assert_eq!(hb.event_type, EventType::Heartbeat);
        assert!(bus.poll(id, None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn heartbeat_repeats_last_delivered_seq() {
        let (bus, _store, id) = setup();
        let mut sub = bus.subscribe(id, None).unwrap();
        bus.emit(id, EventDraft::new(EventType::JobStarted, "start")).unwrap();
        let started = bus.emit(id, EventDraft::new(EventType::StageStarted, "s1")).unwrap();
        sub.next().await.unwrap();
        assert_eq!(sub.next().await.unwrap().seq, started.seq);

        let hb = sub.next().await.unwrap();
        assert_eq!((hb.seq, hb.event_type), (started.seq, EventType::Heartbeat));
        assert_eq!(hb.payload, Some(json!({"last_seq": started.seq})));
        assert_eq!(bus.poll(id, None, 10).unwrap().last().map(|e| e.seq), Some(started.seq));
    }

    #[tokio::test]
    async fn release_drops_state_and_live_receivers_drain() {
        let (bus, _store, id) = setup();
        let mut sub = bus.subscribe(id, None).unwrap();
        bus.emit(id, EventDraft::new(EventType::StageStarted, "s1")).unwrap();
        bus.emit(id, EventDraft::new(EventType::StageCompleted, "s1")).unwrap();
        assert_eq!(bus.live_jobs(), 1);

        bus.release(id);
        assert_eq!(bus.live_jobs(), 0);
        assert_eq!(sub.next().await.unwrap().event_type, EventType::StageStarted);
        assert_eq!(sub.next().await.unwrap().event_type, EventType::StageCompleted);
        assert!(sub.next().await.is_none());
        // El cursor se reconstruye desde el log.
        assert_eq!(bus.emit(id, EventDraft::new(EventType::StageStarted, "s2")).unwrap().seq, 2);
    }
}
