use std::collections::HashMap;
use std::sync::RwLock;

use indexmap::IndexMap;
use uuid::Uuid;

use super::JobStore;
use crate::errors::StoreError;
use crate::event::JobEvent;
use crate::model::{Artifact, ArtifactDraft, ArtifactUpdate, DecisionRecord, Gate, Job};

#[derive(Default)]
struct JobRecord {
    job: Option<Job>,
    events: Vec<JobEvent>,
    gates: IndexMap<Uuid, Gate>,
    decisions: IndexMap<String, DecisionRecord>,
    artifacts: IndexMap<String, (Artifact, Vec<u8>)>,
}

/// Store en memoria. Pensado para tests y ejecuciones efímeras.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: RwLock<HashMap<Uuid, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, job_id: Uuid, f: impl FnOnce(&JobRecord) -> T) -> Result<Option<T>, StoreError> {
        let guard = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get(&job_id).map(f))
    }

    fn write<T>(&self, job_id: Uuid, f: impl FnOnce(&mut JobRecord) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        match guard.get_mut(&job_id) {
            Some(rec) if rec.job.is_some() => f(rec),
            _ => Err(StoreError::NotFound(format!("job {job_id}"))),
        }
    }
}

impl JobStore for InMemoryJobStore {
    fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut guard = self.inner.write().map_err(|_| StoreError::Poisoned)?;
        if guard.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(format!("job {}", job.id)));
        }
        guard.insert(job.id, JobRecord { job: Some(job.clone()), ..Default::default() });
        Ok(())
    }

    fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        self.write(job.id, |rec| {
                rec.job = Some(job.clone());
                Ok(())
            })
    }

    fn load_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.read(job_id, |rec| rec.job.clone())?.flatten())
    }

    fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let guard = self.inner.read().map_err(|_| StoreError::Poisoned)?;
        let mut jobs: Vec<Job> = guard.values().filter_map(|r| r.job.clone()).collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    fn append_event(&self, job_id: Uuid, event: &JobEvent) -> Result<(), StoreError> {
        self.write(job_id, |rec| {
                rec.events.push(event.clone());
                Ok(())
            })
    }

    fn list_events(&self, job_id: Uuid) -> Result<Vec<JobEvent>, StoreError> {
        Ok(self.read(job_id, |rec| rec.events.clone())?.unwrap_or_default())
    }

    fn compact_events(&self, job_id: Uuid, keep_last: usize) -> Result<usize, StoreError> {
        self.write(job_id, |rec| {
                let drop = rec.events.len().saturating_sub(keep_last);
                rec.events.drain(..drop);
                Ok(drop)
            })
    }

    fn save_gate(&self, gate: &Gate) -> Result<(), StoreError> {
        self.write(gate.job_id, |rec| {
                rec.gates.insert(gate.id, gate.clone());
                Ok(())
            })
    }

    fn list_gates(&self, job_id: Uuid) -> Result<Vec<Gate>, StoreError> {
        Ok(self.read(job_id, |rec| rec.gates.values().cloned().collect())?.unwrap_or_default())
    }

    fn save_decision(&self, record: &DecisionRecord) -> Result<(), StoreError> {
        self.write(record.job_id, |rec| {
                rec.decisions.insert(record.stage.clone(), record.clone());
                Ok(())
            })
    }

    fn list_decisions(&self, job_id: Uuid) -> Result<Vec<DecisionRecord>, StoreError> {
        Ok(self.read(job_id, |rec| rec.decisions.values().cloned().collect())?.unwrap_or_default())
    }

    fn put_artifact(&self, job_id: Uuid, stage: &str, draft: &ArtifactDraft) -> Result<Artifact, StoreError> {
        self.write(job_id, |rec| {
                let locator = Artifact::locator_for(stage, &draft.name);
                let previous = rec.artifacts.get(&locator).map(|(a, _)| a);
                let artifact = Artifact::record(job_id, stage, draft, previous);
                rec.artifacts.insert(locator, (artifact.clone(), draft.content.clone()));
                Ok(artifact)
            })
    }

    fn list_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>, StoreError> {
        Ok(self.read(job_id, |rec| rec.artifacts.values().map(|(a, _)| a.clone()).collect())?.unwrap_or_default())
    }

    fn read_artifact(&self, job_id: Uuid, locator: &str) -> Result<Vec<u8>, StoreError> {
        self.read(job_id, |rec| rec.artifacts.get(locator).map(|(_, c)| c.clone()))?
            .flatten()
            .ok_or_else(|| StoreError::NotFound(format!("artifact {locator}")))
    }

    fn replace_artifacts(&self, job_id: Uuid, updates: &[ArtifactUpdate]) -> Result<Vec<Artifact>, StoreError> {
        self.write(job_id, |rec| {
                if let Some(missing) = updates.iter().find(|u| !rec.artifacts.contains_key(&u.locator)) {
                    return Err(StoreError::NotFound(format!("artifact {}", missing.locator)));
                }
                let mut out = Vec::with_capacity(updates.len());
                for u in updates {
                    if let Some(entry) = rec.artifacts.get_mut(&u.locator) {
                        entry.0 = entry.0.rewritten(&u.content);
                        entry.1 = u.content.clone();
                        out.push(entry.0.clone());
                    }
                }
                Ok(out)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArtifactKind;
    use serde_json::json;

    #[test]
    fn job_roundtrip_and_duplicate_insert() {
        let store = InMemoryJobStore::new();
        let mut job = Job::new("demo", json!({}));
        store.insert_job(&job).unwrap();
        assert!(matches!(store.insert_job(&job), Err(StoreError::AlreadyExists(_))));
        job.stage_index = 2;
        store.save_job(&job).unwrap();
        assert_eq!(store.load_job(job.id).unwrap().unwrap().stage_index, 2);
        assert!(store.load_job(Uuid::new_v4()).unwrap().is_none());
        assert!(matches!(store.save_job(&Job::new("other", json!({}))), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn replace_is_all_or_nothing() {
        let store = InMemoryJobStore::new();
        let job = Job::new("demo", json!({}));
        store.insert_job(&job).unwrap();
        let a = store.put_artifact(job.id, "script", &ArtifactDraft::text("script.md", ArtifactKind::Script, "foo")).unwrap();
        let updates = vec![ArtifactUpdate { locator: a.locator.clone(), content: b"bar".to_vec() },
                           ArtifactUpdate { locator: "artifacts/script/ghost.md".into(), content: b"x".to_vec() }];
        assert!(store.replace_artifacts(job.id, &updates).is_err());
        assert_eq!(store.read_artifact(job.id, &a.locator).unwrap(), b"foo");
        let done = store.replace_artifacts(job.id, &updates[..1]).unwrap();
        assert_eq!(done[0].revision, 2);
        assert_eq!(store.read_artifact(job.id, &a.locator).unwrap(), b"bar");
    }
}
