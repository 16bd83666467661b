//! `JobStore` sobre el sistema de archivos.
//!
//! Layout por job (relativo a `data_dir`):
//!
//! ```text
//! jobs/<job_id>/job.json
//! jobs/<job_id>/events.jsonl          log append-only, un evento por línea
//! jobs/<job_id>/gates.json
//! jobs/<job_id>/decisions/<stage>.json
//! jobs/<job_id>/artifacts/index.json
//! jobs/<job_id>/artifacts/<stage>/<name>
//! ```
//!
//! Todos los archivos salvo el log se reescriben de forma atómica (archivo
//! temporal + `rename`). El log solo crece por el final; una línea cortada
//! por un crash se descarta en el siguiente `append`.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};
use reel_core::{Artifact, ArtifactDraft, ArtifactUpdate, DecisionRecord, Gate, Job, JobEvent, JobStore, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::PersistenceError;

const JOB_FILE: &str = "job.json";
const EVENTS_FILE: &str = "events.jsonl";
const GATES_FILE: &str = "gates.json";
const DECISIONS_DIR: &str = "decisions";
const ARTIFACTS_DIR: &str = "artifacts";
const INDEX_FILE: &str = "index.json";

/// Store durable basado en directorios. Un lock de lectura/escritura serializa
/// las operaciones que tocan varios archivos.
pub struct FileJobStore {
    data_dir: PathBuf,
    sync_writes: bool,
    io: RwLock<()>,
}

impl FileJobStore {
    /// Abre (o crea) el store en `config.data_dir`.
    pub fn open(config: &StoreConfig) -> Result<Self, PersistenceError> {
        let jobs = config.data_dir.join("jobs");
        fs::create_dir_all(&jobs).map_err(|e| PersistenceError::io(&jobs, e))?;
        debug!("open:done data_dir={}", config.data_dir.display());
        Ok(Self { data_dir: config.data_dir.clone(), sync_writes: config.sync_writes, io: RwLock::new(()) })
    }

    pub fn open_dir(data_dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        Self::open(&StoreConfig::new(data_dir))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.data_dir.join("jobs").join(job_id.to_string())
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, ()>, StoreError> {
        self.io.read().map_err(|_| StoreError::Poisoned)
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, ()>, StoreError> {
        self.io.write().map_err(|_| StoreError::Poisoned)
    }

    /// Directorio del job; `NotFound` si el job no fue insertado.
    fn existing_job_dir(&self, job_id: Uuid) -> Result<PathBuf, PersistenceError> {
        let dir = self.job_dir(job_id);
        if dir.join(JOB_FILE).is_file() {
            Ok(dir)
        } else {
            Err(PersistenceError::NotFound(format!("job {job_id}")))
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
        let tmp = temp_path(path);
        self.write_file(&tmp, bytes)?;
        fs::rename(&tmp, path).map_err(|e| PersistenceError::io(path, e))
    }

    fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let mut file = File::create(path).map_err(|e| PersistenceError::io(path, e))?;
        file.write_all(bytes).map_err(|e| PersistenceError::io(path, e))?;
        if self.sync_writes {
            file.sync_all().map_err(|e| PersistenceError::io(path, e))?;
        }
        Ok(())
    }

    fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_atomic(path, &bytes)
    }

    fn read_index(&self, dir: &Path) -> Result<Vec<Artifact>, PersistenceError> {
        Ok(read_json(&dir.join(ARTIFACTS_DIR).join(INDEX_FILE))?.unwrap_or_default())
    }

    fn write_index(&self, dir: &Path, index: &[Artifact]) -> Result<(), PersistenceError> {
        self.write_json(&dir.join(ARTIFACTS_DIR).join(INDEX_FILE), index)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| PersistenceError::json(path, e)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PersistenceError::io(path, e)),
    }
}

/// Nombre utilizable como componente de ruta (stage o artifact).
fn check_component(name: &str) -> Result<(), PersistenceError> {
    let bad = name.is_empty()
              || name == "."
              || name == ".."
              || name.starts_with('.')
              || name.chars().any(|c| c == '/' || c == '\\' || c == '\0');
    if bad {
        return Err(PersistenceError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn read_events(path: &Path) -> Result<Vec<JobEvent>, PersistenceError> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };
    let complete = text.ends_with('\n');
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let last = lines.len().saturating_sub(1);
    let mut events = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str::<JobEvent>(line) {
            Ok(ev) => events.push(ev),
            Err(e) if i == last && !complete => warn!("list_events:torn tail ignored path={} err={}", path.display(), e),
            Err(e) => return Err(PersistenceError::json(path, e)),
        }
    }
    Ok(events)
}

fn encode_events(events: &[JobEvent]) -> Result<Vec<u8>, PersistenceError> {
    let mut out = Vec::new();
    for ev in events {
        serde_json::to_writer(&mut out, ev)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Descarta una última línea sin `\n` (escritura cortada) antes de añadir.
fn repair_tail(file: &mut File, path: &Path) -> Result<(), PersistenceError> {
    let len = file.metadata().map_err(|e| PersistenceError::io(path, e))?.len();
    if len == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).map_err(|e| PersistenceError::io(path, e))?;
    file.read_exact(&mut last).map_err(|e| PersistenceError::io(path, e))?;
    if last[0] == b'\n' {
        return Ok(());
    }
    let mut content = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0)).map_err(|e| PersistenceError::io(path, e))?;
    file.read_to_end(&mut content).map_err(|e| PersistenceError::io(path, e))?;
    let keep = content.iter().rposition(|b| *b == b'\n').map(|p| p + 1).unwrap_or(0);
    warn!("append_event:truncating torn tail path={} bytes={}", path.display(), content.len() - keep);
    file.set_len(keep as u64).map_err(|e| PersistenceError::io(path, e))?;
    Ok(())
}

impl JobStore for FileJobStore {
    fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let _guard = self.write_lock()?;
        let dir = self.job_dir(job.id);
        if dir.join(JOB_FILE).exists() {
            return Err(PersistenceError::AlreadyExists(format!("job {}", job.id)).into());
        }
        fs::create_dir_all(&dir).map_err(|e| PersistenceError::io(&dir, e))?;
        self.write_json(&dir.join(JOB_FILE), job)?;
        debug!("insert_job:done job={} slug={}", job.id, job.slug);
        Ok(())
    }

    fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        let _guard = self.write_lock()?;
        let dir = self.existing_job_dir(job.id)?;
        self.write_json(&dir.join(JOB_FILE), job)?;
        Ok(())
    }

    fn load_job(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let _guard = self.read_lock()?;
        Ok(read_json(&self.job_dir(job_id).join(JOB_FILE))?)
    }

    fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let _guard = self.read_lock()?;
        let root = self.data_dir.join("jobs");
        let entries = match fs::read_dir(&root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&root, e).into()),
        };
        let mut jobs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PersistenceError::io(&root, e))?;
            let path = entry.path().join(JOB_FILE);
            match read_json::<Job>(&path) {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) => {}
                Err(e) => warn!("list_jobs:skip unreadable path={} err={}", path.display(), e),
            }
        }
        jobs.sort_by_key(|j| j.created_at);
        debug!("list_jobs:done count={}", jobs.len());
        Ok(jobs)
    }

    fn append_event(&self, job_id: Uuid, event: &JobEvent) -> Result<(), StoreError> {
        let _guard = self.write_lock()?;
        let path = self.existing_job_dir(job_id)?.join(EVENTS_FILE);
        let mut line = serde_json::to_vec(event).map_err(PersistenceError::from)?;
        line.push(b'\n');
        let mut file = OpenOptions::new().create(true)
                                         .read(true)
                                         .write(true)
                                         .truncate(false)
                                         .open(&path)
                                         .map_err(|e| PersistenceError::io(&path, e))?;
        repair_tail(&mut file, &path)?;
        file.seek(SeekFrom::End(0)).map_err(|e| PersistenceError::io(&path, e))?;
        file.write_all(&line).map_err(|e| PersistenceError::io(&path, e))?;
        if self.sync_writes {
            file.sync_data().map_err(|e| PersistenceError::io(&path, e))?;
        }
        Ok(())
    }

    fn list_events(&self, job_id: Uuid) -> Result<Vec<JobEvent>, StoreError> {
        let _guard = self.read_lock()?;
        Ok(read_events(&self.job_dir(job_id).join(EVENTS_FILE))?)
    }

    fn compact_events(&self, job_id: Uuid, keep_last: usize) -> Result<usize, StoreError> {
        let _guard = self.write_lock()?;
        let path = self.existing_job_dir(job_id)?.join(EVENTS_FILE);
        let events = read_events(&path)?;
        let dropped = events.len().saturating_sub(keep_last);
        if dropped > 0 {
            self.write_atomic(&path, &encode_events(&events[dropped..])?)?;
            debug!("compact_events:done job={} dropped={} kept={}", job_id, dropped, events.len() - dropped);
        }
        Ok(dropped)
    }

    fn save_gate(&self, gate: &Gate) -> Result<(), StoreError> {
        let _guard = self.write_lock()?;
        let path = self.existing_job_dir(gate.job_id)?.join(GATES_FILE);
        let mut gates: Vec<Gate> = read_json(&path)?.unwrap_or_default();
        match gates.iter_mut().find(|g| g.id == gate.id) {
            Some(existing) => *existing = gate.clone(),
            None => gates.push(gate.clone()),
        }
        self.write_json(&path, &gates)?;
        Ok(())
    }

    fn list_gates(&self, job_id: Uuid) -> Result<Vec<Gate>, StoreError> {
        let _guard = self.read_lock()?;
        Ok(read_json(&self.job_dir(job_id).join(GATES_FILE))?.unwrap_or_default())
    }

    fn save_decision(&self, record: &DecisionRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock()?;
        check_component(&record.stage)?;
        let dir = self.existing_job_dir(record.job_id)?;
        self.write_json(&dir.join(DECISIONS_DIR).join(format!("{}.json", record.stage)), record)?;
        Ok(())
    }

    fn list_decisions(&self, job_id: Uuid) -> Result<Vec<DecisionRecord>, StoreError> {
        let _guard = self.read_lock()?;
        let dir = self.job_dir(job_id).join(DECISIONS_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistenceError::io(&dir, e).into()),
        };
        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PersistenceError::io(&dir, e))?.path();
            if path.extension().and_then(|x| x.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = read_json::<DecisionRecord>(&path)? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.decided_at);
        Ok(records)
    }

    fn put_artifact(&self, job_id: Uuid, stage: &str, draft: &ArtifactDraft) -> Result<Artifact, StoreError> {
        let _guard = self.write_lock()?;
        check_component(stage)?;
        check_component(&draft.name)?;
        let dir = self.existing_job_dir(job_id)?;
        let locator = Artifact::locator_for(stage, &draft.name);
        debug!("put_artifact:start job={} locator={}", job_id, locator);
        let mut index = self.read_index(&dir)?;
        let position = index.iter().position(|a| a.locator == locator);
        let artifact = Artifact::record(job_id, stage, draft, position.map(|i| &index[i]));
        self.write_atomic(&dir.join(&locator), &draft.content)?;
        match position {
            Some(i) => index[i] = artifact.clone(),
            None => index.push(artifact.clone()),
        }
        self.write_index(&dir, &index)?;
        debug!("put_artifact:done job={} locator={} revision={}", job_id, locator, artifact.revision);
        Ok(artifact)
    }

    fn list_artifacts(&self, job_id: Uuid) -> Result<Vec<Artifact>, StoreError> {
        let _guard = self.read_lock()?;
        Ok(self.read_index(&self.job_dir(job_id))?)
    }

    fn read_artifact(&self, job_id: Uuid, locator: &str) -> Result<Vec<u8>, StoreError> {
        let _guard = self.read_lock()?;
        let dir = self.job_dir(job_id);
        // Solo locators registrados en el índice: nunca rutas arbitrarias.
        if !self.read_index(&dir)?.iter().any(|a| a.locator == locator) {
            return Err(StoreError::NotFound(format!("artifact {locator}")));
        }
        let path = dir.join(locator);
        fs::read(&path).map_err(|e| match e.kind() {
                           ErrorKind::NotFound => StoreError::NotFound(format!("artifact {locator}")),
                           _ => PersistenceError::io(&path, e).into(),
                       })
    }

    fn replace_artifacts(&self, job_id: Uuid, updates: &[ArtifactUpdate]) -> Result<Vec<Artifact>, StoreError> {
        let _guard = self.write_lock()?;
        let dir = self.existing_job_dir(job_id)?;
        let mut index = self.read_index(&dir)?;
        let mut positions = Vec::with_capacity(updates.len());
        for u in updates {
            match index.iter().position(|a| a.locator == u.locator) {
                Some(i) => positions.push(i),
                None => return Err(StoreError::NotFound(format!("artifact {}", u.locator))),
            }
        }
        // Primero todos los temporales; los rename solo empiezan si todos se escribieron.
        let mut staged = Vec::with_capacity(updates.len());
        for u in updates {
            let path = dir.join(&u.locator);
            let tmp = temp_path(&path);
            if let Err(e) = self.write_file(&tmp, &u.content) {
                for (t, _) in &staged {
                    let _ = fs::remove_file(t);
                }
                return Err(e.into());
            }
            staged.push((tmp, path));
        }
        for (tmp, path) in &staged {
            fs::rename(tmp, path).map_err(|e| PersistenceError::io(path, e))?;
        }
        let mut written = Vec::with_capacity(updates.len());
        for (u, i) in updates.iter().zip(positions) {
            index[i] = index[i].rewritten(&u.content);
            written.push(index[i].clone());
        }
        self.write_index(&dir, &index)?;
        debug!("replace_artifacts:done job={} count={}", job_id, written.len());
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn components_reject_paths() {
        assert!(check_component("script.md").is_ok());
        assert!(check_component("storyboard").is_ok());
        for bad in ["", ".", "..", "../x", "a/b", "a\\b", ".hidden"] {
            assert!(check_component(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn temp_path_is_hidden_sibling() {
        assert_eq!(temp_path(Path::new("/d/jobs/x/job.json")), PathBuf::from("/d/jobs/x/.job.json.tmp"));
    }
}
