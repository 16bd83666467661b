use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reel_core::{ArtifactDraft, ArtifactKind, JobStatus, JobStore, Orchestrator, OrchestratorBuilder, StageContext, StageError,
                StageImplementation, StageRegistry, StageSpec};
use reel_persistence::FileJobStore;
use serde_json::json;

struct Echo;

#[async_trait]
impl StageImplementation for Echo {
    async fn run(&self, ctx: StageContext) -> Result<Vec<ArtifactDraft>, StageError> {
        Ok(vec![ArtifactDraft::text(format!("{}.txt", ctx.stage), ArtifactKind::Generic, format!("{} for {}", ctx.stage, ctx.slug))])
    }
}

fn registry() -> StageRegistry {
    StageRegistry::from_specs(vec![StageSpec::new("draft"), StageSpec::new("review").gated(), StageSpec::new("publish")]).unwrap()
}

fn builder(store: Arc<dyn JobStore>) -> OrchestratorBuilder {
    Orchestrator::builder(store).registry(registry()).stage("draft", Echo).stage("review", Echo).stage("publish", Echo)
}

#[tokio::test]
async fn parked_job_continues_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let job_id = {
        let store: Arc<dyn JobStore> = Arc::new(FileJobStore::open_dir(dir.path()).unwrap());
        let orch = builder(store).build().unwrap();
        let job = orch.submit("episode-1", json!({})).unwrap();
        assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::NeedsApproval);
        job.id
    };

    let store: Arc<dyn JobStore> = Arc::new(FileJobStore::open_dir(dir.path()).unwrap());
    let orch = builder(store).build().unwrap();
    let report = orch.recover().await.unwrap();
    assert!(report.interrupted.is_empty());
    assert_eq!(orch.pending_gate(job_id).unwrap().unwrap().stage, "review");

    let before = orch.poll_events(job_id, None, 100).unwrap();
    orch.approve(job_id, "review", "ana", None, None).await.unwrap();
    assert_eq!(orch.advance(job_id).await.unwrap(), JobStatus::Completed);

    let events = orch.poll_events(job_id, None, 100).unwrap();
    assert_eq!(&events[..before.len()], &before[..]);
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (0..events.len() as u64).collect::<Vec<_>>());
    assert!(events.windows(2).all(|w| w[0].ts < w[1].ts));
    assert_eq!(orch.artifacts(job_id).unwrap().len(), 3);
}

#[tokio::test]
async fn running_job_is_interrupted_on_restart_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn JobStore> = Arc::new(FileJobStore::open_dir(dir.path()).unwrap());
    let orch = builder(store.clone()).build().unwrap();
    let job = orch.submit("episode-2", json!({})).unwrap();
    // Simula un crash a mitad del stage.
    let mut crashed = store.load_job(job.id).unwrap().unwrap();
    crashed.status = JobStatus::Running;
    store.save_job(&crashed).unwrap();
    drop(orch);
    drop(store);

    let store: Arc<dyn JobStore> = Arc::new(FileJobStore::open_dir(dir.path()).unwrap());
    let orch = builder(store).build().unwrap();
    let report = orch.recover().await.unwrap();
    assert_eq!(report.interrupted, vec![job.id]);

    let paused = orch.get_job(job.id).unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert!(paused.interrupted);
    let last = orch.poll_events(job.id, None, 1).unwrap().pop().unwrap();
    assert_eq!(last.event_type.as_str(), "job_interrupted");
    assert_eq!(last.seq, 1);

    let handle = orch.spawn_background().unwrap();
    orch.resume(job.id, false).await.unwrap();
    let parked = orch.wait_settled(job.id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(parked.status, JobStatus::NeedsApproval);
    handle.shutdown();
}

#[tokio::test]
async fn retention_compacts_durable_log() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn JobStore> = Arc::new(FileJobStore::open_dir(dir.path()).unwrap());
    let config = reel_core::EngineConfig { event_retention: Some(2), ..Default::default() };
    let orch = builder(store.clone()).config(config).build().unwrap();
    let job = orch.submit("episode-3", json!({})).unwrap();
    orch.advance(job.id).await.unwrap();
    orch.cancel(job.id).await.unwrap();
    let events = store.list_events(job.id).unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].event_type.as_str(), "job_canceled");
}
