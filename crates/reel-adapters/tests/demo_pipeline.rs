use std::time::Duration;

use reel_adapters::content_pipeline;
use reel_adapters::payloads::{AudioMix, PackageManifest, StoryboardDoc};
use reel_core::{Job, JobStatus, Orchestrator, Patch};
use serde_json::json;

fn orchestrator() -> Orchestrator {
    Orchestrator::in_memory().stages(content_pipeline()).build().unwrap()
}

async fn approve_through(orch: &Orchestrator, job: &Job) -> JobStatus {
    loop {
        match orch.advance(job.id).await.unwrap() {
            JobStatus::NeedsApproval => {
                let gate = orch.pending_gate(job.id).unwrap().unwrap();
                orch.approve(job.id, &gate.stage, "editor", None, None).await.unwrap();
            }
            other => return other,
        }
    }
}

#[tokio::test]
async fn demo_stages_complete_the_content_pipeline() {
    let orch = orchestrator();
    let job = orch.submit("ocean-tides", json!({"voice": "calm"})).unwrap();
    assert_eq!(approve_through(&orch, &job).await, JobStatus::Completed);

    let artifacts = orch.artifacts(job.id).unwrap();
    let package = artifacts.iter().find(|a| a.stage == "package").unwrap();
    let manifest: PackageManifest = serde_json::from_slice(&orch.read_artifact(job.id, &package.locator).unwrap()).unwrap();
    assert_eq!(manifest.slug, "ocean-tides");
    assert_eq!(manifest.files.len(), artifacts.len() - 1);
    assert!(artifacts.iter().filter(|a| a.stage == "svg").count() >= 4);
}

#[tokio::test]
async fn demo_output_is_deterministic() {
    let a = orchestrator();
    let b = orchestrator();
    let ja = a.submit("same-slug", json!({})).unwrap();
    let jb = b.submit("same-slug", json!({})).unwrap();
    approve_through(&a, &ja).await;
    approve_through(&b, &jb).await;
    let checksums = |o: &Orchestrator, job: &Job| o.artifacts(job.id).unwrap().into_iter().map(|x| (x.locator, x.checksum)).collect::<Vec<_>>();
    let (ca, cb) = (checksums(&a, &ja), checksums(&b, &jb));
    // Incluye package.json, que lista los checksums anteriores.
    assert_eq!(ca, cb);
}

#[tokio::test]
async fn demo_artifacts_accept_every_patch_type() {
    let orch = orchestrator();
    let job = orch.submit("night-sky", json!({})).unwrap();

    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::NeedsApproval);
    let section = Patch::from_value(json!({"type": "section_replace", "section_id": "deep-dive", "new_text": "Rewritten."})).unwrap();
    orch.approve(job.id, "script", "editor", None, Some(section)).await.unwrap();

    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::NeedsApproval);
    let beats = Patch::from_value(json!({"type": "duration_adjust", "beat_adjustments": [{"beat_id": "b1", "duration_ms": 4000}]})).unwrap();
    orch.approve(job.id, "storyboard", "editor", None, Some(beats)).await.unwrap();
    let board = orch.artifacts(job.id).unwrap().into_iter().find(|a| a.stage == "storyboard").unwrap();
    let doc: StoryboardDoc = serde_json::from_slice(&orch.read_artifact(job.id, &board.locator).unwrap()).unwrap();
    assert_eq!(doc.beats[0].duration_ms, 4000);
    assert_eq!(doc.total_duration_ms, doc.beats.iter().map(|b| b.duration_ms).sum::<i64>());

    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::NeedsApproval);
    orch.approve(job.id, "assets", "editor", None, None).await.unwrap();
    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::NeedsApproval);
    let level = Patch::from_value(json!({"type": "level_adjust", "level_change_db": 3.0})).unwrap();
    orch.approve(job.id, "audio", "editor", None, Some(level)).await.unwrap();
    let mix = orch.artifacts(job.id).unwrap().into_iter().find(|a| a.stage == "audio").unwrap();
    let mix: AudioMix = serde_json::from_slice(&orch.read_artifact(job.id, &mix.locator).unwrap()).unwrap();
    assert_eq!(mix.level_db, -13.0);

    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::Completed);
    let script = orch.artifacts(job.id).unwrap().into_iter().find(|a| a.stage == "script").unwrap();
    let text = String::from_utf8(orch.read_artifact(job.id, &script.locator).unwrap()).unwrap();
    assert!(text.contains("## Deep Dive\nRewritten.\n"));
}

#[tokio::test]
async fn fail_stage_config_fails_that_stage() {
    let orch = orchestrator();
    let job = orch.submit("broken", json!({"fail_stage": "research"})).unwrap();
    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::Failed);
    let failed = orch.get_job(job.id).unwrap();
    assert_eq!(failed.stage_index, 1);
    assert!(failed.error.unwrap().contains("simulated failure in stage 'research'"));
}

#[tokio::test]
async fn simulated_work_stops_on_cancel() {
    let orch = orchestrator();
    let job = orch.submit("slow", json!({"stage_delay_ms": 60_000})).unwrap();
    let runner = orch.clone();
    let id = job.id;
    let task = tokio::spawn(async move { runner.advance(id).await });
    while orch.get_job(job.id).unwrap().status != JobStatus::Running {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    orch.cancel(job.id).await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap().unwrap();
    assert_eq!(status, JobStatus::Canceled);
}
