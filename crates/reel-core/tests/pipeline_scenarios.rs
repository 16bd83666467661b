mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{review_registry, scripted, types, Probe};
use reel_core::{GateStatus, JobStatus, Patch, StageRegistry, StageSpec};
use serde_json::{json, Value};

#[tokio::test]
async fn content_pipeline_runs_nine_stages_through_four_gates() {
    let probe = Arc::new(Probe::default());
    let registry = StageRegistry::content_pipeline();
    let orch = scripted(registry.clone(), &probe, Duration::ZERO).build().unwrap();
    let job = orch.submit("rust-in-60s", json!({"topic": "ownership"})).unwrap();

    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::NeedsApproval);
    for stage in ["script", "storyboard", "assets", "audio"] {
        let gate = orch.pending_gate(job.id).unwrap().expect("pending gate");
        assert_eq!(gate.stage, stage);
        orch.approve(job.id, stage, "alice", Some(format!("{stage} ok")), None).await.unwrap();
        orch.advance(job.id).await.unwrap();
    }

    let done = orch.get_job(job.id).unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.stage_index, 9);

    let events = orch.poll_events(job.id, None, 1_000).unwrap();
    let expected = vec!["job_started",
                        "stage_started", "stage_completed",
                        "stage_started", "stage_completed",
                        "stage_started", "stage_completed", "gate_pause", "gate_approved",
                        "stage_started", "stage_completed", "gate_pause", "gate_approved",
                        "stage_started", "stage_completed", "gate_pause", "gate_approved",
                        "stage_started", "stage_completed",
                        "stage_started", "stage_completed", "gate_pause", "gate_approved",
                        "stage_started", "stage_completed",
                        "stage_started", "stage_completed",
                        "job_completed"];
    assert_eq!(types(&events), expected);

    // seq denso, ts creciente, índice de stage no decreciente
    let mut last_index = 0;
    for (i, ev) in events.iter().enumerate() {
        assert_eq!(ev.seq, i as u64);
        if i > 0 {
            assert!(ev.ts > events[i - 1].ts);
        }
        if let Some(stage) = &ev.stage {
            let idx = registry.index_of(stage).unwrap();
            assert!(idx >= last_index, "stage index went backwards at {ev:?}");
            last_index = idx;
        }
    }

    for stage in registry.names() {
        assert_eq!(probe.calls(&stage), 1, "stage {stage} should run once");
    }
    let decisions = orch.decisions(job.id).unwrap();
    assert_eq!(decisions.len(), 4);
    assert!(decisions.iter().all(|d| d.decision == GateStatus::Approved && d.decided_by == "alice"));
}

#[tokio::test]
async fn rejecting_script_with_text_replace_retries_on_patched_artifact() {
    let probe = Arc::new(Probe::default());
    let orch = scripted(StageRegistry::content_pipeline(), &probe, Duration::ZERO).build().unwrap();
    let job = orch.submit("demo", json!({})).unwrap();
    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::NeedsApproval);

    let script = orch.artifacts(job.id).unwrap().into_iter().find(|a| a.stage == "script").unwrap();
    let patch = Patch::from_value(json!({"type": "text_replace", "replacements": [{"old": "foo", "new": "bar"}]})).unwrap();
    let after_reject = orch.reject(job.id, "script", "bob", Some("rename the mascot".into()), Some(patch)).await.unwrap();
    assert_eq!(after_reject.status, JobStatus::Queued);
    assert_eq!(after_reject.stage_index, 2);

    let content = String::from_utf8(orch.read_artifact(job.id, &script.locator).unwrap()).unwrap();
    assert!(content.contains("bar opens the show"));
    assert!(!content.contains("foo"));

    let decision = orch.decisions(job.id).unwrap().pop().unwrap();
    assert_eq!(decision.decision, GateStatus::Rejected);
    assert!(decision.patch_applied);
    assert_eq!(decision.notes.as_deref(), Some("rename the mascot"));

    let tail = orch.poll_events(job.id, None, 3).unwrap();
    assert_eq!(types(&tail), vec!["gate_rejected", "patch_applied", "stage_retry"]);

    // El reintento re-presenta el artifact parcheado sin regenerarlo.
    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::NeedsApproval);
    assert_eq!(probe.calls("script"), 1);
    let completed = orch.poll_events(job.id, None, 2).unwrap();
    assert_eq!(types(&completed), vec!["stage_completed", "gate_pause"]);
    assert_eq!(completed[0].payload.as_ref().unwrap()["reused"], Value::Bool(true));
    let gate = orch.pending_gate(job.id).unwrap().unwrap();
    assert_eq!(gate.stage, "script");

    orch.approve(job.id, "script", "bob", None, None).await.unwrap();
    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::NeedsApproval);
    let job = orch.get_job(job.id).unwrap();
    assert_eq!(job.stage_index, 3);
    assert_eq!(job.attempt("script"), 2);
}

#[tokio::test]
async fn timer_auto_approves_after_delay() {
    let probe = Arc::new(Probe::default());
    let registry = review_registry(StageSpec::new("review").auto_approve_after(Duration::from_secs(5)));
    let orch = scripted(registry, &probe, Duration::ZERO).build().unwrap();
    let job = orch.submit("demo", json!({})).unwrap();
    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::NeedsApproval);

    let early = orch.sweep_timeouts(Utc::now()).await.unwrap();
    assert!(early.auto_approved.is_empty());
    assert_eq!(orch.get_job(job.id).unwrap().status, JobStatus::NeedsApproval);

    let later = orch.sweep_timeouts(Utc::now() + chrono::Duration::seconds(6)).await.unwrap();
    assert_eq!(later.auto_approved, vec![(job.id, "review".to_string())]);

    let tail = orch.poll_events(job.id, None, 2).unwrap();
    assert_eq!(types(&tail), vec!["gate_auto_approved", "gate_approved"]);
    assert_eq!(tail[1].payload.as_ref().unwrap()["decided_by"], "timer");
    let decision = orch.decisions(job.id).unwrap().pop().unwrap();
    assert_eq!(decision.decided_by, "timer");

    assert_eq!(orch.get_job(job.id).unwrap().status, JobStatus::Queued);
    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::Completed);

    // Un segundo barrido no encuentra nada que hacer.
    let again = orch.sweep_timeouts(Utc::now() + chrono::Duration::seconds(60)).await.unwrap();
    assert!(again.auto_approved.is_empty());
}

#[tokio::test]
async fn zero_delay_auto_approval_resolves_on_arrival() {
    let probe = Arc::new(Probe::default());
    let registry = review_registry(StageSpec::new("review").auto_approve_after(Duration::ZERO));
    let orch = scripted(registry, &probe, Duration::ZERO).build().unwrap();
    let job = orch.submit("demo", json!({})).unwrap();
    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::Completed);

    let events = orch.poll_events(job.id, None, 100).unwrap();
    let t = types(&events);
    assert!(!t.contains(&"gate_pause"));
    let auto = t.iter().position(|x| *x == "gate_auto_approved").unwrap();
    assert_eq!(t[auto + 1], "gate_approved");
    let gates = orch.gates(job.id).unwrap();
    assert_eq!(gates.len(), 1);
    assert_eq!(gates[0].decided_by.as_deref(), Some("timer"));
}

#[tokio::test]
async fn approve_with_patch_applies_before_advancing() {
    let probe = Arc::new(Probe::default());
    let orch = scripted(StageRegistry::content_pipeline(), &probe, Duration::ZERO).build().unwrap();
    let job = orch.submit("demo", json!({})).unwrap();
    orch.advance(job.id).await.unwrap();
    orch.approve(job.id, "script", "alice", None, None).await.unwrap();
    assert_eq!(orch.advance(job.id).await.unwrap(), JobStatus::NeedsApproval);

    let patch = Patch::from_value(json!({"type": "duration_adjust", "beat_adjustments": [{"beat_id": "b2", "duration_ms": 400}]})).unwrap();
    orch.approve(job.id, "storyboard", "alice", None, Some(patch)).await.unwrap();
    let sb = orch.artifacts(job.id).unwrap().into_iter().find(|a| a.stage == "storyboard").unwrap();
    let doc: Value = serde_json::from_slice(&orch.read_artifact(job.id, &sb.locator).unwrap()).unwrap();
    assert_eq!(doc["total_duration_ms"], 1600);
    assert_eq!(sb.revision, 2);
    let tail = orch.poll_events(job.id, None, 2).unwrap();
    assert_eq!(types(&tail), vec!["patch_applied", "gate_approved"]);
}
