//! End-to-end scenarios from §8: flow construction plus the handlers that
//! execute each emitted step kind, run against `flow-core`'s real
//! `build_flow`/`StepOptsRegistry` rather than hand-built plans.

use flow_adapters::build_registry;
use flow_adapters::naming::output_filename;
use flow_core::policy::StepOptsRegistry;
use flow_core::step::StepHandler;
use flow_core::{build_flow, StepContext};
use flow_domain::task::{AudioOptions, SpriteOptions, ThumbnailOptions, TranscodeOptions};
use flow_domain::{StepKind, Task, TaskPayload};
use std::collections::HashMap;
use tokio::sync::mpsc;

fn ctx() -> StepContext {
    let (tx, _rx) = mpsc::unbounded_channel();
    StepContext::new("job-1", "task-1", "workspace-1", 0, HashMap::new(), tx)
}

/// Scenario 1 (§8): only the flag-gated optional steps that are actually
/// enabled appear in the plan.
#[test]
fn process_upload_happy_path_emits_expected_steps() {
    let payload = TaskPayload::ProcessUpload {
        upload_id: "u1".into(),
        thumbnail: Some(ThumbnailOptions { ts: 1, w: 320, h: 240 }),
        sprite: Some(SpriteOptions { fps: 1, cols: 10, rows: 10, tw: 160, th: 120 }),
        filmstrip: None,
        transcode: Some(TranscodeOptions { enabled: true, codec: "h264".into(), res: "720p".into() }),
        audio: Some(AudioOptions { enabled: false }),
    };
    let task = Task::new("t1", "w1", payload);
    let plan = build_flow(&task, &StepOptsRegistry::default()).unwrap();
    let kinds = plan.step_kinds();

    assert!(kinds.contains(&StepKind::TranscodeProbe));
    assert!(kinds.contains(&StepKind::TranscodeThumbnail));
    assert!(kinds.contains(&StepKind::TranscodeSprite));
    assert!(kinds.contains(&StepKind::TranscodeTranscode));
    assert!(!kinds.contains(&StepKind::TranscodeFilmstrip));
    assert!(!kinds.contains(&StepKind::TranscodeAudio));

    let registry = build_registry();
    registry.assert_covers(&kinds).expect("every emitted step kind must be registered");
}

/// Scenario 5 (§8): two configs differing only by key order produce the
/// identical output name.
#[tokio::test]
async fn sprite_name_is_identical_regardless_of_config_key_order() {
    let registry = build_registry();
    let handler = registry.get(StepKind::TranscodeSprite).unwrap();

    let ordered = serde_json::json!({ "uploadId": "u1", "fps": 1, "cols": 10, "rows": 10, "tw": 160, "th": 120 });
    let reordered = serde_json::json!({ "uploadId": "u1", "th": 120, "tw": 160, "rows": 10, "cols": 10, "fps": 1 });

    let a = handler.handle(ordered, &ctx()).await.unwrap();
    let b = handler.handle(reordered, &ctx()).await.unwrap();
    assert_eq!(a["path"], b["path"]);
}

/// Invariant 5 (§8) at the naming-helper level: identical
/// `(uploadId, stepKind, config)` yields an identical name across
/// independent calls, with no shared state between them.
#[test]
fn deterministic_naming_is_stable_across_independent_calls() {
    let config = serde_json::json!({ "ts": 1, "w": 320, "h": 240 });
    let a = output_filename(StepKind::TranscodeThumbnail, "u1", &config, "v1", "jpg");
    let b = output_filename(StepKind::TranscodeThumbnail, "u1", &config, "v1", "jpg");
    assert_eq!(a, b);
}

/// Render DAG (scenario 2, §8): `finalize` can only run after reading
/// `execute`'s memoized output, which in turn required `prepare`'s.
#[tokio::test]
async fn render_chain_propagates_upstream_outputs() {
    let registry = build_registry();
    let prepare = registry.get(StepKind::RenderPrepare).unwrap();
    let execute = registry.get(StepKind::RenderExecute).unwrap();
    let finalize = registry.get(StepKind::RenderFinalize).unwrap();

    let prepare_out = prepare
        .handle(serde_json::json!({ "timelineId": "t1", "version": 1, "tracks": [] }), &ctx())
        .await
        .unwrap();

    let mut after_prepare = HashMap::new();
    after_prepare.insert(StepKind::RenderPrepare, prepare_out);
    let (tx, _rx) = mpsc::unbounded_channel();
    let execute_ctx = StepContext::new("job-2", "task-1", "workspace-1", 0, after_prepare, tx);
    let execute_out = execute.handle(serde_json::json!({ "timelineId": "t1" }), &execute_ctx).await.unwrap();

    let mut after_execute = HashMap::new();
    after_execute.insert(StepKind::RenderExecute, execute_out);
    let (tx2, _rx2) = mpsc::unbounded_channel();
    let finalize_ctx = StepContext::new("job-3", "task-1", "workspace-1", 0, after_execute, tx2);
    let output_settings = serde_json::json!({ "codec": "h264", "format": "mp4", "resolution": "1920x1080" });
    let finalize_out = finalize
        .handle(serde_json::json!({ "timelineId": "t1", "outputSettings": output_settings }), &finalize_ctx)
        .await
        .unwrap();

    assert!(finalize_out["path"].as_str().unwrap().starts_with("render:finalize_t1_"));
    assert!(finalize_out["path"].as_str().unwrap().ends_with(".mp4"));
}
