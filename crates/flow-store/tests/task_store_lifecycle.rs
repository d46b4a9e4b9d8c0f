mod test_support;

use flow_core::store::TaskStore;
use flow_domain::{Task, TaskPayload, TaskStatus};
use flow_store::pg::{PgTaskStore, PoolProvider};
use test_support::with_pool;

fn sample_task(id: &str) -> Task {
    Task::new(
        id,
        "workspace-1",
        TaskPayload::RenderTimeline {
            timeline_id: "tl-1".into(),
            version: 1,
            tracks: vec![],
            output_settings: flow_domain::OutputSettings {
                codec: "h264".into(),
                format: "mp4".into(),
                resolution: "1080p".into(),
            },
        },
    )
}

#[tokio::test]
async fn fetch_mark_and_terminal_lifecycle() {
    let Some(pool) = with_pool(|p| p.clone()) else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let store = PgTaskStore::new(PoolProvider { pool });
    let task = sample_task("lifecycle-task-1");
    store.create_task(&task).await.expect("create task");

    let queued = store.fetch_queued(10).await.expect("fetch queued");
    assert!(queued.iter().any(|t| t.id == task.id));

    let claimed = store.mark_running(&task.id).await.expect("mark running");
    assert!(claimed);
    let claimed_again = store.mark_running(&task.id).await.expect("mark running again");
    assert!(!claimed_again, "second claim must lose the race");

    store.set_progress(&task.id, 42.5).await.expect("set progress");
    let fetched = store.get(&task.id).await.expect("get").expect("present");
    assert_eq!(fetched.progress, 42.5);
    assert_eq!(fetched.status, TaskStatus::Running);

    store
        .set_terminal(&task.id, TaskStatus::Succeeded, Some(serde_json::json!({"ok": true})), None)
        .await
        .expect("set terminal");

    let conflict = store.set_terminal(&task.id, TaskStatus::Failed, None, Some("boom".into())).await;
    assert!(matches!(conflict, Err(flow_core::errors::OrchestratorError::TerminalConflict(_))));

    let idempotent = store.set_terminal(&task.id, TaskStatus::Succeeded, Some(serde_json::json!({"ok": true})), None).await;
    assert!(idempotent.is_ok(), "repeating the same terminal status is a no-op");
}
