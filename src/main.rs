//! Boots the engine as one process: the task enqueuer, one step worker
//! per queue, the parent orchestrator, and the operator health endpoint,
//! all sharing one Redis queue connection and one Postgres task store.
//!
//! A real deployment would likely split these into separate processes
//! (so a worker restart doesn't also bounce the orchestrator) — this
//! binary runs them as sibling tasks on one Tokio runtime instead, which
//! is enough to exercise the whole engine end to end.

use std::sync::Arc;

use flow_core::{HealthAggregator, ParentOrchestrator, StepOptsRegistry, StepWorker, TaskEnqueuer, TaskMirror};
use flow_domain::QueueName;
use flow_infra::EngineConfig;
use flow_redis::RedisQueueBackend;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    flow_infra::init_dotenv();
    let cfg = EngineConfig::from_env();
    tracing::info!(storage_type = ?cfg.storage_type, poll_interval_ms = cfg.poll_interval_ms, "starting media-flow engine");

    let backend = Arc::new(RedisQueueBackend::connect(&cfg.queue_backend_url, "flow").await?);
    let task_store = flow_store::task_store_from_env()?;
    let registry = flow_adapters::build_registry();
    registry.assert_covers(&flow_domain::StepKind::ALL)?;

    let mirror = Arc::new(TaskMirror::new(Arc::clone(&task_store), cfg.progress_debounce_ms));

    let enqueuer = Arc::new(TaskEnqueuer::new(
        Arc::clone(&backend),
        Arc::clone(&task_store),
        StepOptsRegistry::new(),
        cfg.poll_interval_ms,
        cfg.batch_size,
    ));
    let task_index = enqueuer.task_index();

    let aggregator = Arc::new(HealthAggregator::new(Arc::clone(&backend), vec![]));

    let mut handles = Vec::new();

    handles.push(tokio::spawn({
        let enqueuer = Arc::clone(&enqueuer);
        async move { enqueuer.run().await }
    }));

    for queue in QueueName::ALL {
        let worker = Arc::new(StepWorker::new(
            Arc::clone(&backend),
            registry.clone(),
            Arc::clone(&mirror),
            Arc::clone(&task_store),
            Arc::clone(&task_index),
            cfg.stall_threshold_ms,
        ));
        handles.push(tokio::spawn(async move { worker.run(queue).await }));
    }

    let parent_orchestrator = Arc::new(ParentOrchestrator::new(
        Arc::clone(&backend),
        Arc::clone(&mirror),
        Arc::clone(&task_store),
        Arc::clone(&task_index),
    ));
    handles.push(tokio::spawn(async move { parent_orchestrator.run().await }));

    let health_bind = cfg.health_bind.clone();
    let health_port = cfg.health_port;
    handles.push(tokio::spawn(async move {
        flow_infra::health_server::serve(aggregator, &health_bind, health_port)
            .await
            .map_err(|e| flow_core::OrchestratorError::Internal(e.to_string()))
    }));

    for handle in handles {
        if let Err(e) = handle.await? {
            tracing::error!(error = %e, "engine task exited with an error");
        }
    }

    Ok(())
}
