//! flow-cli: operator CLI for the queue/task engine (§6, §12 Supplement).
//!
//! Talks to the same Redis queue and Postgres task store the worker and
//! orchestrator processes use, so `counts`/`health` reflect live state and
//! `requeue`/`cancel`/`reconcile` take effect immediately for the next
//! poll cycle, with no separate admin API in between.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use flow_core::health::HealthAggregator;
use flow_core::mirror::TaskMirror;
use flow_core::queue::QueueBackend;
use flow_core::store::TaskStore;
use flow_domain::{QueueName, TaskStatus};
use flow_infra::EngineConfig;
use flow_redis::RedisQueueBackend;

#[derive(Parser)]
#[command(name = "flow-cli", about = "operator CLI for the transcode/render/labels task engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the aggregate health report (same payload the `/health` endpoint serves).
    Health,
    /// Print queue depth counters for one queue.
    Counts {
        /// transcode | render | labels | default
        queue: String,
    },
    /// Move a task back to `queued`, ignoring whatever it is currently doing.
    Requeue {
        /// Task id to requeue
        task_id: String,
    },
    /// Mark a task `cancelled`.
    Cancel {
        /// Task id to cancel
        task_id: String,
    },
    /// Re-derive a task's terminal state from its children and replay it.
    Reconcile {
        /// Task id to reconcile
        task_id: String,
        /// The task's parent job id in the queue backend
        parent_job_id: String,
    },
}

fn parse_queue(name: &str) -> Result<QueueName> {
    QueueName::ALL
        .into_iter()
        .find(|q| q.wire_id() == name)
        .ok_or_else(|| anyhow::anyhow!("unknown queue {name:?}, expected one of: {:?}", QueueName::ALL.map(|q| q.wire_id())))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    flow_infra::init_dotenv();
    let cfg = EngineConfig::from_env();
    let cli = Cli::parse();

    let backend = Arc::new(
        RedisQueueBackend::connect(&cfg.queue_backend_url, "flow")
            .await
            .with_context(|| format!("connecting to queue backend at {}", cfg.queue_backend_url))?,
    );

    match cli.command {
        Commands::Health => cmd_health(&backend).await?,
        Commands::Counts { queue } => cmd_counts(&backend, &queue).await?,
        Commands::Requeue { task_id } => cmd_requeue(&task_id).await?,
        Commands::Cancel { task_id } => cmd_cancel(&task_id, cfg.progress_debounce_ms).await?,
        Commands::Reconcile { task_id, parent_job_id } => cmd_reconcile(&backend, &task_id, &parent_job_id, cfg.progress_debounce_ms).await?,
    }

    Ok(())
}

async fn cmd_health(backend: &Arc<RedisQueueBackend>) -> Result<()> {
    let aggregator = HealthAggregator::new(Arc::clone(backend), vec![]);
    let report = aggregator.check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_counts(backend: &Arc<RedisQueueBackend>, queue: &str) -> Result<()> {
    let queue = parse_queue(queue)?;
    let counts = backend.counts(queue).await.context("fetching queue counts")?;
    println!("{}", serde_json::to_string_pretty(&counts)?);
    Ok(())
}

async fn cmd_requeue(task_id: &str) -> Result<()> {
    let store = flow_store::task_store_from_env().context("connecting to task store")?;
    store.revert_to_queued(task_id).await.context("reverting task to queued")?;
    println!("task {task_id} reverted to queued");
    Ok(())
}

async fn cmd_cancel(task_id: &str, debounce_ms: u64) -> Result<()> {
    let store = flow_store::task_store_from_env().context("connecting to task store")?;
    let mirror = TaskMirror::new(store, debounce_ms);
    mirror
        .set_terminal(task_id, TaskStatus::Cancelled, None, Some("cancelled by operator".to_string()))
        .await
        .context("cancelling task")?;
    println!("task {task_id} cancelled");
    Ok(())
}

async fn cmd_reconcile(backend: &Arc<RedisQueueBackend>, task_id: &str, parent_job_id: &str, debounce_ms: u64) -> Result<()> {
    let store = flow_store::task_store_from_env().context("connecting to task store")?;
    let task = store.get(task_id).await.context("fetching task")?;
    if task.is_none() {
        bail!("task {task_id} not found");
    }
    let mirror = TaskMirror::new(store, debounce_ms);
    mirror.reconcile(task_id, parent_job_id, backend.as_ref()).await.context("reconciling task")?;
    println!("task {task_id} reconciled");
    Ok(())
}
