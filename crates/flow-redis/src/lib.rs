//! Redis-backed `QueueBackend` (C1): the durable, multi-process queue the
//! in-memory reference implementation in `flow-core` stands in for during
//! tests. Same ready-rule, memoization, and cascade semantics; state lives
//! in Redis instead of a process-local mutex, so any number of enqueuer,
//! worker, and orchestrator processes can share one queue.
//!
//! Key layout (all keys prefixed with the configured namespace, default
//! `flow`):
//! - `{ns}:queue:{queue}` — list of ready job ids, FIFO via RPUSH/LPOP.
//! - `{ns}:delayed:{queue}` — sorted set of job ids awaiting retry,
//!   scored by the unix-ms timestamp they become ready.
//! - `{ns}:job:{job_id}` — JSON blob of the `Job`.
//! - `{ns}:parent:{parent_job_id}` — JSON blob of the `ParentEntry`.
//! - `{ns}:ready_parents` — list of parent ids whose children are all
//!   terminal, awaiting the orchestrator.
//! - `{ns}:lock:{parent_job_id}` — short-lived mutual-exclusion key
//!   guarding read-modify-write of one parent's entry.
//! - `{ns}:counts:{queue}:completed` / `:failed` — running totals for
//!   `counts()`; avoids a full parent scan on the health-check path.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use flow_core::errors::OrchestratorError;
use flow_core::flow::FlowPlan;
use flow_core::queue::{Job, JobPayload, QueueBackend, QueueCounts};
use flow_domain::{QueueName, StepKind, StepResult, StepStatus};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ParentEntry {
    plan: FlowPlan,
    step_results: HashMap<StepKind, StepResult>,
    step_job_id: HashMap<StepKind, String>,
    step_attempt: HashMap<StepKind, u32>,
    terminal: bool,
}

impl ParentEntry {
    fn all_terminal(&self) -> bool {
        self.plan.children.iter().all(|c| self.step_results.get(&c.step_kind).map(|r| r.is_terminal()).unwrap_or(false))
    }
}

fn to_err(e: redis::RedisError) -> OrchestratorError {
    OrchestratorError::BackendUnavailable(e.to_string())
}

pub struct RedisQueueBackend {
    conn: ConnectionManager,
    namespace: String,
    poll_interval: Duration,
}

impl RedisQueueBackend {
    pub async fn connect(redis_url: &str, namespace: impl Into<String>) -> Result<Self, OrchestratorError> {
        let client = redis::Client::open(redis_url).map_err(to_err)?;
        let conn = ConnectionManager::new(client).await.map_err(to_err)?;
        Ok(Self { conn, namespace: namespace.into(), poll_interval: Duration::from_millis(100) })
    }

    fn k_queue(&self, queue: QueueName) -> String {
        format!("{}:queue:{}", self.namespace, queue.wire_id())
    }

    fn k_delayed(&self, queue: QueueName) -> String {
        format!("{}:delayed:{}", self.namespace, queue.wire_id())
    }

    fn k_job(&self, job_id: &str) -> String {
        format!("{}:job:{job_id}", self.namespace)
    }

    fn k_parent(&self, parent_job_id: &str) -> String {
        format!("{}:parent:{parent_job_id}", self.namespace)
    }

    fn k_ready_parents(&self) -> String {
        format!("{}:ready_parents", self.namespace)
    }

    fn k_lock(&self, parent_job_id: &str) -> String {
        format!("{}:lock:{parent_job_id}", self.namespace)
    }

    fn k_counts(&self, queue: QueueName, field: &str) -> String {
        format!("{}:counts:{}:{field}", self.namespace, queue.wire_id())
    }

    async fn acquire_parent_lock(&self, parent_job_id: &str) -> Result<(), OrchestratorError> {
        let mut conn = self.conn.clone();
        let key = self.k_lock(parent_job_id);
        loop {
            let acquired: bool = redis::cmd("SET")
                .arg(&key)
                .arg("1")
                .arg("NX")
                .arg("PX")
                .arg(5000)
                .query_async(&mut conn)
                .await
                .map_err(to_err)?;
            if acquired {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn release_parent_lock(&self, parent_job_id: &str) -> Result<(), OrchestratorError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(self.k_lock(parent_job_id)).await.map_err(to_err)?;
        Ok(())
    }

    async fn load_parent(&self, parent_job_id: &str) -> Result<ParentEntry, OrchestratorError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.k_parent(parent_job_id)).await.map_err(to_err)?;
        let raw = raw.ok_or_else(|| OrchestratorError::Internal(format!("unknown parent {parent_job_id}")))?;
        serde_json::from_str(&raw).map_err(|e| OrchestratorError::Internal(e.to_string()))
    }

    async fn save_parent(&self, parent_job_id: &str, entry: &ParentEntry) -> Result<(), OrchestratorError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(entry).map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        let _: () = conn.set(self.k_parent(parent_job_id), raw).await.map_err(to_err)?;
        Ok(())
    }

    async fn save_job(&self, job: &Job) -> Result<(), OrchestratorError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(job).map_err(|e| OrchestratorError::Internal(e.to_string()))?;
        let _: () = conn.set(self.k_job(&job.job_id), raw).await.map_err(to_err)?;
        Ok(())
    }

    async fn load_job(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.k_job(job_id)).await.map_err(to_err)?;
        let raw = raw.ok_or_else(|| OrchestratorError::Internal(format!("unknown job {job_id}")))?;
        serde_json::from_str(&raw).map_err(|e| OrchestratorError::Internal(e.to_string()))
    }

    /// Moves any delayed job on `queue` whose ready-at timestamp has
    /// elapsed onto the live queue list.
    async fn promote_due(&self, queue: QueueName) -> Result<(), OrchestratorError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = conn.zrangebyscore(self.k_delayed(queue), 0, now).await.map_err(to_err)?;
        for job_id in due {
            let _: i64 = conn.zrem(self.k_delayed(queue), &job_id).await.map_err(to_err)?;
            let _: i64 = conn.rpush(self.k_queue(queue), &job_id).await.map_err(to_err)?;
        }
        Ok(())
    }

    async fn enqueue_ready_children(&self, entry: &mut ParentEntry, parent_job_id: &str) -> Result<(), OrchestratorError> {
        let mut to_enqueue = Vec::new();
        for child in &entry.plan.children {
            let already_touched = entry.step_results.get(&child.step_kind).map(|r| r.status != StepStatus::Pending).unwrap_or(false);
            if already_touched {
                continue;
            }
            let deps_ready = child
                .depends_on
                .iter()
                .all(|d| entry.step_results.get(d).map(|r| matches!(r.status, StepStatus::Completed)).unwrap_or(false));
            if deps_ready {
                to_enqueue.push(child.step_kind);
            }
        }
        for kind in to_enqueue {
            let job_id = Uuid::new_v4().to_string();
            let child = entry.plan.step(kind).unwrap().clone();
            let job = Job {
                job_id: job_id.clone(),
                parent_job_id: parent_job_id.to_string(),
                queue: child.queue,
                payload: JobPayload::Step { step_kind: kind, data: child.data.clone() },
                attempt: 0,
            };
            entry.step_job_id.insert(kind, job_id.clone());
            entry.step_results.insert(kind, StepResult { status: StepStatus::Running, ..StepResult::pending(kind) });
            self.save_job(&job).await?;
            let mut conn = self.conn.clone();
            let _: i64 = conn.rpush(self.k_queue(child.queue), &job_id).await.map_err(to_err)?;
        }
        Ok(())
    }

    fn cascade_fail(entry: &mut ParentEntry, kind: StepKind) {
        let mut queue = VecDeque::new();
        queue.push_back(kind);
        let mut seen = HashSet::new();
        while let Some(k) = queue.pop_front() {
            if !seen.insert(k) {
                continue;
            }
            let dependents: Vec<StepKind> =
                entry.plan.children.iter().filter(|c| c.depends_on.contains(&k)).map(|c| c.step_kind).collect();
            for dependent in dependents {
                let already_terminal = entry.step_results.get(&dependent).map(|r| r.is_terminal()).unwrap_or(false);
                if !already_terminal {
                    entry.step_results.insert(
                        dependent,
                        StepResult {
                            status: StepStatus::FailedByCascade,
                            output: None,
                            error: Some(format!("upstream {k} failed")),
                            started_at: None,
                            completed_at: Some(Utc::now()),
                        },
                    );
                }
                queue.push_back(dependent);
            }
        }
    }

    async fn push_ready_parent(&self, parent_job_id: &str) -> Result<(), OrchestratorError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.rpush(self.k_ready_parents(), parent_job_id).await.map_err(to_err)?;
        Ok(())
    }

    async fn bump_count(&self, queue: QueueName, field: &str) -> Result<(), OrchestratorError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.incr(self.k_counts(queue, field), 1).await.map_err(to_err)?;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn submit_flow(&self, plan: FlowPlan) -> Result<String, OrchestratorError> {
        let parent_job_id = Uuid::new_v4().to_string();
        let mut entry = ParentEntry {
            plan,
            step_results: HashMap::new(),
            step_job_id: HashMap::new(),
            step_attempt: HashMap::new(),
            terminal: false,
        };
        self.enqueue_ready_children(&mut entry, &parent_job_id).await?;
        self.save_parent(&parent_job_id, &entry).await?;
        Ok(parent_job_id)
    }

    async fn claim(&self, queue: QueueName) -> Result<Job, OrchestratorError> {
        loop {
            self.promote_due(queue).await?;
            let mut conn = self.conn.clone();
            let job_id: Option<String> = conn.lpop(self.k_queue(queue), None).await.map_err(to_err)?;
            if let Some(job_id) = job_id {
                return self.load_job(&job_id).await;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn claim_ready_parent(&self) -> Result<String, OrchestratorError> {
        loop {
            let mut conn = self.conn.clone();
            let parent_id: Option<String> = conn.lpop(self.k_ready_parents(), None).await.map_err(to_err)?;
            if let Some(parent_id) = parent_id {
                return Ok(parent_id);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, job_id: &str, result: serde_json::Value) -> Result<(), OrchestratorError> {
        let job = self.load_job(job_id).await?;
        let step_kind = match job.payload {
            JobPayload::Step { step_kind, .. } => step_kind,
            JobPayload::Parent => return Ok(()),
        };
        self.acquire_parent_lock(&job.parent_job_id).await?;
        let outcome = async {
            let mut entry = self.load_parent(&job.parent_job_id).await?;
            let already_completed = entry.step_results.get(&step_kind).map(|r| r.is_completed()).unwrap_or(false);
            if !already_completed {
                entry.step_results.insert(step_kind, StepResult::completed(step_kind, result, Utc::now()));
                self.bump_count(job.queue, "completed").await?;
            }
            self.enqueue_ready_children(&mut entry, &job.parent_job_id).await?;
            let became_terminal = entry.all_terminal() && !entry.terminal;
            if became_terminal {
                entry.terminal = true;
            }
            self.save_parent(&job.parent_job_id, &entry).await?;
            if became_terminal {
                self.push_ready_parent(&job.parent_job_id).await?;
            }
            Ok(())
        }
        .await;
        self.release_parent_lock(&job.parent_job_id).await?;
        outcome
    }

    async fn nack(&self, job_id: &str, error: String, permanent: bool) -> Result<(), OrchestratorError> {
        let job = self.load_job(job_id).await?;
        let (step_kind, data) = match job.payload {
            JobPayload::Step { step_kind, data } => (step_kind, data),
            JobPayload::Parent => return Ok(()),
        };
        self.acquire_parent_lock(&job.parent_job_id).await?;
        let outcome = async {
            let mut entry = self.load_parent(&job.parent_job_id).await?;
            let attempts_used = entry.step_attempt.entry(step_kind).or_insert(0);
            *attempts_used += 1;
            let attempt = *attempts_used;
            let max_attempts = entry.plan.step(step_kind).map(|s| s.opts.attempts).unwrap_or(3);
            let delay_ms = entry.plan.step(step_kind).map(|s| s.opts.backoff.delay_ms).unwrap_or(30_000);

            if attempt < max_attempts && !permanent {
                let new_job_id = Uuid::new_v4().to_string();
                let new_job = Job {
                    job_id: new_job_id.clone(),
                    parent_job_id: job.parent_job_id.clone(),
                    queue: job.queue,
                    payload: JobPayload::Step { step_kind, data },
                    attempt,
                };
                self.save_job(&new_job).await?;
                let backoff = delay_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1))).min(60_000);
                let ready_at = Utc::now().timestamp_millis() + backoff as i64;
                let mut conn = self.conn.clone();
                let _: i64 = conn.zadd(self.k_delayed(job.queue), &new_job_id, ready_at).await.map_err(to_err)?;
                self.save_parent(&job.parent_job_id, &entry).await?;
            } else {
                entry.step_results.insert(step_kind, StepResult::failed(step_kind, error, Utc::now()));
                self.bump_count(job.queue, "failed").await?;
                Self::cascade_fail(&mut entry, step_kind);
                let became_terminal = entry.all_terminal() && !entry.terminal;
                if became_terminal {
                    entry.terminal = true;
                }
                self.save_parent(&job.parent_job_id, &entry).await?;
                if became_terminal {
                    self.push_ready_parent(&job.parent_job_id).await?;
                }
            }
            Ok(())
        }
        .await;
        self.release_parent_lock(&job.parent_job_id).await?;
        outcome
    }

    async fn get_children_values(&self, parent_job_id: &str) -> Result<HashMap<StepKind, StepResult>, OrchestratorError> {
        let entry = self.load_parent(parent_job_id).await?;
        Ok(entry.step_results.into_iter().filter(|(_, r)| r.is_completed()).collect())
    }

    async fn get_all_children(&self, parent_job_id: &str) -> Result<HashMap<StepKind, StepResult>, OrchestratorError> {
        let entry = self.load_parent(parent_job_id).await?;
        Ok(entry.step_results)
    }

    async fn update_progress(&self, _job_id: &str, _pct: f64) -> Result<(), OrchestratorError> {
        // Progress is coalesced and persisted by `TaskMirror` against the
        // task store directly; the queue backend doesn't need its own copy.
        Ok(())
    }

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts, OrchestratorError> {
        let mut conn = self.conn.clone();
        let waiting: u64 = conn.llen(self.k_queue(queue)).await.map_err(to_err)?;
        let delayed: u64 = conn.zcard(self.k_delayed(queue)).await.map_err(to_err)?;
        let completed: u64 = conn.get(self.k_counts(queue, "completed")).await.unwrap_or(0);
        let failed: u64 = conn.get(self.k_counts(queue, "failed")).await.unwrap_or(0);
        Ok(QueueCounts { waiting, active: 0, completed, failed, delayed })
    }
}
