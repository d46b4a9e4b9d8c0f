//! Reference, in-memory `QueueBackend`. Volatile, single-process; used by
//! tests and the demo binary. Models the same ready-rule and cascade
//! semantics the Redis-backed backend must honor.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use flow_domain::{QueueName, StepKind, StepResult, StepStatus};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use super::{Job, JobPayload, QueueBackend, QueueCounts};
use crate::errors::OrchestratorError;
use crate::flow::plan::FlowPlan;

struct ParentEntry {
    plan: FlowPlan,
    step_results: HashMap<StepKind, StepResult>,
    step_job_id: HashMap<StepKind, String>,
    step_attempt: HashMap<StepKind, u32>,
    terminal: bool,
}

impl ParentEntry {
    fn all_terminal(&self) -> bool {
        self.plan.children.iter().all(|c| {
            self.step_results.get(&c.step_kind).map(|r| r.is_terminal()).unwrap_or(false)
        })
    }
}

#[derive(Default)]
struct Inner {
    parents: HashMap<String, ParentEntry>,
    jobs: HashMap<String, Job>,
    queues: HashMap<QueueName, VecDeque<String>>,
    ready_parents: VecDeque<String>,
    counts: HashMap<QueueName, QueueCounts>,
}

/// Cheaply cloneable handle over shared in-memory queue state.
#[derive(Clone)]
pub struct InMemoryQueueBackend {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    parent_notify: Arc<Notify>,
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::default())), notify: Arc::new(Notify::new()), parent_notify: Arc::new(Notify::new()) }
    }

    fn dependents_of(plan: &FlowPlan, kind: StepKind) -> Vec<StepKind> {
        plan.children.iter().filter(|c| c.depends_on.contains(&kind)).map(|c| c.step_kind).collect()
    }

    async fn enqueue_ready_children(inner: &mut Inner, parent_job_id: &str) {
        let entry = match inner.parents.get(parent_job_id) {
            Some(e) => e,
            None => return,
        };
        let mut to_enqueue = Vec::new();
        for child in &entry.plan.children {
            let already_touched = entry.step_results.get(&child.step_kind).map(|r| r.status != StepStatus::Pending).unwrap_or(false);
            if already_touched {
                continue;
            }
            let deps_ready = child.depends_on.iter().all(|d| {
                entry.step_results.get(d).map(|r| matches!(r.status, StepStatus::Completed)).unwrap_or(false)
            });
            if deps_ready {
                to_enqueue.push(child.step_kind);
            }
        }
        for kind in to_enqueue {
            let job_id = Uuid::new_v4().to_string();
            let child = entry.plan.step(kind).unwrap().clone();
            let job = Job { job_id: job_id.clone(), parent_job_id: parent_job_id.to_string(), queue: child.queue, payload: JobPayload::Step { step_kind: kind, data: child.data.clone() }, attempt: 0 };
            let entry = inner.parents.get_mut(parent_job_id).unwrap();
            entry.step_job_id.insert(kind, job_id.clone());
            entry.step_results.insert(kind, StepResult { status: StepStatus::Running, ..StepResult::pending(kind) });
            inner.jobs.insert(job_id.clone(), job);
            inner.queues.entry(child.queue).or_default().push_back(job_id);
        }
    }

    /// Marks `kind` and everything transitively depending on it as
    /// `FailedByCascade`, unless already terminal.
    fn cascade_fail(entry: &mut ParentEntry, kind: StepKind) {
        let mut queue = VecDeque::new();
        queue.push_back(kind);
        let mut seen = HashSet::new();
        while let Some(k) = queue.pop_front() {
            if !seen.insert(k) {
                continue;
            }
            for dependent in entry.plan.children.iter().filter(|c| c.depends_on.contains(&k)).map(|c| c.step_kind).collect::<Vec<_>>()
            {
                let already_terminal = entry.step_results.get(&dependent).map(|r| r.is_terminal()).unwrap_or(false);
                if !already_terminal {
                    entry.step_results.insert(
                        dependent,
                        StepResult { status: StepStatus::FailedByCascade, output: None, error: Some(format!("upstream {k} failed")), started_at: None, completed_at: Some(Utc::now()) },
                    );
                }
                queue.push_back(dependent);
            }
        }
    }
}

impl Default for InMemoryQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    async fn submit_flow(&self, plan: FlowPlan) -> Result<String, OrchestratorError> {
        let parent_job_id = Uuid::new_v4().to_string();
        let mut inner = self.inner.lock().await;
        let entry = ParentEntry {
            plan,
            step_results: HashMap::new(),
            step_job_id: HashMap::new(),
            step_attempt: HashMap::new(),
            terminal: false,
        };
        inner.parents.insert(parent_job_id.clone(), entry);
        Self::enqueue_ready_children(&mut inner, &parent_job_id).await;
        drop(inner);
        self.notify.notify_waiters();
        Ok(parent_job_id)
    }

    async fn claim(&self, queue: QueueName) -> Result<Job, OrchestratorError> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(job_id) = inner.queues.entry(queue).or_default().pop_front() {
                    let job = inner.jobs.get(&job_id).cloned().ok_or_else(|| {
                        OrchestratorError::Internal("claimed job missing from job table".into())
                    })?;
                    return Ok(job);
                }
            }
            self.notify.notified().await;
        }
    }

    async fn claim_ready_parent(&self) -> Result<String, OrchestratorError> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if let Some(parent_id) = inner.ready_parents.pop_front() {
                    return Ok(parent_id);
                }
            }
            self.parent_notify.notified().await;
        }
    }

    async fn ack(&self, job_id: &str, result: serde_json::Value) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get(job_id).cloned().ok_or_else(|| OrchestratorError::Internal(format!("unknown job {job_id}")))?;
        if let JobPayload::Step { step_kind, .. } = job.payload {
            let entry = inner
                .parents
                .get_mut(&job.parent_job_id)
                .ok_or_else(|| OrchestratorError::Internal("unknown parent".into()))?;
            // Memoization: a completed result is never overwritten.
            let already_completed = entry.step_results.get(&step_kind).map(|r| r.is_completed()).unwrap_or(false);
            if !already_completed {
                entry.step_results.insert(step_kind, StepResult::completed(step_kind, result, Utc::now()));
            }
            let parent_id = job.parent_job_id.clone();
            Self::enqueue_ready_children(&mut inner, &parent_id).await;
            let entry = inner.parents.get(&parent_id).unwrap();
            if entry.all_terminal() && !entry.terminal {
                inner.parents.get_mut(&parent_id).unwrap().terminal = true;
                inner.ready_parents.push_back(parent_id);
                drop(inner);
                self.notify.notify_waiters();
                self.parent_notify.notify_waiters();
                return Ok(());
            }
        }
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn nack(&self, job_id: &str, error: String, permanent: bool) -> Result<(), OrchestratorError> {
        let mut inner = self.inner.lock().await;
        let job = inner.jobs.get(job_id).cloned().ok_or_else(|| OrchestratorError::Internal(format!("unknown job {job_id}")))?;
        let (step_kind, data) = match job.payload {
            JobPayload::Step { step_kind, data } => (step_kind, data),
            JobPayload::Parent => return Ok(()),
        };
        let parent_id = job.parent_job_id.clone();
        let entry = inner.parents.get_mut(&parent_id).ok_or_else(|| OrchestratorError::Internal("unknown parent".into()))?;
        let attempts_used = entry.step_attempt.entry(step_kind).or_insert(0);
        *attempts_used += 1;
        let attempt = *attempts_used;
        let max_attempts = entry.plan.step(step_kind).map(|s| s.opts.attempts).unwrap_or(3);
        let delay_ms = entry.plan.step(step_kind).map(|s| s.opts.backoff.delay_ms).unwrap_or(30_000);

        if attempt < max_attempts && !permanent {
            let new_job_id = Uuid::new_v4().to_string();
            let queue = job.queue;
            let new_job = Job { job_id: new_job_id.clone(), parent_job_id: parent_id.clone(), queue, payload: JobPayload::Step { step_kind, data }, attempt };
            inner.jobs.insert(new_job_id.clone(), new_job);
            let backend = self.clone();
            let backoff = delay_ms * 2u64.pow(attempt.saturating_sub(1));
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(backoff.min(60_000))).await;
                let mut inner = backend.inner.lock().await;
                inner.queues.entry(queue).or_default().push_back(new_job_id);
                drop(inner);
                backend.notify.notify_waiters();
            });
        } else {
            entry.step_results.insert(step_kind, StepResult::failed(step_kind, error, Utc::now()));
            Self::cascade_fail(entry, step_kind);
            if entry.all_terminal() && !entry.terminal {
                entry.terminal = true;
                inner.ready_parents.push_back(parent_id);
                drop(inner);
                self.parent_notify.notify_waiters();
                return Ok(());
            }
        }
        Ok(())
    }

    async fn get_children_values(&self, parent_job_id: &str) -> Result<HashMap<StepKind, StepResult>, OrchestratorError> {
        let inner = self.inner.lock().await;
        let entry = inner.parents.get(parent_job_id).ok_or_else(|| OrchestratorError::Internal("unknown parent".into()))?;
        Ok(entry.step_results.iter().filter(|(_, r)| r.is_completed()).map(|(k, v)| (*k, v.clone())).collect())
    }

    async fn get_all_children(&self, parent_job_id: &str) -> Result<HashMap<StepKind, StepResult>, OrchestratorError> {
        let inner = self.inner.lock().await;
        let entry = inner.parents.get(parent_job_id).ok_or_else(|| OrchestratorError::Internal("unknown parent".into()))?;
        Ok(entry.step_results.clone())
    }

    async fn update_progress(&self, _job_id: &str, _pct: f64) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts, OrchestratorError> {
        let inner = self.inner.lock().await;
        let waiting = inner.queues.get(&queue).map(|q| q.len() as u64).unwrap_or(0);
        let mut completed = 0;
        let mut failed = 0;
        for entry in inner.parents.values() {
            for node in &entry.plan.children {
                if node.queue != queue {
                    continue;
                }
                match entry.step_results.get(&node.step_kind).map(|r| r.status) {
                    Some(StepStatus::Completed) => completed += 1,
                    Some(StepStatus::Failed) | Some(StepStatus::FailedByCascade) => failed += 1,
                    _ => {}
                }
            }
        }
        let base = inner.counts.get(&queue).copied().unwrap_or_default();
        Ok(QueueCounts { waiting, active: base.active, completed, failed, delayed: base.delayed })
    }
}
