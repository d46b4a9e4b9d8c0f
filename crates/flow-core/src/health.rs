//! Health & Metrics (C9): aggregates per-queue counts and backend
//! liveness. Must be non-blocking and time-bounded (≤2s, §4.9).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use flow_domain::QueueName;
use serde::{Deserialize, Serialize};

use crate::queue::{QueueBackend, QueueCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub queues: HashMap<String, QueueCounts>,
    pub dependencies: HashMap<String, bool>,
}

/// A downstream dependency whose liveness feeds into the health report; a
/// trait rather than a concrete HTTP client so `flow-infra` can plug in
/// whatever probe (TCP connect, HTTP ping) fits the dependency.
#[async_trait::async_trait]
pub trait LivenessProbe: Send + Sync {
    fn name(&self) -> &str;
    async fn is_up(&self) -> bool;
}

pub struct HealthAggregator<Q: QueueBackend> {
    backend: Arc<Q>,
    probes: Vec<Arc<dyn LivenessProbe>>,
    timeout: Duration,
}

impl<Q: QueueBackend> HealthAggregator<Q> {
    pub fn new(backend: Arc<Q>, probes: Vec<Arc<dyn LivenessProbe>>) -> Self {
        Self { backend, probes, timeout: Duration::from_secs(2) }
    }

    pub async fn check(&self) -> HealthReport {
        let mut queues = HashMap::new();
        for q in QueueName::ALL {
            let counts = tokio::time::timeout(self.timeout, self.backend.counts(q))
                .await
                .ok()
                .and_then(|r| r.ok())
                .unwrap_or_default();
            queues.insert(q.wire_id().to_string(), counts);
        }

        let mut dependencies = HashMap::new();
        for probe in &self.probes {
            let up = tokio::time::timeout(self.timeout, probe.is_up()).await.unwrap_or(false);
            dependencies.insert(probe.name().to_string(), up);
        }

        let any_down = dependencies.values().any(|up| !up);
        let many_failed_steps = queues.values().any(|c| c.failed > c.completed.max(1) * 2);
        let status = if any_down {
            HealthStatus::Down
        } else if many_failed_steps {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        };

        HealthReport { status, queues, dependencies }
    }
}
