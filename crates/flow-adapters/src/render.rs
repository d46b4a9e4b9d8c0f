//! Step handlers for the `render` queue (§6: `render:prepare`,
//! `render:execute`, `render:finalize`). `execute` depends on `prepare`;
//! `finalize` depends on `execute` — both read their upstream output via
//! `StepContext::upstream` rather than re-deriving it from the raw task
//! payload, matching the memoization contract in §4.5.

use async_trait::async_trait;
use flow_core::errors::OrchestratorError;
use flow_core::step::{StepContext, StepHandler, StepOutcome};
use flow_domain::StepKind;
use serde_json::{json, Value};

use crate::common::{require_str, PROCESSOR_VERSION};
use crate::naming::{output_filename, query_hash, stub_metric};

#[derive(Clone, Debug, Default)]
pub struct PrepareHandler;

#[async_trait]
impl StepHandler for PrepareHandler {
    async fn handle(&self, input: Value, ctx: &StepContext) -> StepOutcome {
        let timeline_id = require_str(&input, "timelineId")?;
        let track_count = input.get("tracks").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);
        ctx.progress(50.0);
        let plan_hash = query_hash(&input);
        ctx.progress(100.0);
        Ok(json!({ "timelineId": timeline_id, "trackCount": track_count, "preparePlanHash": plan_hash }))
    }
}

impl PrepareHandler {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExecuteHandler;

#[async_trait]
impl StepHandler for ExecuteHandler {
    async fn handle(&self, input: Value, ctx: &StepContext) -> StepOutcome {
        let timeline_id = require_str(&input, "timelineId")?;
        let prepared = ctx
            .upstream(StepKind::RenderPrepare)
            .ok_or_else(|| OrchestratorError::Internal("render:execute invoked before render:prepare completed".into()))?;
        let track_count = prepared.get("trackCount").and_then(|v| v.as_u64()).unwrap_or(0);
        ctx.progress(10.0);
        let frames_rendered = 24 * (1 + stub_metric(timeline_id, 120));
        ctx.progress(90.0);
        let render_job_id = format!("render_{:x}", stub_metric(&format!("{timeline_id}:{track_count}"), u64::MAX));
        ctx.progress(100.0);
        Ok(json!({ "timelineId": timeline_id, "renderJobId": render_job_id, "framesRendered": frames_rendered }))
    }
}

impl ExecuteHandler {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Clone, Debug, Default)]
pub struct FinalizeHandler;

#[async_trait]
impl StepHandler for FinalizeHandler {
    async fn handle(&self, input: Value, ctx: &StepContext) -> StepOutcome {
        let timeline_id = require_str(&input, "timelineId")?;
        let output_settings = input.get("outputSettings").cloned().unwrap_or(Value::Null);
        let executed = ctx
            .upstream(StepKind::RenderExecute)
            .ok_or_else(|| OrchestratorError::Internal("render:finalize invoked before render:execute completed".into()))?;
        let ext = output_settings.get("format").and_then(|v| v.as_str()).unwrap_or("mp4").to_string();
        ctx.progress(60.0);
        let path = output_filename(StepKind::RenderFinalize, timeline_id, &output_settings, PROCESSOR_VERSION, &ext);
        let render_job_id = executed.get("renderJobId").cloned().unwrap_or(Value::Null);
        ctx.progress(100.0);
        Ok(json!({ "path": path, "renderJobId": render_job_id, "outputSettings": output_settings }))
    }
}

impl FinalizeHandler {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn ctx_with(upstream: HashMap<StepKind, Value>) -> StepContext {
        let (tx, _rx) = mpsc::unbounded_channel();
        StepContext::new("job-1", "task-1", "workspace-1", 0, upstream, tx)
    }

    #[tokio::test]
    async fn execute_requires_prepare_output() {
        let handler = ExecuteHandler::new();
        let err = handler.handle(json!({ "timelineId": "t1" }), &ctx_with(HashMap::new())).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Internal(_)));
    }

    #[tokio::test]
    async fn execute_reads_upstream_prepare_track_count() {
        let handler = ExecuteHandler::new();
        let mut upstream = HashMap::new();
        upstream.insert(StepKind::RenderPrepare, json!({ "timelineId": "t1", "trackCount": 3 }));
        let out = handler.handle(json!({ "timelineId": "t1" }), &ctx_with(upstream)).await.unwrap();
        assert!(out["renderJobId"].as_str().unwrap().starts_with("render_"));
    }
}
