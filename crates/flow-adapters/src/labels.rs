//! Step handlers for the `labels`/`intelligence` queues (§6:
//! `labels:upload_to_gcs` plus the five detection steps, all of which
//! `dependsOn: [upload_to_gcs]`).
//!
//! Detection handlers read the GCS URI from `StepContext::upstream` rather
//! than from their own input, so the worker's memoization fast-path and
//! the builder's dependency edges are the only things that wire them
//! together — no handler re-derives an upstream result on its own.

use async_trait::async_trait;
use flow_core::errors::OrchestratorError;
use flow_core::step::{StepContext, StepHandler, StepOutcome};
use flow_domain::StepKind;
use serde_json::{json, Value};

use crate::common::{require_str, PROCESSOR_VERSION};
use crate::naming::{output_filename, stub_metric};

#[derive(Clone, Debug, Default)]
pub struct UploadToGcsHandler;

#[async_trait]
impl StepHandler for UploadToGcsHandler {
    async fn handle(&self, input: Value, ctx: &StepContext) -> StepOutcome {
        let upload_id = require_str(&input, "uploadId")?;
        ctx.progress(30.0);
        let object_name = output_filename(StepKind::LabelsUploadToGcs, upload_id, &Value::Null, PROCESSOR_VERSION, "bin");
        let gcs_uri = format!("gs://media-flow-uploads/{upload_id}/{object_name}");
        ctx.progress(100.0);
        Ok(json!({ "uploadId": upload_id, "gcsUri": gcs_uri }))
    }
}

impl UploadToGcsHandler {
    pub fn new() -> Self {
        Self
    }
}

/// Shared detection-stub body: every detection step depends on
/// `labels:upload_to_gcs` and produces a deterministic list of `count`
/// annotations named after `label_prefix`.
fn detect(upstream_gcs_uri: &str, label_prefix: &str, count: u64) -> Vec<Value> {
    (0..count)
        .map(|i| {
            let seed = format!("{upstream_gcs_uri}:{label_prefix}:{i}");
            let confidence = stub_metric(&seed, 100) as f64 / 100.0;
            json!({ "label": format!("{label_prefix}_{i}"), "confidence": confidence })
        })
        .collect()
}

fn require_upload_to_gcs<'a>(ctx: &'a StepContext, step_name: &str) -> Result<&'a Value, OrchestratorError> {
    ctx.upstream(StepKind::LabelsUploadToGcs)
        .ok_or_else(|| OrchestratorError::Internal(format!("{step_name} invoked before labels:upload_to_gcs completed")))
}

macro_rules! detection_handler {
    ($name:ident, $step_kind:expr, $label_prefix:literal, $wire:literal) => {
        #[derive(Clone, Debug, Default)]
        pub struct $name;

        #[async_trait]
        impl StepHandler for $name {
            async fn handle(&self, _input: Value, ctx: &StepContext) -> StepOutcome {
                let upstream = require_upload_to_gcs(ctx, $wire)?;
                let gcs_uri = upstream.get("gcsUri").and_then(|v| v.as_str()).unwrap_or_default();
                ctx.progress(20.0);
                let annotations = detect(gcs_uri, $label_prefix, 3);
                ctx.progress(100.0);
                Ok(json!({ "annotations": annotations }))
            }
        }

        impl $name {
            pub fn new() -> Self {
                Self
            }
        }
    };
}

detection_handler!(LabelDetectionHandler, StepKind::LabelsLabelDetection, "label", "labels:label_detection");
detection_handler!(ObjectTrackingHandler, StepKind::LabelsObjectTracking, "object", "labels:object_tracking");
detection_handler!(FaceDetectionHandler, StepKind::LabelsFaceDetection, "face", "labels:face_detection");
detection_handler!(PersonDetectionHandler, StepKind::LabelsPersonDetection, "person", "labels:person_detection");
detection_handler!(SpeechTranscriptionHandler, StepKind::LabelsSpeechTranscription, "utterance", "labels:speech_transcription");

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
    async fn upload_to_gcs_name_is_stable() {
        let handler = UploadToGcsHandler::new();
        let input = json!({ "uploadId": "u1" });
        let a = handler.handle(input.clone(), &ctx_with(HashMap::new())).await.unwrap();
        let b = handler.handle(input, &ctx_with(HashMap::new())).await.unwrap();
        assert_eq!(a["gcsUri"], b["gcsUri"]);
    }

    #[tokio::test]
    async fn face_detection_requires_upload_to_gcs() {
        let handler = FaceDetectionHandler::new();
        let err = handler.handle(json!({}), &ctx_with(HashMap::new())).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Internal(_)));
    }

    #[tokio::test]
    async fn face_detection_reads_gcs_uri_from_upstream() {
        let handler = FaceDetectionHandler::new();
        let mut upstream = HashMap::new();
        upstream.insert(StepKind::LabelsUploadToGcs, json!({ "uploadId": "u1", "gcsUri": "gs://b/u1/x.bin" }));
        let out = handler.handle(json!({}), &ctx_with(upstream)).await.unwrap();
        assert_eq!(out["annotations"].as_array().unwrap().len(), 3);
    }
}
