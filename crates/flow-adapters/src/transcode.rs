//! Step handlers for the `transcode` queue (§6: `transcode:probe`,
//! `transcode:thumbnail`, `transcode:sprite`, `transcode:filmstrip`,
//! `transcode:transcode`, `transcode:audio`).
//!
//! None of these touch real media tooling (ffprobe/ffmpeg are out of
//! scope, §1); each produces a deterministic stub derived from its input
//! so retries and concurrent handler instances agree byte-for-byte.

use async_trait::async_trait;
use flow_core::errors::OrchestratorError;
use flow_core::step::{StepContext, StepHandler, StepOutcome};
use flow_domain::StepKind;
use serde_json::{json, Value};

use crate::common::{require_str, require_u64, PROCESSOR_VERSION};
use crate::naming::{output_filename, stub_metric};

#[derive(Clone, Debug, Default)]
pub struct ProbeHandler;

#[async_trait]
impl StepHandler for ProbeHandler {
    async fn handle(&self, input: Value, ctx: &StepContext) -> StepOutcome {
        let upload_id = require_str(&input, "uploadId")?;
        ctx.progress(20.0);
        let duration_sec = 1 + stub_metric(upload_id, 600);
        let width = 640 + stub_metric(&format!("{upload_id}:w"), 4) * 320;
        let height = 360 + stub_metric(&format!("{upload_id}:h"), 4) * 180;
        ctx.progress(100.0);
        Ok(json!({
            "uploadId": upload_id,
            "durationSec": duration_sec,
            "width": width,
            "height": height,
            "codec": "h264",
        }))
    }
}

#[derive(Clone, Debug, Default)]
pub struct ThumbnailHandler;

#[async_trait]
impl StepHandler for ThumbnailHandler {
    async fn handle(&self, input: Value, ctx: &StepContext) -> StepOutcome {
        let upload_id = require_str(&input, "uploadId")?;
        let ts = require_u64(&input, "ts")?;
        let w = require_u64(&input, "w")?;
        let h = require_u64(&input, "h")?;
        let config = json!({ "ts": ts, "w": w, "h": h });
        ctx.progress(50.0);
        let path = output_filename(StepKind::TranscodeThumbnail, upload_id, &config, PROCESSOR_VERSION, "jpg");
        ctx.progress(100.0);
        Ok(json!({ "path": path, "ts": ts, "w": w, "h": h }))
    }
}

#[derive(Clone, Debug, Default)]
pub struct SpriteHandler;

#[async_trait]
impl StepHandler for SpriteHandler {
    async fn handle(&self, input: Value, ctx: &StepContext) -> StepOutcome {
        let upload_id = require_str(&input, "uploadId")?;
        let config = json!({
            "fps": require_u64(&input, "fps")?,
            "cols": require_u64(&input, "cols")?,
            "rows": require_u64(&input, "rows")?,
            "tw": require_u64(&input, "tw")?,
            "th": require_u64(&input, "th")?,
        });
        ctx.progress(50.0);
        let path = output_filename(StepKind::TranscodeSprite, upload_id, &config, PROCESSOR_VERSION, "jpg");
        ctx.progress(100.0);
        Ok(json!({ "path": path, "config": config }))
    }
}

#[derive(Clone, Debug, Default)]
pub struct FilmstripHandler;

#[async_trait]
impl StepHandler for FilmstripHandler {
    async fn handle(&self, input: Value, ctx: &StepContext) -> StepOutcome {
        let upload_id = require_str(&input, "uploadId")?;
        let config = input.get("config").cloned().unwrap_or(Value::Null);
        ctx.progress(50.0);
        let path = output_filename(StepKind::TranscodeFilmstrip, upload_id, &config, PROCESSOR_VERSION, "jpg");
        ctx.progress(100.0);
        Ok(json!({ "path": path }))
    }
}

#[derive(Clone, Debug, Default)]
pub struct TranscodeEncodeHandler;

#[async_trait]
impl StepHandler for TranscodeEncodeHandler {
    async fn handle(&self, input: Value, ctx: &StepContext) -> StepOutcome {
        let upload_id = require_str(&input, "uploadId")?;
        let codec = require_str(&input, "codec")?;
        let res = require_str(&input, "res")?;
        let config = json!({ "codec": codec, "res": res });
        ctx.progress(10.0);
        let path = output_filename(StepKind::TranscodeTranscode, upload_id, &config, PROCESSOR_VERSION, "mp4");
        ctx.progress(80.0);
        let media_id = format!("media_{:x}", stub_metric(&format!("{upload_id}:{codec}:{res}"), u64::MAX));
        ctx.progress(100.0);
        Ok(json!({ "path": path, "codec": codec, "res": res, "mediaId": media_id }))
    }
}

#[derive(Clone, Debug, Default)]
pub struct AudioHandler;

#[async_trait]
impl StepHandler for AudioHandler {
    async fn handle(&self, input: Value, ctx: &StepContext) -> StepOutcome {
        let upload_id = require_str(&input, "uploadId")?;
        ctx.progress(50.0);
        let path = output_filename(StepKind::TranscodeAudio, upload_id, &Value::Null, PROCESSOR_VERSION, "aac");
        ctx.progress(100.0);
        Ok(json!({ "path": path }))
    }
}

impl ProbeHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ThumbnailHandler {
    pub fn new() -> Self {
        Self
    }
}

impl SpriteHandler {
    pub fn new() -> Self {
        Self
    }
}

impl FilmstripHandler {
    pub fn new() -> Self {
        Self
    }
}

impl TranscodeEncodeHandler {
    pub fn new() -> Self {
        Self
    }
}

impl AudioHandler {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::mpsc;

    fn ctx() -> StepContext {
        let (tx, _rx) = mpsc::unbounded_channel();
        StepContext::new("job-1", "task-1", "workspace-1", 0, HashMap::new(), tx)
    }

    #[tokio::test]
    async fn thumbnail_name_is_stable_across_invocations() {
        let handler = ThumbnailHandler::new();
        let input = json!({ "uploadId": "u1", "ts": 1, "w": 320, "h": 240 });
        let a = handler.handle(input.clone(), &ctx()).await.unwrap();
        let b = handler.handle(input, &ctx()).await.unwrap();
        assert_eq!(a["path"], b["path"]);
        assert!(a["path"].as_str().unwrap().starts_with("transcode:thumbnail_u1_"));
    }

    #[tokio::test]
    async fn probe_rejects_missing_upload_id() {
        let handler = ProbeHandler::new();
        let err = handler.handle(json!({}), &ctx()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::HandlerPermanent(_)));
    }
}
