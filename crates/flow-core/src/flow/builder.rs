//! Flow Builder (C2): a pure, deterministic, total function from `Task` to
//! `FlowPlan`. See §4.2 and the flow-definition table in §3.

use std::collections::HashMap;

use flow_domain::{QueueName, StepKind, Task, TaskKind, TaskPayload};

use crate::errors::OrchestratorError;
use crate::flow::plan::{FlowPlan, ParentNode, StepNode, StepOpts};
use crate::flow::validator::validate_plan;
use crate::policy::StepOptsRegistry;

/// Incremental, typestate-free plan assembler used internally by
/// `build_flow`. Kept as its own type (rather than inlining the match arms)
/// so `FULL_INGEST` can graft two independently built sub-plans together.
pub struct FlowBuilder {
    task_id: String,
    workspace_id: String,
    children: Vec<StepNode>,
}

impl FlowBuilder {
    pub fn new(task_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self { task_id: task_id.into(), workspace_id: workspace_id.into(), children: Vec::new() }
    }

    pub fn add_step(
        &mut self,
        step_kind: StepKind,
        data: serde_json::Value,
        depends_on: Vec<StepKind>,
        opts: StepOpts,
    ) -> &mut Self {
        self.children.push(StepNode { step_kind, queue: step_kind.queue(), data, opts, depends_on });
        self
    }

    /// Grafts another builder's children wholesale (used by `FULL_INGEST`);
    /// the grafted subflow's internal edges are left untouched.
    pub fn graft(&mut self, other: FlowBuilder) -> &mut Self {
        self.children.extend(other.children);
        self
    }

    pub fn build(self, registry: &StepOptsRegistry, task_kind: TaskKind) -> Result<FlowPlan, OrchestratorError> {
        let _ = registry;
        let plan = FlowPlan {
            parent: ParentNode {
                task_id: self.task_id,
                workspace_id: self.workspace_id,
                step_results: HashMap::new(),
            },
            children: self.children,
        };
        validate_plan(&plan, task_kind)?;
        Ok(plan)
    }
}

/// `buildFlow(task) → FlowPlan`. Deterministic and total over the four
/// known task kinds; anything else is a `MalformedPayload`/`UnknownTaskKind`
/// fatal-before-submission error (§4.2).
pub fn build_flow(task: &Task, registry: &StepOptsRegistry) -> Result<FlowPlan, OrchestratorError> {
    task.payload.validate()?;

    let mut builder = FlowBuilder::new(task.id.clone(), task.workspace_id.clone());

    match &task.payload {
        TaskPayload::ProcessUpload { upload_id, thumbnail, sprite, filmstrip, transcode, audio } => {
            build_process_upload(&mut builder, registry, upload_id, thumbnail, sprite, filmstrip, transcode, audio);
        }
        TaskPayload::DetectLabels {
            upload_id,
            label_detection,
            object_tracking,
            face_detection,
            person_detection,
            speech_transcription,
        } => {
            build_detect_labels(
                &mut builder,
                registry,
                upload_id,
                *label_detection,
                *object_tracking,
                *face_detection,
                *person_detection,
                *speech_transcription,
            );
        }
        TaskPayload::RenderTimeline { timeline_id, version, tracks, output_settings } => {
            build_render_timeline(&mut builder, registry, timeline_id, *version, tracks, output_settings);
        }
        TaskPayload::FullIngest { upload_id, process_upload, detect_labels } => {
            build_full_ingest(&mut builder, registry, task, upload_id, process_upload, detect_labels)?;
        }
    }

    builder.build(registry, task.payload.kind())
}

fn build_process_upload(
    b: &mut FlowBuilder,
    reg: &StepOptsRegistry,
    upload_id: &str,
    thumbnail: &Option<flow_domain::task::ThumbnailOptions>,
    sprite: &Option<flow_domain::task::SpriteOptions>,
    filmstrip: &Option<serde_json::Value>,
    transcode: &Option<flow_domain::task::TranscodeOptions>,
    audio: &Option<flow_domain::task::AudioOptions>,
) {
    b.add_step(
        StepKind::TranscodeProbe,
        serde_json::json!({ "uploadId": upload_id }),
        vec![],
        reg.opts_for(StepKind::TranscodeProbe),
    );
    if let Some(opts) = thumbnail {
        b.add_step(
            StepKind::TranscodeThumbnail,
            serde_json::json!({ "uploadId": upload_id, "ts": opts.ts, "w": opts.w, "h": opts.h }),
            vec![],
            reg.opts_for(StepKind::TranscodeThumbnail),
        );
    }
    if let Some(opts) = sprite {
        b.add_step(
            StepKind::TranscodeSprite,
            serde_json::json!({ "uploadId": upload_id, "fps": opts.fps, "cols": opts.cols, "rows": opts.rows, "tw": opts.tw, "th": opts.th }),
            vec![],
            reg.opts_for(StepKind::TranscodeSprite),
        );
    }
    if let Some(cfg) = filmstrip {
        b.add_step(
            StepKind::TranscodeFilmstrip,
            serde_json::json!({ "uploadId": upload_id, "config": cfg }),
            vec![],
            reg.opts_for(StepKind::TranscodeFilmstrip),
        );
    }
    if let Some(opts) = transcode {
        if opts.enabled {
            b.add_step(
                StepKind::TranscodeTranscode,
                serde_json::json!({ "uploadId": upload_id, "codec": opts.codec, "res": opts.res }),
                vec![],
                reg.opts_for(StepKind::TranscodeTranscode),
            );
        }
    }
    if let Some(opts) = audio {
        if opts.enabled {
            b.add_step(
                StepKind::TranscodeAudio,
                serde_json::json!({ "uploadId": upload_id }),
                vec![],
                reg.opts_for(StepKind::TranscodeAudio),
            );
        }
    }
}

fn build_detect_labels(
    b: &mut FlowBuilder,
    reg: &StepOptsRegistry,
    upload_id: &str,
    label_detection: bool,
    object_tracking: bool,
    face_detection: bool,
    person_detection: bool,
    speech_transcription: bool,
) {
    b.add_step(
        StepKind::LabelsUploadToGcs,
        serde_json::json!({ "uploadId": upload_id }),
        vec![],
        reg.opts_for(StepKind::LabelsUploadToGcs),
    );
    let gated: [(bool, StepKind); 5] = [
        (label_detection, StepKind::LabelsLabelDetection),
        (object_tracking, StepKind::LabelsObjectTracking),
        (face_detection, StepKind::LabelsFaceDetection),
        (person_detection, StepKind::LabelsPersonDetection),
        (speech_transcription, StepKind::LabelsSpeechTranscription),
    ];
    for (enabled, kind) in gated {
        if enabled {
            b.add_step(
                kind,
                serde_json::json!({ "uploadId": upload_id }),
                vec![StepKind::LabelsUploadToGcs],
                reg.opts_for(kind),
            );
        }
    }
}

fn build_render_timeline(
    b: &mut FlowBuilder,
    reg: &StepOptsRegistry,
    timeline_id: &str,
    version: u32,
    tracks: &[serde_json::Value],
    output_settings: &flow_domain::task::OutputSettings,
) {
    b.add_step(
        StepKind::RenderPrepare,
        serde_json::json!({ "timelineId": timeline_id, "version": version, "tracks": tracks }),
        vec![],
        reg.opts_for(StepKind::RenderPrepare),
    );
    b.add_step(
        StepKind::RenderExecute,
        serde_json::json!({ "timelineId": timeline_id }),
        vec![StepKind::RenderPrepare],
        reg.opts_for(StepKind::RenderExecute),
    );
    b.add_step(
        StepKind::RenderFinalize,
        serde_json::json!({ "timelineId": timeline_id, "outputSettings": output_settings }),
        vec![StepKind::RenderExecute],
        reg.opts_for(StepKind::RenderFinalize),
    );
}

fn build_full_ingest(
    b: &mut FlowBuilder,
    reg: &StepOptsRegistry,
    task: &Task,
    upload_id: &str,
    process_upload: &TaskPayload,
    detect_labels: &TaskPayload,
) -> Result<(), OrchestratorError> {
    let transcode_task = Task::new(format!("{}:transcode", task.id), task.workspace_id.clone(), process_upload.clone());
    let labels_task = Task::new(format!("{}:labels", task.id), task.workspace_id.clone(), detect_labels.clone());

    let transcode_plan = build_flow(&transcode_task, reg)?;
    let labels_plan = build_flow(&labels_task, reg)?;

    let _ = upload_id;

    // The transcode subflow's terminal set is every one of its own step
    // kinds (probe, and whichever of thumbnail/sprite/filmstrip/transcode/
    // audio got built) — they're independent siblings, not a chain, so
    // there's no single "last" step to hang a dependency off. Make
    // labels:upload_to_gcs depend on all of them: if any transcode step
    // fails, cascade reaches upload_to_gcs and the labels subflow never
    // starts (Open Question 2). Depending on only `TranscodeProbe` would
    // let a failure in any other transcode step go unnoticed by labels.
    let transcode_terminal_set: Vec<StepKind> = transcode_plan.children.iter().map(|c| c.step_kind).collect();
    let mut labels_children = labels_plan.children;
    for child in labels_children.iter_mut() {
        if child.step_kind == StepKind::LabelsUploadToGcs {
            child.depends_on.extend(transcode_terminal_set.iter().copied());
        }
    }

    for child in transcode_plan.children {
        b.add_step(child.step_kind, child.data, child.depends_on, child.opts);
    }
    for child in labels_children {
        b.add_step(child.step_kind, child.data, child.depends_on, child.opts);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_domain::{TaskPayload, task::*};

    fn reg() -> StepOptsRegistry {
        StepOptsRegistry::default()
    }

    #[test]
    fn process_upload_emits_only_enabled_optional_steps() {
        let payload = TaskPayload::ProcessUpload {
            upload_id: "u1".into(),
            thumbnail: Some(ThumbnailOptions { ts: 1, w: 320, h: 240 }),
            sprite: Some(SpriteOptions { fps: 1, cols: 10, rows: 10, tw: 160, th: 120 }),
            filmstrip: None,
            transcode: Some(TranscodeOptions { enabled: true, codec: "h264".into(), res: "720p".into() }),
            audio: Some(AudioOptions { enabled: false }),
        };
        let task = Task::new("t1", "w1", payload);
        let plan = build_flow(&task, &reg()).unwrap();
        let kinds = plan.step_kinds();
        assert!(kinds.contains(&StepKind::TranscodeProbe));
        assert!(kinds.contains(&StepKind::TranscodeThumbnail));
        assert!(kinds.contains(&StepKind::TranscodeSprite));
        assert!(kinds.contains(&StepKind::TranscodeTranscode));
        assert!(!kinds.contains(&StepKind::TranscodeFilmstrip));
        assert!(!kinds.contains(&StepKind::TranscodeAudio));
    }

    #[test]
    fn build_flow_is_deterministic() {
        let payload = TaskPayload::DetectLabels {
            upload_id: "u1".into(),
            label_detection: true,
            object_tracking: false,
            face_detection: true,
            person_detection: false,
            speech_transcription: false,
        };
        let task = Task::new("t1", "w1", payload);
        let p1 = build_flow(&task, &reg()).unwrap();
        let p2 = build_flow(&task, &reg()).unwrap();
        assert_eq!(p1.step_kinds(), p2.step_kinds());
        for k in p1.step_kinds() {
            if k != StepKind::LabelsUploadToGcs {
                assert_eq!(p1.step(k).unwrap().depends_on, vec![StepKind::LabelsUploadToGcs]);
            }
        }
    }

    #[test]
    fn render_timeline_edges_are_chained() {
        let payload = TaskPayload::RenderTimeline {
            timeline_id: "t1".into(),
            version: 1,
            tracks: vec![],
            output_settings: OutputSettings { codec: "h264".into(), format: "mp4".into(), resolution: "1920x1080".into() },
        };
        let task = Task::new("t1", "w1", payload);
        let plan = build_flow(&task, &reg()).unwrap();
        assert_eq!(plan.step(StepKind::RenderExecute).unwrap().depends_on, vec![StepKind::RenderPrepare]);
        assert_eq!(plan.step(StepKind::RenderFinalize).unwrap().depends_on, vec![StepKind::RenderExecute]);
    }

    #[test]
    fn full_ingest_upload_to_gcs_depends_on_every_transcode_step() {
        let process_upload = TaskPayload::ProcessUpload {
            upload_id: "u1".into(),
            thumbnail: Some(ThumbnailOptions { ts: 1, w: 320, h: 240 }),
            sprite: None,
            filmstrip: None,
            transcode: Some(TranscodeOptions { enabled: true, codec: "h264".into(), res: "720p".into() }),
            audio: Some(AudioOptions { enabled: true }),
        };
        let detect_labels = TaskPayload::DetectLabels {
            upload_id: "u1".into(),
            label_detection: true,
            object_tracking: false,
            face_detection: false,
            person_detection: false,
            speech_transcription: false,
        };
        let payload =
            TaskPayload::FullIngest { upload_id: "u1".into(), process_upload: Box::new(process_upload), detect_labels: Box::new(detect_labels) };
        let task = Task::new("t1", "w1", payload);
        let plan = build_flow(&task, &reg()).unwrap();

        // Every transcode sibling built for this task must gate
        // labels:upload_to_gcs, not just the probe step, so a failure in
        // any of them cascades and the labels subflow never starts.
        let upload_to_gcs_deps = &plan.step(StepKind::LabelsUploadToGcs).unwrap().depends_on;
        for transcode_kind in
            [StepKind::TranscodeProbe, StepKind::TranscodeThumbnail, StepKind::TranscodeTranscode, StepKind::TranscodeAudio]
        {
            assert!(upload_to_gcs_deps.contains(&transcode_kind), "missing dependency on {transcode_kind}");
        }
        assert!(!upload_to_gcs_deps.contains(&StepKind::TranscodeSprite), "sprite wasn't requested, shouldn't appear");
        assert!(plan.step(StepKind::LabelsLabelDetection).unwrap().depends_on.contains(&StepKind::LabelsUploadToGcs));
    }
}
