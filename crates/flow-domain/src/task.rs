use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    ProcessUpload,
    DetectLabels,
    RenderTimeline,
    FullIngest,
}

impl TaskKind {
    pub fn wire_id(&self) -> &'static str {
        match self {
            TaskKind::ProcessUpload => "PROCESS_UPLOAD",
            TaskKind::DetectLabels => "DETECT_LABELS",
            TaskKind::RenderTimeline => "RENDER_TIMELINE",
            TaskKind::FullIngest => "FULL_INGEST",
        }
    }

    pub fn from_wire_id(s: &str) -> Result<Self, DomainError> {
        Ok(match s {
            "PROCESS_UPLOAD" => TaskKind::ProcessUpload,
            "DETECT_LABELS" => TaskKind::DetectLabels,
            "RENDER_TIMELINE" => TaskKind::RenderTimeline,
            "FULL_INGEST" => TaskKind::FullIngest,
            other => return Err(DomainError::UnknownTaskKind(other.to_string())),
        })
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailOptions {
    pub ts: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpriteOptions {
    pub fps: u32,
    pub cols: u32,
    pub rows: u32,
    pub tw: u32,
    pub th: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscodeOptions {
    pub enabled: bool,
    pub codec: String,
    pub res: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioOptions {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    pub codec: String,
    pub format: String,
    pub resolution: String,
}

/// Kind-specific payload. One variant per `TaskKind`; unknown variants are a
/// compile-time impossibility rather than a runtime string tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskPayload {
    #[serde(rename = "process-upload")]
    ProcessUpload {
        upload_id: String,
        thumbnail: Option<ThumbnailOptions>,
        sprite: Option<SpriteOptions>,
        filmstrip: Option<serde_json::Value>,
        transcode: Option<TranscodeOptions>,
        audio: Option<AudioOptions>,
    },
    #[serde(rename = "detect-labels")]
    DetectLabels {
        upload_id: String,
        label_detection: bool,
        object_tracking: bool,
        face_detection: bool,
        person_detection: bool,
        speech_transcription: bool,
    },
    #[serde(rename = "render")]
    RenderTimeline {
        timeline_id: String,
        version: u32,
        tracks: Vec<serde_json::Value>,
        output_settings: OutputSettings,
    },
    #[serde(rename = "full-ingest")]
    FullIngest {
        upload_id: String,
        process_upload: Box<TaskPayload>,
        detect_labels: Box<TaskPayload>,
    },
}

impl TaskPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            TaskPayload::ProcessUpload { .. } => TaskKind::ProcessUpload,
            TaskPayload::DetectLabels { .. } => TaskKind::DetectLabels,
            TaskPayload::RenderTimeline { .. } => TaskKind::RenderTimeline,
            TaskPayload::FullIngest { .. } => TaskKind::FullIngest,
        }
    }

    /// Structural validation independent of task kind dispatch; a
    /// `MalformedPayload` here is fatal before submission (§4.2, §4.6).
    pub fn validate(&self) -> Result<(), DomainError> {
        match self {
            TaskPayload::ProcessUpload { upload_id, .. } if upload_id.trim().is_empty() => {
                Err(DomainError::MalformedPayload("upload_id must not be empty".into()))
            }
            TaskPayload::DetectLabels {
                upload_id,
                label_detection,
                object_tracking,
                face_detection,
                person_detection,
                speech_transcription,
            } => {
                if upload_id.trim().is_empty() {
                    return Err(DomainError::MalformedPayload("upload_id must not be empty".into()));
                }
                if !(*label_detection || *object_tracking || *face_detection || *person_detection || *speech_transcription)
                {
                    return Err(DomainError::MalformedPayload(
                        "detect-labels requires at least one detection flag".into(),
                    ));
                }
                Ok(())
            }
            TaskPayload::RenderTimeline { timeline_id, .. } if timeline_id.trim().is_empty() => {
                Err(DomainError::MalformedPayload("timeline_id must not be empty".into()))
            }
            TaskPayload::FullIngest { upload_id, detect_labels, .. } => {
                if upload_id.trim().is_empty() {
                    return Err(DomainError::MalformedPayload("upload_id must not be empty".into()));
                }
                if !matches!(detect_labels.as_ref(), TaskPayload::DetectLabels { .. }) {
                    return Err(DomainError::MalformedPayload(
                        "full-ingest.detect_labels must carry a detect-labels payload".into(),
                    ));
                }
                detect_labels.validate()
            }
            _ => Ok(()),
        }
    }
}

/// The externally-owned unit of work the engine reads and updates.
///
/// Invariant: terminal status is write-once; `progress == 100` implies
/// `status` is `Succeeded` or `Failed`; `started_at <= completed_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub workspace_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub payload: TaskPayload,
    pub result: Option<serde_json::Value>,
    pub progress: f64,
    pub error_log: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: impl Into<String>, workspace_id: impl Into<String>, payload: TaskPayload) -> Self {
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            kind: payload.kind(),
            status: TaskStatus::Queued,
            payload,
            result: None,
            progress: 0.0,
            error_log: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_new_defaults_to_queued_with_no_progress() {
        let payload = TaskPayload::ProcessUpload {
            upload_id: "u1".into(),
            thumbnail: None,
            sprite: None,
            filmstrip: None,
            transcode: None,
            audio: None,
        };
        let task = Task::new("t1", "ws1", payload);
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.kind, TaskKind::ProcessUpload);
        assert_eq!(task.progress, 0.0);
        assert!(task.result.is_none());
    }

    #[test]
    fn task_kind_wire_id_round_trips() {
        for kind in [TaskKind::ProcessUpload, TaskKind::DetectLabels, TaskKind::RenderTimeline, TaskKind::FullIngest] {
            assert_eq!(TaskKind::from_wire_id(kind.wire_id()).unwrap(), kind);
        }
        assert!(TaskKind::from_wire_id("NOT_A_KIND").is_err());
    }

    #[test]
    fn process_upload_rejects_empty_upload_id() {
        let payload = TaskPayload::ProcessUpload {
            upload_id: "  ".into(),
            thumbnail: None,
            sprite: None,
            filmstrip: None,
            transcode: None,
            audio: None,
        };
        assert!(matches!(payload.validate(), Err(DomainError::MalformedPayload(_))));
    }

    #[test]
    fn detect_labels_requires_at_least_one_detection_flag() {
        let payload = TaskPayload::DetectLabels {
            upload_id: "u1".into(),
            label_detection: false,
            object_tracking: false,
            face_detection: false,
            person_detection: false,
            speech_transcription: false,
        };
        assert!(payload.validate().is_err());
    }

    #[test]
    fn detect_labels_accepts_a_single_flag() {
        let payload = TaskPayload::DetectLabels {
            upload_id: "u1".into(),
            label_detection: true,
            object_tracking: false,
            face_detection: false,
            person_detection: false,
            speech_transcription: false,
        };
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn full_ingest_rejects_a_non_detect_labels_inner_payload() {
        let bad_inner = TaskPayload::ProcessUpload {
            upload_id: "u1".into(),
            thumbnail: None,
            sprite: None,
            filmstrip: None,
            transcode: None,
            audio: None,
        };
        let payload = TaskPayload::FullIngest {
            upload_id: "u1".into(),
            process_upload: Box::new(bad_inner.clone()),
            detect_labels: Box::new(bad_inner),
        };
        assert!(matches!(payload.validate(), Err(DomainError::MalformedPayload(_))));
    }

    #[test]
    fn render_timeline_rejects_empty_timeline_id() {
        let payload = TaskPayload::RenderTimeline {
            timeline_id: "".into(),
            version: 1,
            tracks: vec![],
            output_settings: OutputSettings { codec: "h264".into(), format: "mp4".into(), resolution: "1080p".into() },
        };
        assert!(payload.validate().is_err());
    }
}
