use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DomainError;

/// Every step kind the engine knows how to build and dispatch. The wire
/// identifier (see `StepKind::wire_id`) is what travels on the queue and
/// must match spec-mandated strings bit-exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StepKind {
    TranscodeProbe,
    TranscodeThumbnail,
    TranscodeSprite,
    TranscodeFilmstrip,
    TranscodeTranscode,
    TranscodeAudio,
    RenderPrepare,
    RenderExecute,
    RenderFinalize,
    LabelsUploadToGcs,
    LabelsLabelDetection,
    LabelsObjectTracking,
    LabelsFaceDetection,
    LabelsPersonDetection,
    LabelsSpeechTranscription,
}

impl StepKind {
    /// Every step kind the engine knows about, in registration order.
    pub const ALL: [StepKind; 15] = [
        StepKind::TranscodeProbe,
        StepKind::TranscodeThumbnail,
        StepKind::TranscodeSprite,
        StepKind::TranscodeFilmstrip,
        StepKind::TranscodeTranscode,
        StepKind::TranscodeAudio,
        StepKind::RenderPrepare,
        StepKind::RenderExecute,
        StepKind::RenderFinalize,
        StepKind::LabelsUploadToGcs,
        StepKind::LabelsLabelDetection,
        StepKind::LabelsObjectTracking,
        StepKind::LabelsFaceDetection,
        StepKind::LabelsPersonDetection,
        StepKind::LabelsSpeechTranscription,
    ];

    /// Bit-exact wire identifier, e.g. `"transcode:probe"`.
    pub fn wire_id(&self) -> &'static str {
        match self {
            StepKind::TranscodeProbe => "transcode:probe",
            StepKind::TranscodeThumbnail => "transcode:thumbnail",
            StepKind::TranscodeSprite => "transcode:sprite",
            StepKind::TranscodeFilmstrip => "transcode:filmstrip",
            StepKind::TranscodeTranscode => "transcode:transcode",
            StepKind::TranscodeAudio => "transcode:audio",
            StepKind::RenderPrepare => "render:prepare",
            StepKind::RenderExecute => "render:execute",
            StepKind::RenderFinalize => "render:finalize",
            StepKind::LabelsUploadToGcs => "labels:upload_to_gcs",
            StepKind::LabelsLabelDetection => "labels:label_detection",
            StepKind::LabelsObjectTracking => "labels:object_tracking",
            StepKind::LabelsFaceDetection => "labels:face_detection",
            StepKind::LabelsPersonDetection => "labels:person_detection",
            StepKind::LabelsSpeechTranscription => "labels:speech_transcription",
        }
    }

    pub fn from_wire_id(s: &str) -> Result<Self, DomainError> {
        Ok(match s {
            "transcode:probe" => StepKind::TranscodeProbe,
            "transcode:thumbnail" => StepKind::TranscodeThumbnail,
            "transcode:sprite" => StepKind::TranscodeSprite,
            "transcode:filmstrip" => StepKind::TranscodeFilmstrip,
            "transcode:transcode" => StepKind::TranscodeTranscode,
            "transcode:audio" => StepKind::TranscodeAudio,
            "render:prepare" => StepKind::RenderPrepare,
            "render:execute" => StepKind::RenderExecute,
            "render:finalize" => StepKind::RenderFinalize,
            "labels:upload_to_gcs" => StepKind::LabelsUploadToGcs,
            "labels:label_detection" => StepKind::LabelsLabelDetection,
            "labels:object_tracking" => StepKind::LabelsObjectTracking,
            "labels:face_detection" => StepKind::LabelsFaceDetection,
            "labels:person_detection" => StepKind::LabelsPersonDetection,
            "labels:speech_transcription" => StepKind::LabelsSpeechTranscription,
            other => return Err(DomainError::ValidationError(format!("unknown step kind: {other}"))),
        })
    }

    /// Queue a step of this kind is dispatched on.
    pub fn queue(&self) -> QueueName {
        match self {
            StepKind::TranscodeProbe
            | StepKind::TranscodeThumbnail
            | StepKind::TranscodeSprite
            | StepKind::TranscodeFilmstrip
            | StepKind::TranscodeTranscode
            | StepKind::TranscodeAudio => QueueName::Transcode,
            StepKind::RenderPrepare | StepKind::RenderExecute | StepKind::RenderFinalize => QueueName::Render,
            StepKind::LabelsUploadToGcs => QueueName::Labels,
            StepKind::LabelsLabelDetection
            | StepKind::LabelsObjectTracking
            | StepKind::LabelsFaceDetection
            | StepKind::LabelsPersonDetection
            | StepKind::LabelsSpeechTranscription => QueueName::Intelligence,
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_id())
    }
}

/// Bit-exact queue names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueName {
    Transcode,
    Intelligence,
    Render,
    Labels,
}

impl QueueName {
    pub fn wire_id(&self) -> &'static str {
        match self {
            QueueName::Transcode => "transcode",
            QueueName::Intelligence => "intelligence",
            QueueName::Render => "render",
            QueueName::Labels => "labels",
        }
    }

    pub const ALL: [QueueName; 4] =
        [QueueName::Transcode, QueueName::Intelligence, QueueName::Render, QueueName::Labels];
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Never became ready because an upstream dependency failed terminally.
    FailedByCascade,
    Cancelled,
}

/// One completed-or-failed record for a step, memoized on the parent.
///
/// Invariant: `status == Completed` implies `output.is_some() && error.is_none()`;
/// `status == Failed` implies `error.is_some()`. A `Completed` result is
/// never overwritten once written (the memoization/retry-fast-path basis).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_kind: StepKind,
    pub status: StepStatus,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn pending(step_kind: StepKind) -> Self {
        Self { step_kind, status: StepStatus::Pending, output: None, error: None, started_at: None, completed_at: None }
    }

    pub fn completed(step_kind: StepKind, output: serde_json::Value, started_at: DateTime<Utc>) -> Self {
        Self {
            step_kind,
            status: StepStatus::Completed,
            output: Some(output),
            error: None,
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
        }
    }

    pub fn failed(step_kind: StepKind, error: String, started_at: DateTime<Utc>) -> Self {
        Self {
            step_kind,
            status: StepStatus::Failed,
            output: None,
            error: Some(error),
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, StepStatus::Completed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            StepStatus::Completed | StepStatus::Failed | StepStatus::FailedByCascade | StepStatus::Cancelled
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, StepStatus::Failed | StepStatus::FailedByCascade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_step_kind_wire_id_round_trips() {
        for kind in StepKind::ALL {
            assert_eq!(StepKind::from_wire_id(kind.wire_id()).unwrap(), kind);
        }
        assert!(StepKind::from_wire_id("not:a:step").is_err());
    }

    #[test]
    fn every_step_kind_routes_to_exactly_one_queue() {
        // Sanity check on the match in `StepKind::queue`: every transcode
        // kind lands on `Transcode`, every labels kind except the upload
        // step lands on `Intelligence`.
        for kind in StepKind::ALL {
            let queue = kind.queue();
            match kind {
                StepKind::TranscodeProbe
                | StepKind::TranscodeThumbnail
                | StepKind::TranscodeSprite
                | StepKind::TranscodeFilmstrip
                | StepKind::TranscodeTranscode
                | StepKind::TranscodeAudio => assert_eq!(queue, QueueName::Transcode),
                StepKind::RenderPrepare | StepKind::RenderExecute | StepKind::RenderFinalize => {
                    assert_eq!(queue, QueueName::Render)
                }
                StepKind::LabelsUploadToGcs => assert_eq!(queue, QueueName::Labels),
                _ => assert_eq!(queue, QueueName::Intelligence),
            }
        }
    }

    #[test]
    fn step_result_terminal_and_failure_predicates() {
        let pending = StepResult::pending(StepKind::TranscodeProbe);
        assert!(!pending.is_terminal());
        assert!(!pending.is_failure());

        let completed = StepResult::completed(StepKind::TranscodeProbe, serde_json::json!({}), Utc::now());
        assert!(completed.is_terminal());
        assert!(completed.is_completed());
        assert!(!completed.is_failure());

        let failed = StepResult::failed(StepKind::TranscodeProbe, "boom".into(), Utc::now());
        assert!(failed.is_terminal());
        assert!(failed.is_failure());
        assert!(!failed.is_completed());
    }

    #[test]
    fn queue_name_wire_id_round_trips() {
        for queue in QueueName::ALL {
            assert_eq!(queue.wire_id(), queue.to_string());
        }
    }
}
