//! Wires every concrete handler into the closed `StepRegistry` (§4.3, C3).
//! The root binary and `flow-cli` both consume `build_registry()` rather
//! than constructing handlers themselves.

use std::sync::Arc;

use flow_core::step::StepRegistry;
use flow_domain::StepKind;

use crate::labels::{
    FaceDetectionHandler, LabelDetectionHandler, ObjectTrackingHandler, PersonDetectionHandler,
    SpeechTranscriptionHandler, UploadToGcsHandler,
};
use crate::render::{ExecuteHandler, FinalizeHandler, PrepareHandler};
use crate::transcode::{AudioHandler, FilmstripHandler, ProbeHandler, SpriteHandler, ThumbnailHandler, TranscodeEncodeHandler};

pub fn build_registry() -> StepRegistry {
    let mut registry = StepRegistry::new();
    registry
        .register(StepKind::TranscodeProbe, Arc::new(ProbeHandler::new()))
        .register(StepKind::TranscodeThumbnail, Arc::new(ThumbnailHandler::new()))
        .register(StepKind::TranscodeSprite, Arc::new(SpriteHandler::new()))
        .register(StepKind::TranscodeFilmstrip, Arc::new(FilmstripHandler::new()))
        .register(StepKind::TranscodeTranscode, Arc::new(TranscodeEncodeHandler::new()))
        .register(StepKind::TranscodeAudio, Arc::new(AudioHandler::new()))
        .register(StepKind::RenderPrepare, Arc::new(PrepareHandler::new()))
        .register(StepKind::RenderExecute, Arc::new(ExecuteHandler::new()))
        .register(StepKind::RenderFinalize, Arc::new(FinalizeHandler::new()))
        .register(StepKind::LabelsUploadToGcs, Arc::new(UploadToGcsHandler::new()))
        .register(StepKind::LabelsLabelDetection, Arc::new(LabelDetectionHandler::new()))
        .register(StepKind::LabelsObjectTracking, Arc::new(ObjectTrackingHandler::new()))
        .register(StepKind::LabelsFaceDetection, Arc::new(FaceDetectionHandler::new()))
        .register(StepKind::LabelsPersonDetection, Arc::new(PersonDetectionHandler::new()))
        .register(StepKind::LabelsSpeechTranscription, Arc::new(SpeechTranscriptionHandler::new()));
    registry
}
