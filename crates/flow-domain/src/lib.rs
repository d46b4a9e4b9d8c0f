// flow-domain library entry point
pub mod error;
pub mod step;
pub mod task;

pub use error::DomainError;
pub use step::{QueueName, StepKind, StepResult, StepStatus};
pub use task::{
    AudioOptions, OutputSettings, SpriteOptions, Task, TaskKind, TaskPayload, TaskStatus, ThumbnailOptions,
    TranscodeOptions,
};
