mod context;
mod handler;
mod registry;

pub use context::StepContext;
pub use handler::{StepHandler, StepOutcome};
pub use registry::StepRegistry;
