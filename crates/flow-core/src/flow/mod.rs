pub mod builder;
pub mod plan;
pub mod validator;

pub use builder::{build_flow, FlowBuilder};
pub use plan::{BackoffPolicy, FlowPlan, ParentNode, StepNode, StepOpts};
pub use validator::validate_plan;
