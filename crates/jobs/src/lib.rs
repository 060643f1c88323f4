//! Job records, their state machine, and the workflow registry.

pub mod record;
pub mod workflow;

pub use record::{JobRecord, JobStatus, JobStatusView, StepProgress, StepStatus};
pub use workflow::{
    OutputRef, StepContext, StepDescriptor, StepKind, StepRequest, WorkflowDefinition,
    WorkflowRegistry, WorkflowType,
};
