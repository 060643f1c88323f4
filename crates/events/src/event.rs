use chrono::{DateTime, Utc};
use pixforge_core::{JobId, UserId};

/// A notification about one job, routed to its owner and to watchers of
/// that job.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Wire name, also used as the SSE event name.
    fn event_type(&self) -> &'static str;

    fn occurred_at(&self) -> DateTime<Utc>;

    fn user_id(&self) -> UserId;

    fn job_id(&self) -> JobId;

    /// Nothing further will be published for this job run.
    fn is_terminal(&self) -> bool;
}
