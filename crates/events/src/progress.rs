use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pixforge_core::{JobId, UserId};
use pixforge_jobs::StepStatus;

use crate::event::Event;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEventKind {
    Progress {
        step: String,
        step_status: StepStatus,
        progress: u8,
    },
    Complete {
        results: serde_json::Value,
    },
    Error {
        message: String,
    },
    Cancelled,
}

/// A state change pushed to a job's owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub user_id: UserId,
    pub job_id: JobId,
    #[serde(flatten)]
    pub kind: ProgressEventKind,
    pub occurred_at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(user_id: UserId, job_id: JobId, kind: ProgressEventKind, occurred_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            job_id,
            kind,
            occurred_at,
        }
    }
}

impl Event for ProgressEvent {
    fn event_type(&self) -> &'static str {
        match self.kind {
            ProgressEventKind::Progress { .. } => "progress",
            ProgressEventKind::Complete { .. } => "complete",
            ProgressEventKind::Error { .. } => "error",
            ProgressEventKind::Cancelled => "cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn user_id(&self) -> UserId {
        self.user_id
    }

    fn job_id(&self) -> JobId {
        self.job_id
    }

    fn is_terminal(&self) -> bool {
        !matches!(self.kind, ProgressEventKind::Progress { .. })
    }
}
