//! In-process progress push channel.

use std::sync::{Mutex, mpsc};

use pixforge_core::{JobId, UserId};
use tracing::debug;

use crate::bus::{EventBus, Subscription};
use crate::event::Event;
use crate::progress::ProgressEvent;

#[derive(Debug)]
pub enum NotifierError {
    /// Publish failed due to internal lock poisoning.
    Poisoned,
}

/// What a subscriber wants to hear about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    All,
    User(UserId),
    Job(JobId),
}

impl Topic {
    pub fn matches<E: Event>(&self, event: &E) -> bool {
        match self {
            Topic::All => true,
            Topic::User(user_id) => event.user_id() == *user_id,
            Topic::Job(job_id) => event.job_id() == *job_id,
        }
    }
}

/// Fan-out of [`ProgressEvent`]s keyed by user and by job.
///
/// Best-effort: no buffering for absent subscribers, and subscribers whose
/// receiving end was dropped are pruned on the next publish.
#[derive(Debug, Default)]
pub struct ProgressNotifier {
    subscribers: Mutex<Vec<(Topic, mpsc::Sender<ProgressEvent>)>>,
}

impl ProgressNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_to(&self, topic: Topic) -> Subscription<ProgressEvent> {
        let (tx, rx) = mpsc::channel();

        // A poisoned lock still yields a (silent) subscription.
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push((topic, tx));
        }

        Subscription::new(rx)
    }

    /// Every event for jobs owned by `user_id`.
    pub fn subscribe_user(&self, user_id: UserId) -> Subscription<ProgressEvent> {
        self.subscribe_to(Topic::User(user_id))
    }

    /// Every event for one job.
    pub fn subscribe_job(&self, job_id: JobId) -> Subscription<ProgressEvent> {
        self.subscribe_to(Topic::Job(job_id))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl EventBus<ProgressEvent> for ProgressNotifier {
    type Error = NotifierError;

    fn publish(&self, message: ProgressEvent) -> Result<(), Self::Error> {
        let mut subs = self.subscribers.lock().map_err(|_| NotifierError::Poisoned)?;

        subs.retain(|(topic, tx)| !topic.matches(&message) || tx.send(message.clone()).is_ok());
        debug!(
            job_id = %message.job_id,
            event = message.event_type(),
            subscribers = subs.len(),
            "progress event published"
        );

        Ok(())
    }

    fn subscribe(&self) -> Subscription<ProgressEvent> {
        self.subscribe_to(Topic::All)
    }
}
