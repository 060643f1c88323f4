//! Publish/subscribe seam between the orchestrator and its listeners.
//!
//! Delivery is best-effort: nothing is persisted, and a subscriber that was
//! not attached when a message was published never sees it. Consumers that
//! reconnect must re-read current state from the job status query.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// Receiving end handed out by an [`EventBus`]. Single consumer; dropping it
/// unsubscribes on the publisher's next send.
#[derive(Debug)]
pub struct Subscription<M> {
    inbox: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(inbox: Receiver<M>) -> Self {
        Self { inbox }
    }

    pub fn try_recv(&self) -> Result<M, TryRecvError> {
        self.inbox.try_recv()
    }

    /// Blocks the calling thread; stream pumps call this from a blocking task.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        self.inbox.recv_timeout(timeout)
    }

    /// Everything buffered so far, oldest first.
    pub fn drain(&self) -> Vec<M> {
        self.inbox.try_iter().collect()
    }
}

/// Fan-out: each subscriber receives its own copy of every message it is
/// interested in.
pub trait EventBus<M>: Send + Sync {
    type Error: std::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B: EventBus<M> + ?Sized> EventBus<M> for Arc<B> {
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), B::Error> {
        B::publish(self, message)
    }

    fn subscribe(&self) -> Subscription<M> {
        B::subscribe(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn drain_returns_in_publish_order_and_empties() {
        let (tx, rx) = mpsc::channel();
        let subscription = Subscription::new(rx);
        for n in 1..=3 {
            tx.send(n).unwrap();
        }

        assert_eq!(subscription.drain(), vec![1, 2, 3]);
        assert!(matches!(subscription.try_recv(), Err(TryRecvError::Empty)));

        drop(tx);
        assert!(matches!(
            subscription.recv_timeout(Duration::from_millis(1)),
            Err(RecvTimeoutError::Disconnected)
        ));
    }
}
