//! Progress events and their best-effort push channel.

pub mod bus;
pub mod event;
pub mod notifier;
pub mod progress;

pub use bus::{EventBus, Subscription};
pub use event::Event;
pub use notifier::{NotifierError, ProgressNotifier, Topic};
pub use progress::{ProgressEvent, ProgressEventKind};
