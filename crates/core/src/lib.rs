//! Shared domain building blocks for pixforge.
//!
//! Pure primitives only (ids, errors, versioning, time); no infrastructure.

pub mod clock;
pub mod concurrency;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use concurrency::{ExpectedVersion, Versioned};
pub use error::{DomainError, DomainResult};
pub use id::{JobId, UserId};
