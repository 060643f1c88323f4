//! Compare-and-swap versioning for records that are stored whole.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// What a write expects the stored version to be.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Overwrite regardless.
    Any,
    Exact(u64),
}

impl ExpectedVersion {
    pub fn check(self, stored: u64) -> DomainResult<()> {
        match self {
            ExpectedVersion::Exact(expected) if expected != stored => Err(DomainError::conflict(format!(
                "stale write: read at version {expected}, store is at {stored}"
            ))),
            _ => Ok(()),
        }
    }
}

/// A stored value plus the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: u64) -> Self {
        Self { value, version }
    }

    /// Expectation for writing back what was read.
    pub fn expected(&self) -> ExpectedVersion {
        ExpectedVersion::Exact(self.version)
    }
}
