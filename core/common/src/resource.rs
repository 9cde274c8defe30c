//! Three-state value emitted by observable operations.

use crate::error::{Error, Result};

/// Progress of an operation that may suspend on network or crypto work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource<T> {
    /// The operation has started and has not produced a value yet.
    Loading,
    /// The operation completed.
    Success(T),
    /// The operation failed. The failure is final for this attempt.
    Error(Error),
}

impl<T> Resource<T> {
    /// Check if the operation is still in progress.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// The value, if the operation succeeded.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Map the success value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Resource<U> {
        match self {
            Self::Loading => Resource::Loading,
            Self::Success(value) => Resource::Success(f(value)),
            Self::Error(err) => Resource::Error(err),
        }
    }
}

impl<T> From<Result<T>> for Resource<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Error(err),
        }
    }
}
