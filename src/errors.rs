//! Error types for the keyed object pool

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`KeyedObjectPool`](crate::KeyedObjectPool).
///
/// `E` is the factory's own error type. Factory failures that reach the caller
/// are carried unaltered in [`PoolError::Factory`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError<E> {
    #[error("factory operation failed: {0}")]
    Factory(#[source] E),

    #[error("no object available - every candidate failed activation or validation")]
    Exhausted,

    #[error("pool is closed")]
    Closed,

    #[error("maximum active objects for this key reached")]
    MaxActiveObjectsReached,

    #[error("object was not borrowed under this key")]
    NotBorrowed,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl<E> PoolError<E> {
    /// The pool could not hand out an object (the NoSuchElement case).
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::Exhausted)
    }

    /// The operation was rejected because the pool is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, PoolError::Closed)
    }

    /// Borrow the wrapped factory error, if this is one.
    pub fn factory_error(&self) -> Option<&E> {
        match self {
            PoolError::Factory(err) => Some(err),
            _ => None,
        }
    }

    /// Unwrap into the factory error, if this is one.
    pub fn into_factory_error(self) -> Option<E> {
        match self {
            PoolError::Factory(err) => Some(err),
            _ => None,
        }
    }
}

pub type PoolResult<T, E> = Result<T, PoolError<E>>;
