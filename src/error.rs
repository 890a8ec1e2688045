//! Error taxonomy for the inventory core.
//!
//! Business outcomes (`NotFound`, `InsufficientStock`, `LockTimeout`) are
//! surfaced directly and never retried internally. Transient store failures are
//! retryable by the caller. Cache-tier failures never surface from the read
//! path, and invalidation-delivery failures never roll back a committed
//! purchase.

use thiserror::Error;

/// Failures of the persistent store seam.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store or transport unreachable; safe to retry.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Transaction could not be committed.
    #[error("store transaction conflict: {0}")]
    Conflict(String),
}

/// Errors exposed by [`crate::service::ProductService`].
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Record absent in the persistent store.
    #[error("product not found")]
    NotFound,

    /// Requested quantity exceeds the authoritative stock.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// Distributed lock could not be acquired within the wait budget.
    /// Callers may retry with backoff.
    #[error("lock acquisition timed out")]
    LockTimeout,

    /// Rejected request input (negative price, stock, or quantity).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persistent store failure; retryable, no cache or lock state corrupted.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Lock backend failure outside the normal timeout path.
    #[error("lock backend error: {0}")]
    Lock(String),
}

impl InventoryError {
    /// Whether the caller may retry the operation as-is.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout | Self::Store(_) | Self::Lock(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(InventoryError::LockTimeout.is_retryable());
        assert!(
            InventoryError::Store(StoreError::Unavailable("down".into())).is_retryable()
        );
        assert!(!InventoryError::NotFound.is_retryable());
        assert!(
            !InventoryError::InsufficientStock {
                requested: 2,
                available: 1
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_display_messages() {
        let err = InventoryError::InsufficientStock {
            requested: 5,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "insufficient stock: requested 5, available 1"
        );
    }
}
