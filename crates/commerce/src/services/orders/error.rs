//! Order service error types.

use thiserror::Error;

use crate::error::{DEPENDENCY_FAILURE_MESSAGE, ErrorKind};
use crate::models::TransitionError;

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Bad request input; the message names the offending part and is safe
    /// to surface verbatim.
    #[error("{0}")]
    Validation(String),

    /// Order absent - or owned by someone else, which reads identically.
    #[error("order not found")]
    NotFound,

    /// The caller is authenticated but does not own this order.
    #[error("you do not have access to this order")]
    Forbidden,

    /// A status transition outside the allowed table, or a missing hold
    /// reason.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The item changed under the caller between read and write.
    #[error("item was updated concurrently, retry")]
    StaleItem,

    /// The order is cancelled and accepts no further changes.
    #[error("order is cancelled")]
    OrderCancelled,

    /// The order has no payment record to settle.
    #[error("order has no payment record")]
    NoPayment,

    /// Payment was already recorded; `paid_at` is set exactly once.
    #[error("payment already recorded")]
    AlreadyPaid,

    /// The payment amount no longer matches the order's grand total.
    #[error("payment amount does not match order total")]
    PaymentAmountMismatch,

    /// A collaborator (catalog, tax, shipping, persistence) failed. Details
    /// are logged, never surfaced.
    #[error("{}", DEPENDENCY_FAILURE_MESSAGE)]
    Dependency,
}

impl OrderError {
    /// Coarse classification for the embedding layer.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound => ErrorKind::NotFound,
            Self::Forbidden => ErrorKind::Forbidden,
            Self::Transition(TransitionError::InvalidTransition { .. })
            | Self::StaleItem
            | Self::OrderCancelled
            | Self::NoPayment
            | Self::AlreadyPaid
            | Self::PaymentAmountMismatch => ErrorKind::Conflict,
            Self::Transition(TransitionError::MissingHoldReason) => ErrorKind::Validation,
            Self::Dependency => ErrorKind::Dependency,
        }
    }
}
