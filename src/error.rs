//! Error taxonomy shared by the stores, gateways and backend client.
//!
//! Every variant is recoverable: the UI surfaces `user_message()` and lets
//! the user retry. Nothing in this crate panics on a backend or transport
//! failure.

use crate::status::{OrderStatus, Role};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The caller's role may not perform `action` on an order in status
    /// `from`. Detected locally, before any network call.
    #[error("{role} cannot {action} while the order is {from}")]
    IllegalTransition {
        role: Role,
        from: OrderStatus,
        action: String,
    },

    #[error("order {0} not found")]
    NotFound(String),

    /// The backend rejected the write, e.g. a task already taken by another courier.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed backend payload.
    #[error("invalid response from backend: {0}")]
    Decode(String),

    /// Missing or out-of-range input, e.g. no delivery fee before submission.
    #[error("validation failed: {0}")]
    Validation(String),
}

impl DeliveryError {
    /// Transport-level failures that are worth retrying on the next cycle
    /// without any change in user input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }

    /// Short message suitable for a toast or inline error label.
    pub fn user_message(&self) -> String {
        match self {
            Self::IllegalTransition { action, from, .. } => {
                format!("You cannot {action} right now (order is {})", from.as_str().replace('_', " "))
            }
            Self::NotFound(_) => "This order no longer exists".to_string(),
            Self::Conflict(_) => "Someone else already updated this order".to_string(),
            Self::Network(_) => "Cannot reach the delivery service, please retry".to_string(),
            Self::Timeout(_) => "The delivery service took too long to answer".to_string(),
            Self::Unauthorized(_) => "Your session has expired, please sign in again".to_string(),
            Self::Decode(_) => "Unexpected response from the delivery service".to_string(),
            Self::Validation(msg) => msg.clone(),
        }
    }
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;
