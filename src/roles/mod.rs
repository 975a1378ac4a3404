//! Role action gateways and feeds.
//!
//! Each role module pairs a [`RoleFeed`] (what the store polls) with a
//! gateway (what the UI calls). Gateway actions share one shape: resolve the
//! current entity, validate the action locally, call the backend, and fold
//! the returned entity into the store. A failed call leaves the store as it
//! was.

pub mod courier;
pub mod customer;
pub mod restaurant;

use tracing::warn;

use crate::error::{DeliveryError, DeliveryResult};
use crate::status::Role;
use crate::store::{ReconciliationStore, RoleFeed};

pub use courier::{CourierFeed, CourierGateway, CourierStore};
pub use customer::{CustomerFeed, CustomerGateway, CustomerStore};
pub use restaurant::{RestaurantFeed, RestaurantGateway, RestaurantStore};

/// Current view of `id`: the held copy, or a detail fetch when the store
/// has not seen it yet.
pub(crate) async fn resolve<F: RoleFeed>(
    store: &ReconciliationStore<F>,
    id: &str,
) -> DeliveryResult<F::Entity> {
    match store.get(id) {
        Some(entity) => Ok(entity),
        None => store.load_detail(id).await,
    }
}

/// Log a failed write-path call and hand the error back to the caller.
pub(crate) fn action_failed(role: Role, action: &str, id: &str, err: DeliveryError) -> DeliveryError {
    warn!(role = %role, action, order_id = id, error = %err, "Order action failed");
    err
}

/// Free-text notes are trimmed; blank notes are rejected.
pub(crate) fn required_note(note: &str) -> DeliveryResult<String> {
    let trimmed = note.trim();
    if trimmed.is_empty() {
        return Err(DeliveryError::Validation("Please describe what happened".into()));
    }
    Ok(trimmed.to_string())
}
