//! Change-detection notifier.
//!
//! Remembers the last status observed per order for one role session and
//! fires exactly one notification per observed transition. The first time an
//! order is seen its status is only recorded, so a cold start does not flood
//! the user. Only the net change between two observations is notified,
//! however many states the backend went through in between.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::db::{self, LocalDb};
use crate::preferences;
use crate::status::{OrderStatus, Role};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Stable for a given (role, order, status), unique across transitions.
    pub id: String,
    pub title: String,
    pub body: String,
    pub order_id: String,
    pub role: Role,
    pub status: OrderStatus,
}

/// Outbound local/push notification scheduler. Fire-and-forget: an error is
/// logged by the notifier and never affects store state.
pub trait NotificationSink: Send + Sync {
    fn schedule(&self, notification: &Notification) -> Result<(), String>;
}

/// Writes notifications to the log. Used by the headless poller.
pub struct LogSink;

impl NotificationSink for LogSink {
    fn schedule(&self, notification: &Notification) -> Result<(), String> {
        info!(
            id = %notification.id,
            order_id = %notification.order_id,
            status = %notification.status,
            "{}: {}",
            notification.title,
            notification.body
        );
        Ok(())
    }
}

/// Keeps every scheduled notification in memory so an embedding UI can drain
/// them.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.delivered.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<Notification> {
        self.delivered
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }
}

impl NotificationSink for RecordingSink {
    fn schedule(&self, notification: &Notification) -> Result<(), String> {
        self.delivered
            .lock()
            .map_err(|e| e.to_string())?
            .push(notification.clone());
        Ok(())
    }
}

pub struct ChangeNotifier {
    role: Role,
    last_observed: HashMap<String, OrderStatus>,
    db: Arc<LocalDb>,
    sink: Arc<dyn NotificationSink>,
    emitted: u64,
}

impl ChangeNotifier {
    pub fn new(role: Role, db: Arc<LocalDb>, sink: Arc<dyn NotificationSink>) -> Self {
        let last_observed = {
            let conn = db.lock();
            db::load_observed_statuses(&conn, role).unwrap_or_else(|e| {
                warn!(role = %role, error = %e, "Could not load observed statuses, starting fresh");
                HashMap::new()
            })
        };
        debug!(role = %role, known = last_observed.len(), "Change notifier ready");
        Self {
            role,
            last_observed,
            db,
            sink,
            emitted: 0,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Number of notifications handed to the sink by this notifier.
    pub fn emitted_count(&self) -> u64 {
        self.emitted
    }

    pub fn last_observed(&self, order_id: &str) -> Option<&OrderStatus> {
        self.last_observed.get(order_id)
    }

    /// Record `status` for `order_id`, firing a notification when it differs
    /// from the previously recorded one and notifications are enabled.
    pub fn observe(&mut self, order_id: &str, status: &OrderStatus) -> Option<Notification> {
        let previous = self.last_observed.get(order_id).cloned();
        if previous.as_ref() == Some(status) {
            return None;
        }

        self.last_observed
            .insert(order_id.to_string(), status.clone());
        {
            let conn = self.db.lock();
            if let Err(e) = db::save_observed_status(&conn, self.role, order_id, status) {
                warn!(order_id, error = %e, "Failed to persist observed status");
            }
        }

        let previous = previous?;
        if !preferences::notifications_enabled(&self.db, self.role) {
            debug!(
                order_id,
                from = %previous,
                to = %status,
                "Status changed, notifications disabled"
            );
            return None;
        }

        let notification = build_notification(self.role, order_id, status);
        if let Err(e) = self.sink.schedule(&notification) {
            warn!(id = %notification.id, error = %e, "Notification scheduling failed");
        }
        self.emitted += 1;
        info!(
            role = %self.role,
            order_id,
            from = %previous,
            to = %status,
            "Order status change notified"
        );
        Some(notification)
    }
}

fn order_label(order_id: &str) -> String {
    format!("#{order_id}")
}

pub fn build_notification(role: Role, order_id: &str, status: &OrderStatus) -> Notification {
    let (title, body) = message_for(role, order_id, status);
    Notification {
        id: format!("{}:{}:{}", role.as_str(), order_id, status.as_str()),
        title,
        body,
        order_id: order_id.to_string(),
        role,
        status: status.clone(),
    }
}

/// Role-appropriate (title, body) for an order that just reached `status`.
pub fn message_for(role: Role, order_id: &str, status: &OrderStatus) -> (String, String) {
    use OrderStatus::*;
    let label = order_label(order_id);

    let (title, body) = match (role, status) {
        (Role::Customer, Available) => ("Order received", format!("We sent {label} to the restaurant.")),
        (Role::Customer, Assigned) => (
            "Preparing your order",
            format!("The restaurant accepted {label} and is preparing it."),
        ),
        (Role::Customer, EnRouteToPickup) => (
            "Courier on the way",
            format!("A courier is heading to the restaurant for {label}."),
        ),
        (Role::Customer, PickedUp) => ("Order picked up", format!("Your courier has collected {label}.")),
        (Role::Customer, Delivering) => ("On the way to you", format!("{label} is out for delivery.")),
        (Role::Customer, Delivered) => (
            "Delivered",
            format!("{label} has arrived. Enjoy your meal and tell us how it was!"),
        ),
        (Role::Customer, Cancelled) => ("Order cancelled", format!("{label} was cancelled.")),

        (Role::Courier, Available) => ("New task available", format!("{label} is waiting for a courier.")),
        (Role::Courier, Assigned) => ("Task assigned", format!("{label} is now yours. Head to the restaurant.")),
        (Role::Courier, Cancelled) => (
            "Task cancelled",
            format!("{label} was cancelled. No further action is needed."),
        ),
        (Role::Courier, Delivered) => ("Task completed", format!("{label} was marked delivered.")),

        (Role::Restaurant, Available) => ("New order", format!("{label} is waiting for you to accept it.")),
        (Role::Restaurant, Assigned) => ("Order accepted", format!("{label} was accepted.")),
        (Role::Restaurant, EnRouteToPickup) => (
            "Courier on the way",
            format!("A courier is coming to collect {label}."),
        ),
        (Role::Restaurant, PickedUp) => ("Order collected", format!("The courier picked up {label}.")),
        (Role::Restaurant, Delivered) => ("Order delivered", format!("{label} reached the customer.")),
        (Role::Restaurant, Cancelled) => ("Order cancelled", format!("{label} was cancelled.")),

        (_, Unknown(raw)) => ("Order updated", format!("{label} status changed to \"{raw}\".")),
        (_, other) => ("Order updated", format!("{label} is now {}.", other.as_str().replace('_', " "))),
    };

    (title.to_string(), body)
}
