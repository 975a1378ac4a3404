//! Role-specific views of the shared delivery order.
//!
//! The backend exposes one order entity through three lenses: the customer
//! `Order`, the courier `DeliveryTask`, and the `RestaurantOrder`. Summary
//! list payloads carry only a subset of fields, so every non-key field is
//! optional on the wire and merged with [`Tracked::overlay`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::status::OrderStatus;

// ---------------------------------------------------------------------------
// Shared parts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spice_level: Option<String>,
    /// Add-on flags such as "extra_cheese" or "no_onion".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_ons: Vec<String>,
    pub quantity: u32,
    pub unit_price: i64,
}

impl LineItem {
    pub fn line_total(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLocation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Coordinate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl Rating {
    pub fn new(score: u8, comment: Option<String>) -> Result<Self, DeliveryError> {
        if !(1..=5).contains(&score) {
            return Err(DeliveryError::Validation(format!(
                "Rating must be between 1 and 5 (got {score})"
            )));
        }
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        Ok(Self { score, comment })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Overlay merge
// ---------------------------------------------------------------------------

/// An entity the reconciliation store can hold.
pub trait Tracked: Clone + Send + Sync + std::fmt::Debug + 'static {
    fn id(&self) -> &str;
    fn status(&self) -> &OrderStatus;
    /// Fold an authoritative payload into this locally held entity. The
    /// payload's status always wins; any other field the payload does not
    /// carry keeps its local value.
    fn overlay(&mut self, incoming: Self);
}

/// Entities the customer can rate once delivered.
pub trait Rateable: Tracked {
    fn rating(&self) -> Option<&Rating>;
    fn set_rating(&mut self, rating: Rating);
}

fn take<T>(local: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *local = incoming;
    }
}

fn take_items(local: &mut Vec<LineItem>, incoming: Vec<LineItem>) {
    if !incoming.is_empty() {
        *local = incoming;
    }
}

/// Append-only merge: a recorded status keeps its first timestamp.
fn merge_history(local: &mut Vec<StatusHistoryEntry>, incoming: Vec<StatusHistoryEntry>) {
    let before = local.len();
    for entry in incoming {
        if !local.iter().any(|e| e.status == entry.status) {
            local.push(entry);
        }
    }
    if local.len() != before {
        local.sort_by_key(|e| e.at);
    }
}

// ---------------------------------------------------------------------------
// Customer order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub placed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    #[serde(default)]
    pub total_amount: Option<i64>,
    #[serde(default)]
    pub delivery_fee: Option<i64>,
    #[serde(default)]
    pub restaurant_name: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub delivery_location: Option<DeliveryLocation>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub requested_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rating: Option<Rating>,
    #[serde(default)]
    pub rider_name: Option<String>,
    #[serde(default)]
    pub rider_phone: Option<String>,
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,
}

impl Order {
    /// Summary-shaped order, as a list endpoint would return it.
    pub fn summary(id: impl Into<String>, status: OrderStatus) -> Self {
        Self {
            id: id.into(),
            status,
            placed_at: None,
            eta_minutes: None,
            total_amount: None,
            delivery_fee: None,
            restaurant_name: None,
            items: Vec::new(),
            delivery_location: None,
            notes: None,
            requested_time: None,
            rating: None,
            rider_name: None,
            rider_phone: None,
            status_history: Vec::new(),
        }
    }
}

impl Tracked for Order {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> &OrderStatus {
        &self.status
    }

    fn overlay(&mut self, incoming: Self) {
        self.status = incoming.status;
        // placedAt is immutable once known.
        if self.placed_at.is_none() {
            self.placed_at = incoming.placed_at;
        }
        take(&mut self.eta_minutes, incoming.eta_minutes);
        take(&mut self.total_amount, incoming.total_amount);
        take(&mut self.delivery_fee, incoming.delivery_fee);
        take(&mut self.restaurant_name, incoming.restaurant_name);
        take_items(&mut self.items, incoming.items);
        take(&mut self.delivery_location, incoming.delivery_location);
        take(&mut self.notes, incoming.notes);
        take(&mut self.requested_time, incoming.requested_time);
        take(&mut self.rating, incoming.rating);
        take(&mut self.rider_name, incoming.rider_name);
        take(&mut self.rider_phone, incoming.rider_phone);
        merge_history(&mut self.status_history, incoming.status_history);
    }
}

impl Rateable for Order {
    fn rating(&self) -> Option<&Rating> {
        self.rating.as_ref()
    }

    fn set_rating(&mut self, rating: Rating) {
        self.rating = Some(rating);
    }
}

/// Body of `POST /orders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrder {
    pub restaurant_id: String,
    pub items: Vec<LineItem>,
    pub delivery_location: DeliveryLocation,
    pub delivery_fee: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_time: Option<DateTime<Utc>>,
}

impl NewOrder {
    pub fn validate(&self) -> Result<(), DeliveryError> {
        if self.restaurant_id.trim().is_empty() {
            return Err(DeliveryError::Validation("Missing restaurant".into()));
        }
        if self.items.is_empty() {
            return Err(DeliveryError::Validation(
                "An order needs at least one item".into(),
            ));
        }
        if let Some(item) = self.items.iter().find(|i| i.quantity == 0) {
            return Err(DeliveryError::Validation(format!(
                "Quantity for \"{}\" must be at least 1",
                item.name
            )));
        }
        if self.delivery_location.name.trim().is_empty() {
            return Err(DeliveryError::Validation(
                "Missing delivery location".into(),
            ));
        }
        match self.delivery_fee {
            None => Err(DeliveryError::Validation("Missing delivery fee".into())),
            Some(fee) if fee < 0 => Err(DeliveryError::Validation(
                "Delivery fee cannot be negative".into(),
            )),
            Some(_) => Ok(()),
        }
    }

    pub fn items_total(&self) -> i64 {
        self.items.iter().map(LineItem::line_total).sum()
    }
}

// ---------------------------------------------------------------------------
// Courier task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTask {
    pub id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub placed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    #[serde(default)]
    pub delivery_fee: Option<i64>,
    #[serde(default)]
    pub restaurant_name: Option<String>,
    #[serde(default)]
    pub pickup_location: Option<DeliveryLocation>,
    #[serde(default)]
    pub delivery_location: Option<DeliveryLocation>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_phone: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Courier bound to the task; set by the backend on accept.
    #[serde(default)]
    pub courier_id: Option<String>,
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,
}

impl DeliveryTask {
    pub fn summary(id: impl Into<String>, status: OrderStatus) -> Self {
        Self {
            id: id.into(),
            status,
            placed_at: None,
            eta_minutes: None,
            delivery_fee: None,
            restaurant_name: None,
            pickup_location: None,
            delivery_location: None,
            customer_name: None,
            customer_phone: None,
            items: Vec::new(),
            notes: None,
            courier_id: None,
            status_history: Vec::new(),
        }
    }
}

impl Tracked for DeliveryTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> &OrderStatus {
        &self.status
    }

    fn overlay(&mut self, incoming: Self) {
        self.status = incoming.status;
        if self.placed_at.is_none() {
            self.placed_at = incoming.placed_at;
        }
        take(&mut self.eta_minutes, incoming.eta_minutes);
        take(&mut self.delivery_fee, incoming.delivery_fee);
        take(&mut self.restaurant_name, incoming.restaurant_name);
        take(&mut self.pickup_location, incoming.pickup_location);
        take(&mut self.delivery_location, incoming.delivery_location);
        take(&mut self.customer_name, incoming.customer_name);
        take(&mut self.customer_phone, incoming.customer_phone);
        take_items(&mut self.items, incoming.items);
        take(&mut self.notes, incoming.notes);
        take(&mut self.courier_id, incoming.courier_id);
        merge_history(&mut self.status_history, incoming.status_history);
    }
}

/// Acknowledgement returned by `POST /delivery/:id/incident`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentReport {
    #[serde(default)]
    pub id: Option<String>,
    pub task_id: String,
    pub note: String,
    #[serde(default)]
    pub reported_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Restaurant order
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantOrder {
    pub id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub placed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub eta_minutes: Option<u32>,
    #[serde(default)]
    pub total_amount: Option<i64>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub delivery_location: Option<DeliveryLocation>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub requested_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub rider_name: Option<String>,
    #[serde(default)]
    pub rider_phone: Option<String>,
    #[serde(default)]
    pub rating: Option<Rating>,
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,
}

impl RestaurantOrder {
    pub fn summary(id: impl Into<String>, status: OrderStatus) -> Self {
        Self {
            id: id.into(),
            status,
            placed_at: None,
            eta_minutes: None,
            total_amount: None,
            customer_name: None,
            items: Vec::new(),
            delivery_location: None,
            notes: None,
            requested_time: None,
            rider_name: None,
            rider_phone: None,
            rating: None,
            status_history: Vec::new(),
        }
    }
}

impl Tracked for RestaurantOrder {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> &OrderStatus {
        &self.status
    }

    fn overlay(&mut self, incoming: Self) {
        self.status = incoming.status;
        if self.placed_at.is_none() {
            self.placed_at = incoming.placed_at;
        }
        take(&mut self.eta_minutes, incoming.eta_minutes);
        take(&mut self.total_amount, incoming.total_amount);
        take(&mut self.customer_name, incoming.customer_name);
        take_items(&mut self.items, incoming.items);
        take(&mut self.delivery_location, incoming.delivery_location);
        take(&mut self.notes, incoming.notes);
        take(&mut self.requested_time, incoming.requested_time);
        take(&mut self.rider_name, incoming.rider_name);
        take(&mut self.rider_phone, incoming.rider_phone);
        take(&mut self.rating, incoming.rating);
        merge_history(&mut self.status_history, incoming.status_history);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn detailed_order() -> Order {
        let mut order = Order::summary("ord-1", OrderStatus::PickedUp);
        order.items = vec![LineItem {
            name: "Beef noodle soup".into(),
            size: Some("large".into()),
            spice_level: Some("medium".into()),
            add_ons: vec!["extra_beef".into()],
            quantity: 2,
            unit_price: 180,
        }];
        order.notes = Some("Leave at the door".into());
        order.rider_phone = Some("0912-345-678".into());
        order
    }

    #[test]
    fn summary_overlay_keeps_detail_fields() {
        let mut local = detailed_order();
        let summary: Order =
            serde_json::from_value(serde_json::json!({ "id": "ord-1", "status": "delivering" }))
                .unwrap();

        local.overlay(summary);

        assert_eq!(local.status, OrderStatus::Delivering);
        assert_eq!(local.items.len(), 1);
        assert_eq!(local.notes.as_deref(), Some("Leave at the door"));
        assert_eq!(local.rider_phone.as_deref(), Some("0912-345-678"));
    }

    #[test]
    fn overlay_takes_present_fields_and_keeps_placed_at() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut local = detailed_order();
        local.placed_at = Some(t0);

        let mut incoming = Order::summary("ord-1", OrderStatus::Delivering);
        incoming.eta_minutes = Some(7);
        incoming.placed_at = Some(t0 + chrono::Duration::hours(1));

        local.overlay(incoming);
        assert_eq!(local.eta_minutes, Some(7));
        assert_eq!(local.placed_at, Some(t0));
    }

    #[test]
    fn status_history_is_append_only() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let mut local = Order::summary("ord-1", OrderStatus::Assigned);
        local.status_history = vec![StatusHistoryEntry {
            status: OrderStatus::Available,
            at: t0,
        }];

        let mut incoming = Order::summary("ord-1", OrderStatus::Assigned);
        incoming.status_history = vec![
            StatusHistoryEntry {
                status: OrderStatus::Available,
                at: t0 + chrono::Duration::minutes(30),
            },
            StatusHistoryEntry {
                status: OrderStatus::Assigned,
                at: t0 + chrono::Duration::minutes(3),
            },
        ];
        local.overlay(incoming);

        assert_eq!(local.status_history.len(), 2);
        assert_eq!(local.status_history[0].at, t0);
        assert_eq!(local.status_history[1].status, OrderStatus::Assigned);
    }

    #[test]
    fn task_overlay_binds_courier() {
        let mut task = DeliveryTask::summary("ord-1", OrderStatus::Available);
        task.customer_phone = Some("0900-000-000".into());
        let mut accepted = DeliveryTask::summary("ord-1", OrderStatus::Assigned);
        accepted.courier_id = Some("courier-7".into());

        task.overlay(accepted);
        assert_eq!(task.status, OrderStatus::Assigned);
        assert_eq!(task.courier_id.as_deref(), Some("courier-7"));
        assert_eq!(task.customer_phone.as_deref(), Some("0900-000-000"));
    }

    #[test]
    fn rating_score_is_range_checked() {
        assert!(Rating::new(0, None).is_err());
        assert!(Rating::new(6, None).is_err());
        let rating = Rating::new(5, Some("  ".into())).unwrap();
        assert_eq!(rating.comment, None);
    }

    #[test]
    fn new_order_requires_delivery_fee() {
        let order = NewOrder {
            restaurant_id: "rest-1".into(),
            items: vec![LineItem {
                name: "Dumplings".into(),
                size: None,
                spice_level: None,
                add_ons: Vec::new(),
                quantity: 1,
                unit_price: 120,
            }],
            delivery_location: DeliveryLocation {
                name: "Office".into(),
                coordinate: None,
            },
            delivery_fee: None,
            notes: None,
            requested_time: None,
        };
        assert_eq!(
            order.validate(),
            Err(DeliveryError::Validation("Missing delivery fee".into()))
        );
        assert_eq!(order.items_total(), 120);
    }

    #[test]
    fn unknown_status_does_not_fail_decode() {
        let task: DeliveryTask =
            serde_json::from_value(serde_json::json!({ "id": "t-9", "status": "on_hold" }))
                .unwrap();
        assert_eq!(task.status, OrderStatus::Unknown("on_hold".into()));
    }
}
