//! Order lifecycle state machine.
//!
//! One shared status vocabulary is mutated by three roles. This module owns
//! the wire vocabulary (with tolerant parsing), the role-scoped legal
//! transitions, and the per-role presentation helpers (customer display
//! status, courier/restaurant step index, active/history bucket).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DeliveryError;
use crate::models::StatusHistoryEntry;

// ---------------------------------------------------------------------------
// Wire status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    Available,
    Assigned,
    EnRouteToPickup,
    PickedUp,
    Delivering,
    Delivered,
    Cancelled,
    /// A value outside the seven-state vocabulary, kept verbatim so it
    /// round-trips to the backend unchanged.
    Unknown(String),
}

/// Linear happy path, in order.
pub const HAPPY_PATH: [OrderStatus; 6] = [
    OrderStatus::Available,
    OrderStatus::Assigned,
    OrderStatus::EnRouteToPickup,
    OrderStatus::PickedUp,
    OrderStatus::Delivering,
    OrderStatus::Delivered,
];

impl OrderStatus {
    /// Parse a wire value. Never fails: legacy spellings are folded onto the
    /// canonical vocabulary and anything else becomes `Unknown`.
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "available" | "pending" => Self::Available,
            "assigned" | "accepted" => Self::Assigned,
            "en_route_to_pickup" => Self::EnRouteToPickup,
            "picked_up" => Self::PickedUp,
            "delivering" | "out_for_delivery" => Self::Delivering,
            "delivered" | "completed" => Self::Delivered,
            "cancelled" | "canceled" | "rejected" | "declined" => Self::Cancelled,
            _ => Self::Unknown(raw.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Available => "available",
            Self::Assigned => "assigned",
            Self::EnRouteToPickup => "en_route_to_pickup",
            Self::PickedUp => "picked_up",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Next status on the happy path, `None` for terminal and unknown states.
    pub fn next_in_sequence(&self) -> Option<OrderStatus> {
        let pos = HAPPY_PATH.iter().position(|s| s == self)?;
        HAPPY_PATH.get(pos + 1).cloned()
    }

    /// Before the courier has collected the food.
    pub fn is_pre_pickup(&self) -> bool {
        matches!(self, Self::Available | Self::Assigned)
    }

    pub fn step_index(&self) -> StepIndex {
        match self {
            Self::Cancelled => StepIndex::Cancelled,
            other => StepIndex::Step(
                HAPPY_PATH
                    .iter()
                    .position(|s| s == other)
                    .map(|p| p as u8)
                    .unwrap_or(0),
            ),
        }
    }

    pub fn customer_display(&self) -> CustomerDisplayStatus {
        match self {
            Self::EnRouteToPickup | Self::PickedUp | Self::Delivering => {
                CustomerDisplayStatus::Delivering
            }
            Self::Delivered => CustomerDisplayStatus::Delivered,
            Self::Cancelled => CustomerDisplayStatus::Cancelled,
            Self::Available | Self::Assigned | Self::Unknown(_) => CustomerDisplayStatus::Preparing,
        }
    }
}

impl From<String> for OrderStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Roles and presentation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Courier,
    Restaurant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Courier => "courier",
            Self::Restaurant => "restaurant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "customer" => Some(Self::Customer),
            "courier" | "rider" | "driver" => Some(Self::Courier),
            "restaurant" | "merchant" => Some(Self::Restaurant),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the customer app shows: the courier-side steps are collapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerDisplayStatus {
    Preparing,
    Delivering,
    Delivered,
    Cancelled,
}

/// Progress-bar position for courier and restaurant views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepIndex {
    /// 0 (available) through 5 (delivered).
    Step(u8),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Active,
    History,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::History => "history",
        }
    }
}

/// Active/history placement. Derived from status only; all roles currently
/// agree that terminal orders are history and everything else, including
/// statuses this client does not recognize, stays active.
pub fn bucket_for(_role: Role, status: &OrderStatus) -> Bucket {
    if status.is_terminal() {
        Bucket::History
    } else {
        Bucket::Active
    }
}

// ---------------------------------------------------------------------------
// Role-scoped transitions
// ---------------------------------------------------------------------------

pub fn is_legal_transition(role: Role, from: &OrderStatus, to: &OrderStatus) -> bool {
    use OrderStatus::*;

    if from.is_terminal() || !from.is_known() || !to.is_known() {
        return false;
    }

    match role {
        Role::Restaurant => matches!(
            (from, to),
            (Available, Assigned) | (Available, Cancelled) | (Assigned, EnRouteToPickup)
        ),
        // An open offer can only be accepted.
        Role::Courier => match (from, to) {
            (Available, _) => *to == Assigned,
            (_, Cancelled) => true,
            _ => from.next_in_sequence().as_ref() == Some(to),
        },
        Role::Customer => *to == Cancelled && from.is_pre_pickup(),
    }
}

pub fn check_transition(
    role: Role,
    from: &OrderStatus,
    to: &OrderStatus,
) -> Result<(), DeliveryError> {
    if is_legal_transition(role, from, to) {
        Ok(())
    } else {
        Err(DeliveryError::IllegalTransition {
            role,
            from: from.clone(),
            action: format!("move the order to {to}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Timeline
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineStep {
    pub status: OrderStatus,
    pub reached: bool,
    pub at: Option<DateTime<Utc>>,
}

/// Happy-path timeline for an order at `current`, annotated with the times
/// recorded in its status history. A cancelled order shows only the steps
/// it actually recorded as reached.
pub fn timeline(current: &OrderStatus, history: &[StatusHistoryEntry]) -> Vec<TimelineStep> {
    let reached_up_to = match current.step_index() {
        StepIndex::Step(i) => Some(i as usize),
        StepIndex::Cancelled => None,
    };

    HAPPY_PATH
        .iter()
        .enumerate()
        .map(|(i, status)| {
            let at = history.iter().find(|e| &e.status == status).map(|e| e.at);
            let reached = match reached_up_to {
                Some(limit) => i <= limit,
                None => at.is_some(),
            };
            TimelineStep {
                status: status.clone(),
                reached,
                at,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_folds_legacy_spellings() {
        assert_eq!(OrderStatus::parse("canceled"), OrderStatus::Cancelled);
        assert_eq!(OrderStatus::parse(" Picked-Up "), OrderStatus::PickedUp);
        assert_eq!(OrderStatus::parse("pending"), OrderStatus::Available);
        assert_eq!(
            OrderStatus::parse("on_hold"),
            OrderStatus::Unknown("on_hold".into())
        );
    }

    #[test]
    fn unknown_status_round_trips_on_the_wire() {
        let status: OrderStatus = serde_json::from_str("\"on_hold\"").unwrap();
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"on_hold\"");
        let known: OrderStatus = serde_json::from_str("\"en_route_to_pickup\"").unwrap();
        assert_eq!(known, OrderStatus::EnRouteToPickup);
    }

    #[test]
    fn unknown_status_maps_to_safe_defaults() {
        let status = OrderStatus::parse("on_hold");
        assert_eq!(bucket_for(Role::Customer, &status), Bucket::Active);
        assert_eq!(status.customer_display(), CustomerDisplayStatus::Preparing);
        assert_eq!(status.step_index(), StepIndex::Step(0));
        assert!(!is_legal_transition(
            Role::Courier,
            &status,
            &OrderStatus::Cancelled
        ));
    }

    #[test]
    fn customer_display_collapses_courier_steps() {
        assert_eq!(
            OrderStatus::Assigned.customer_display(),
            CustomerDisplayStatus::Preparing
        );
        assert_eq!(
            OrderStatus::PickedUp.customer_display(),
            CustomerDisplayStatus::Delivering
        );
        assert_eq!(
            OrderStatus::Cancelled.customer_display(),
            CustomerDisplayStatus::Cancelled
        );
    }

    #[test]
    fn step_index_covers_happy_path() {
        assert_eq!(OrderStatus::Available.step_index(), StepIndex::Step(0));
        assert_eq!(OrderStatus::Delivered.step_index(), StepIndex::Step(5));
        assert_eq!(OrderStatus::Cancelled.step_index(), StepIndex::Cancelled);
    }

    #[test]
    fn restaurant_transitions() {
        use OrderStatus::*;
        assert!(is_legal_transition(Role::Restaurant, &Available, &Assigned));
        assert!(is_legal_transition(Role::Restaurant, &Available, &Cancelled));
        assert!(is_legal_transition(
            Role::Restaurant,
            &Assigned,
            &EnRouteToPickup
        ));
        assert!(!is_legal_transition(Role::Restaurant, &Assigned, &Cancelled));
        assert!(!is_legal_transition(Role::Restaurant, &PickedUp, &Delivering));
    }

    #[test]
    fn courier_follows_linear_sequence_and_may_cancel() {
        use OrderStatus::*;
        assert!(is_legal_transition(Role::Courier, &Available, &Assigned));
        assert!(is_legal_transition(Role::Courier, &PickedUp, &Delivering));
        assert!(is_legal_transition(Role::Courier, &Delivering, &Delivered));
        assert!(!is_legal_transition(Role::Courier, &Assigned, &PickedUp));
        assert!(is_legal_transition(Role::Courier, &Delivering, &Cancelled));
        assert!(!is_legal_transition(Role::Courier, &Delivered, &Cancelled));
        assert!(is_legal_transition(Role::Courier, &Assigned, &Cancelled));
        assert!(!is_legal_transition(Role::Courier, &Available, &Cancelled));
        assert!(!is_legal_transition(Role::Courier, &Available, &EnRouteToPickup));
    }

    #[test]
    fn customer_may_only_cancel_before_pickup() {
        use OrderStatus::*;
        assert!(is_legal_transition(Role::Customer, &Available, &Cancelled));
        assert!(is_legal_transition(Role::Customer, &Assigned, &Cancelled));
        assert!(!is_legal_transition(Role::Customer, &PickedUp, &Cancelled));
        assert!(!is_legal_transition(Role::Customer, &Available, &Assigned));

        let err = check_transition(Role::Customer, &Delivering, &Cancelled).unwrap_err();
        assert!(matches!(err, DeliveryError::IllegalTransition { .. }));
    }

    #[test]
    fn no_transition_leaves_a_terminal_state() {
        for role in [Role::Customer, Role::Courier, Role::Restaurant] {
            for from in [OrderStatus::Delivered, OrderStatus::Cancelled] {
                for to in HAPPY_PATH.iter().chain([OrderStatus::Cancelled].iter()) {
                    assert!(!is_legal_transition(role, &from, to));
                }
            }
        }
    }

    #[test]
    fn timeline_marks_reached_steps() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let history = vec![
            StatusHistoryEntry {
                status: OrderStatus::Available,
                at: t0,
            },
            StatusHistoryEntry {
                status: OrderStatus::Assigned,
                at: t0 + chrono::Duration::minutes(2),
            },
        ];
        let steps = timeline(&OrderStatus::PickedUp, &history);
        assert_eq!(steps.len(), 6);
        assert!(steps[3].reached);
        assert!(!steps[4].reached);
        assert_eq!(steps[1].at, Some(t0 + chrono::Duration::minutes(2)));

        let cancelled = timeline(&OrderStatus::Cancelled, &history);
        assert!(cancelled[1].reached);
        assert!(!cancelled[2].reached);
    }
}
