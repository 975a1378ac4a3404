//! Persisted per-role user preferences.

use tracing::warn;

use crate::db::{self, LocalDb};
use crate::status::Role;

const CATEGORY_NOTIFICATIONS: &str = "notifications";

fn notifications_key(role: Role) -> String {
    format!("{}_enabled", role.as_str())
}

/// Whether status-change notifications are enabled for `role`. Defaults to
/// enabled when never set. Read on every emission so a toggle applies to the
/// very next detected transition.
pub fn notifications_enabled(db: &LocalDb, role: Role) -> bool {
    let conn = db.lock();
    match db::get_setting(&conn, CATEGORY_NOTIFICATIONS, &notifications_key(role)) {
        None => true,
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => true,
            "false" | "0" | "no" | "off" => false,
            other => {
                warn!(role = %role, value = other, "Unrecognized notification preference, keeping enabled");
                true
            }
        },
    }
}

pub fn set_notifications_enabled(db: &LocalDb, role: Role, enabled: bool) -> Result<(), String> {
    let conn = db.lock();
    db::set_setting(
        &conn,
        CATEGORY_NOTIFICATIONS,
        &notifications_key(role),
        if enabled { "true" } else { "false" },
    )
}
