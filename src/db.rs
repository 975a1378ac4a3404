//! Local SQLite database.
//!
//! Holds what must survive an app restart on the device: user preferences
//! (`local_settings`) and the last status each role session observed per
//! order (`observed_statuses`), which keeps change notifications from
//! replaying after a relaunch. Order lists themselves are not persisted;
//! they are always rebuilt from the backend.

use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::status::{OrderStatus, Role};

/// Shared handle to the local database connection.
pub struct LocalDb {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

impl LocalDb {
    /// Open (or create) `{data_dir}/delivery.db`.
    ///
    /// On corruption or open failure the file is deleted and opened once
    /// more; nothing in it is authoritative.
    pub fn init(data_dir: &Path) -> Result<Self, String> {
        fs::create_dir_all(data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

        let db_path = data_dir.join("delivery.db");
        info!("Opening database at {}", db_path.display());

        let conn = match open_and_configure(&db_path) {
            Ok(c) => c,
            Err(first_err) => {
                warn!(
                    "Database open failed ({}), deleting and retrying once",
                    first_err
                );
                if db_path.exists() {
                    let _ = fs::remove_file(&db_path);
                    let _ = fs::remove_file(db_path.with_extension("db-wal"));
                    let _ = fs::remove_file(db_path.with_extension("db-shm"));
                }
                open_and_configure(&db_path)
                    .map_err(|e| format!("Database open failed after retry: {e}"))?
            }
        };

        run_migrations(&conn)?;
        info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Throwaway database for tests and ephemeral sessions.
    pub fn open_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory().map_err(|e| format!("sqlite open: {e}"))?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")
            .map_err(|e| format!("pragma setup: {e}"))?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Lock the connection. A panic on another thread while holding the lock
    /// leaves SQLite itself consistent, so a poisoned lock is recovered.
    pub fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;
    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: settings store.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS local_settings (
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1 (local_settings)");
    Ok(())
}

/// Migration v2: last observed status per role and order.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS observed_statuses (
            role TEXT NOT NULL,
            order_id TEXT NOT NULL,
            status TEXT NOT NULL,
            observed_at TEXT DEFAULT (datetime('now')),
            PRIMARY KEY (role, order_id)
        );

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (observed_statuses)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Observed statuses
// ---------------------------------------------------------------------------

/// Load the last observed status of every order seen by `role`.
pub fn load_observed_statuses(
    conn: &Connection,
    role: Role,
) -> Result<HashMap<String, OrderStatus>, String> {
    let mut stmt = conn
        .prepare("SELECT order_id, status FROM observed_statuses WHERE role = ?1")
        .map_err(|e| format!("load observed statuses: {e}"))?;
    let rows = stmt
        .query_map(params![role.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(|e| format!("load observed statuses: {e}"))?;

    Ok(rows
        .flatten()
        .map(|(id, status)| (id, OrderStatus::parse(&status)))
        .collect())
}

/// Record the latest observed status for one order.
pub fn save_observed_status(
    conn: &Connection,
    role: Role,
    order_id: &str,
    status: &OrderStatus,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO observed_statuses (role, order_id, status, observed_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(role, order_id) DO UPDATE SET
            status = excluded.status,
            observed_at = excluded.observed_at",
        params![role.as_str(), order_id, status.as_str()],
    )
    .map_err(|e| format!("save observed status: {e}"))?;
    Ok(())
}
