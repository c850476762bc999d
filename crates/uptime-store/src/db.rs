use rusqlite::Connection;

use crate::error::Result;

/// Initialise the coordination and history schema in `conn`.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kv (
            key         TEXT    NOT NULL PRIMARY KEY,
            value       TEXT    NOT NULL,
            expires_at  INTEGER             -- unix millis or NULL for no expiry
        );

        -- Sweeping expired rows: DELETE … WHERE expires_at <= ?
        CREATE INDEX IF NOT EXISTS idx_kv_expires_at ON kv (expires_at);

        CREATE TABLE IF NOT EXISTS health_history (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            service           TEXT    NOT NULL,
            status            TEXT    NOT NULL,
            timestamp_ms      INTEGER NOT NULL,
            response_time_ms  INTEGER,
            status_code       INTEGER,
            error             TEXT,
            cycle_id          TEXT,
            job_id            TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_history_service_ts
            ON health_history (service, timestamp_ms);
        ",
    )?;
    Ok(())
}
