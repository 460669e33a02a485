//! Database schema migrations for SQLite.
//!
//! Each migration is a SQL batch that moves the schema from version N to
//! N+1. Applied versions are recorded in `schema_migrations`.

use clearance_core::now_millis;
use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;
            tracing::debug!(version, "applied store migration");

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: credentials and messages.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE credentials (
            id TEXT PRIMARY KEY,
            holder_kind TEXT NOT NULL,        -- 'own' | 'peer'
            holder_did TEXT,                  -- connection DID for peer credentials
            raw BLOB NOT NULL,                -- CBOR-encoded RawCredential
            received_at INTEGER NOT NULL
        );

        CREATE TABLE messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,               -- protocol type URI
            from_did TEXT NOT NULL,
            direction TEXT NOT NULL,          -- 'received' | 'sent'
            timestamp INTEGER NOT NULL,       -- sender-claimed, 0 if unknown
            stored_at INTEGER NOT NULL,       -- local insertion time
            record BLOB NOT NULL              -- CBOR-encoded Message
        );

        CREATE INDEX idx_credentials_holder ON credentials(holder_kind, holder_did);
        CREATE INDEX idx_messages_kind_from ON messages(kind, from_did);
        "#,
    )?;

    Ok(())
}

/// Migration v2: presentation request ledger and connection pairings.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE presentation_requests (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            peer TEXT NOT NULL,
            status TEXT NOT NULL,             -- 'pending' | 'sent' | 'declined'
            created_at INTEGER NOT NULL,
            schema_id TEXT
        );

        CREATE TABLE connections (
            peer TEXT PRIMARY KEY,
            connection_did TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_presentation_requests_status ON presentation_requests(status);
        "#,
    )?;

    Ok(())
}
