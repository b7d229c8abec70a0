//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::PersistenceError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "assessments",
        sql: r#"
            CREATE TABLE IF NOT EXISTS assessments (
                partition_key TEXT NOT NULL,
                row_key TEXT NOT NULL,
                score REAL NOT NULL,
                is_success INTEGER NOT NULL,
                error_message TEXT,
                assessment_id TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (partition_key, row_key)
            );

            CREATE TRIGGER IF NOT EXISTS assessments_no_update
            BEFORE UPDATE ON assessments
            BEGIN
                SELECT RAISE(ABORT, 'audit records are immutable');
            END;

            CREATE TRIGGER IF NOT EXISTS assessments_no_delete
            BEFORE DELETE ON assessments
            BEGIN
                SELECT RAISE(ABORT, 'audit records are immutable');
            END;
        "#,
    },
    Migration {
        version: 2,
        name: "queue_messages",
        sql: r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                id TEXT PRIMARY KEY,
                queue TEXT NOT NULL,
                body TEXT NOT NULL,
                dequeue_count INTEGER NOT NULL DEFAULT 0,
                pop_receipt TEXT,
                inserted_at INTEGER NOT NULL,
                visible_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queue_messages_visible
                ON queue_messages(queue, visible_at);
        "#,
    },
];

/// Run all pending migrations against the given connection.
pub async fn run_migrations(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| PersistenceError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                PersistenceError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!(
        version = get_current_version(conn).await?,
        "Database migrations complete"
    );
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, PersistenceError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| PersistenceError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| PersistenceError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => row.get::<i64>(0).map_err(|e| {
            PersistenceError::Migration(format!("Failed to parse migration version: {e}"))
        }),
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), PersistenceError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| PersistenceError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
