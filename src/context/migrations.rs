//! Version-tracked schema migrations for the libSQL context store.

use libsql::Connection;

use crate::error::StoreError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "user_contexts",
        sql: r#"
            CREATE TABLE IF NOT EXISTS user_contexts (
                user_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                document TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        name: "user_contexts_updated_index",
        sql: r#"
            CREATE INDEX IF NOT EXISTS idx_user_contexts_updated
                ON user_contexts(updated_at);
        "#,
    },
];

fn failed(what: impl std::fmt::Display) -> impl FnOnce(libsql::Error) -> StoreError {
    move |e| StoreError::Migration(format!("{what}: {e}"))
}

/// Bring the schema up to [`latest_version`].
///
/// Each pending step runs in one transaction with the row that records it.
pub async fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_versions (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .await
    .map_err(failed("creating schema_versions"))?;

    let current = current_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        tracing::debug!(version = current, "Context schema up to date");
        return Ok(());
    }

    for step in pending {
        tracing::info!(from = current, to = step.version, name = step.name, "Migrating context schema");
        let batch = format!(
            "BEGIN;\n{}\nINSERT INTO schema_versions (version, name) VALUES ({}, '{}');\nCOMMIT;",
            step.sql, step.version, step.name
        );
        if let Err(e) = conn.execute_batch(&batch).await {
            // The batch may have stopped inside the transaction.
            let _ = conn.execute("ROLLBACK", ()).await;
            return Err(failed(format!("V{} {}", step.version, step.name))(e));
        }
    }
    Ok(())
}

pub(crate) async fn current_version(conn: &Connection) -> Result<i64, StoreError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_versions", ())
        .await
        .map_err(failed("reading schema version"))?;
    let Some(row) = rows.next().await.map_err(failed("reading schema version"))? else {
        return Ok(0);
    };
    row.get::<i64>(0).map_err(failed("decoding schema version"))
}

pub(crate) fn latest_version() -> i64 {
    MIGRATIONS.iter().map(|m| m.version).max().unwrap_or(0)
}
