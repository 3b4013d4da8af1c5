//! libSQL backend: one row per user holding the whole context document.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::context::migrations;
use crate::context::model::UserContext;
use crate::context::store::{ContextStore, prepare_save};
use crate::error::StoreError;

/// libSQL-backed context store with version-checked writes.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;
        let store = Self::from_database(db).await?;
        info!(path = %path.display(), schema = migrations::latest_version(), "Context database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    async fn stored_version(&self, user_id: &str) -> Result<u64, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT version FROM user_contexts WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("stored_version: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("stored_version: {e}")))?
        {
            Some(row) => {
                let v: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("stored_version: {e}")))?;
                Ok(v.max(0) as u64)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl ContextStore for LibSqlStore {
    async fn load(&self, user_id: &str) -> Result<Option<UserContext>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT document FROM user_contexts WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("load_context: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("load_context: {e}")))?
        {
            Some(row) => {
                let document: String = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("load_context: {e}")))?;
                Ok(Some(serde_json::from_str(&document)?))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, ctx: &mut UserContext) -> Result<(), StoreError> {
        let expected = ctx.version;
        let next = prepare_save(ctx, expected)?;
        ctx.version = next;
        let document = match serde_json::to_string(ctx) {
            Ok(doc) => doc,
            Err(e) => {
                ctx.version = expected;
                return Err(e.into());
            }
        };
        let now = Utc::now().to_rfc3339();

        let affected = if expected == 0 {
            self.conn
                .execute(
                    "INSERT INTO user_contexts (user_id, version, document, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)
                     ON CONFLICT(user_id) DO NOTHING",
                    params![ctx.user_id.clone(), next as i64, document, now],
                )
                .await
        } else {
            self.conn
                .execute(
                    "UPDATE user_contexts SET version = ?1, document = ?2, updated_at = ?3
                     WHERE user_id = ?4 AND version = ?5",
                    params![next as i64, document, now, ctx.user_id.clone(), expected as i64],
                )
                .await
        };

        let affected = match affected {
            Ok(n) => n,
            Err(e) => {
                ctx.version = expected;
                return Err(StoreError::Query(format!("save_context: {e}")));
            }
        };

        if affected == 0 {
            ctx.version = expected;
            let found = self.stored_version(&ctx.user_id).await?;
            return Err(StoreError::Conflict {
                user_id: ctx.user_id.clone(),
                expected,
                found,
            });
        }

        debug!(user_id = %ctx.user_id, version = next, "Context saved");
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM user_contexts WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("delete_context: {e}")))?;
        Ok(affected > 0)
    }

    async fn list_users(&self) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .conn
            .query("SELECT user_id FROM user_contexts ORDER BY user_id", ())
            .await
            .map_err(|e| StoreError::Query(format!("list_users: {e}")))?;
        let mut users = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(id) = row.get::<String>(0) {
                users.push(id);
            }
        }
        Ok(users)
    }
}
