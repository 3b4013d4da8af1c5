//! `ContextStore` trait: whole-record load and save keyed by user id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::info;

use crate::context::model::UserContext;
use crate::error::StoreError;

/// Backend-agnostic persistence for user contexts.
///
/// `save` is a compare-and-swap on `ctx.version`: the stored version must equal
/// the version the caller loaded (0 when the record does not exist yet). On
/// success the stored and in-memory versions both move forward by one.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Load the context for `user_id`, if one exists.
    async fn load(&self, user_id: &str) -> Result<Option<UserContext>, StoreError>;

    /// Persist the whole context.
    async fn save(&self, ctx: &mut UserContext) -> Result<(), StoreError>;

    /// Remove a user's context. Returns `false` when nothing was stored.
    async fn delete(&self, user_id: &str) -> Result<bool, StoreError>;

    /// All stored user ids, sorted.
    async fn list_users(&self) -> Result<Vec<String>, StoreError>;

    /// Load, creating a default context on first reference.
    async fn load_or_create(&self, user_id: &str) -> Result<UserContext, StoreError> {
        if let Some(ctx) = self.load(user_id).await? {
            return Ok(ctx);
        }
        let mut ctx = UserContext::new(user_id);
        self.save(&mut ctx).await?;
        info!(user_id, "Created user context");
        Ok(ctx)
    }
}

/// Check a CAS precondition and stamp the context for writing.
pub(crate) fn prepare_save(ctx: &mut UserContext, stored_version: u64) -> Result<u64, StoreError> {
    if stored_version != ctx.version {
        return Err(StoreError::Conflict {
            user_id: ctx.user_id.clone(),
            expected: ctx.version,
            found: stored_version,
        });
    }
    ctx.updated_at = Utc::now();
    Ok(ctx.version + 1)
}

/// Write a timestamped copy of `ctx` into `dir` and return its path.
///
/// File name: `{user_id}_context_export_{YYYYmmdd_HHMMSS}.json`.
pub async fn export_context(ctx: &UserContext, dir: &Path) -> Result<PathBuf, StoreError> {
    tokio::fs::create_dir_all(dir).await?;
    let stamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!(
        "{}_context_export_{stamp}.json",
        file_stem(&ctx.user_id)
    ));
    let json = serde_json::to_string_pretty(ctx)?;
    tokio::fs::write(&path, json).await?;
    info!(user_id = %ctx.user_id, path = %path.display(), "Exported context");
    Ok(path)
}

/// File-system safe form of a user id. Reversible with [`user_id_from_stem`].
pub(crate) fn file_stem(user_id: &str) -> String {
    urlencoding::encode(user_id).into_owned()
}

/// Recover the user id behind a [`file_stem`]. `None` for names it never produced.
pub(crate) fn user_id_from_stem(stem: &str) -> Option<String> {
    let user_id = urlencoding::decode(stem).ok()?.into_owned();
    (file_stem(&user_id) == stem).then_some(user_id)
}

// ── In-memory backend ───────────────────────────────────────────────

/// In-memory store. Records are kept as JSON so reads never alias writes.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, (u64, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStore for MemoryStore {
    async fn load(&self, user_id: &str) -> Result<Option<UserContext>, StoreError> {
        let records = self.records.read().await;
        match records.get(user_id) {
            Some((_, json)) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, ctx: &mut UserContext) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let stored = records.get(&ctx.user_id).map(|(v, _)| *v).unwrap_or(0);
        let next = prepare_save(ctx, stored)?;
        ctx.version = next;
        let json = match serde_json::to_string(ctx) {
            Ok(json) => json,
            Err(e) => {
                ctx.version -= 1;
                return Err(e.into());
            }
        };
        records.insert(ctx.user_id.clone(), (next, json));
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(user_id).is_some())
    }

    async fn list_users(&self) -> Result<Vec<String>, StoreError> {
        let mut users: Vec<String> = self.records.read().await.keys().cloned().collect();
        users.sort();
        Ok(users)
    }
}
