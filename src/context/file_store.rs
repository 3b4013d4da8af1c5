//! JSON file backend: one `{user_id}_context.json` document per user.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::context::model::UserContext;
use crate::context::store::{ContextStore, file_stem, prepare_save, user_id_from_stem};
use crate::error::StoreError;

const FILE_SUFFIX: &str = "_context.json";

/// Stores each context as a pretty-printed JSON file in `dir`.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// reader never sees a half-written document.
pub struct JsonFileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: &Path) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(dir).await?;
        info!(dir = %dir.display(), "Context file store opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{}{FILE_SUFFIX}", file_stem(user_id)))
    }

    async fn read(&self, user_id: &str) -> Result<Option<UserContext>, StoreError> {
        let path = self.path_for(user_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ContextStore for JsonFileStore {
    async fn load(&self, user_id: &str) -> Result<Option<UserContext>, StoreError> {
        self.read(user_id).await
    }

    async fn save(&self, ctx: &mut UserContext) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let stored = self.read(&ctx.user_id).await?.map(|c| c.version).unwrap_or(0);
        let next = prepare_save(ctx, stored)?;
        let previous = ctx.version;
        ctx.version = next;

        let json = match serde_json::to_string_pretty(ctx) {
            Ok(json) => json,
            Err(e) => {
                ctx.version = previous;
                return Err(e.into());
            }
        };

        let path = self.path_for(&ctx.user_id);
        let tmp = path.with_extension("json.tmp");
        let written = async {
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(e) = written {
            ctx.version = previous;
            return Err(e.into());
        }

        debug!(user_id = %ctx.user_id, version = next, "Context saved");
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.path_for(user_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_users(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut users = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(user) = name.strip_suffix(FILE_SUFFIX).and_then(user_id_from_stem) {
                users.push(user);
            }
        }
        users.sort();
        Ok(users)
    }
}
