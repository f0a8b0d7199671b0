/// Key/value persistence for the handful of values that survive restarts:
/// access token, serialized user profile, theme choice.
///
/// Controllers only see the `Store` trait. Storage failures are never fatal —
/// callers log a warning and carry on with in-memory state as the source of
/// truth for the current session.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

// ── Well-known keys ───────────────────────────────────────────────────────────

pub const KEY_ACCESS_TOKEN: &str = "accessToken";
pub const KEY_USER_PROFILE: &str = "userProfile";
pub const KEY_THEME: &str = "app_theme";

// ── Store trait ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

// ── File-backed store ─────────────────────────────────────────────────────────

/// One file per key under the data dir. Values are opaque strings; the
/// profile value happens to be JSON but the store doesn't care.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Default location: `$XDG_DATA_HOME/shiksha/store` (or `~/.local/share`).
    pub fn default_dir() -> PathBuf {
        std::env::var("XDG_DATA_HOME")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                PathBuf::from(std::env::var("HOME").unwrap_or_default()).join(".local/share")
            })
            .join("shiksha/store")
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.key_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to read stored value at {}", path.display()))
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.key_path(key);
        tokio::fs::write(&path, value)
            .await
            .with_context(|| format!("Failed to write stored value at {}", path.display()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.key_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Removing an absent key is a no-op, matching async-storage semantics
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove stored value at {}", path.display())),
        }
    }
}

// ── In-memory store ───────────────────────────────────────────────────────────

/// In-memory store for tests and ephemeral embedders (e.g. previews).
#[derive(Default)]
pub struct MemStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(pairs: &[(&str, &str)]) -> Self {
        let store = Self::new();
        {
            let mut values = store.values.lock().unwrap();
            for (k, v) in pairs {
                values.insert(k.to_string(), v.to_string());
            }
        }
        store
    }
}

#[async_trait]
impl Store for MemStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}
