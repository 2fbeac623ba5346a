//! File-backed token cache.
//!
//! Each provider keeps exactly one [`Credential`] in its own JSON file. Writes
//! go to a temporary sibling first and are renamed over the target, so a crash
//! never leaves a half-written token behind. Unreadable files are treated as
//! an empty cache.

use crate::credential::{Credential, ProviderKind};
use crate::error::{AuthError, AuthResult};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Cached value: `None` = not loaded yet, `Some(None)` = known to be empty.
type Slot = Option<Option<Credential>>;

/// Persistent single-credential cache.
pub struct TokenCache {
    path: PathBuf,
    memory: RwLock<Slot>,
}

impl TokenCache {
    /// Create the cache for `provider` in the default config directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn for_provider(provider: ProviderKind) -> AuthResult<Self> {
        let dir = crate::default_cache_dir().ok_or(AuthError::NoConfigDir)?;
        Ok(Self::with_path(dir.join(provider.cache_file_name())))
    }

    /// Create a cache backed by a custom file.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            memory: RwLock::new(None),
        }
    }

    /// Get the path to the cache file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached credential.
    ///
    /// Missing, empty or corrupt files all load as `None`.
    pub async fn load(&self) -> Option<Credential> {
        {
            let memory = self.memory.read().await;
            if let Some(slot) = &*memory {
                return slot.clone();
            }
        }

        let loaded = self.read_file().await;
        *self.memory.write().await = Some(loaded.clone());
        loaded
    }

    /// Persist `credential`, replacing whatever was cached before.
    pub async fn save(&self, credential: &Credential) -> AuthResult<()> {
        debug!(provider = %credential.provider, path = ?self.path, "Saving token cache");

        let content = serde_json::to_string_pretty(credential)?;
        self.write_atomic(&content).await?;

        *self.memory.write().await = Some(Some(credential.clone()));
        Ok(())
    }

    /// Remove the cached credential. Succeeds if there was none.
    pub async fn clear(&self) -> AuthResult<()> {
        debug!(path = ?self.path, "Clearing token cache");

        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AuthError::Io(e)),
        }

        *self.memory.write().await = Some(None);
        Ok(())
    }

    /// Drop the in-memory copy so the next load rereads the file.
    pub async fn reload(&self) {
        *self.memory.write().await = None;
    }

    async fn read_file(&self) -> Option<Credential> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Token cache unreadable, ignoring");
                return None;
            }
        };

        if content.trim().is_empty() {
            return None;
        }

        match serde_json::from_str::<Credential>(&content) {
            Ok(credential) if !credential.access_token.is_empty() => Some(credential),
            Ok(_) => {
                warn!(path = ?self.path, "Token cache holds an empty token, ignoring");
                None
            }
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Token cache corrupt, ignoring");
                None
            }
        }
    }

    async fn write_atomic(&self, content: &str) -> AuthResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&temp_path, perms).await?;
        }

        tokio::fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("path", &self.path)
            .finish()
    }
}
