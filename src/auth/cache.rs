//! Persisted credential cache.
//!
//! One JSON file holds the current credential. Loading a missing or corrupt
//! file degrades to an empty cache so acquisition proceeds as if none
//! existed; saving is dirty-checked, atomic (temp file + rename), and
//! restricts permissions to the owner on Unix.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::Result;

/// A cached credential as obtained from the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Opaque refresh material; absent for flows that granted none.
    pub refresh_token: Option<String>,
    /// Account identifier the credential was issued to.
    pub account: Option<String>,
}

impl Credential {
    /// True while the access token is still usable, with a safety margin
    /// so a token does not expire mid-request.
    pub fn is_fresh(&self) -> bool {
        self.expires_at > Utc::now() + Duration::seconds(60)
    }
}

/// In-memory view of the cache file, tracking whether it diverged from
/// what is on disk.
#[derive(Debug, Default)]
pub struct CredentialCache {
    credential: Option<Credential>,
    dirty: bool,
}

impl CredentialCache {
    pub fn current(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Replace the credential and mark the cache dirty.
    pub fn update(&mut self, credential: Credential) {
        self.credential = Some(credential);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// File-backed store for the credential cache.
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the cache. Missing or unparseable files yield an empty,
    /// valid-but-unauthenticated cache rather than an error.
    pub async fn load(&self) -> CredentialCache {
        match fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str::<Credential>(&content) {
                Ok(credential) => {
                    debug!(path = ?self.path, "Loaded credential cache");
                    CredentialCache {
                        credential: Some(credential),
                        dirty: false,
                    }
                }
                Err(e) => {
                    warn!(path = ?self.path, error = %e, "Corrupt credential cache, starting empty");
                    CredentialCache::default()
                }
            },
            Err(_) => {
                debug!(path = ?self.path, "No credential cache on disk, starting empty");
                CredentialCache::default()
            }
        }
    }

    /// Persist the cache if it changed since load. Writes go to a temp
    /// file first and are renamed into place; permissions are tightened
    /// to owner read/write on Unix before the rename.
    pub async fn save(&self, cache: &mut CredentialCache) -> Result<()> {
        if !cache.dirty {
            return Ok(());
        }
        let Some(credential) = &cache.credential else {
            return Ok(());
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(credential)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(&tmp, perms).await?;
        }

        fs::rename(&tmp, &self.path).await?;
        cache.dirty = false;

        debug!(path = ?self.path, "Saved credential cache");
        Ok(())
    }
}
