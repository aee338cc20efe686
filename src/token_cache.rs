//! File-backed token cache.
//!
//! Holds a single serialized [`CachedTokenRecord`]. Loading never fails: a
//! missing, unreadable or malformed file is reported as "no record" so the
//! caller can fall back to interactive sign-in. Writes go to a private temp
//! file in the same directory and are renamed over the record.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::error::CacheError;

/// On-disk format version.
const RECORD_VERSION: u32 = 1;

/// Serialized form of a credential plus the scopes it was issued for.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTokenRecord {
    #[serde(default = "record_version")]
    pub version: u32,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

fn record_version() -> u32 {
    RECORD_VERSION
}

impl CachedTokenRecord {
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_at: DateTime<Utc>,
        account: Option<String>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            version: RECORD_VERSION,
            access_token,
            refresh_token,
            expires_at,
            account,
            scopes,
        }
    }
}

impl std::fmt::Debug for CachedTokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTokenRecord")
            .field("version", &self.version)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .field("account", &self.account)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl Zeroize for CachedTokenRecord {
    fn zeroize(&mut self) {
        self.access_token.zeroize();
        if let Some(ref mut rt) = self.refresh_token {
            rt.zeroize();
        }
    }
}

impl Drop for CachedTokenRecord {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Persistent store for the token record at a fixed path.
#[derive(Debug, Clone)]
pub struct TokenCacheStore {
    path: PathBuf,
}

impl TokenCacheStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached record, or `None` if there is nothing usable on disk.
    pub fn load(&self) -> Option<CachedTokenRecord> {
        let mut content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No token cache at {:?}", self.path);
                return None;
            }
            Err(e) => {
                warn!("Failed to read token cache {:?}: {}", self.path, e);
                return None;
            }
        };

        let parsed = serde_json::from_str::<CachedTokenRecord>(&content);
        content.zeroize();

        match parsed {
            Ok(record) if record.version == RECORD_VERSION => {
                debug!("Loaded token cache from {:?}", self.path);
                Some(record)
            }
            Ok(record) => {
                warn!(
                    "Ignoring token cache {:?} with unsupported version {}",
                    self.path, record.version
                );
                None
            }
            Err(e) => {
                warn!("Ignoring malformed token cache {:?}: {}", self.path, e);
                None
            }
        }
    }

    /// Persist the record, replacing any previous one atomically.
    pub fn save(&self, record: &CachedTokenRecord) -> Result<(), CacheError> {
        let mut content = serde_json::to_vec_pretty(record)?;
        let result = self.write_atomic(&content);
        content.zeroize();
        result?;

        debug!("Saved token cache to {:?}", self.path);
        Ok(())
    }

    /// Remove the persisted record. Succeeds if there is none.
    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Cleared token cache {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::RemoveFailed {
                path: self.path.display().to_string(),
                source,
            }),
        }
    }

    fn write_atomic(&self, content: &[u8]) -> Result<(), CacheError> {
        let write_err = |source| CacheError::WriteFailed {
            path: self.path.display().to_string(),
            source,
        };

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        create_private_dir(&dir).map_err(write_err)?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "token_cache".to_string());
        let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let written = write_private_file(&tmp_path, content)
            .and_then(|()| fs::rename(&tmp_path, &self.path));

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(write_err(e));
        }

        Ok(())
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.exists() {
        return Ok(());
    }
    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn write_private_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(content)?;
    file.sync_all()
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    file.write_all(content)?;
    file.sync_all()
}
