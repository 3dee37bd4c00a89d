//! Credential persistence
//!
//! Each session owns a directory under the sessions root holding the
//! external client's auth files plus a `creds.json` credential blob. The
//! blob is opaque: only a few display fields are ever interpreted.

use crate::error::{LinkError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// File name of the credential blob inside a session directory
pub const CREDS_FILE: &str = "creds.json";

/// Trait for persisting per-session credential blobs
pub trait CredentialStore: Send + Sync {
    /// Directory holding the session's auth state
    fn auth_dir(&self, session_id: &str) -> PathBuf;

    /// Make sure the session directory exists, returning it
    fn prepare(&self, session_id: &str) -> Result<PathBuf>;

    /// Persist a credential blob, replacing any previous one
    fn save(&self, session_id: &str, blob: &serde_json::Value) -> Result<()>;

    /// Read the current snapshot
    ///
    /// `Ok(None)` when no blob has been written yet. A blob that exists but
    /// does not parse yields `LinkError::Serialization`; callers treat that
    /// as transient since a writer may be mid-update.
    fn load(&self, session_id: &str) -> Result<Option<CredentialSnapshot>>;

    /// Merge a partial update into the stored blob and persist the result
    ///
    /// The client reports only the top-level fields that changed, so every
    /// field the update does not mention is kept.
    fn apply_update(&self, session_id: &str, update: &serde_json::Value) -> Result<()> {
        let mut blob = match self.load(session_id)? {
            Some(snapshot) => snapshot.blob().clone(),
            None => serde_json::Value::Object(serde_json::Map::new()),
        };
        merge_update(&mut blob, update);
        self.save(session_id, &blob)
    }
}

/// Overlay the top-level fields of `update` onto `blob`
///
/// A non-object on either side replaces the blob wholesale.
pub fn merge_update(blob: &mut serde_json::Value, update: &serde_json::Value) {
    if let (Some(target), Some(fields)) = (blob.as_object_mut(), update.as_object()) {
        for (key, value) in fields {
            target.insert(key.clone(), value.clone());
        }
        return;
    }
    *blob = update.clone();
}

/// Reject ids that would escape the sessions root
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let ok = !session_id.is_empty()
        && session_id.len() <= 128
        && session_id != "."
        && session_id != ".."
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+'));
    if ok {
        Ok(())
    } else {
        Err(LinkError::InvalidRequest(format!(
            "Invalid session id '{}'",
            session_id
        )))
    }
}

/// An immutable read of a credential blob
#[derive(Debug, Clone)]
pub struct CredentialSnapshot {
    raw: Vec<u8>,
    blob: serde_json::Value,
}

impl CredentialSnapshot {
    /// Parse raw file contents
    pub fn from_bytes(raw: Vec<u8>) -> Result<Self> {
        let blob = serde_json::from_slice(&raw)?;
        Ok(Self { raw, blob })
    }

    /// Raw bytes as persisted, suitable for forwarding as a file
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Parsed blob
    pub fn blob(&self) -> &serde_json::Value {
        &self.blob
    }

    /// Account address (`me.id`)
    pub fn me_id(&self) -> Option<&str> {
        self.blob.pointer("/me/id").and_then(|v| v.as_str())
    }

    /// Client platform
    pub fn platform(&self) -> Option<&str> {
        self.blob.get("platform").and_then(|v| v.as_str())
    }

    /// Account expiry in epoch seconds (`account.accountExpiry`)
    pub fn account_expiry(&self) -> Option<i64> {
        let value = self.blob.pointer("/account/accountExpiry")?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }

    /// Expiry rendered as a calendar date
    pub fn expiry_date(&self) -> Option<String> {
        let secs = self.account_expiry()?;
        chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.format("%Y-%m-%d").to_string())
    }

    /// Summary sent ahead of the credential file when pairing
    pub fn summary(&self, session_id: &str) -> String {
        format!(
            "🔐 *SESSION CREDENTIALS*\n\n\
             Session ID: {}\n\
             Phone: {}\n\
             Platform: {}\n\
             Expires: {}\n\n\
             _Keep these credentials secure!_",
            session_id,
            self.me_id().unwrap_or("N/A"),
            self.platform().unwrap_or("Web"),
            self.expiry_date().as_deref().unwrap_or("Unknown"),
        )
    }

    /// Notice the account sends to itself once connected
    pub fn self_notice(&self, session_id: &str, connected: bool) -> String {
        format!(
            "🤖 *BOT CREDENTIALS*\n\n\
             Session ID: {}\n\
             Connected: {}\n\
             Phone: {}\n\
             Platform: {}\n\n\
             Use !pair <number> to share credentials",
            session_id,
            connected,
            self.me_id().unwrap_or("N/A"),
            self.platform().unwrap_or("Web"),
        )
    }
}

/// File-based credential store
///
/// Layout: `<root>/<session_id>/creds.json`. Writes go through a temp file
/// and a rename so readers never observe a partial blob.
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    /// Create a store rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Sessions root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn creds_path(&self, session_id: &str) -> PathBuf {
        self.auth_dir(session_id).join(CREDS_FILE)
    }
}

impl CredentialStore for FileCredentialStore {
    fn auth_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn prepare(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        let dir = self.auth_dir(session_id);
        std::fs::create_dir_all(&dir).map_err(|e| {
            LinkError::Store(format!(
                "Failed to create session directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(dir)
    }

    fn save(&self, session_id: &str, blob: &serde_json::Value) -> Result<()> {
        let dir = self.prepare(session_id)?;
        let path = dir.join(CREDS_FILE);
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(blob)?;

        std::fs::write(&tmp_path, json).map_err(|e| {
            LinkError::Store(format!(
                "Failed to write credentials {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        std::fs::rename(&tmp_path, &path).map_err(|e| {
            LinkError::Store(format!(
                "Failed to rename credentials {} → {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;

        tracing::debug!(session = %session_id, path = %path.display(), "Credentials saved");
        Ok(())
    }

    fn load(&self, session_id: &str) -> Result<Option<CredentialSnapshot>> {
        validate_session_id(session_id)?;
        let path = self.creds_path(session_id);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(LinkError::Store(format!(
                    "Failed to read credentials {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        CredentialSnapshot::from_bytes(raw).map(Some)
    }
}

/// In-memory credential store for testing
#[derive(Default)]
pub struct MemoryCredentialStore {
    blobs: std::sync::RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCredentialStore {
    /// Store raw bytes verbatim, bypassing validation
    pub fn insert_raw(&self, session_id: &str, raw: impl Into<Vec<u8>>) -> Result<()> {
        let mut blobs = self
            .blobs
            .write()
            .map_err(|e| LinkError::Store(format!("Failed to acquire store lock: {}", e)))?;
        blobs.insert(session_id.to_string(), raw.into());
        Ok(())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn auth_dir(&self, session_id: &str) -> PathBuf {
        PathBuf::from(session_id)
    }

    fn prepare(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.auth_dir(session_id))
    }

    fn save(&self, session_id: &str, blob: &serde_json::Value) -> Result<()> {
        let raw = serde_json::to_vec(blob)?;
        self.insert_raw(session_id, raw)
    }

    fn load(&self, session_id: &str) -> Result<Option<CredentialSnapshot>> {
        let blobs = self
            .blobs
            .read()
            .map_err(|e| LinkError::Store(format!("Failed to acquire store lock: {}", e)))?;
        match blobs.get(session_id) {
            Some(raw) => CredentialSnapshot::from_bytes(raw.clone()).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blob() -> serde_json::Value {
        serde_json::json!({
            "me": {"id": "123@s"},
            "platform": "web",
            "account": {"accountExpiry": 1700000000}
        })
    }

    #[test]
    fn test_snapshot_summary_fields() {
        let raw = serde_json::to_vec(&sample_blob()).unwrap();
        let snapshot = CredentialSnapshot::from_bytes(raw).unwrap();

        assert_eq!(snapshot.me_id(), Some("123@s"));
        assert_eq!(snapshot.platform(), Some("web"));
        assert_eq!(snapshot.account_expiry(), Some(1700000000));

        let summary = snapshot.summary("a");
        assert!(summary.contains("Session ID: a"));
        assert!(summary.contains("123@s"));
        assert!(summary.contains("web"));
        assert!(summary.contains("2023-11-14"));
    }

    #[test]
    fn test_snapshot_summary_defaults() {
        let snapshot = CredentialSnapshot::from_bytes(b"{}".to_vec()).unwrap();
        let summary = snapshot.summary("x");
        assert!(summary.contains("Phone: N/A"));
        assert!(summary.contains("Platform: Web"));
        assert!(summary.contains("Expires: Unknown"));

        let notice = snapshot.self_notice("x", true);
        assert!(notice.contains("Connected: true"));
        assert!(notice.contains("!pair <number>"));
    }

    #[test]
    fn test_snapshot_rejects_partial_json() {
        let err = CredentialSnapshot::from_bytes(b"{\"me\":{\"id\"".to_vec()).unwrap_err();
        assert!(matches!(err, LinkError::Serialization(_)));
    }

    #[test]
    fn test_validate_session_id() {
        assert!(validate_session_id("default").is_ok());
        assert!(validate_session_id("15551234567").is_ok());
        assert!(validate_session_id("codewave-unit-force").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("..").is_err());
        assert!(validate_session_id("../etc").is_err());
        assert!(validate_session_id("a/b").is_err());
    }

    #[test]
    fn test_memory_store_save_load() {
        let store = MemoryCredentialStore::default();
        assert!(store.load("a").unwrap().is_none());

        store.save("a", &sample_blob()).unwrap();
        let snapshot = store.load("a").unwrap().unwrap();
        assert_eq!(snapshot.me_id(), Some("123@s"));
    }

    #[test]
    fn test_file_store_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());

        assert!(store.load("a").unwrap().is_none());

        store.save("a", &sample_blob()).unwrap();
        let path = dir.path().join("a").join(CREDS_FILE);
        assert!(path.exists());

        let snapshot = store.load("a").unwrap().unwrap();
        assert_eq!(snapshot.platform(), Some("web"));
        assert_eq!(snapshot.raw(), std::fs::read(&path).unwrap().as_slice());
    }

    #[test]
    fn test_file_store_atomic_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());

        store.save("a", &sample_blob()).unwrap();
        store.save("a", &serde_json::json!({"platform": "android"})).unwrap();

        let tmp_path = dir.path().join("a").join("creds.json.tmp");
        assert!(!tmp_path.exists());
        assert_eq!(store.load("a").unwrap().unwrap().platform(), Some("android"));
    }

    #[test]
    fn test_apply_update_keeps_unmentioned_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        store.save("a", &sample_blob()).unwrap();

        store
            .apply_update("a", &serde_json::json!({"signedPreKey": {"keyId": 7}}))
            .unwrap();

        let snapshot = store.load("a").unwrap().unwrap();
        assert_eq!(snapshot.me_id(), Some("123@s"));
        assert_eq!(snapshot.platform(), Some("web"));
        assert_eq!(snapshot.blob()["signedPreKey"]["keyId"], 7);
    }

    #[test]
    fn test_apply_update_without_existing_blob() {
        let store = MemoryCredentialStore::default();
        store
            .apply_update("a", &serde_json::json!({"platform": "android"}))
            .unwrap();
        assert_eq!(store.load("a").unwrap().unwrap().platform(), Some("android"));
    }

    #[test]
    fn test_apply_update_refuses_corrupt_blob() {
        let store = MemoryCredentialStore::default();
        store.insert_raw("a", b"{\"me\":".to_vec()).unwrap();

        let err = store
            .apply_update("a", &serde_json::json!({"platform": "android"}))
            .unwrap_err();
        assert!(matches!(err, LinkError::Serialization(_)));
        assert!(store.load("a").is_err());
    }

    #[test]
    fn test_merge_update_replaces_top_level_fields() {
        let mut blob = sample_blob();
        merge_update(&mut blob, &serde_json::json!({"me": {"id": "456@s", "name": "x"}}));
        assert_eq!(blob["me"], serde_json::json!({"id": "456@s", "name": "x"}));
        assert_eq!(blob["platform"], "web");

        let mut scalar = serde_json::json!("stale");
        merge_update(&mut scalar, &sample_blob());
        assert_eq!(scalar, sample_blob());
    }

    #[test]
    fn test_file_store_prepare_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested/sessions"));

        assert_eq!(store.root(), dir.path().join("nested/sessions").as_path());
        let auth_dir = store.prepare("s1").unwrap();
        assert!(auth_dir.is_dir());
        assert_eq!(auth_dir, store.auth_dir("s1"));
    }

    #[test]
    fn test_file_store_corrupt_blob_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        let auth_dir = store.prepare("a").unwrap();
        std::fs::write(auth_dir.join(CREDS_FILE), b"{not json").unwrap();

        assert!(matches!(store.load("a"), Err(LinkError::Serialization(_))));
    }
}
