//! The authenticated session and its on-disk persistence.

use crate::error::{SyncError, SyncResult};
use crate::location::DatabaseLocation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Credentials for one sync run: who, with what token, against which
/// server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Login id, sent in the migrations path.
    pub login: String,
    /// Bearer token.
    pub access_token: String,
    /// Server base URL.
    pub sync_url: String,
}

impl Session {
    /// Creates a session.
    pub fn new(
        login: impl Into<String>,
        access_token: impl Into<String>,
        sync_url: impl Into<String>,
    ) -> Self {
        Self {
            login: login.into(),
            access_token: access_token.into(),
            sync_url: sync_url.into(),
        }
    }

    /// Returns true if every field is non-empty.
    pub fn is_complete(&self) -> bool {
        !self.login.is_empty() && !self.access_token.is_empty() && !self.sync_url.is_empty()
    }

    /// Parses a persisted session.
    ///
    /// Returns `None` unless the text is a JSON object whose `login`,
    /// `accessToken` and `syncUrl` are all non-empty strings.
    pub fn from_json(text: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(text).ok()?;
        let field = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some(Self {
            login: field("login")?,
            access_token: field("accessToken")?,
            sync_url: field("syncUrl")?,
        })
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("login", &self.login)
            .field("access_token", &"<redacted>")
            .field("sync_url", &self.sync_url)
            .finish()
    }
}

/// A session persisted as a JSON file.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    /// Creates a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the session file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted session.
    ///
    /// A missing file means no session. A file that does not hold a
    /// complete session is treated as a logout: the local database files at
    /// `location` are deleted, the file is cleared and `None` is returned.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be read or
    /// cleared.
    pub fn load(&self, location: &DatabaseLocation) -> SyncResult<Option<Session>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match Session::from_json(&text) {
            Some(session) => {
                debug!(login = %session.login, "loaded session");
                Ok(Some(session))
            }
            None => {
                warn!(path = %self.path.display(), "stored session is invalid, logging out");
                location.delete_database_files_best_effort();
                self.clear()?;
                Ok(None)
            }
        }
    }

    /// Persists a session.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Session`] for an incomplete session, or an I/O
    /// error if the file cannot be written.
    pub fn save(&self, session: &Session) -> SyncResult<()> {
        if !session.is_complete() {
            return Err(SyncError::Session(
                "login, access token and sync URL are required".into(),
            ));
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(session)
            .map_err(|e| SyncError::Session(e.to_string()))?;
        std::fs::write(&self.path, text)?;
        info!(login = %session.login, "saved session");
        Ok(())
    }

    /// Removes the persisted session. Clearing a missing file succeeds.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be removed.
    pub fn clear(&self) -> SyncResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_complete_session() {
        let session = Session::from_json(
            r#"{"login": "ana", "accessToken": "t0k", "syncUrl": "https://sync.example.com"}"#,
        )
        .unwrap();
        assert_eq!(session, Session::new("ana", "t0k", "https://sync.example.com"));
    }

    #[test]
    fn rejects_missing_empty_or_mistyped_fields() {
        assert!(Session::from_json(r#"{"login": "ana", "accessToken": "t"}"#).is_none());
        assert!(Session::from_json(r#"{"login": "", "accessToken": "t", "syncUrl": "u"}"#).is_none());
        assert!(Session::from_json(r#"{"login": 5, "accessToken": "t", "syncUrl": "u"}"#).is_none());
        assert!(Session::from_json("not json").is_none());
        assert!(Session::from_json("[]").is_none());
    }

    #[test]
    fn debug_hides_token() {
        let shown = format!("{:?}", Session::new("ana", "secret", "u"));
        assert!(!shown.contains("secret"));
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        let location = DatabaseLocation::new(dir.path(), "main");
        let session = Session::new("ana", "t0k", "https://sync.example.com");

        store.save(&session).unwrap();
        let text = std::fs::read_to_string(store.path()).unwrap();
        assert!(text.contains("accessToken"));
        assert_eq!(store.load(&location).unwrap(), Some(session));
    }

    #[test]
    fn missing_file_is_no_session() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        let location = DatabaseLocation::new(dir.path(), "main");
        assert_eq!(store.load(&location).unwrap(), None);
    }

    #[test]
    fn invalid_session_cleans_up_database() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        let location = DatabaseLocation::new(dir.path(), "main");
        std::fs::write(location.db_path(), b"db").unwrap();
        std::fs::write(store.path(), r#"{"login": "ana"}"#).unwrap();

        assert_eq!(store.load(&location).unwrap(), None);
        assert!(!location.exists());
        assert!(!store.path().exists());
    }

    #[test]
    fn incomplete_session_is_not_saved() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        let result = store.save(&Session::new("ana", "", "u"));
        assert!(matches!(result, Err(SyncError::Session(_))));
        assert!(!store.path().exists());
    }
}
