//! Where the local database lives on disk.

use crate::error::{SyncError, SyncResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default logical database name.
pub const DEFAULT_DATABASE_NAME: &str = "main";

/// Suffixes of the files SQLite keeps next to a database.
const SIDECAR_SUFFIXES: [&str; 3] = ["-shm", "-wal", "-journal"];

/// Host platform, for picking the conventional database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Android: `/data/user/0/{bundle}/databases`.
    Android,
    /// iOS: `{home}/Library/LocalDatabase`.
    Ios,
    /// Everything else: `$XDG_DATA_HOME/{bundle}/databases`.
    Desktop,
}

impl Platform {
    /// Returns the platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "ios") {
            Platform::Ios
        } else {
            Platform::Desktop
        }
    }

    /// Resolves the database directory for `bundle_id`.
    ///
    /// `env` looks up environment variables, so resolution can be tested
    /// without touching the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if no home directory can be determined.
    pub fn database_dir(
        self,
        bundle_id: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> SyncResult<PathBuf> {
        let bundle = match bundle_id.trim() {
            "" | "unknown" => "unknown.bundle",
            other => other,
        };
        let non_empty = |key: &str| env(key).filter(|v| !v.is_empty());

        match self {
            Platform::Android => Ok(PathBuf::from("/data/user/0").join(bundle).join("databases")),
            Platform::Ios => {
                let home = non_empty("HOME").ok_or_else(no_home)?;
                Ok(PathBuf::from(home).join("Library").join("LocalDatabase"))
            }
            Platform::Desktop => {
                let data_home = match non_empty("XDG_DATA_HOME") {
                    Some(dir) => PathBuf::from(dir),
                    None => {
                        let home = non_empty("HOME")
                            .or_else(|| non_empty("USERPROFILE"))
                            .ok_or_else(no_home)?;
                        PathBuf::from(home).join(".local").join("share")
                    }
                };
                Ok(data_home.join(bundle).join("databases"))
            }
        }
    }
}

fn no_home() -> SyncError {
    SyncError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "cannot determine home directory",
    ))
}

/// Directory and logical name of the local database.
///
/// The database file is `{dir}/{name}.db`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseLocation {
    dir: PathBuf,
    name: String,
}

impl DatabaseLocation {
    /// Creates a location from an explicit directory.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    /// The conventional location for this platform.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if no home directory can be determined.
    pub fn platform_default(bundle_id: &str) -> SyncResult<Self> {
        let dir = Platform::current().database_dir(bundle_id, |key| std::env::var(key).ok())?;
        Ok(Self::new(dir, DEFAULT_DATABASE_NAME))
    }

    /// Database directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Logical database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the database file.
    pub fn db_path(&self) -> PathBuf {
        self.dir.join(format!("{}.db", self.name))
    }

    /// Path of a file inside the database directory.
    pub fn file(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// The database file followed by its `-shm`, `-wal` and `-journal`
    /// sidecars.
    pub fn database_files(&self) -> Vec<PathBuf> {
        let db = self.db_path();
        let mut files = vec![db.clone()];
        for suffix in SIDECAR_SUFFIXES {
            let mut name = db.clone().into_os_string();
            name.push(suffix);
            files.push(PathBuf::from(name));
        }
        files
    }

    /// Returns true if the database file exists.
    pub fn exists(&self) -> bool {
        self.db_path().is_file()
    }

    /// Deletes the database file and its sidecars. Failures are logged.
    pub fn delete_database_files_best_effort(&self) {
        for path in self.database_files() {
            remove_file_best_effort(&path);
        }
    }
}

/// Removes a file, logging anything other than "not found".
pub(crate) fn remove_file_best_effort(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn android_dir_uses_bundle() {
        let dir = Platform::Android.database_dir("com.amperflow.app", env(&[])).unwrap();
        assert_eq!(dir, PathBuf::from("/data/user/0/com.amperflow.app/databases"));
    }

    #[test]
    fn unknown_bundle_gets_placeholder() {
        let dir = Platform::Android.database_dir("unknown", env(&[])).unwrap();
        assert_eq!(dir, PathBuf::from("/data/user/0/unknown.bundle/databases"));
    }

    #[test]
    fn ios_dir_is_under_library() {
        let dir = Platform::Ios
            .database_dir("com.amperflow.app", env(&[("HOME", "/var/app")]))
            .unwrap();
        assert_eq!(dir, PathBuf::from("/var/app/Library/LocalDatabase"));
    }

    #[test]
    fn desktop_prefers_xdg_data_home() {
        let dir = Platform::Desktop
            .database_dir("app", env(&[("XDG_DATA_HOME", "/xdg"), ("HOME", "/home/u")]))
            .unwrap();
        assert_eq!(dir, PathBuf::from("/xdg/app/databases"));

        let dir = Platform::Desktop
            .database_dir("app", env(&[("HOME", "/home/u")]))
            .unwrap();
        assert_eq!(dir, PathBuf::from("/home/u/.local/share/app/databases"));
    }

    #[test]
    fn desktop_without_home_fails() {
        assert!(Platform::Desktop.database_dir("app", env(&[])).is_err());
    }

    #[test]
    fn database_files_include_sidecars() {
        let location = DatabaseLocation::new("/tmp/db", "main");
        let files: Vec<String> = location
            .database_files()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        assert_eq!(
            files,
            vec![
                "/tmp/db/main.db",
                "/tmp/db/main.db-shm",
                "/tmp/db/main.db-wal",
                "/tmp/db/main.db-journal",
            ]
        );
    }

    #[test]
    fn delete_removes_existing_and_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let location = DatabaseLocation::new(dir.path(), "main");
        std::fs::write(location.db_path(), b"db").unwrap();
        std::fs::write(dir.path().join("main.db-wal"), b"wal").unwrap();

        location.delete_database_files_best_effort();

        assert!(!location.exists());
        assert!(!dir.path().join("main.db-wal").exists());
    }
}
