//! CLI command implementations.

pub mod inspect;
pub mod session;
pub mod sync;

use amplisync_engine::{
    DatabaseLocation, HttpTransport, ReqwestClient, Session, SessionStore, SyncConfig, SyncEngine,
};
use clap::ValueEnum;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Result type for commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Lock file serializing CLI invocations on one database directory.
pub const LOCK_FILE: &str = ".ampli-sync.lock";

/// File holding the generated device id.
pub const DEVICE_ID_FILE: &str = "device-id";

/// Default session file name.
pub const SESSION_FILE: &str = "session.json";

/// CLI-level failures.
#[derive(Debug, Error)]
pub enum CliError {
    /// Another invocation holds the directory lock.
    #[error("database directory is in use by another ampli-sync process: {0}")]
    Locked(PathBuf),

    /// No valid session is stored.
    #[error("no session stored at {0}; run `ampli-sync login` first")]
    NoSession(PathBuf),

    /// The stored device id is empty.
    #[error("device id file is empty: {0}")]
    EmptyDeviceId(PathBuf),
}

/// Output format for inspection commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// The engine type the CLI drives.
pub type CliEngine = SyncEngine<HttpTransport<ReqwestClient>>;

/// Resolved global options.
#[derive(Debug, Clone)]
pub struct Context {
    location: DatabaseLocation,
    session_path: PathBuf,
    device_id: Option<String>,
}

impl Context {
    /// Resolves global flags into a database location and session path.
    pub fn resolve(
        dir: Option<PathBuf>,
        name: &str,
        bundle: &str,
        device_id: Option<String>,
        session: Option<PathBuf>,
    ) -> CommandResult<Self> {
        let dir = match dir {
            Some(dir) => dir,
            None => DatabaseLocation::platform_default(bundle)?.dir().to_path_buf(),
        };
        let session_path = session.unwrap_or_else(|| dir.join(SESSION_FILE));
        Ok(Self {
            location: DatabaseLocation::new(dir, name),
            session_path,
            device_id,
        })
    }

    /// Returns the database location.
    pub fn location(&self) -> &DatabaseLocation {
        &self.location
    }

    /// Returns the session store.
    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(self.session_path.clone())
    }

    /// Loads the stored session.
    pub fn load_session(&self) -> CommandResult<Session> {
        self.session_store()
            .load(&self.location)?
            .ok_or_else(|| CliError::NoSession(self.session_path.clone()).into())
    }

    /// Returns the device id: the one given on the command line, else the one
    /// stored in the database directory, else a new one which is stored.
    pub fn device_id(&self) -> CommandResult<String> {
        if let Some(id) = &self.device_id {
            return Ok(id.clone());
        }
        load_or_create_device_id(self.location.dir())
    }

    /// Takes the directory lock, creating the directory if needed.
    pub fn lock(&self) -> CommandResult<DirLock> {
        let lock = DirLock::acquire(self.location.dir())?;
        debug!(path = %lock.path().display(), "acquired directory lock");
        Ok(lock)
    }

    /// Builds an engine for the stored session.
    pub fn engine(&self) -> CommandResult<CliEngine> {
        let session = self.load_session()?;
        let config = SyncConfig::new(self.device_id()?, self.location.clone());
        let transport = HttpTransport::new(session, ReqwestClient::new()?).with_config(&config);
        Ok(SyncEngine::new(config, transport))
    }
}

/// Reads the device id stored in `dir`, generating and storing one if absent.
pub fn load_or_create_device_id(dir: &Path) -> CommandResult<String> {
    let path = dir.join(DEVICE_ID_FILE);
    if path.is_file() {
        let id = fs::read_to_string(&path)?.trim().to_string();
        if id.is_empty() {
            return Err(CliError::EmptyDeviceId(path).into());
        }
        return Ok(id);
    }

    fs::create_dir_all(dir)?;
    let id = uuid::Uuid::new_v4().to_string();
    fs::write(&path, &id)?;
    debug!(device_id = %id, "generated device id");
    Ok(id)
}

/// Advisory lock on a database directory, held until dropped.
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,
    _lock_file: File,
}

impl DirLock {
    /// Acquires the lock without blocking.
    pub fn acquire(dir: &Path) -> CommandResult<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CliError::Locked(path).into());
        }

        Ok(Self {
            path,
            _lock_file: lock_file,
        })
    }

    /// Returns the lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn context(dir: &Path) -> Context {
        Context::resolve(Some(dir.to_path_buf()), "main", "unknown", None, None).unwrap()
    }

    #[test]
    fn test_resolve_defaults_session_into_dir() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        assert_eq!(ctx.location().db_path(), dir.path().join("main.db"));
        assert_eq!(ctx.session_store().path(), dir.path().join(SESSION_FILE));
    }

    #[test]
    fn test_device_id_is_generated_once() {
        let dir = tempdir().unwrap();
        let first = load_or_create_device_id(dir.path()).unwrap();
        let second = load_or_create_device_id(dir.path()).unwrap();
        assert_eq!(first, second);
        assert!(uuid::Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_device_id_flag_wins() {
        let dir = tempdir().unwrap();
        let ctx = Context::resolve(
            Some(dir.path().to_path_buf()),
            "main",
            "unknown",
            Some("tablet-7".to_string()),
            None,
        )
        .unwrap();
        assert_eq!(ctx.device_id().unwrap(), "tablet-7");
        assert!(!dir.path().join(DEVICE_ID_FILE).exists());
    }

    #[test]
    fn test_empty_device_id_file_is_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(DEVICE_ID_FILE), "  \n").unwrap();
        assert!(load_or_create_device_id(dir.path()).is_err());
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let lock = DirLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
        assert!(DirLock::acquire(dir.path()).is_err());

        drop(lock);
        assert!(DirLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn test_engine_requires_session() {
        let dir = tempdir().unwrap();
        let err = context(dir.path()).engine().unwrap_err();
        assert!(err.to_string().contains("login"));
    }
}
