//! HTTP transport implementation.
//!
//! Every endpoint lives under `{syncUrl}/app/ampli-sync/` and is
//! authenticated with the session's bearer token. Path segments taken from
//! the session or the database (login, device id, table) are
//! percent-encoded. The HTTP client is
//! abstracted via a trait so tests can run without a network; the default
//! implementation uses blocking `reqwest`.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::session::Session;
use crate::transport::SyncTransport;
use amplisync_protocol::{MigrationReport, OutgoingChangeSet, PendingMigration, SyncId};
use reqwest::Url;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Path prefix of the sync API.
pub const API_BASE_PATH: &str = "app/ampli-sync";

/// Bound on establishing a connection. Transfers themselves are unbounded
/// unless a request timeout is configured.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Status and body of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// Errors are network-level failures; any response the server sends,
/// whatever its status, is `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends a GET request. `None` leaves the transfer unbounded.
    fn get(&self, url: &str, bearer: &str, timeout: Option<Duration>)
        -> Result<HttpResponse, String>;

    /// Sends a POST request with a JSON body.
    fn post_json(
        &self,
        url: &str,
        bearer: &str,
        body: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, String>;

    /// Streams a GET response into `dest` and returns the status. Nothing
    /// is written unless the status is 200.
    fn download(&self, url: &str, bearer: &str, dest: &Path, timeout: Duration)
        -> Result<u16, String>;
}

/// [`HttpClient`] backed by a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    inner: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] if the TLS backend cannot be
    /// initialized.
    pub fn new() -> SyncResult<Self> {
        let inner = reqwest::blocking::Client::builder()
            .user_agent(concat!("ampli-sync/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()
            .map_err(|e| SyncError::network(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl HttpClient for ReqwestClient {
    fn get(
        &self,
        url: &str,
        bearer: &str,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, String> {
        let mut request = self.inner.get(url).bearer_auth(bearer);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(|e| e.to_string())?.to_vec();
        Ok(HttpResponse { status, body })
    }

    fn post_json(
        &self,
        url: &str,
        bearer: &str,
        body: Vec<u8>,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse, String> {
        let mut request = self
            .inner
            .post(url)
            .bearer_auth(bearer)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(|e| e.to_string())?.to_vec();
        Ok(HttpResponse { status, body })
    }

    fn download(
        &self,
        url: &str,
        bearer: &str,
        dest: &Path,
        timeout: Duration,
    ) -> Result<u16, String> {
        let mut response = self
            .inner
            .get(url)
            .bearer_auth(bearer)
            .timeout(timeout)
            .send()
            .map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        if status != 200 {
            return Ok(status);
        }
        let mut file = File::create(dest).map_err(|e| e.to_string())?;
        response.copy_to(&mut file).map_err(|e| e.to_string())?;
        Ok(status)
    }
}

/// HTTP-based sync transport.
pub struct HttpTransport<C: HttpClient> {
    session: Session,
    client: C,
    request_timeout: Option<Duration>,
    bootstrap_timeout: Duration,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport with default timeouts: ordinary requests are
    /// unbounded, the snapshot download is bounded at 15 minutes.
    pub fn new(session: Session, client: C) -> Self {
        Self {
            session,
            client,
            request_timeout: None,
            bootstrap_timeout: Duration::from_secs(15 * 60),
        }
    }

    /// Takes the timeouts from `config`.
    pub fn with_config(mut self, config: &SyncConfig) -> Self {
        self.request_timeout = config.request_timeout;
        self.bootstrap_timeout = config.bootstrap_timeout;
        self
    }

    /// Returns the session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Builds the URL of an endpoint from its path segments, each
    /// percent-encoded.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Session`] if the session URL is not an absolute
    /// URL that can carry a path.
    pub fn endpoint(&self, segments: &[&str]) -> SyncResult<String> {
        let sync_url = &self.session.sync_url;
        let mut url = Url::parse(sync_url)
            .map_err(|e| SyncError::Session(format!("invalid sync URL {sync_url}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| SyncError::Session(format!("sync URL cannot carry a path: {sync_url}")))?
            .pop_if_empty()
            .extend(API_BASE_PATH.split('/'))
            .extend(segments);
        Ok(url.to_string())
    }

    fn get(&self, label: &str, segments: &[&str]) -> SyncResult<Vec<u8>> {
        let url = self.endpoint(segments)?;
        debug!(url = %url, "GET");
        let response = self
            .client
            .get(&url, &self.session.access_token, self.request_timeout)
            .map_err(SyncError::network)?;
        check(label, response)
    }

    fn post<B: Serialize>(&self, label: &str, segments: &[&str], body: &B) -> SyncResult<Vec<u8>> {
        let url = self.endpoint(segments)?;
        let body = serde_json::to_vec(body).map_err(|e| SyncError::Protocol(e.to_string()))?;
        debug!(url = %url, bytes = body.len(), "POST");
        let response = self
            .client
            .post_json(&url, &self.session.access_token, body, self.request_timeout)
            .map_err(SyncError::network)?;
        check(label, response)
    }
}

fn check(label: &str, response: HttpResponse) -> SyncResult<Vec<u8>> {
    if response.is_success() {
        Ok(response.body)
    } else {
        Err(SyncError::status(label, response.status))
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn download_snapshot(&self, device_id: &str, dest: &Path) -> SyncResult<()> {
        let url = self.endpoint(&["prepopulate-db", device_id])?;
        debug!(url = %url, "downloading snapshot");
        let status = self
            .client
            .download(&url, &self.session.access_token, dest, self.bootstrap_timeout)
            .map_err(SyncError::network)?;
        if status != 200 {
            return Err(SyncError::status("Download database", status));
        }
        Ok(())
    }

    fn push_changes(&self, changes: &OutgoingChangeSet) -> SyncResult<()> {
        self.post("pushChanges", &["receive-changes"], changes)?;
        Ok(())
    }

    fn list_migrations(&self, device_id: &str) -> SyncResult<Vec<PendingMigration>> {
        let body = self.get("migrations", &["migrations", &self.session.login, device_id])?;
        serde_json::from_slice(&body)
            .map_err(|e| SyncError::Protocol(format!("invalid migrations response: {e}")))
    }

    fn report_migration(&self, report: &MigrationReport) -> SyncResult<()> {
        self.post("migrationResult", &["migrations-result"], report)?;
        Ok(())
    }

    fn fetch_batch(&self, table: &str, device_id: &str) -> SyncResult<Vec<u8>> {
        self.get("pullChangesForTable", &["sync-compressed", table, device_id])
    }

    fn commit_batch(&self, sync_id: &SyncId) -> SyncResult<()> {
        let sync_id = sync_id.to_string();
        self.get("commitSync", &["commit-sync", &sync_id])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amplisync_protocol::ServerId;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq)]
    struct Recorded {
        method: &'static str,
        url: String,
        bearer: String,
        body: Vec<u8>,
        timeout: Option<Duration>,
    }

    #[derive(Default)]
    struct TestClient {
        requests: Mutex<Vec<Recorded>>,
        responses: Mutex<VecDeque<HttpResponse>>,
    }

    impl TestClient {
        fn respond(&self, status: u16, body: &[u8]) {
            self.responses.lock().push_back(HttpResponse {
                status,
                body: body.to_vec(),
            });
        }

        fn next(&self) -> HttpResponse {
            self.responses.lock().pop_front().unwrap_or(HttpResponse {
                status: 200,
                body: Vec::new(),
            })
        }

        fn requests(&self) -> Vec<Recorded> {
            self.requests.lock().clone()
        }
    }

    impl HttpClient for TestClient {
        fn get(
            &self,
            url: &str,
            bearer: &str,
            timeout: Option<Duration>,
        ) -> Result<HttpResponse, String> {
            self.requests.lock().push(Recorded {
                method: "GET",
                url: url.into(),
                bearer: bearer.into(),
                body: Vec::new(),
                timeout,
            });
            Ok(self.next())
        }

        fn post_json(
            &self,
            url: &str,
            bearer: &str,
            body: Vec<u8>,
            timeout: Option<Duration>,
        ) -> Result<HttpResponse, String> {
            self.requests.lock().push(Recorded {
                method: "POST",
                url: url.into(),
                bearer: bearer.into(),
                body,
                timeout,
            });
            Ok(self.next())
        }

        fn download(
            &self,
            url: &str,
            bearer: &str,
            dest: &Path,
            timeout: Duration,
        ) -> Result<u16, String> {
            self.requests.lock().push(Recorded {
                method: "DOWNLOAD",
                url: url.into(),
                bearer: bearer.into(),
                body: Vec::new(),
                timeout: Some(timeout),
            });
            let response = self.next();
            if response.status == 200 {
                std::fs::write(dest, response.body).map_err(|e| e.to_string())?;
            }
            Ok(response.status)
        }
    }

    fn transport(sync_url: &str) -> HttpTransport<TestClient> {
        HttpTransport::new(Session::new("ana", "t0k", sync_url), TestClient::default())
    }

    #[test]
    fn endpoint_joins_with_single_slash() {
        assert_eq!(
            transport("https://sync.example.com")
                .endpoint(&["receive-changes"])
                .unwrap(),
            "https://sync.example.com/app/ampli-sync/receive-changes"
        );
        assert_eq!(
            transport("https://sync.example.com/")
                .endpoint(&["commit-sync", "1"])
                .unwrap(),
            "https://sync.example.com/app/ampli-sync/commit-sync/1"
        );
    }

    #[test]
    fn endpoint_encodes_segments() {
        let t = HttpTransport::new(
            Session::new("ana/b?c#d", "t0k", "https://s.example.com/base"),
            TestClient::default(),
        );
        t.client.respond(200, b"[]");
        t.list_migrations("dev 1").unwrap();

        let url = t.client.requests()[0].url.clone();
        assert_eq!(
            url,
            "https://s.example.com/base/app/ampli-sync/migrations/ana%2Fb%3Fc%23d/dev%201"
        );
    }

    #[test]
    fn invalid_sync_url_is_session_error() {
        let t = transport("not a url");
        assert!(matches!(
            t.fetch_batch("T", "dev"),
            Err(SyncError::Session(_))
        ));
        assert!(t.client.requests().is_empty());
    }

    #[test]
    fn requests_use_paths_and_bearer() {
        let t = transport("https://s.example.com/base/");
        t.client.respond(200, br#"[{"id": 1, "query": "SELECT 1"}]"#);

        let migrations = t.list_migrations("dev-1").unwrap();
        assert_eq!(migrations.len(), 1);
        t.fetch_batch("Widgets", "dev-1").unwrap();
        t.commit_batch(&ServerId::from(42)).unwrap();
        t.push_changes(&OutgoingChangeSet::new()).unwrap();
        t.report_migration(&MigrationReport::success(ServerId::from(1), 4))
            .unwrap();

        let requests = t.client.requests();
        let urls: Vec<(&str, &str)> = requests
            .iter()
            .map(|r| (r.method, r.url.as_str()))
            .collect();
        assert_eq!(
            urls,
            vec![
                ("GET", "https://s.example.com/base/app/ampli-sync/migrations/ana/dev-1"),
                ("GET", "https://s.example.com/base/app/ampli-sync/sync-compressed/Widgets/dev-1"),
                ("GET", "https://s.example.com/base/app/ampli-sync/commit-sync/42"),
                ("POST", "https://s.example.com/base/app/ampli-sync/receive-changes"),
                ("POST", "https://s.example.com/base/app/ampli-sync/migrations-result"),
            ]
        );
        assert!(requests.iter().all(|r| r.bearer == "t0k"));
        assert_eq!(requests[3].body, br#"{"changes":[],"deletes":[]}"#.to_vec());
        let report: serde_json::Value = serde_json::from_slice(&requests[4].body).unwrap();
        assert_eq!(report["execution_time"], 4);
    }

    #[test]
    fn non_success_status_is_transport_error() {
        let t = transport("https://s.example.com");
        t.client.respond(503, b"busy");
        let err = t.commit_batch(&ServerId::from(1)).unwrap_err();
        assert!(matches!(err, SyncError::Transport { status: Some(503), .. }));
    }

    #[test]
    fn malformed_migration_listing_is_protocol_error() {
        let t = transport("https://s.example.com");
        t.client.respond(200, b"{}");
        assert!(matches!(
            t.list_migrations("dev"),
            Err(SyncError::Protocol(_))
        ));
    }

    #[test]
    fn snapshot_uses_bootstrap_timeout_and_requires_200() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("database.zip");
        let config = SyncConfig::new("dev", crate::DatabaseLocation::new(dir.path(), "main"))
            .with_bootstrap_timeout(Duration::from_secs(900))
            .with_request_timeout(Duration::from_secs(10));
        let t = transport("https://s.example.com").with_config(&config);

        t.client.respond(204, b"");
        assert!(t.download_snapshot("dev", &dest).is_err());
        assert!(!dest.exists());

        t.client.respond(200, b"zip bytes");
        t.download_snapshot("dev", &dest).unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"zip bytes");

        let requests = t.client.requests();
        assert_eq!(requests[0].url, "https://s.example.com/app/ampli-sync/prepopulate-db/dev");
        assert!(requests
            .iter()
            .all(|r| r.timeout == Some(Duration::from_secs(900))));

        t.fetch_batch("T", "dev").unwrap();
        let last = t.client.requests().pop().unwrap();
        assert_eq!(last.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn ordinary_requests_are_unbounded_by_default() {
        let t = transport("https://s.example.com");
        t.fetch_batch("Widgets", "dev").unwrap();
        t.push_changes(&OutgoingChangeSet::new()).unwrap();
        assert!(t.client.requests().iter().all(|r| r.timeout.is_none()));
    }
}
