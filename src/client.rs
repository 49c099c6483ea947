//! Client port - the caller's side of the bridge.
//!
//! Every operation is one logical exchange:
//! 1. Open a connection through the [`Connector`]
//! 2. Send exactly one request frame
//! 3. Wait for exactly one response, or the timeout
//! 4. Drop the connection (a spawned host process is killed)
//!
//! The response and an early disconnect race to settle the exchange through
//! the [`PendingRegistry`]; whichever comes first wins and the other is
//! ignored.
//!
//! # Example
//!
//! ```ignore
//! use native_bridge::client::{ClientPort, CompanionStatus};
//! use native_bridge::transport::ProcessConnector;
//!
//! let port = ClientPort::new(ProcessConnector::new("native-bridge-host"));
//! match port.check_companion_app().await {
//!     CompanionStatus::Available { version, .. } => println!("host {}", version),
//!     CompanionStatus::Unavailable { reason } => eprintln!("no host: {}", reason),
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

use crate::codec::JsonCodec;
use crate::error::BridgeError;
use crate::message::{ErrorCode, FolderEntry, Request, Response};
use crate::protocol::{FrameBuffer, MAX_FRAME_SIZE};
use crate::transport::{BoxReader, Connector};

/// Timeout for ordinary requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for cheap requests (`getVersion`, `verifyFolder`).
pub const LIGHT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for requests that wait on the user.
pub const DIALOG_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors seen by callers of the client port.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No response within the deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The connection ended before a response arrived.
    #[error("host disconnected: {0}")]
    Disconnected(String),

    /// The host answered with `success: false`.
    #[error("{message}")]
    Remote {
        code: Option<ErrorCode>,
        message: String,
    },

    /// The host answered, but not with what the operation needs.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// I/O error on the connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Response was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The host could not be reached.
    #[error("cannot connect to host: {0}")]
    Connect(String),

    /// Request could not be framed.
    #[error(transparent)]
    Protocol(#[from] BridgeError),
}

impl ClientError {
    /// The remote error code, if the host reported one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            ClientError::Remote { code, .. } => *code,
            _ => None,
        }
    }
}

/// Result alias for client operations.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Result of checking for the companion host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanionStatus {
    Available { version: String, platform: String },
    Unavailable { reason: String },
}

impl CompanionStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, CompanionStatus::Available { .. })
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub default_timeout: Duration,
    pub light_timeout: Duration,
    pub dialog_timeout: Duration,
    pub max_frame: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            light_timeout: LIGHT_TIMEOUT,
            dialog_timeout: DIALOG_TIMEOUT,
            max_frame: MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_light_timeout(mut self, timeout: Duration) -> Self {
        self.light_timeout = timeout;
        self
    }

    pub fn with_dialog_timeout(mut self, timeout: Duration) -> Self {
        self.dialog_timeout = timeout;
        self
    }

    pub fn with_max_frame(mut self, max_frame: u32) -> Self {
        self.max_frame = max_frame.clamp(1, MAX_FRAME_SIZE);
        self
    }

    /// Deadline for a request. Dialogs never get less than the default.
    pub fn timeout_for(&self, request: &Request) -> Duration {
        match request {
            Request::GetVersion | Request::VerifyFolder { .. } => self.light_timeout,
            Request::PickFolder { .. } | Request::ShowSaveAsDialog { .. } => {
                self.dialog_timeout.max(self.default_timeout)
            }
            _ => self.default_timeout,
        }
    }
}

/// How an exchange ended before the caller interprets it.
type Outcome = ClientResult<Response>;

/// In-flight exchanges, keyed by a locally generated id.
///
/// `settle` removes the entry, so only the first outcome for an id is
/// delivered.
#[derive(Clone, Default)]
pub struct PendingRegistry {
    entries: Arc<Mutex<HashMap<u64, oneshot::Sender<Outcome>>>>,
    next_id: Arc<AtomicU64>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Outcome>>> {
        // A panic while holding the lock cannot leave the map inconsistent.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a pending entry and return its id and outcome slot.
    pub fn register(&self) -> (u64, oneshot::Receiver<Outcome>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        (id, rx)
    }

    /// Deliver `outcome` for `id`. Returns `false` if the exchange was
    /// already settled or abandoned.
    pub fn settle(&self, id: u64, outcome: Outcome) -> bool {
        let Some(tx) = self.lock().remove(&id) else {
            tracing::debug!(id, "exchange already settled, ignoring outcome");
            return false;
        };
        if tx.send(outcome).is_err() {
            tracing::debug!(id, "caller stopped waiting");
        }
        true
    }

    /// Drop the entry for `id` without delivering anything.
    pub fn abandon(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Number of unsettled exchanges.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lifecycle of one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Connected,
    Responded,
    TimedOut,
    Disconnected,
    Closed,
}

impl ExchangeState {
    /// Whether the exchange has an outcome.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            ExchangeState::Responded | ExchangeState::TimedOut | ExchangeState::Disconnected
        )
    }

    /// Move to `next` if the transition is allowed.
    ///
    /// Once one outcome is reached the others are unreachable; only
    /// `Closed` may follow.
    pub fn advance(&mut self, next: ExchangeState) -> bool {
        use ExchangeState::*;
        let allowed = match (*self, next) {
            (Idle, Connected) => true,
            (Connected, Responded | TimedOut | Disconnected) => true,
            (Responded | TimedOut | Disconnected, Closed) => true,
            (Idle | Connected, Closed) => true,
            _ => false,
        };
        if allowed {
            *self = next;
        }
        allowed
    }
}

/// Peer-side port to the native host.
pub struct ClientPort<C: Connector> {
    connector: C,
    config: ClientConfig,
    pending: PendingRegistry,
}

impl<C: Connector> ClientPort<C> {
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, ClientConfig::default())
    }

    pub fn with_config(connector: C, config: ClientConfig) -> Self {
        Self {
            connector,
            config,
            pending: PendingRegistry::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Exchanges currently awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run one exchange with the configured deadline for `request`.
    pub async fn request(&self, request: Request) -> ClientResult<Response> {
        let timeout = self.config.timeout_for(&request);
        self.request_with_timeout(request, timeout).await
    }

    /// Run one exchange: connect, send, await one response or `timeout`.
    pub async fn request_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> ClientResult<Response> {
        let kind = request.kind();
        let mut state = ExchangeState::Idle;

        // One deadline covers connect, send and the wait for the response.
        let deadline = tokio::time::Instant::now() + timeout;

        let connection = match tokio::time::timeout_at(deadline, self.connector.connect()).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(ClientError::Connect(e.to_string())),
            Err(_) => return Err(ClientError::Timeout(timeout)),
        };
        let (reader, mut writer, guard) = connection.into_parts();
        state.advance(ExchangeState::Connected);

        let (id, outcome_rx) = self.pending.register();
        let reader_task = tokio::spawn(read_response(
            reader,
            self.pending.clone(),
            id,
            self.config.max_frame,
        ));

        let frame = match JsonCodec::encode_frame(&request, self.config.max_frame) {
            Ok(frame) => frame,
            Err(e) => {
                self.pending.abandon(id);
                reader_task.abort();
                return Err(e.into());
            }
        };

        let exchange = async {
            let sent = async {
                writer.write_all(&frame).await?;
                writer.flush().await
            }
            .await;
            if let Err(e) = sent {
                self.pending
                    .settle(id, Err(ClientError::Disconnected(format!("write failed: {}", e))));
            }
            outcome_rx.await
        };

        let outcome = match tokio::time::timeout_at(deadline, exchange).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ClientError::Disconnected("exchange abandoned".to_string())),
            Err(_) => {
                self.pending.abandon(id);
                Err(ClientError::Timeout(timeout))
            }
        };

        state.advance(match &outcome {
            Ok(_) => ExchangeState::Responded,
            Err(ClientError::Timeout(_)) => ExchangeState::TimedOut,
            Err(_) => ExchangeState::Disconnected,
        });
        tracing::debug!(id, %kind, state = ?state, "exchange settled");

        reader_task.abort();
        drop(writer);
        drop(guard);
        state.advance(ExchangeState::Closed);

        outcome
    }

    /// Send `request` and turn `success: false` into [`ClientError::Remote`].
    async fn call(&self, request: Request) -> ClientResult<Response> {
        let response = self.request(request).await?;
        if response.success {
            Ok(response)
        } else {
            Err(remote_error(response))
        }
    }

    /// Check whether the host is installed and answering.
    pub async fn check_companion_app(&self) -> CompanionStatus {
        let response = match self.call(Request::GetVersion).await {
            Ok(response) => response,
            Err(e) => {
                return CompanionStatus::Unavailable {
                    reason: e.to_string(),
                }
            }
        };

        match response.str_field("version") {
            Some(version) => CompanionStatus::Available {
                version: version.to_string(),
                platform: response.str_field("platform").unwrap_or("unknown").to_string(),
            },
            None => CompanionStatus::Unavailable {
                reason: "host did not report a version".to_string(),
            },
        }
    }

    /// Ask the user for a folder. `None` if they cancelled.
    pub async fn pick_folder(&self, start: Option<&Path>) -> ClientResult<Option<PathBuf>> {
        let request = Request::PickFolder {
            start_path: start.map(path_string),
        };
        dialog_path(self.request(request).await?)
    }

    /// Ask the user where to save `filename`. `None` if they cancelled.
    pub async fn show_save_as_dialog(
        &self,
        filename: &str,
        directory: Option<&Path>,
    ) -> ClientResult<Option<PathBuf>> {
        let request = Request::ShowSaveAsDialog {
            filename: filename.to_string(),
            default_directory: directory.map(path_string),
        };
        dialog_path(self.request(request).await?)
    }

    /// Whether `path` is an existing folder.
    pub async fn verify_folder(&self, path: &Path) -> ClientResult<bool> {
        let response = self
            .call(Request::VerifyFolder {
                path: path_string(path),
            })
            .await?;
        required_bool(&response, "exists")
    }

    /// Create `path` with its parents. Returns whether anything was created.
    pub async fn create_folder(&self, path: &Path) -> ClientResult<bool> {
        let response = self
            .call(Request::CreateFolder {
                path: path_string(path),
            })
            .await?;
        required_bool(&response, "created")
    }

    /// Visible subfolders of `path`, sorted by name.
    pub async fn list_folders(&self, path: &Path) -> ClientResult<Vec<FolderEntry>> {
        let response = self
            .call(Request::ListFolders {
                path: path_string(path),
            })
            .await?;
        let items = response
            .field("items")
            .cloned()
            .ok_or_else(|| ClientError::UnexpectedResponse("missing items".to_string()))?;
        Ok(serde_json::from_value(items)?)
    }

    /// Move a file. Returns where it ended up, which differs from
    /// `destination` when that name was taken.
    pub async fn move_file(&self, source: &Path, destination: &Path) -> ClientResult<PathBuf> {
        let response = self
            .call(Request::MoveFile {
                source: path_string(source),
                destination: path_string(destination),
            })
            .await?;
        required_path(&response)
    }
}

/// Read frames until the first response settles the exchange, then keep
/// draining so a later disconnect is observed (and ignored).
async fn read_response(mut reader: BoxReader, pending: PendingRegistry, id: u64, max_frame: u32) {
    let mut frames = FrameBuffer::with_max_frame(max_frame);
    let mut buf = vec![0u8; 64 * 1024];
    let mut settled = false;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                pending.settle(
                    id,
                    Err(ClientError::Disconnected("host closed the connection".to_string())),
                );
                return;
            }
            Ok(n) => n,
            Err(e) => {
                pending.settle(id, Err(ClientError::Disconnected(e.to_string())));
                return;
            }
        };

        for frame in frames.push(&buf[..n]) {
            if settled {
                tracing::debug!(id, bytes = frame.len(), "ignoring extra frame");
                continue;
            }
            let outcome = JsonCodec::decode::<Response>(frame.payload()).map_err(|e| match e {
                BridgeError::Json(e) => ClientError::Json(e),
                other => ClientError::Protocol(other),
            });
            pending.settle(id, outcome);
            settled = true;
        }
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn remote_error(response: Response) -> ClientError {
    ClientError::Remote {
        code: response.code,
        message: response
            .error
            .unwrap_or_else(|| "host reported a failure".to_string()),
    }
}

fn dialog_path(response: Response) -> ClientResult<Option<PathBuf>> {
    if response.is_cancelled() {
        return Ok(None);
    }
    if !response.success {
        return Err(remote_error(response));
    }
    required_path(&response).map(Some)
}

fn required_path(response: &Response) -> ClientResult<PathBuf> {
    response
        .str_field("path")
        .map(PathBuf::from)
        .ok_or_else(|| ClientError::UnexpectedResponse("missing path".to_string()))
}

fn required_bool(response: &Response, key: &str) -> ClientResult<bool> {
    response
        .bool_field(key)
        .ok_or_else(|| ClientError::UnexpectedResponse(format!("missing {}", key)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{default_registry, BoxFuture, DialogOutcome, NativeDialog};
    use crate::host::{HostConfig, LoopbackConnector};
    use crate::transport::Connection;
    use tempfile::TempDir;
    use tokio::io::DuplexStream;

    struct ScriptedDialog(DialogOutcome);

    impl NativeDialog for ScriptedDialog {
        fn pick_folder(&self, _start: Option<PathBuf>) -> BoxFuture<'static, DialogOutcome> {
            let outcome = self.0.clone();
            Box::pin(async move { outcome })
        }

        fn save_file(
            &self,
            _filename: String,
            _directory: Option<PathBuf>,
        ) -> BoxFuture<'static, DialogOutcome> {
            let outcome = self.0.clone();
            Box::pin(async move { outcome })
        }
    }

    fn loopback(outcome: DialogOutcome) -> ClientPort<LoopbackConnector> {
        let registry = default_registry(Arc::new(ScriptedDialog(outcome)));
        ClientPort::new(LoopbackConnector::new(registry, HostConfig::default()))
    }

    /// Accepts requests and never answers.
    #[derive(Default)]
    struct SilentConnector {
        held: Arc<Mutex<Vec<DuplexStream>>>,
    }

    impl Connector for SilentConnector {
        fn connect(&self) -> BoxFuture<'static, crate::error::Result<Connection>> {
            let held = Arc::clone(&self.held);
            Box::pin(async move {
                let (near, far) = tokio::io::duplex(1024);
                held.lock().unwrap().push(far);
                Ok(Connection::duplex(near))
            })
        }
    }

    /// Reads the request, then hangs up without answering.
    struct HangUpConnector;

    impl Connector for HangUpConnector {
        fn connect(&self) -> BoxFuture<'static, crate::error::Result<Connection>> {
            Box::pin(async move {
                let (near, mut far) = tokio::io::duplex(1024);
                tokio::spawn(async move {
                    let mut prefix = [0u8; 4];
                    let _ = far.read_exact(&mut prefix).await;
                });
                Ok(Connection::duplex(near))
            })
        }
    }

    struct FailingConnector;

    impl Connector for FailingConnector {
        fn connect(&self) -> BoxFuture<'static, crate::error::Result<Connection>> {
            Box::pin(async { Err(BridgeError::Io(std::io::ErrorKind::NotFound.into())) })
        }
    }

    #[tokio::test]
    async fn test_check_companion_app() {
        let port = loopback(DialogOutcome::Cancelled);

        let status = port.check_companion_app().await;

        match status {
            CompanionStatus::Available { version, platform } => {
                assert_eq!(version, env!("CARGO_PKG_VERSION"));
                assert!(!platform.is_empty());
            }
            other => panic!("expected available, got {:?}", other),
        }
        assert_eq!(port.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let port = ClientPort::new(FailingConnector);

        let status = port.check_companion_app().await;

        assert!(!status.is_available());
    }

    #[tokio::test]
    async fn test_timeout_releases_exchange() {
        let config = ClientConfig::new().with_light_timeout(Duration::from_millis(50));
        let port = ClientPort::with_config(SilentConnector::default(), config);

        let err = port.request(Request::GetVersion).await.unwrap_err();

        assert!(matches!(err, ClientError::Timeout(_)));
        assert_eq!(port.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_covers_blocked_write() {
        let config = ClientConfig::new().with_default_timeout(Duration::from_millis(100));
        let port = ClientPort::with_config(SilentConnector::default(), config);
        let long = "x".repeat(4096);

        // Larger than the 1 KiB pipe, which nobody drains.
        let request = Request::MoveFile {
            source: format!("/{}", long),
            destination: format!("/tmp/{}", long),
        };
        let result = tokio::time::timeout(Duration::from_secs(3), port.request(request)).await;

        let err = result.expect("request outlived its deadline").unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)), "{:?}", err);
        assert_eq!(port.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_before_response() {
        let port = ClientPort::new(HangUpConnector);

        let err = port.request(Request::GetVersion).await.unwrap_err();

        assert!(matches!(err, ClientError::Disconnected(_)), "{:?}", err);
        assert_eq!(port.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_folder_operations() {
        let dir = TempDir::new().unwrap();
        let port = loopback(DialogOutcome::Cancelled);
        let target = dir.path().join("inbox");

        assert!(!port.verify_folder(&target).await.unwrap());
        assert!(port.create_folder(&target).await.unwrap());
        assert!(!port.create_folder(&target).await.unwrap());
        assert!(port.verify_folder(&target).await.unwrap());

        let entries = port.list_folders(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "inbox");
    }

    #[tokio::test]
    async fn test_move_file_reports_final_path() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.txt");
        let destination = dir.path().join("b.txt");
        std::fs::write(&source, b"a").unwrap();
        std::fs::write(&destination, b"b").unwrap();
        let port = loopback(DialogOutcome::Cancelled);

        let moved = port.move_file(&source, &destination).await.unwrap();

        assert_eq!(moved, dir.path().join("b (1).txt"));
    }

    #[tokio::test]
    async fn test_remote_error_code() {
        let port = loopback(DialogOutcome::Cancelled);

        let err = port
            .list_folders(Path::new("/nonexistent/xyz"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn test_dialog_outcomes() {
        let cancelled = loopback(DialogOutcome::Cancelled);
        assert_eq!(cancelled.pick_folder(None).await.unwrap(), None);

        let selected = loopback(DialogOutcome::Selected("/home/me/Saved/x.pdf".into()));
        assert_eq!(
            selected
                .show_save_as_dialog("x.pdf", Some(Path::new("/home/me")))
                .await
                .unwrap(),
            Some(PathBuf::from("/home/me/Saved/x.pdf"))
        );

        let failed = loopback(DialogOutcome::Failed("no display".into()));
        let err = failed.pick_folder(None).await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::DialogError));
    }

    #[tokio::test]
    async fn test_settle_is_first_writer_wins() {
        let pending = PendingRegistry::new();
        let (id, rx) = pending.register();

        assert!(pending.settle(id, Ok(Response::ok())));
        assert!(!pending.settle(id, Err(ClientError::Disconnected("late".into()))));

        assert!(rx.await.unwrap().unwrap().success);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_abandon_removes_entry() {
        let pending = PendingRegistry::new();
        let (first, _rx1) = pending.register();
        let (second, _rx2) = pending.register();

        assert_ne!(first, second);
        assert!(pending.abandon(first));
        assert!(!pending.abandon(first));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_exchange_terminal_states_are_exclusive() {
        let mut state = ExchangeState::Idle;
        assert!(state.advance(ExchangeState::Connected));
        assert!(state.advance(ExchangeState::Responded));
        assert!(state.is_settled());
        assert!(!state.advance(ExchangeState::Disconnected));
        assert!(!state.advance(ExchangeState::TimedOut));
        assert!(state.advance(ExchangeState::Closed));
        assert_eq!(state, ExchangeState::Closed);
    }

    #[test]
    fn test_timeouts_by_request() {
        let config = ClientConfig::new().with_dialog_timeout(Duration::from_secs(1));

        assert_eq!(config.timeout_for(&Request::GetVersion), LIGHT_TIMEOUT);
        assert_eq!(
            config.timeout_for(&Request::MoveFile {
                source: "a".into(),
                destination: "b".into()
            }),
            DEFAULT_TIMEOUT
        );
        assert_eq!(
            config.timeout_for(&Request::PickFolder { start_path: None }),
            DEFAULT_TIMEOUT
        );
    }
}
