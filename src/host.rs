//! Connection lifecycle for the native messaging host.
//!
//! A [`Host`] owns the decoder state for the whole process run. Each
//! connection gets its own writer task and dispatch task, spawned before the
//! first byte is read, so nothing that arrives early can be missed.
//!
//! ```text
//! reader ─► FrameBuffer ─► mpsc<Inbound> ─► dispatch task ─► WriterHandle ─► writer task ─► output
//! ```
//!
//! The read loop never waits on a handler: it keeps decoding while the
//! dispatch task works through the queue one message at a time. Responses
//! therefore leave in arrival order, one per message.
//!
//! After end-of-input the host drains for a grace period. A new connection
//! arriving in that window is served with a clean buffer; otherwise the host
//! closes.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};

use crate::codec::JsonCodec;
use crate::error::{BridgeError, Result};
use crate::handler::{BoxFuture, HandlerRegistry};
use crate::message::{decode_inbound, ErrorCode, Inbound, Response};
use crate::protocol::{FrameBuffer, MAX_FRAME_SIZE};
use crate::transport::{Connection, Connector};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle, DEFAULT_CHANNEL_CAPACITY};

/// Grace period after end-of-input before the host closes.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Size of a single read from the input stream.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// In-memory pipe capacity for [`LoopbackConnector`].
const LOOPBACK_PIPE_SIZE: usize = 256 * 1024;

/// Fallback payload when even an error response cannot be encoded.
const LAST_RESORT_RESPONSE: &[u8] = br#"{"success":false,"code":"HANDLER_ERROR"}"#;

/// Host configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Largest frame accepted or produced.
    pub max_frame: u32,
    /// How long to wait for a new connection after end-of-input.
    pub grace_period: Duration,
    /// Capacity of the inbound and outbound queues.
    pub channel_capacity: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_frame: MAX_FRAME_SIZE,
            grace_period: DEFAULT_GRACE_PERIOD,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl HostConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frame limit, clamped to `1..=MAX_FRAME_SIZE`.
    pub fn with_max_frame(mut self, max_frame: u32) -> Self {
        self.max_frame = max_frame.clamp(1, MAX_FRAME_SIZE);
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// Lifecycle state of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    /// No connection served yet, or reset between connections.
    Uninitialized,
    /// Serving a connection.
    Ready,
    /// Input ended; waiting out the grace period.
    Draining,
    /// Done; the process should exit.
    Closed,
}

/// What happened on one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Messages decoded from the input.
    pub received: usize,
    /// Responses handed to the writer.
    pub answered: usize,
    /// Responses written out.
    pub written: usize,
    /// Responses lost because the peer closed its end.
    pub lost: usize,
    /// Undecoded bytes left when the input ended.
    pub leftover_bytes: usize,
}

/// The native messaging host.
pub struct Host {
    buffer: FrameBuffer,
    initialized: bool,
    registry: Arc<HandlerRegistry>,
    config: HostConfig,
    state: watch::Sender<HostState>,
}

impl Host {
    /// Create a host around a handler registry.
    pub fn new(registry: HandlerRegistry, config: HostConfig) -> Self {
        Self::with_shared_registry(Arc::new(registry), config)
    }

    /// Create a host around an already shared registry.
    pub fn with_shared_registry(registry: Arc<HandlerRegistry>, config: HostConfig) -> Self {
        let (state, _) = watch::channel(HostState::Uninitialized);
        Self {
            buffer: FrameBuffer::with_max_frame(config.max_frame),
            initialized: false,
            registry,
            config,
            state,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HostState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<HostState> {
        self.state.subscribe()
    }

    /// Whether a connection has been set up since the last cleanup.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Bytes sitting in the accumulation buffer.
    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn set_state(&self, state: HostState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "host state changed");
        }
    }

    /// Forget everything about the previous connection.
    pub fn cleanup(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(bytes = self.buffer.len(), "discarding buffered input");
        }
        self.buffer.clear();
        self.initialized = false;
        self.set_state(HostState::Uninitialized);
    }

    /// Serve connections until input ends and no new connection arrives
    /// within the grace period.
    ///
    /// Waits indefinitely for the first connection. Returns once the host is
    /// [`HostState::Closed`].
    pub async fn run(&mut self, mut connections: mpsc::Receiver<Connection>) {
        let mut next = connections.recv().await;

        while let Some(connection) = next.take() {
            self.cleanup();
            let summary = self.serve_connection(connection).await;
            tracing::info!(
                received = summary.received,
                answered = summary.answered,
                lost = summary.lost,
                "input closed"
            );

            self.set_state(HostState::Draining);
            let grace = self.config.grace_period;
            next = match tokio::time::timeout(grace, connections.recv()).await {
                Ok(Some(connection)) => {
                    tracing::info!("new connection during grace period, resuming");
                    Some(connection)
                }
                Ok(None) => {
                    tracing::debug!("no further connections possible");
                    None
                }
                Err(_) => {
                    tracing::info!(grace_ms = grace.as_millis() as u64, "grace period elapsed");
                    None
                }
            };
        }

        self.set_state(HostState::Closed);
    }

    /// Serve one connection until its input ends and every response is out.
    pub async fn serve_connection(&mut self, connection: Connection) -> ConnectionSummary {
        let label = connection.label().to_string();
        let (mut reader, writer, _guard) = connection.into_parts();

        // Writer and dispatcher exist before the first read.
        let (writer_handle, writer_task) = spawn_writer_task(
            writer,
            WriterConfig {
                channel_capacity: self.config.channel_capacity,
            },
        );
        let monitor = writer_handle.monitor();
        let (inbound_tx, inbound_rx) = mpsc::channel(self.config.channel_capacity);
        let dispatch_task = tokio::spawn(dispatch_loop(
            inbound_rx,
            Arc::clone(&self.registry),
            writer_handle,
            self.config.max_frame,
        ));

        self.initialized = true;
        self.set_state(HostState::Ready);
        tracing::info!(connection = %label, "connection ready");

        let mut summary = ConnectionSummary::default();
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        'read: loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!("input read failed, treating as end of input: {}", e);
                    break;
                }
            };

            for frame in self.buffer.push(&buf[..n]) {
                let inbound = decode_inbound(frame.payload());
                summary.received += 1;
                if inbound_tx.send(inbound).await.is_err() {
                    tracing::error!("dispatch task stopped, no longer reading input");
                    break 'read;
                }
            }
        }

        summary.leftover_bytes = self.buffer.len();
        if summary.leftover_bytes > 0 {
            tracing::debug!(bytes = summary.leftover_bytes, "input ended inside a frame");
        }

        drop(inbound_tx);
        match dispatch_task.await {
            Ok(answered) => summary.answered = answered,
            Err(e) => tracing::error!("dispatch task failed: {}", e),
        }

        match writer_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("writing responses failed: {}", e),
            Err(e) => tracing::error!("writer task failed: {}", e),
        }

        summary.written = monitor.written_count();
        summary.lost = monitor.lost_count();
        summary
    }
}

/// Serves every connection with a fresh in-process [`Host`].
///
/// Lets a client talk to the real dispatch path without launching the
/// host binary.
#[derive(Clone)]
pub struct LoopbackConnector {
    registry: Arc<HandlerRegistry>,
    config: HostConfig,
}

impl LoopbackConnector {
    pub fn new(registry: HandlerRegistry, config: HostConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
        }
    }
}

impl Connector for LoopbackConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Connection>> {
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();

        Box::pin(async move {
            let (near, far) = tokio::io::duplex(LOOPBACK_PIPE_SIZE);
            tokio::spawn(async move {
                let mut host = Host::with_shared_registry(registry, config);
                host.serve_connection(Connection::duplex(far)).await;
            });
            Ok(Connection::duplex(near).with_label("loopback"))
        })
    }
}

/// Answer queued messages one at a time, in arrival order.
async fn dispatch_loop(
    mut inbound: mpsc::Receiver<Inbound>,
    registry: Arc<HandlerRegistry>,
    writer: WriterHandle,
    max_frame: u32,
) -> usize {
    let mut answered = 0;

    while let Some(message) = inbound.recv().await {
        let response = registry.dispatch(message).await;
        let frame = encode_response(&response, max_frame);

        if writer.send(frame).await.is_err() {
            tracing::error!("writer task stopped, dropping remaining messages");
            break;
        }
        answered += 1;
    }

    answered
}

/// Encode a response, substituting a `HANDLER_ERROR` when it does not fit
/// in a frame.
fn encode_response(response: &Response, max_frame: u32) -> OutboundFrame {
    let error = match OutboundFrame::encode(response, max_frame) {
        Ok(frame) => return frame,
        Err(e) => e,
    };

    let message = match error {
        BridgeError::FrameTooLarge { size, max } => {
            format!("Response of {} bytes exceeds maximum frame size {}", size, max)
        }
        other => format!("Failed to encode response: {}", other),
    };
    tracing::warn!(type_tag = ?response.type_tag, "{}", message);

    let mut fallback = Response::failure(ErrorCode::HandlerError, message);
    fallback.type_tag = response.type_tag.clone();

    match JsonCodec::encode(&fallback) {
        Ok(payload) => OutboundFrame::new(Bytes::from(payload)),
        Err(_) => OutboundFrame::new(Bytes::from_static(LAST_RESORT_RESPONSE)),
    }
}
