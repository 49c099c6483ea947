//! Dedicated writer task for the protocol output stream.
//!
//! Only this task ever touches stdout. Responses reach it through an mpsc
//! channel, so frames leave in the order they were queued and each frame is
//! written completely before the next one starts. Logs go to stderr and can
//! never land in the middle of a frame.
//!
//! # Architecture
//!
//! ```text
//! Dispatch task ─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► stdout
//! ```
//!
//! If the browser has already closed its end, writes fail with a broken
//! pipe. That is logged once and every later frame is dropped: the response
//! is lost, but nothing upstream sees an error.

use std::io::IoSlice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::JsonCodec;
use crate::error::{BridgeError, Result};
use crate::protocol::{encode_length, LENGTH_PREFIX_SIZE};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 16;

/// A frame ready to be written to the output stream.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Pre-encoded LE length prefix.
    pub prefix: [u8; LENGTH_PREFIX_SIZE],
    /// JSON payload bytes.
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Create a new outbound frame from an encoded payload.
    #[inline]
    pub fn new(payload: Bytes) -> Self {
        Self {
            prefix: encode_length(payload.len() as u32),
            payload,
        }
    }

    /// Serialize a value into a frame, enforcing the size limit.
    pub fn encode<T: serde::Serialize>(value: &T, max: u32) -> Result<Self> {
        let payload = JsonCodec::encode_limited(value, max)?;
        Ok(Self::new(Bytes::from(payload)))
    }

    /// Total size of this frame (prefix + payload).
    #[inline]
    pub fn size(&self) -> usize {
        LENGTH_PREFIX_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Counters shared between the writer task and its handles.
#[derive(Debug, Default)]
struct Counters {
    pending: AtomicUsize,
    written: AtomicUsize,
    lost: AtomicUsize,
    peer_closed: AtomicBool,
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; dropping every handle ends the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    /// Channel sender for frames.
    tx: mpsc::Sender<OutboundFrame>,
    /// Shared counters.
    counters: Arc<Counters>,
}

impl WriterHandle {
    /// Queue a frame. Resolves once the frame is in the queue, not on the wire.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.counters.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.counters.pending.fetch_sub(1, Ordering::Release);
            BridgeError::ConnectionClosed
        })
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.counters.pending.load(Ordering::Acquire)
    }

    /// Frames fully written and flushed.
    #[inline]
    pub fn written_count(&self) -> usize {
        self.counters.written.load(Ordering::Acquire)
    }

    /// Frames dropped because the peer had closed the stream.
    #[inline]
    pub fn lost_count(&self) -> usize {
        self.counters.lost.load(Ordering::Acquire)
    }

    /// Whether a write has failed because the peer went away.
    #[inline]
    pub fn is_peer_closed(&self) -> bool {
        self.counters.peer_closed.load(Ordering::Acquire)
    }

    /// Read-only view of the counters that does not keep the task alive.
    pub fn monitor(&self) -> WriterMonitor {
        WriterMonitor {
            counters: self.counters.clone(),
        }
    }
}

/// Counter view that outlives the handles.
#[derive(Debug, Clone)]
pub struct WriterMonitor {
    counters: Arc<Counters>,
}

impl WriterMonitor {
    pub fn written_count(&self) -> usize {
        self.counters.written.load(Ordering::Acquire)
    }

    pub fn lost_count(&self) -> usize {
        self.counters.lost.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.counters.pending.load(Ordering::Acquire)
    }

    pub fn is_peer_closed(&self) -> bool {
        self.counters.peer_closed.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// # Returns
///
/// A tuple of `(WriterHandle, JoinHandle)`. The task ends with `Ok(())` once
/// every handle is dropped and the queue is drained, or with an error for
/// I/O failures other than a closed peer.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let counters = Arc::new(Counters::default());

    let handle = WriterHandle {
        tx,
        counters: counters.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, writer, counters));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

/// Main writer loop - receives frames and writes them out in order.
async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    counters: Arc<Counters>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => return Ok(()),
        };

        batch.clear();
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        counters.pending.fetch_sub(batch_size, Ordering::Release);

        if counters.peer_closed.load(Ordering::Acquire) {
            counters.lost.fetch_add(batch_size, Ordering::Release);
            tracing::debug!(frames = batch_size, "peer closed, dropping responses");
            continue;
        }

        match write_batch(&mut writer, &batch).await {
            Ok(()) => {
                counters.written.fetch_add(batch_size, Ordering::Release);
            }
            Err(BridgeError::Io(e)) if is_peer_gone(&e) => {
                counters.peer_closed.store(true, Ordering::Release);
                counters.lost.fetch_add(batch_size, Ordering::Release);
                tracing::warn!("output closed by peer, response lost: {}", e);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Errors meaning the reading side of the stream is gone.
fn is_peer_gone(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::ConnectionReset
    )
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
///
/// Partial writes are continued until every byte is out, then flushed.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        if slices.is_empty() {
            break;
        }

        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }

        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after the first `skip_bytes` bytes.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut skipped = 0;

    for frame in batch {
        let prefix_start = skipped;
        let prefix_end = skipped + LENGTH_PREFIX_SIZE;

        if skip_bytes < prefix_end {
            let start_in_prefix = skip_bytes.saturating_sub(prefix_start);
            slices.push(IoSlice::new(&frame.prefix[start_in_prefix..]));
        }
        skipped = prefix_end;

        if !frame.payload.is_empty() {
            let payload_start = skipped;
            let payload_end = skipped + frame.payload.len();

            if skip_bytes < payload_end {
                let start_in_payload = skip_bytes.saturating_sub(payload_start);
                slices.push(IoSlice::new(&frame.payload[start_in_payload..]));
            }
            skipped = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Response;
    use crate::protocol::{FrameBuffer, MAX_FRAME_SIZE};
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    /// Writer whose peer has gone away.
    struct ClosedPipe;

    impl AsyncWrite for ClosedPipe {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    /// Writer that accepts at most `chunk` bytes per call.
    struct Trickle {
        out: Vec<u8>,
        chunk: usize,
    }

    impl AsyncWrite for Trickle {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn frame(text: &'static str) -> OutboundFrame {
        OutboundFrame::new(Bytes::from_static(text.as_bytes()))
    }

    #[test]
    fn test_outbound_frame_creation() {
        let frame = frame(r#"{"success":true}"#);

        assert_eq!(frame.prefix, [16, 0, 0, 0]);
        assert_eq!(frame.size(), LENGTH_PREFIX_SIZE + 16);
    }

    #[test]
    fn test_outbound_frame_encode_limit() {
        let response = Response::ok().with("path", "x".repeat(100));

        assert!(OutboundFrame::encode(&response, 1024).is_ok());
        assert!(matches!(
            OutboundFrame::encode(&response, 32),
            Err(BridgeError::FrameTooLarge { .. })
        ));
        assert_eq!(
            OutboundFrame::encode(&response, 1024).unwrap().payload.as_ref(),
            JsonCodec::encode_limited(&response, 1024).unwrap().as_slice()
        );
    }

    #[tokio::test]
    async fn test_writer_handle_send() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task_default(client);

        handle.send(frame(r#"{"success":true}"#)).await.unwrap();

        let mut buf = vec![0u8; LENGTH_PREFIX_SIZE + 16];
        server.read_exact(&mut buf).await.unwrap();

        assert_eq!(&buf[..4], &[16, 0, 0, 0]);
        assert_eq!(&buf[4..], br#"{"success":true}"#);
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_frames_arrive_in_queue_order() {
        let (client, mut server) = duplex(64 * 1024);
        let (handle, task) = spawn_writer_task_default(client);

        for i in 0..20 {
            let response = Response::ok().with("n", i);
            handle
                .send(OutboundFrame::encode(&response, MAX_FRAME_SIZE).unwrap())
                .await
                .unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.unwrap();

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&bytes);
        assert_eq!(frames.len(), 20);
        for (i, frame) in frames.iter().enumerate() {
            let response: Response = JsonCodec::decode(frame.payload()).unwrap();
            assert_eq!(response.field("n"), Some(&serde_json::json!(i)));
        }
    }

    #[tokio::test]
    async fn test_broken_pipe_is_swallowed() {
        let (handle, task) = spawn_writer_task_default(ClosedPipe);

        handle.send(frame(r#"{"success":true}"#)).await.unwrap();
        handle.send(frame(r#"{"success":false}"#)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.is_peer_closed());

        drop(handle);
        let result = task.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_lost_frames_are_counted() {
        let (handle, task) = spawn_writer_task_default(ClosedPipe);
        let observer = handle.monitor();

        for _ in 0..3 {
            handle.send(frame("{}")).await.unwrap();
        }
        drop(handle);
        task.await.unwrap().unwrap();

        assert_eq!(observer.lost_count(), 3);
        assert_eq!(observer.written_count(), 0);
        assert_eq!(observer.pending_count(), 0);
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![frame("hello")];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_prefix() {
        let batch = vec![frame("hello")];

        let slices = build_remaining_slices(&batch, 1);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), LENGTH_PREFIX_SIZE - 1);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_skip_prefix() {
        let batch = vec![frame("hello"), frame("world")];

        let slices = build_remaining_slices(&batch, LENGTH_PREFIX_SIZE + 2);
        assert_eq!(slices.len(), 3);
        assert_eq!(slices[0].len(), 3);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());

        let batch: Vec<_> = (0..5).map(|_| frame("abc")).collect();
        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), 5 * (LENGTH_PREFIX_SIZE + 3));
    }

    #[tokio::test]
    async fn test_write_batch_survives_partial_writes() {
        let mut out = Trickle {
            out: Vec::new(),
            chunk: 3,
        };

        let batch = vec![frame(r#"{"a":1}"#), frame(r#"{"b":2}"#)];
        write_batch(&mut out, &batch).await.unwrap();

        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&out.out);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].payload(), br#"{"b":2}"#);
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task_default(client);

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
