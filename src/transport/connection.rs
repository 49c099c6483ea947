//! A single peer connection.

use std::any::Any;
use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed input half.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed output half.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;
/// Anything that must stay alive as long as the connection (a child process,
/// a temp file).
pub type ConnectionGuard = Box<dyn Any + Send>;

/// Reader/writer pair for one logical peer connection.
pub struct Connection {
    reader: BoxReader,
    writer: BoxWriter,
    guard: Option<ConnectionGuard>,
    label: String,
}

impl Connection {
    /// Wrap a reader and writer.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            guard: None,
            label: "connection".to_string(),
        }
    }

    /// The process's own stdin/stdout.
    ///
    /// stdout carries frames only; all diagnostics go to stderr.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout()).with_label("stdio")
    }

    /// One end of an in-memory pipe, split into halves.
    pub fn duplex(stream: tokio::io::DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer).with_label("duplex")
    }

    /// Keep `guard` alive until the connection is dropped.
    pub fn with_guard<G: Any + Send>(mut self, guard: G) -> Self {
        self.guard = Some(Box::new(guard));
        self
    }

    /// Name used in logs.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Take the halves apart. The guard must be held for as long as either
    /// half is in use.
    pub fn into_parts(self) -> (BoxReader, BoxWriter, Option<ConnectionGuard>) {
        (self.reader, self.writer, self.guard)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.label)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_duplex_connection_carries_bytes() {
        let (near, mut far) = tokio::io::duplex(64);
        let (mut reader, mut writer, guard) = Connection::duplex(near).into_parts();
        assert!(guard.is_none());

        writer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        far.write_all(b"pong").await.unwrap();
        reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn test_guard_and_label() {
        let (near, _far) = tokio::io::duplex(8);
        let connection = Connection::duplex(near).with_guard(42u32).with_label("child");

        assert_eq!(connection.label(), "child");
        let (_, _, guard) = connection.into_parts();
        assert_eq!(guard.unwrap().downcast_ref::<u32>(), Some(&42));
    }
}
