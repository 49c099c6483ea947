//! # native-bridge
//!
//! Native messaging host for browser extensions.
//!
//! A sandboxed extension asks this process for things it cannot do itself:
//! native folder and save dialogs, folder checks, file moves. Both sides
//! exchange length-prefixed JSON frames over stdin/stdout.
//!
//! ## Architecture
//!
//! - **Protocol** ([`protocol`]): 4-byte LE length prefix + UTF-8 JSON,
//!   accumulated in a [`protocol::FrameBuffer`] that recovers from corrupted
//!   prefixes
//! - **Dispatch** ([`handler`]): closed [`message::Request`] set routed
//!   through an ordered handler chain; exactly one [`message::Response`] per
//!   request
//! - **Output** ([`writer`]): a single writer task owns stdout
//! - **Lifecycle** ([`host`]): one [`Host`] per process, with a grace period
//!   after the browser closes input
//! - **Caller side** ([`client`]): one exchange per request, with timeouts
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use native_bridge::handler::{default_registry, SystemDialog};
//! use native_bridge::transport::Connection;
//! use native_bridge::{Host, HostConfig};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let registry = default_registry(Arc::new(SystemDialog::new()));
//!     let mut host = Host::new(registry, HostConfig::default());
//!     host.serve_connection(Connection::stdio()).await;
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod handler;
pub mod host;
pub mod manifest;
pub mod message;
pub mod protocol;
pub mod transport;
pub mod writer;

pub use client::{ClientConfig, ClientError, ClientPort, CompanionStatus};
pub use error::{BridgeError, Result};
pub use host::{Host, HostConfig, HostState};
pub use message::{Request, Response};
