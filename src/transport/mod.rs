//! Transport module - byte streams the protocol runs over.
//!
//! Provides:
//! - [`Connection`] - a boxed reader/writer pair (stdio for the host)
//! - [`Connector`] - opens a fresh connection per client exchange
//! - [`ProcessConnector`] - launches the host as a child process

mod connection;
mod process;

pub use connection::{BoxReader, BoxWriter, Connection, ConnectionGuard};
pub use process::{Connector, ProcessConnector};
