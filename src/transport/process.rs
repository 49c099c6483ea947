//! Connectors: how a client obtains a fresh connection to the host.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{BridgeError, Result};
use crate::handler::BoxFuture;

use super::Connection;

/// Opens one connection per client exchange.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> BoxFuture<'static, Result<Connection>>;
}

/// Launches the host program and talks to it over its stdin/stdout.
///
/// The child is killed when the connection is dropped, so abandoning an
/// exchange never leaves a host process behind.
#[derive(Debug, Clone)]
pub struct ProcessConnector {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ProcessConnector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add a command-line argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl Connector for ProcessConnector {
    fn connect(&self) -> BoxFuture<'static, Result<Connection>> {
        let program = self.program.clone();
        let args = self.args.clone();

        Box::pin(async move {
            let mut child = Command::new(&program)
                .args(&args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| BridgeError::Protocol("child stdin not captured".into()))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| BridgeError::Protocol("child stdout not captured".into()))?;

            tracing::debug!(program = %program.display(), pid = ?child.id(), "spawned host");

            Ok(Connection::new(stdout, stdin)
                .with_guard(child)
                .with_label(program.display().to_string()))
        })
    }
}
