//! Native messaging host binary.
//!
//! Started by the browser with the extension origin (Chromium) or the
//! manifest path and extension id (Firefox) as arguments.
//!
//! stdout carries protocol frames only; logs go to stderr.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use native_bridge::handler::{default_registry, platform_name, SystemDialog, HOST_VERSION};
use native_bridge::host::{Host, HostConfig, DEFAULT_GRACE_PERIOD};
use native_bridge::manifest::HostManifest;
use native_bridge::protocol::MAX_FRAME_SIZE;
use native_bridge::transport::Connection;

const DEFAULT_HOST_NAME: &str = "com.native_bridge.host";

#[derive(Debug, Parser)]
#[command(name = "native-bridge-host", version, about)]
struct Args {
    /// Arguments passed by the browser (extension origin, manifest path).
    caller: Vec<String>,

    /// Native window handle of the calling browser window (Windows).
    #[arg(long)]
    parent_window: Option<String>,

    /// How long to wait for reconnection after input closes.
    #[arg(long, env = "NATIVE_BRIDGE_GRACE_MS", default_value_t = DEFAULT_GRACE_PERIOD.as_millis() as u64)]
    grace_ms: u64,

    /// Largest accepted frame in bytes.
    #[arg(long, env = "NATIVE_BRIDGE_MAX_FRAME", default_value_t = MAX_FRAME_SIZE)]
    max_frame: u32,

    /// Log filter, e.g. `debug` or `native_bridge=trace`.
    #[arg(long, env = "NATIVE_BRIDGE_LOG", default_value = "info")]
    log: String,

    /// Print a host manifest allowing this extension, then exit.
    #[arg(long, value_name = "EXTENSION")]
    print_manifest: Option<String>,

    /// Host name used in the printed manifest.
    #[arg(long, default_value = DEFAULT_HOST_NAME)]
    host_name: String,
}

/// Parse arguments without ever aborting on flags a browser adds.
fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            // stderr only; the browser is already listening on stdout.
            eprintln!("native-bridge-host: ignoring arguments: {}", e);
            Args::parse_from(["native-bridge-host"])
        }
    }
}

fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .compact()
        .init();
}

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("panic: {}", info);
    }));
}

/// Write a line to stdout with an explicit `\n` (never `println!`).
fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(line.as_bytes())?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}

fn print_manifest(args: &Args, extension: &str) -> ExitCode {
    let path = match std::env::current_exe() {
        Ok(path) => path.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::error!("cannot determine executable path: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let manifest = HostManifest::new(args.host_name.as_str(), path).allow(extension);
    match manifest.to_json() {
        Ok(json) => {
            if let Err(e) = write_stdout_line(&json) {
                tracing::error!("failed to write manifest: {}", e);
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = parse_args();
    init_tracing(&args.log);
    install_panic_hook();

    if let Some(extension) = &args.print_manifest {
        return print_manifest(&args, extension);
    }

    tracing::info!(
        version = HOST_VERSION,
        platform = platform_name(),
        caller = ?args.caller,
        parent_window = ?args.parent_window,
        "native bridge host starting"
    );

    let config = HostConfig::new()
        .with_max_frame(args.max_frame)
        .with_grace_period(Duration::from_millis(args.grace_ms));
    let registry = default_registry(Arc::new(SystemDialog::new()));
    let mut host = Host::new(registry, config);

    // stdin cannot reopen, so stdio is the only connection this process
    // ever serves and Draining is a fixed grace delay before exit. The
    // sender stays alive so that delay is waited out rather than skipped.
    let (connections, incoming) = mpsc::channel(1);
    if connections.send(Connection::stdio()).await.is_err() {
        tracing::error!("connection queue closed before start");
        return ExitCode::FAILURE;
    }

    host.run(incoming).await;
    drop(connections);

    tracing::info!("host closed");
    ExitCode::SUCCESS
}
