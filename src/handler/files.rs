//! `moveFile` handler.

use std::io;
use std::path::{Path, PathBuf};

use crate::message::{ErrorCode, Request, RequestKind, Response};

use super::folders::{display, expand_path, io_failure, require_path};
use super::{BoxFuture, Handled, Handler, HandlerResult};

/// Raw OS error for a rename across filesystems.
#[cfg(unix)]
const CROSS_DEVICE_ERROR: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE_ERROR: i32 = 17; // ERROR_NOT_SAME_DEVICE
#[cfg(not(any(unix, windows)))]
const CROSS_DEVICE_ERROR: i32 = -1;

/// Give up looking for a free `name (n).ext` after this many attempts.
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// Moves files into place, never overwriting an existing file.
#[derive(Debug, Default)]
pub struct FileHandler;

impl FileHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Handler for FileHandler {
    fn name(&self) -> &str {
        "files"
    }

    fn kinds(&self) -> &[RequestKind] {
        &[RequestKind::MoveFile]
    }

    fn handle(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        Box::pin(async move {
            match request {
                Request::MoveFile {
                    source,
                    destination,
                } => Ok(Handled::Response(move_file(&source, &destination).await)),
                _ => Ok(Handled::NotHandled),
            }
        })
    }
}

/// `report.pdf`, 2 → `report (2).pdf`.
pub fn numbered_name(file_name: &str, n: u32) -> String {
    match file_name.rfind('.') {
        Some(dot) if dot > 0 => {
            let (stem, ext) = file_name.split_at(dot);
            format!("{} ({}){}", stem, n, ext)
        }
        _ => format!("{} ({})", file_name, n),
    }
}

/// First path based on `destination` that does not exist yet.
pub async fn unique_destination(destination: &Path) -> io::Result<PathBuf> {
    if !exists(destination).await? {
        return Ok(destination.to_path_buf());
    }

    let file_name = destination
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no file name"))?;
    let parent = destination.parent().unwrap_or_else(|| Path::new(""));

    for n in 1..=MAX_RENAME_ATTEMPTS {
        let candidate = parent.join(numbered_name(&file_name, n));
        if !exists(&candidate).await? {
            return Ok(candidate);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "no free destination name",
    ))
}

async fn exists(path: &Path) -> io::Result<bool> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Move `source` to `destination`, renaming on collision.
pub async fn move_file(source: &str, destination: &str) -> Response {
    if let Some(response) = require_path(RequestKind::MoveFile, source)
        .or_else(|| require_path(RequestKind::MoveFile, destination))
    {
        return response;
    }
    let source = expand_path(source);
    let destination = expand_path(destination);

    match tokio::fs::metadata(&source).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Response::failure(ErrorCode::MoveError, "Source is not a file")
                .with("path", display(&source));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Response::failure(ErrorCode::NotFound, "Source file does not exist")
                .with("path", display(&source));
        }
        Err(e) => return io_failure(ErrorCode::MoveError, "Cannot access source", &source, &e),
    }

    if source == destination {
        return Response::ok()
            .with("moved", false)
            .with("path", display(&destination));
    }

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return io_failure(ErrorCode::MoveError, "Cannot create destination folder", parent, &e);
        }
    }

    let target = match unique_destination(&destination).await {
        Ok(target) => target,
        Err(e) => return io_failure(ErrorCode::MoveError, "Cannot choose destination", &destination, &e),
    };

    match relocate(&source, &target).await {
        Ok(()) => {
            tracing::info!(from = %source.display(), to = %target.display(), "moved file");
            Response::ok()
                .with("moved", true)
                .with("path", display(&target))
        }
        Err(e) => io_failure(ErrorCode::MoveError, "Failed to move file", &target, &e),
    }
}

/// Rename, or copy then remove when the rename crosses filesystems.
async fn relocate(source: &Path, target: &Path) -> io::Result<()> {
    match tokio::fs::rename(source, target).await {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_ERROR) => {
            tracing::debug!("rename crosses devices, copying instead");
            tokio::fs::copy(source, target).await?;
            if let Err(e) = tokio::fs::remove_file(source).await {
                // Keep exactly one copy when the source cannot be removed.
                let _ = tokio::fs::remove_file(target).await;
                return Err(e);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}
