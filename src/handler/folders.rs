//! Folder capabilities: `verifyFolder`, `createFolder` and `listFolders`.

use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::message::{ErrorCode, FolderEntry, Request, RequestKind, Response};

use super::{BoxFuture, Handled, Handler, HandlerResult};

/// Expand a leading `~` to the user's home directory.
///
/// Paths without a leading `~`, or when no home directory is known, are
/// returned unchanged.
pub fn expand_path(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('\\') => rest,
        _ => return PathBuf::from(path),
    };

    match home_dir() {
        Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
        None => PathBuf::from(path),
    }
}

fn home_dir() -> Option<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    std::env::var_os(var)
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

/// Parse-error response for an empty path field.
pub(crate) fn require_path(kind: RequestKind, path: &str) -> Option<Response> {
    if path.trim().is_empty() {
        Some(
            Response::parse_error(Some(kind.as_str().to_string()), "path must not be empty"),
        )
    } else {
        None
    }
}

/// Map an I/O error to a failure response, using `ACCESS_ERROR` for permission
/// problems and `fallback` otherwise.
pub(crate) fn io_failure(fallback: ErrorCode, context: &str, path: &Path, err: &io::Error) -> Response {
    let code = if err.kind() == io::ErrorKind::PermissionDenied {
        ErrorCode::AccessError
    } else {
        fallback
    };
    Response::failure(code, format!("{}: {}", context, err)).with("path", display(path))
}

pub(crate) fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Filesystem folder operations.
#[derive(Debug, Default)]
pub struct FolderHandler;

impl FolderHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Handler for FolderHandler {
    fn name(&self) -> &str {
        "folders"
    }

    fn kinds(&self) -> &[RequestKind] {
        &[
            RequestKind::VerifyFolder,
            RequestKind::CreateFolder,
            RequestKind::ListFolders,
        ]
    }

    fn handle(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        Box::pin(async move {
            let response = match request {
                Request::VerifyFolder { path } => verify_folder(&path).await,
                Request::CreateFolder { path } => create_folder(&path).await,
                Request::ListFolders { path } => list_folders(&path).await,
                _ => return Ok(Handled::NotHandled),
            };
            Ok(Handled::Response(response))
        })
    }
}

/// Report whether `path` is an existing directory.
pub async fn verify_folder(path: &str) -> Response {
    if let Some(response) = require_path(RequestKind::VerifyFolder, path) {
        return response;
    }
    let target = expand_path(path);

    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => Response::ok()
            .with("exists", true)
            .with("path", display(&target)),
        Ok(_) => Response::failure(ErrorCode::NotDirectory, "Path is not a directory")
            .with("path", display(&target)),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            io_failure(ErrorCode::AccessError, "Cannot access folder", &target, &e)
        }
        Err(e) => {
            tracing::debug!(path = %target.display(), "folder missing: {}", e);
            Response::ok()
                .with("exists", false)
                .with("path", display(&target))
        }
    }
}

/// Create `path` and any missing parents.
pub async fn create_folder(path: &str) -> Response {
    if let Some(response) = require_path(RequestKind::CreateFolder, path) {
        return response;
    }
    let target = expand_path(path);

    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => {
            return Response::ok()
                .with("created", false)
                .with("path", display(&target));
        }
        Ok(_) => {
            return Response::failure(ErrorCode::NotDirectory, "Path exists and is not a directory")
                .with("path", display(&target));
        }
        Err(_) => {}
    }

    match tokio::fs::create_dir_all(&target).await {
        Ok(()) => {
            tracing::info!(path = %target.display(), "created folder");
            Response::ok()
                .with("created", true)
                .with("path", display(&target))
        }
        Err(e) => io_failure(ErrorCode::CreateError, "Failed to create folder", &target, &e),
    }
}

/// List the visible immediate subdirectories of `path`.
pub async fn list_folders(path: &str) -> Response {
    if let Some(response) = require_path(RequestKind::ListFolders, path) {
        return response;
    }
    let target = expand_path(path);

    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Response::failure(ErrorCode::NotDirectory, "Path is not a directory")
                .with("path", display(&target));
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Response::failure(ErrorCode::NotFound, "Folder does not exist")
                .with("path", display(&target));
        }
        Err(e) => return io_failure(ErrorCode::AccessError, "Cannot access folder", &target, &e),
    }

    let entries = match read_subfolders(&target).await {
        Ok(entries) => entries,
        Err(e) => return io_failure(ErrorCode::AccessError, "Cannot read folder", &target, &e),
    };

    let items: Vec<Value> = entries
        .into_iter()
        .map(|entry| serde_json::json!({ "name": entry.name, "path": entry.path }))
        .collect();

    Response::ok()
        .with("path", display(&target))
        .with("items", items)
}

async fn read_subfolders(dir: &Path) -> io::Result<Vec<FolderEntry>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut folders = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry.file_type().await?;
        let is_dir = if file_type.is_symlink() {
            // Follow links; dangling ones are skipped.
            tokio::fs::metadata(entry.path())
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false)
        } else {
            file_type.is_dir()
        };

        if is_dir {
            folders.push(FolderEntry {
                name,
                path: display(&entry.path()),
            });
        }
    }

    folders.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(folders)
}
