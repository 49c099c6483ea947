//! `getVersion` handler.

use crate::message::{Request, RequestKind, Response};

use super::{BoxFuture, Handled, Handler, HandlerResult};

/// Host version reported to the extension.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform name in the form browser extensions already use
/// (`process.platform` spelling).
pub fn platform_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// Answers `getVersion` with the host version and platform.
pub struct VersionHandler {
    version: String,
}

impl VersionHandler {
    pub fn new() -> Self {
        Self::with_version(HOST_VERSION)
    }

    /// Report a specific version string.
    pub fn with_version(version: &str) -> Self {
        Self {
            version: version.to_string(),
        }
    }
}

impl Default for VersionHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for VersionHandler {
    fn name(&self) -> &str {
        "version"
    }

    fn kinds(&self) -> &[RequestKind] {
        &[RequestKind::GetVersion]
    }

    fn handle(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        let version = self.version.clone();
        Box::pin(async move {
            if !matches!(request, Request::GetVersion) {
                return Ok(Handled::NotHandled);
            }

            Ok(Handled::Response(
                Response::ok()
                    .with_type("version")
                    .with("version", version)
                    .with("platform", platform_name()),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_version_response() {
        let handler = VersionHandler::with_version("9.9.9");

        let handled = handler.handle(Request::GetVersion).await.unwrap();

        let Handled::Response(response) = handled else {
            panic!("expected a response");
        };
        assert!(response.success);
        assert_eq!(response.type_tag.as_deref(), Some("version"));
        assert_eq!(response.str_field("version"), Some("9.9.9"));
        assert_eq!(response.str_field("platform"), Some(platform_name()));
    }

    #[tokio::test]
    async fn test_declines_other_requests() {
        let handler = VersionHandler::new();

        let handled = handler
            .handle(Request::ListFolders { path: "/".into() })
            .await
            .unwrap();

        assert_eq!(handled, Handled::NotHandled);
    }

    #[test]
    fn test_platform_name_uses_browser_spelling() {
        let name = platform_name();
        assert_ne!(name, "macos");
        assert_ne!(name, "windows");
        assert!(!name.is_empty());
    }
}
