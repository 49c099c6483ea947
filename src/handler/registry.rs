//! Handler registry and message dispatch.
//!
//! Handlers are kept in registration order. Each one declares the request
//! kinds it serves, and the registry builds an explicit table from kind to
//! handler positions. Dispatch walks that list in order; the first handler
//! that answers wins and a handler may decline with [`Handled::NotHandled`].
//!
//! Dispatch always yields a [`Response`]: unknown types, malformed payloads,
//! handler errors and handler panics are all turned into error responses.
//!
//! # Example
//!
//! ```
//! use native_bridge::handler::{Handled, HandlerRegistry};
//! use native_bridge::message::{Inbound, Request, RequestKind, Response};
//!
//! # tokio_test_block_on(async {
//! let mut registry = HandlerRegistry::new();
//! registry.register_fn("version", &[RequestKind::GetVersion], |_request| async {
//!     Ok(Handled::Response(Response::ok().with_type("version")))
//! });
//!
//! let response = registry.dispatch(Inbound::Request(Request::GetVersion)).await;
//! assert!(response.success);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::message::{Inbound, Request, RequestKind, Response};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler did with a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled {
    /// The handler answered.
    Response(Response),
    /// The handler declined; try the next one.
    NotHandled,
}

/// Result type for handler functions.
pub type HandlerResult = Result<Handled>;

/// Trait for capability handlers.
pub trait Handler: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Request kinds this handler may answer.
    fn kinds(&self) -> &[RequestKind];

    /// Handle a request.
    fn handle(&self, request: Request) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    name: String,
    kinds: Vec<RequestKind>,
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new closure handler.
    pub fn new(name: &str, kinds: &[RequestKind], handler: F) -> Self {
        Self {
            name: name.to_string(),
            kinds: kinds.to_vec(),
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Handler for FnHandler<F, Fut>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kinds(&self) -> &[RequestKind] {
        &self.kinds
    }

    fn handle(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(request))
    }
}

/// Ordered handler chain plus the kind → handler dispatch table.
pub struct HandlerRegistry {
    /// Handlers in registration order.
    handlers: Vec<Arc<dyn Handler>>,
    /// Positions in `handlers` for each kind, in registration order.
    table: HashMap<RequestKind, Vec<usize>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            table: HashMap::new(),
        }
    }

    /// Append a handler to the chain.
    pub fn register<H: Handler>(&mut self, handler: H) -> &mut Self {
        let index = self.handlers.len();
        for &kind in handler.kinds() {
            self.table.entry(kind).or_default().push(index);
        }
        tracing::trace!(handler = handler.name(), kinds = ?handler.kinds(), "registered handler");
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Append an async closure to the chain.
    pub fn register_fn<F, Fut>(&mut self, name: &str, kinds: &[RequestKind], handler: F) -> &mut Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(FnHandler::new(name, kinds, handler))
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Whether any handler claims `kind`.
    pub fn is_registered(&self, kind: RequestKind) -> bool {
        self.table.contains_key(&kind)
    }

    /// Names of the handlers for `kind`, in the order they are tried.
    pub fn handler_names(&self, kind: RequestKind) -> Vec<&str> {
        self.table
            .get(&kind)
            .map(|indices| indices.iter().map(|&i| self.handlers[i].name()).collect())
            .unwrap_or_default()
    }

    /// Produce the response for one decoded frame.
    pub async fn dispatch(&self, inbound: Inbound) -> Response {
        match inbound {
            Inbound::Request(request) => self.dispatch_request(request).await,
            Inbound::Unknown { type_tag } => {
                tracing::warn!(type_tag = %type_tag, "unknown message type");
                Response::unknown_type(type_tag)
            }
            Inbound::Malformed { type_tag, error } => {
                tracing::warn!(type_tag = ?type_tag, "unparseable message: {}", error);
                Response::parse_error(type_tag, error)
            }
        }
    }

    /// Run a request through its handlers.
    pub async fn dispatch_request(&self, request: Request) -> Response {
        let kind = request.kind();

        let Some(indices) = self.table.get(&kind) else {
            tracing::warn!(%kind, "no handler registered");
            return Response::unknown_type(kind.as_str());
        };

        for &index in indices {
            let handler = &self.handlers[index];
            let started = Instant::now();

            // Own task per call, so a panicking handler only fails its request.
            let outcome = tokio::spawn(handler.handle(request.clone())).await;

            match outcome {
                Ok(Ok(Handled::Response(response))) => {
                    tracing::debug!(
                        handler = handler.name(),
                        %kind,
                        success = response.success,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "handled"
                    );
                    return response;
                }
                Ok(Ok(Handled::NotHandled)) => continue,
                Ok(Err(e)) => {
                    tracing::error!(handler = handler.name(), %kind, "handler failed: {}", e);
                    return Response::handler_error(kind.as_str(), e.to_string());
                }
                Err(join_error) => {
                    let message = if join_error.is_panic() {
                        panic_message(join_error.into_panic())
                    } else {
                        "handler task was cancelled".to_string()
                    };
                    tracing::error!(handler = handler.name(), %kind, "handler panicked: {}", message);
                    return Response::handler_error(kind.as_str(), message);
                }
            }
        }

        tracing::warn!(%kind, "every handler declined");
        Response::unknown_type(kind.as_str())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::message::ErrorCode;

    fn version_registry() -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("version", &[RequestKind::GetVersion], |_| async {
            Ok(Handled::Response(
                Response::ok().with_type("version").with("version", "1.0.0"),
            ))
        });
        registry
    }

    #[test]
    fn test_register_builds_table() {
        let mut registry = version_registry();
        registry.register_fn(
            "folders",
            &[RequestKind::VerifyFolder, RequestKind::ListFolders],
            |_| async { Ok(Handled::NotHandled) },
        );

        assert_eq!(registry.len(), 2);
        assert!(registry.is_registered(RequestKind::GetVersion));
        assert!(registry.is_registered(RequestKind::ListFolders));
        assert!(!registry.is_registered(RequestKind::MoveFile));
        assert_eq!(registry.handler_names(RequestKind::VerifyFolder), vec!["folders"]);
    }

    #[tokio::test]
    async fn test_dispatch_to_handler() {
        let registry = version_registry();

        let response = registry.dispatch(Inbound::Request(Request::GetVersion)).await;

        assert!(response.success);
        assert_eq!(response.type_tag.as_deref(), Some("version"));
    }

    #[tokio::test]
    async fn test_identical_requests_get_identical_responses() {
        let registry = version_registry();

        let first = registry.dispatch(Inbound::Request(Request::GetVersion)).await;
        let second = registry.dispatch(Inbound::Request(Request::GetVersion)).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_first_handling_handler_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("decliner", &[RequestKind::GetVersion], |_| async {
            Ok(Handled::NotHandled)
        });
        registry.register_fn("first", &[RequestKind::GetVersion], |_| async {
            Ok(Handled::Response(Response::ok().with("by", "first")))
        });
        registry.register_fn("second", &[RequestKind::GetVersion], |_| async {
            Ok(Handled::Response(Response::ok().with("by", "second")))
        });

        assert_eq!(
            registry.handler_names(RequestKind::GetVersion),
            vec!["decliner", "first", "second"]
        );

        let response = registry.dispatch_request(Request::GetVersion).await;
        assert_eq!(response.str_field("by"), Some("first"));
    }

    #[tokio::test]
    async fn test_all_declined_is_unknown_type() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("decliner", &[RequestKind::GetVersion], |_| async {
            Ok(Handled::NotHandled)
        });

        let response = registry.dispatch_request(Request::GetVersion).await;

        assert!(!response.success);
        assert_eq!(response.code, Some(ErrorCode::UnknownType));
        assert_eq!(response.type_tag.as_deref(), Some("getVersion"));
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_unknown_type() {
        let registry = version_registry();

        let response = registry
            .dispatch_request(Request::VerifyFolder { path: "/".into() })
            .await;

        assert_eq!(response.code, Some(ErrorCode::UnknownType));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_inbound() {
        let registry = version_registry();

        let unknown = registry
            .dispatch(Inbound::Unknown {
                type_tag: "bogus".into(),
            })
            .await;
        assert_eq!(unknown.code, Some(ErrorCode::UnknownType));
        assert_eq!(unknown.type_tag.as_deref(), Some("bogus"));

        let malformed = registry
            .dispatch(Inbound::Malformed {
                type_tag: None,
                error: "Invalid JSON".into(),
            })
            .await;
        assert_eq!(malformed.code, Some(ErrorCode::ParseError));
        assert_eq!(malformed.error.as_deref(), Some("Invalid JSON"));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_response() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("failing", &[RequestKind::ListFolders], |_| async {
            Err(BridgeError::handler("disk on fire"))
        });

        let response = registry
            .dispatch_request(Request::ListFolders { path: "/".into() })
            .await;

        assert!(!response.success);
        assert_eq!(response.code, Some(ErrorCode::HandlerError));
        assert_eq!(response.error.as_deref(), Some("disk on fire"));
        assert_eq!(response.type_tag.as_deref(), Some("listFolders"));
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_response() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("panicking", &[RequestKind::MoveFile], |_| async {
            if true {
                panic!("boom");
            }
            Ok(Handled::NotHandled)
        });

        let response = registry
            .dispatch_request(Request::MoveFile {
                source: "a".into(),
                destination: "b".into(),
            })
            .await;

        assert_eq!(response.code, Some(ErrorCode::HandlerError));
        assert_eq!(response.error.as_deref(), Some("boom"));

        // The registry is still usable afterwards.
        let again = registry
            .dispatch_request(Request::MoveFile {
                source: "a".into(),
                destination: "b".into(),
            })
            .await;
        assert_eq!(again.code, Some(ErrorCode::HandlerError));
    }

    #[tokio::test]
    async fn test_handler_receives_request() {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("echo", &[RequestKind::VerifyFolder], |request| async move {
            match request {
                Request::VerifyFolder { path } => Ok(Handled::Response(Response::ok().with("path", path))),
                _ => Ok(Handled::NotHandled),
            }
        });

        let response = registry
            .dispatch_request(Request::VerifyFolder {
                path: "/srv/data".into(),
            })
            .await;

        assert_eq!(response.str_field("path"), Some("/srv/data"));
    }
}
