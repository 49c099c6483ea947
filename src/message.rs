//! Message model - requests, responses and decoded-frame classification.
//!
//! Requests form a closed set, represented by [`Request`] (tagged on the
//! `type` field) and its payload-free twin [`RequestKind`]. Every request
//! gets exactly one [`Response`].
//!
//! # Example
//!
//! ```
//! use native_bridge::message::{decode_inbound, Inbound, Request};
//!
//! let inbound = decode_inbound(br#"{"type":"verifyFolder","path":"/tmp"}"#);
//! assert_eq!(
//!     inbound,
//!     Inbound::Request(Request::VerifyFolder { path: "/tmp".into() })
//! );
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tag of every request type the host understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RequestKind {
    GetVersion,
    VerifyFolder,
    CreateFolder,
    ListFolders,
    MoveFile,
    PickFolder,
    ShowSaveAsDialog,
}

impl RequestKind {
    /// All kinds, in wire-documentation order.
    pub const ALL: [RequestKind; 7] = [
        RequestKind::GetVersion,
        RequestKind::VerifyFolder,
        RequestKind::CreateFolder,
        RequestKind::ListFolders,
        RequestKind::MoveFile,
        RequestKind::PickFolder,
        RequestKind::ShowSaveAsDialog,
    ];

    /// The `type` tag used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::GetVersion => "getVersion",
            RequestKind::VerifyFolder => "verifyFolder",
            RequestKind::CreateFolder => "createFolder",
            RequestKind::ListFolders => "listFolders",
            RequestKind::MoveFile => "moveFile",
            RequestKind::PickFolder => "pickFolder",
            RequestKind::ShowSaveAsDialog => "showSaveAsDialog",
        }
    }

    /// Look up a kind by its wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    GetVersion,
    VerifyFolder {
        path: String,
    },
    CreateFolder {
        path: String,
    },
    ListFolders {
        path: String,
    },
    MoveFile {
        source: String,
        destination: String,
    },
    PickFolder {
        #[serde(rename = "startPath", default, skip_serializing_if = "Option::is_none")]
        start_path: Option<String>,
    },
    ShowSaveAsDialog {
        filename: String,
        #[serde(
            rename = "defaultDirectory",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        default_directory: Option<String>,
    },
}

impl Request {
    /// The payload-free kind of this request.
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::GetVersion => RequestKind::GetVersion,
            Request::VerifyFolder { .. } => RequestKind::VerifyFolder,
            Request::CreateFolder { .. } => RequestKind::CreateFolder,
            Request::ListFolders { .. } => RequestKind::ListFolders,
            Request::MoveFile { .. } => RequestKind::MoveFile,
            Request::PickFolder { .. } => RequestKind::PickFolder,
            Request::ShowSaveAsDialog { .. } => RequestKind::ShowSaveAsDialog,
        }
    }

    /// The `type` tag used on the wire.
    pub fn type_tag(&self) -> &'static str {
        self.kind().as_str()
    }
}

/// Machine-readable failure codes carried in `Response::code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ParseError,
    HandlerError,
    UnknownType,
    Cancelled,
    NotFound,
    NotDirectory,
    CreateError,
    MoveError,
    DialogError,
    AccessError,
}

impl ErrorCode {
    /// The code as it appears on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::HandlerError => "HANDLER_ERROR",
            ErrorCode::UnknownType => "UNKNOWN_TYPE",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::NotDirectory => "NOT_DIRECTORY",
            ErrorCode::CreateError => "CREATE_ERROR",
            ErrorCode::MoveError => "MOVE_ERROR",
            ErrorCode::DialogError => "DIALOG_ERROR",
            ErrorCode::AccessError => "ACCESS_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single reply to one request.
///
/// Result fields (`path`, `exists`, `items`, ...) live in `fields` and are
/// flattened next to the envelope keys on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Response {
    /// A successful response with no fields yet.
    pub fn ok() -> Self {
        Self {
            success: true,
            type_tag: None,
            error: None,
            code: None,
            fields: Map::new(),
        }
    }

    /// A failed response with a code and human-readable message.
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            type_tag: None,
            error: Some(message.into()),
            code: Some(code),
            fields: Map::new(),
        }
    }

    /// Payload could not be decoded into a request.
    pub fn parse_error(type_tag: Option<String>, message: impl Into<String>) -> Self {
        let mut response = Self::failure(ErrorCode::ParseError, message);
        response.type_tag = type_tag;
        response
    }

    /// No handler claims this type.
    pub fn unknown_type(type_tag: impl Into<String>) -> Self {
        let type_tag = type_tag.into();
        Self::failure(
            ErrorCode::UnknownType,
            format!("Unknown message type: {}", type_tag),
        )
        .with_type(type_tag)
    }

    /// A handler failed or panicked.
    pub fn handler_error(type_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::failure(ErrorCode::HandlerError, message).with_type(type_tag)
    }

    /// The user dismissed a native dialog.
    pub fn cancelled() -> Self {
        Self::failure(ErrorCode::Cancelled, "Cancelled by user")
    }

    /// Set the `type` field.
    pub fn with_type(mut self, type_tag: impl Into<String>) -> Self {
        self.type_tag = Some(type_tag.into());
        self
    }

    /// Add a result field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Get a result field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a string result field.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// Get a boolean result field.
    pub fn bool_field(&self, key: &str) -> Option<bool> {
        self.field(key).and_then(Value::as_bool)
    }

    /// Check whether this response reports a dialog cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.code == Some(ErrorCode::Cancelled)
    }
}

/// One entry of a `listFolders` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    pub path: String,
}

/// What one decoded frame turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A well-formed request of a known type.
    Request(Request),
    /// A JSON object whose `type` is not one the host knows.
    Unknown { type_tag: String },
    /// Payload that is not a usable request.
    Malformed {
        type_tag: Option<String>,
        error: String,
    },
}

/// Classify one frame payload.
///
/// Never fails: anything that is not a request comes back as
/// [`Inbound::Unknown`] or [`Inbound::Malformed`].
pub fn decode_inbound(payload: &[u8]) -> Inbound {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(e) => {
            return Inbound::Malformed {
                type_tag: None,
                error: format!("Invalid JSON: {}", e),
            }
        }
    };

    let type_tag = match value.as_object() {
        None => {
            return Inbound::Malformed {
                type_tag: None,
                error: "Message is not a JSON object".to_string(),
            }
        }
        Some(object) => match object.get("type").and_then(Value::as_str) {
            Some(tag) => tag.to_string(),
            None => {
                return Inbound::Malformed {
                    type_tag: None,
                    error: "Message has no string \"type\" field".to_string(),
                }
            }
        },
    };

    if RequestKind::from_tag(&type_tag).is_none() {
        return Inbound::Unknown { type_tag };
    }

    match serde_json::from_value::<Request>(value) {
        Ok(request) => Inbound::Request(request),
        Err(e) => Inbound::Malformed {
            error: format!("Invalid {} request: {}", type_tag, e),
            type_tag: Some(type_tag),
        },
    }
}
