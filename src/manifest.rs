//! Native messaging host manifest.
//!
//! Browsers find the host through a small JSON file registered per user.
//! Chromium-based browsers list extension origins in `allowed_origins`,
//! Firefox lists extension ids in `allowed_extensions`.
//!
//! # Example
//!
//! ```
//! use native_bridge::manifest::HostManifest;
//!
//! let manifest = HostManifest::new("com.example.native_bridge", "/opt/bridge/native-bridge-host")
//!     .allow("chrome-extension://abcdefghijklmnopabcdefghijklmnop")
//!     .to_json()
//!     .unwrap();
//! assert!(manifest.contains("\"type\": \"stdio\""));
//! ```

use serde::Serialize;

use crate::error::{BridgeError, Result};

const CHROME_ORIGIN_PREFIX: &str = "chrome-extension://";

/// Manifest describing the host to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostManifest {
    pub name: String,
    pub description: String,
    pub path: String,
    #[serde(rename = "type")]
    pub transport: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_origins: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_extensions: Vec<String>,
}

impl HostManifest {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "Native bridge for folder and file operations".to_string(),
            path: path.into(),
            transport: "stdio".to_string(),
            allowed_origins: Vec::new(),
            allowed_extensions: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Allow an extension. `chrome-extension://` origins go to
    /// `allowed_origins` (with the trailing `/` browsers require); anything
    /// else is taken as a Firefox extension id.
    pub fn allow(mut self, extension: &str) -> Self {
        let extension = extension.trim();
        if extension.starts_with(CHROME_ORIGIN_PREFIX) {
            let origin = format!("{}/", extension.trim_end_matches('/'));
            if !self.allowed_origins.contains(&origin) {
                self.allowed_origins.push(origin);
            }
        } else if !self.allowed_extensions.iter().any(|e| e == extension) {
            self.allowed_extensions.push(extension.to_string());
        }
        self
    }

    /// Check the fields browsers are strict about.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_host_name(&self.name) {
            return Err(BridgeError::Config(format!(
                "host name {:?} must be lowercase alphanumerics, '_' and '.' segments",
                self.name
            )));
        }
        if self.path.is_empty() {
            return Err(BridgeError::Config("host path must not be empty".into()));
        }
        if self.allowed_origins.is_empty() && self.allowed_extensions.is_empty() {
            return Err(BridgeError::Config("no extension is allowed to connect".into()));
        }
        Ok(())
    }

    /// Pretty-printed manifest JSON, after validation.
    pub fn to_json(&self) -> Result<String> {
        self.validate()?;
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Dot-separated segments of `[a-z0-9_]`, no empty segment.
fn is_valid_host_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
}
