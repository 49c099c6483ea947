//! Handler module - request dispatch and the capability handlers.
//!
//! Provides:
//! - [`HandlerRegistry`] - ordered handler chain with a kind → handler table
//! - [`VersionHandler`], [`FolderHandler`], [`FileHandler`], [`DialogHandler`]
//!   - the host's capabilities
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use native_bridge::handler::{default_registry, SystemDialog};
//! use native_bridge::message::RequestKind;
//!
//! let registry = default_registry(Arc::new(SystemDialog::new()));
//! assert!(registry.is_registered(RequestKind::MoveFile));
//! ```

mod dialog;
mod files;
mod folders;
mod registry;
mod version;

use std::sync::Arc;

pub use dialog::{
    interpret_output, platform_commands, DialogCommand, DialogHandler, DialogOutcome,
    DialogRequest, NativeDialog, SystemDialog,
};
pub use files::{move_file, numbered_name, unique_destination, FileHandler};
pub use folders::{create_folder, expand_path, list_folders, verify_folder, FolderHandler};
pub use registry::{BoxFuture, FnHandler, Handled, Handler, HandlerRegistry, HandlerResult};
pub use version::{platform_name, VersionHandler, HOST_VERSION};

/// Registry with every capability the host ships, using `dialog` for the
/// native dialogs.
pub fn default_registry(dialog: Arc<dyn NativeDialog>) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(VersionHandler::new())
        .register(FolderHandler::new())
        .register(FileHandler::new())
        .register(DialogHandler::new(dialog));
    registry
}
