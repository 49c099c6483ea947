//! Native dialog capability: `pickFolder` and `showSaveAsDialog`.
//!
//! The dispatcher only sees [`NativeDialog`]. [`SystemDialog`] is the real
//! implementation and shells out to whatever the platform offers:
//!
//! - macOS: `osascript` (AppleScript `choose folder` / `choose file name`)
//! - Windows: `powershell` with `System.Windows.Forms`
//! - other Unix: `zenity`, falling back to `kdialog`
//!
//! Each program prints the chosen path on stdout. Cancelling exits with
//! status 1 and prints nothing (osascript reports error -128 instead).

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;

use crate::message::{ErrorCode, Request, RequestKind, Response};

use super::folders::{display, expand_path};
use super::{BoxFuture, Handled, Handler, HandlerResult};

/// What the user did with a dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogOutcome {
    Selected(PathBuf),
    Cancelled,
    Failed(String),
}

/// Something that can show native dialogs.
pub trait NativeDialog: Send + Sync + 'static {
    /// Let the user choose a folder, optionally starting in `start`.
    fn pick_folder(&self, start: Option<PathBuf>) -> BoxFuture<'static, DialogOutcome>;

    /// Let the user choose where to save `filename`.
    fn save_file(
        &self,
        filename: String,
        directory: Option<PathBuf>,
    ) -> BoxFuture<'static, DialogOutcome>;
}

/// Routes dialog requests to a [`NativeDialog`].
pub struct DialogHandler {
    dialog: Arc<dyn NativeDialog>,
}

impl DialogHandler {
    pub fn new(dialog: Arc<dyn NativeDialog>) -> Self {
        Self { dialog }
    }
}

impl Handler for DialogHandler {
    fn name(&self) -> &str {
        "dialog"
    }

    fn kinds(&self) -> &[RequestKind] {
        &[RequestKind::PickFolder, RequestKind::ShowSaveAsDialog]
    }

    fn handle(&self, request: Request) -> BoxFuture<'static, HandlerResult> {
        let dialog = Arc::clone(&self.dialog);
        Box::pin(async move {
            let outcome = match request {
                Request::PickFolder { start_path } => {
                    dialog.pick_folder(non_empty(start_path)).await
                }
                Request::ShowSaveAsDialog {
                    filename,
                    default_directory,
                } => {
                    dialog
                        .save_file(filename, non_empty(default_directory))
                        .await
                }
                _ => return Ok(Handled::NotHandled),
            };
            Ok(Handled::Response(outcome_response(outcome)))
        })
    }
}

fn non_empty(path: Option<String>) -> Option<PathBuf> {
    path.filter(|p| !p.trim().is_empty())
        .map(|p| expand_path(&p))
}

fn outcome_response(outcome: DialogOutcome) -> Response {
    match outcome {
        DialogOutcome::Selected(path) => Response::ok().with("path", display(&path)),
        DialogOutcome::Cancelled => Response::cancelled(),
        DialogOutcome::Failed(reason) => {
            tracing::warn!("dialog failed: {}", reason);
            Response::failure(ErrorCode::DialogError, reason)
        }
    }
}

/// A dialog to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogRequest {
    PickFolder {
        start: Option<PathBuf>,
    },
    SaveFile {
        filename: String,
        directory: Option<PathBuf>,
    },
}

/// One program invocation that shows a dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl DialogCommand {
    fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
        }
    }
}

/// Dialogs through the platform's own tools.
#[derive(Debug, Default, Clone)]
pub struct SystemDialog;

impl SystemDialog {
    pub fn new() -> Self {
        Self
    }

    /// Try each candidate program in turn; a missing program moves on to
    /// the next.
    async fn show(request: DialogRequest) -> DialogOutcome {
        let candidates = platform_commands(&request);

        for command in candidates {
            tracing::debug!(program = %command.program, "showing dialog");

            let output = Command::new(&command.program)
                .args(&command.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await;

            match output {
                Ok(output) => {
                    return interpret_output(
                        output.status.code(),
                        &String::from_utf8_lossy(&output.stdout),
                        &String::from_utf8_lossy(&output.stderr),
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(program = %command.program, "dialog program not installed");
                }
                Err(e) => {
                    return DialogOutcome::Failed(format!(
                        "failed to run {}: {}",
                        command.program, e
                    ));
                }
            }
        }

        DialogOutcome::Failed("no native dialog program available".to_string())
    }
}

impl NativeDialog for SystemDialog {
    fn pick_folder(&self, start: Option<PathBuf>) -> BoxFuture<'static, DialogOutcome> {
        Box::pin(Self::show(DialogRequest::PickFolder { start }))
    }

    fn save_file(
        &self,
        filename: String,
        directory: Option<PathBuf>,
    ) -> BoxFuture<'static, DialogOutcome> {
        Box::pin(Self::show(DialogRequest::SaveFile {
            filename,
            directory,
        }))
    }
}

/// Candidate commands for the current platform, in the order to try them.
pub fn platform_commands(request: &DialogRequest) -> Vec<DialogCommand> {
    if cfg!(target_os = "macos") {
        vec![macos_command(request)]
    } else if cfg!(windows) {
        vec![windows_command(request)]
    } else {
        unix_commands(request)
    }
}

/// Map a dialog program's exit to an outcome.
pub fn interpret_output(code: Option<i32>, stdout: &str, stderr: &str) -> DialogOutcome {
    let selected = stdout.trim_end_matches(['\r', '\n']);

    if code == Some(0) {
        return if selected.is_empty() {
            DialogOutcome::Cancelled
        } else {
            DialogOutcome::Selected(PathBuf::from(selected))
        };
    }

    if stderr.contains("-128") || (code == Some(1) && selected.is_empty() && stderr.trim().is_empty())
    {
        return DialogOutcome::Cancelled;
    }

    let detail = stderr.trim();
    match (code, detail.is_empty()) {
        (_, false) => DialogOutcome::Failed(detail.to_string()),
        (Some(code), true) => DialogOutcome::Failed(format!("dialog exited with status {}", code)),
        (None, true) => DialogOutcome::Failed("dialog terminated by signal".to_string()),
    }
}

fn applescript_string(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn powershell_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn macos_command(request: &DialogRequest) -> DialogCommand {
    let script = match request {
        DialogRequest::PickFolder { start } => {
            let mut script = String::from("POSIX path of (choose folder with prompt \"Select a folder\"");
            if let Some(start) = start {
                script.push_str(" default location POSIX file ");
                script.push_str(&applescript_string(&display(start)));
            }
            script.push(')');
            script
        }
        DialogRequest::SaveFile {
            filename,
            directory,
        } => {
            let mut script = String::from("POSIX path of (choose file name with prompt \"Save as\"");
            script.push_str(" default name ");
            script.push_str(&applescript_string(filename));
            if let Some(directory) = directory {
                script.push_str(" default location POSIX file ");
                script.push_str(&applescript_string(&display(directory)));
            }
            script.push(')');
            script
        }
    };

    DialogCommand::new("osascript", vec!["-e".to_string(), script])
}

pub(crate) fn windows_command(request: &DialogRequest) -> DialogCommand {
    let mut script = String::from(
        "[Console]::OutputEncoding = [System.Text.Encoding]::UTF8; \
         Add-Type -AssemblyName System.Windows.Forms; ",
    );

    match request {
        DialogRequest::PickFolder { start } => {
            script.push_str("$d = New-Object System.Windows.Forms.FolderBrowserDialog; ");
            script.push_str("$d.Description = 'Select a folder'; ");
            if let Some(start) = start {
                script.push_str(&format!("$d.SelectedPath = {}; ", powershell_string(&display(start))));
            }
            script.push_str("if ($d.ShowDialog() -eq 'OK') { Write-Output $d.SelectedPath } else { exit 1 }");
        }
        DialogRequest::SaveFile {
            filename,
            directory,
        } => {
            script.push_str("$d = New-Object System.Windows.Forms.SaveFileDialog; ");
            script.push_str(&format!("$d.FileName = {}; ", powershell_string(filename)));
            if let Some(directory) = directory {
                script.push_str(&format!(
                    "$d.InitialDirectory = {}; ",
                    powershell_string(&display(directory))
                ));
            }
            script.push_str("if ($d.ShowDialog() -eq 'OK') { Write-Output $d.FileName } else { exit 1 }");
        }
    }

    DialogCommand::new(
        "powershell",
        vec![
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-STA".to_string(),
            "-Command".to_string(),
            script,
        ],
    )
}

pub(crate) fn unix_commands(request: &DialogRequest) -> Vec<DialogCommand> {
    match request {
        DialogRequest::PickFolder { start } => {
            let mut zenity = vec![
                "--file-selection".to_string(),
                "--directory".to_string(),
                "--title=Select a folder".to_string(),
            ];
            let mut kdialog = vec!["--getexistingdirectory".to_string()];
            if let Some(start) = start {
                // zenity treats a trailing separator as "inside this folder".
                zenity.push(format!("--filename={}/", display(start).trim_end_matches('/')));
                kdialog.push(display(start));
            }
            vec![
                DialogCommand::new("zenity", zenity),
                DialogCommand::new("kdialog", kdialog),
            ]
        }
        DialogRequest::SaveFile {
            filename,
            directory,
        } => {
            let suggested = match directory {
                Some(directory) => display(&directory.join(filename)),
                None => filename.clone(),
            };
            vec![
                DialogCommand::new(
                    "zenity",
                    vec![
                        "--file-selection".to_string(),
                        "--save".to_string(),
                        "--confirm-overwrite".to_string(),
                        "--title=Save as".to_string(),
                        format!("--filename={}", suggested),
                    ],
                ),
                DialogCommand::new("kdialog", vec!["--getsavefilename".to_string(), suggested]),
            ]
        }
    }
}
