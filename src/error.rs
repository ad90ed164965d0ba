/*
 * Tether - Minimal Sandboxed Tool Agent
 * File Path: src/error.rs
 * Responsibility: Error taxonomy shared by every sandboxed tool
 */

use thiserror::Error;

/// Every failure a tool can report back to the planner.
///
/// Tool errors are data: the dispatcher renders them into the conversation and
/// the loop keeps going. The `Display` text is the contract the planner sees.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Error: Cannot access \"{path}\" as it is outside the permitted root")]
    PathOutsideRoot { path: String },

    #[error("Error: File not found: \"{path}\"")]
    NotFound { path: String },

    #[error("Error: \"{path}\" is not a regular file")]
    NotAFile { path: String },

    #[error("Error: \"{path}\" is not a directory")]
    NotADirectory { path: String },

    #[error("Error: \"{path}\" is not a .{extension} file")]
    InvalidFileType { path: String, extension: String },

    #[error("Error: Execution of \"{path}\" timed out after {secs}s")]
    Timeout { path: String, secs: u64 },

    #[error("Error: Failed to start `{interpreter}` for \"{path}\": {message}")]
    SpawnFailure {
        path: String,
        interpreter: String,
        message: String,
    },

    #[error("Error: {action} \"{path}\" failed: {message}")]
    Io {
        action: &'static str,
        path: String,
        message: String,
    },

    #[error("Error: Unknown function: {name}")]
    UnknownTool { name: String },

    #[error("Error: Invalid arguments for `{tool}`: {message}")]
    MalformedArguments { tool: String, message: String },
}

impl ToolError {
    pub(crate) fn io(action: &'static str, path: &str, err: std::io::Error) -> Self {
        ToolError::Io {
            action,
            path: path.to_string(),
            message: err.to_string(),
        }
    }
}

pub type ToolOutcome<T = String> = Result<T, ToolError>;
