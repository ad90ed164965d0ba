/*
 * Tether - Minimal Sandboxed Tool Agent
 * File Path: src/tools.rs
 * Responsibility: Tool registry, argument decoding and fault-proof dispatch
 */

use crate::error::{ToolError, ToolOutcome};
use crate::files;
use crate::guard::Sandbox;
use crate::llm::{self, ToolCallRequest};
use crate::runner::{self, RunnerSettings};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

/// Argument keys that would name a root. The dispatcher owns the root, so these
/// are dropped from whatever the planner sends.
const RESERVED_ROOT_KEYS: &[&str] = &["root", "working_directory"];

/// The closed set of tools the planner can call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    List,
    Read,
    Write,
    Run,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [ToolKind::List, ToolKind::Read, ToolKind::Write, ToolKind::Run];

    /// Look up a tool by its declared name or by its legacy alias.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "list" | "get_files_info" => Some(ToolKind::List),
            "read" | "get_file_content" => Some(ToolKind::Read),
            "write" | "write_file" => Some(ToolKind::Write),
            "run" | "run_python_file" => Some(ToolKind::Run),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::List => "list",
            ToolKind::Read => "read",
            ToolKind::Write => "write",
            ToolKind::Run => "run",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    #[serde(default, alias = "directory")]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadArgs {
    #[serde(alias = "file_path")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteArgs {
    #[serde(alias = "file_path")]
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct RunArgs {
    #[serde(alias = "file_path")]
    path: String,
    #[serde(default)]
    args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolPayload {
    Output(String),
    Error(String),
}

/// The outcome of one dispatched call, ready to go back to the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub name: String,
    pub payload: ToolPayload,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: ToolPayload::Output(output.into()),
        }
    }

    pub fn error(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: ToolPayload::Error(output.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ToolPayload::Error(_))
    }

    pub fn text(&self) -> &str {
        match &self.payload {
            ToolPayload::Output(text) | ToolPayload::Error(text) => text,
        }
    }

    /// Render as a Gemini `functionResponse` part.
    pub fn to_part(&self) -> llm::MultimodalPart {
        let response = match &self.payload {
            ToolPayload::Output(text) => json!({ "result": text }),
            ToolPayload::Error(text) => json!({ "error": text }),
        };
        llm::MultimodalPart::function_response(&self.name, response)
    }
}

#[derive(Debug, Clone)]
struct DispatchContext {
    sandbox: Sandbox,
    runner: RunnerSettings,
    max_file_chars: usize,
}

/// Routes planner calls to the sandboxed tools.
///
/// Holds the one sandbox every call runs against; nothing the planner sends can
/// change it.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    ctx: Arc<DispatchContext>,
}

impl Dispatcher {
    pub fn new(sandbox: Sandbox, runner: RunnerSettings, max_file_chars: usize) -> Self {
        Self {
            ctx: Arc::new(DispatchContext {
                sandbox,
                runner,
                max_file_chars,
            }),
        }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.ctx.sandbox
    }

    pub fn runner_settings(&self) -> &RunnerSettings {
        &self.ctx.runner
    }

    /// Execute one call. Never fails and never panics: every problem, including
    /// a panic inside a tool, comes back as an error result.
    pub async fn dispatch(&self, request: &ToolCallRequest) -> ToolResult {
        let Some(kind) = ToolKind::from_name(&request.name) else {
            tracing::warn!(tool = %request.name, "planner requested an unknown tool");
            let err = ToolError::UnknownTool {
                name: request.name.clone(),
            };
            return ToolResult::error(&request.name, err.to_string());
        };

        let args = strip_root_override(&request.args);
        tracing::debug!(tool = kind.name(), args = %args, "dispatching tool call");

        let ctx = Arc::clone(&self.ctx);
        let handle = tokio::spawn(async move { invoke(kind, &ctx, args).await });

        match handle.await {
            Ok(Ok(output)) => ToolResult::success(&request.name, output),
            Ok(Err(err)) => ToolResult::error(&request.name, err.to_string()),
            Err(join_err) => {
                tracing::error!(tool = kind.name(), "tool execution aborted: {}", join_err);
                ToolResult::error(
                    &request.name,
                    format!("Error executing {}: {}", request.name, join_err),
                )
            }
        }
    }
}

fn strip_root_override(args: &Value) -> Value {
    match args {
        Value::Object(map) => {
            let mut map = map.clone();
            for key in RESERVED_ROOT_KEYS {
                if map.remove(*key).is_some() {
                    tracing::warn!(key, "ignoring planner-supplied root argument");
                }
            }
            Value::Object(map)
        }
        Value::Null => json!({}),
        other => other.clone(),
    }
}

fn decode<T: DeserializeOwned>(kind: ToolKind, args: Value) -> ToolOutcome<T> {
    serde_json::from_value(args).map_err(|e| ToolError::MalformedArguments {
        tool: kind.name().to_string(),
        message: e.to_string(),
    })
}

async fn invoke(kind: ToolKind, ctx: &DispatchContext, args: Value) -> ToolOutcome {
    match kind {
        ToolKind::List => {
            let args: ListArgs = decode(kind, args)?;
            let path = args.path.filter(|p| !p.is_empty()).unwrap_or_else(|| ".".to_string());
            let entries = files::list_dir(&ctx.sandbox, &path)?;
            Ok(files::format_entries(&path, &entries))
        }
        ToolKind::Read => {
            let args: ReadArgs = decode(kind, args)?;
            files::read_file(&ctx.sandbox, &args.path, ctx.max_file_chars)
        }
        ToolKind::Write => {
            let args: WriteArgs = decode(kind, args)?;
            files::write_file(&ctx.sandbox, &args.path, &args.content)
        }
        ToolKind::Run => {
            let args: RunArgs = decode(kind, args)?;
            runner::run_script(&ctx.sandbox, &ctx.runner, &args.path, &args.args).await
        }
    }
}

/// Declarations for every tool, in Gemini `functionDeclarations` shape.
///
/// The root is never a parameter: the planner only ever names relative paths.
pub fn tool_definitions(runner: &RunnerSettings) -> Value {
    json!([
        {
            "name": ToolKind::List.name(),
            "description": "List files and directories in a directory with their sizes, relative to the working directory.",
            "parameters": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "Directory to list, relative to the working directory. Defaults to the working directory itself." }
                }
            }
        },
        {
            "name": ToolKind::Read.name(),
            "description": "Read the text contents of a file. Long files are truncated.",
            "parameters": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File to read, relative to the working directory." }
                },
                "required": ["path"]
            }
        },
        {
            "name": ToolKind::Write.name(),
            "description": "Write or overwrite a file. Creates missing parent directories.",
            "parameters": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File to write, relative to the working directory." },
                    "content": { "type": "string", "description": "The full text to write." }
                },
                "required": ["path", "content"]
            }
        },
        {
            "name": ToolKind::Run.name(),
            "description": format!(
                "Execute a .{} file with `{}` and optional command-line arguments. Returns its output.",
                runner.extension, runner.interpreter
            ),
            "parameters": {
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": format!("The .{} file to run, relative to the working directory.", runner.extension) },
                    "args": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Arguments to pass to the script."
                    }
                },
                "required": ["path"]
            }
        }
    ])
}
