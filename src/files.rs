/*
 * Tether - Minimal Sandboxed Tool Agent
 * File Path: src/files.rs
 * Responsibility: Sandboxed file reading, writing and directory listing
 */

use crate::error::{ToolError, ToolOutcome};
use crate::guard::Sandbox;
use std::fs;
use std::io;

pub const DEFAULT_MAX_FILE_CHARS: usize = 10_000;

/// Read a file under the sandbox, truncating past `max_chars` characters.
///
/// Bytes are decoded lossily, so binary or mis-encoded files still come back as
/// text instead of failing.
pub fn read_file(sandbox: &Sandbox, path: &str, max_chars: usize) -> ToolOutcome {
    let full_path = sandbox.resolve(path)?;

    let meta = match fs::metadata(&full_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ToolError::NotFound { path: path.to_string() });
        }
        Err(e) => return Err(ToolError::io("Reading", path, e)),
    };
    if !meta.is_file() {
        return Err(ToolError::NotAFile { path: path.to_string() });
    }

    let bytes = fs::read(&full_path).map_err(|e| ToolError::io("Reading", path, e))?;
    let content = String::from_utf8_lossy(&bytes);
    Ok(truncate_chars(&content, path, max_chars))
}

fn truncate_chars(content: &str, path: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}\n[...File \"{}\" truncated at {} characters]",
            &content[..cut],
            path,
            max_chars
        ),
        None => content.to_string(),
    }
}

/// Write `content` to a file under the sandbox, replacing whatever was there.
pub fn write_file(sandbox: &Sandbox, path: &str, content: &str) -> ToolOutcome {
    let full_path = sandbox.resolve(path)?;
    if full_path == sandbox.root() || full_path.is_dir() {
        return Err(ToolError::NotAFile { path: path.to_string() });
    }

    if let Some(parent) = full_path.parent() {
        fs::create_dir_all(parent).map_err(|e| ToolError::io("Creating directories for", path, e))?;
    }

    fs::write(&full_path, content).map_err(|e| ToolError::io("Writing", path, e))?;
    Ok(format!(
        "Successfully wrote to \"{}\" ({} characters written)",
        path,
        content.chars().count()
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
    /// Bytes on disk. For directories this is the native directory-entry size,
    /// not the total size of their contents.
    pub size: u64,
}

/// List the immediate children of a directory under the sandbox, sorted by name.
pub fn list_dir(sandbox: &Sandbox, path: &str) -> ToolOutcome<Vec<DirEntryInfo>> {
    let full_path = sandbox.resolve(path)?;

    let meta = match fs::metadata(&full_path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ToolError::NotFound { path: path.to_string() });
        }
        Err(e) => return Err(ToolError::io("Listing", path, e)),
    };
    if !meta.is_dir() {
        return Err(ToolError::NotADirectory { path: path.to_string() });
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(&full_path).map_err(|e| ToolError::io("Listing", path, e))? {
        let entry = entry.map_err(|e| ToolError::io("Listing", path, e))?;
        // Links are described, never followed.
        let meta = entry
            .path()
            .symlink_metadata()
            .map_err(|e| ToolError::io("Listing", path, e))?;
        entries.push(DirEntryInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: meta.is_dir(),
            size: meta.len(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(entries)
}

pub fn format_entries(path: &str, entries: &[DirEntryInfo]) -> String {
    if entries.is_empty() {
        return format!("Directory \"{}\" is empty.", path);
    }

    entries
        .iter()
        .map(|entry| {
            format!(
                "- {}: file_size={} bytes, is_dir={}",
                entry.name, entry.size, entry.is_dir
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
