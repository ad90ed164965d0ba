/*
 * Tether - Minimal Sandboxed Tool Agent
 * File Path: src/guard.rs
 * Responsibility: Path containment for every filesystem and process tool
 */

use crate::error::ToolError;
use anyhow::{Context, bail};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// The single directory all tools are confined to.
///
/// The root is canonicalized once at construction, so every containment check
/// compares real paths against a real root.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root)
            .with_context(|| format!("Sandbox root {:?} cannot be resolved", root))?;
        if !canonical.is_dir() {
            bail!("Sandbox root {:?} is not a directory", canonical);
        }
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, requested: &str) -> Result<PathBuf, ToolError> {
        resolve_under(&self.root, requested)
    }
}

/// Resolve `requested` against `root`, rejecting anything that escapes it.
///
/// `requested` is always treated as relative: leading separators and drive
/// prefixes are dropped. Any `..` segment is rejected outright. Symlinks are
/// resolved through the deepest existing ancestor, so a link pointing outside
/// the root is rejected the same way as a literal escape.
pub fn resolve(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    resolve_under(&root, requested)
}

fn resolve_under(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let outside = || ToolError::PathOutsideRoot {
        path: requested.to_string(),
    };

    let joined = join_relative(root, requested).ok_or_else(outside)?;
    if !joined.starts_with(root) {
        return Err(outside());
    }

    // Rejection happens before any existence-dependent error can surface. A
    // dangling link is the only NotFound left here; anything else is a real I/O
    // failure and is reported as one.
    let real = canonicalize_existing(&joined).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => outside(),
        _ => ToolError::io("Resolving", requested, e),
    })?;
    if real.starts_with(root) {
        Ok(real)
    } else {
        Err(outside())
    }
}

fn join_relative(root: &Path, requested: &str) -> Option<PathBuf> {
    let mut joined = root.to_path_buf();
    for component in Path::new(requested).components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return None,
            Component::Normal(part) => joined.push(part),
        }
    }
    Some(joined)
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the rest.
///
/// A dangling symlink counts as existing and fails to canonicalize with
/// `NotFound`, which the caller treats as an escape.
fn canonicalize_existing(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path;
    let mut missing = Vec::new();

    loop {
        match fs::symlink_metadata(existing) {
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
                    return Err(e);
                };
                missing.push(name.to_os_string());
                existing = parent;
            }
            Err(e) => return Err(e),
        }
    }

    let mut real = fs::canonicalize(existing)?;
    for name in missing.into_iter().rev() {
        real.push(name);
    }
    Ok(real)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_resolves_nested_paths_under_root() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();

        let resolved = sandbox.resolve("pkg/calculator.py").unwrap();
        assert!(resolved.starts_with(sandbox.root()));
        assert!(resolved.ends_with("pkg/calculator.py"));

        assert_eq!(sandbox.resolve(".").unwrap(), sandbox.root());
        assert_eq!(sandbox.resolve("").unwrap(), sandbox.root());
    }

    #[test]
    fn test_rejects_parent_segments() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();

        for requested in ["../", "..", "../main.py", "pkg/../../etc", "a/b/../../../x"] {
            let err = sandbox.resolve(requested).unwrap_err();
            assert!(matches!(err, ToolError::PathOutsideRoot { .. }), "{}", requested);
        }
    }

    #[test]
    fn test_leading_separator_stays_inside_root() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();

        let resolved = sandbox.resolve("/bin").unwrap();
        assert_eq!(resolved, sandbox.root().join("bin"));
    }

    #[test]
    fn test_rejection_does_not_depend_on_existence() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();

        let missing = sandbox.resolve("../definitely-missing").unwrap_err();
        let present = sandbox.resolve("../").unwrap_err();
        assert!(matches!(missing, ToolError::PathOutsideRoot { .. }));
        assert!(matches!(present, ToolError::PathOutsideRoot { .. }));
    }

    #[test]
    fn test_free_resolve_handles_multiple_roots() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();

        assert!(resolve(first.path(), "a.txt").unwrap().starts_with(fs::canonicalize(first.path()).unwrap()));
        assert!(resolve(second.path(), "a.txt").unwrap().starts_with(fs::canonicalize(second.path()).unwrap()));
    }

    #[test]
    fn test_sandbox_requires_existing_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();

        assert!(Sandbox::new(dir.path().join("missing")).is_err());
        assert!(Sandbox::new(&file).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        let escape_target = outside.path().join("outside.txt");
        fs::write(&escape_target, "secret").unwrap();
        std::os::unix::fs::symlink(&escape_target, dir.path().join("escape.txt")).unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape_dir")).unwrap();

        let sandbox = Sandbox::new(dir.path()).unwrap();
        assert!(sandbox.resolve("escape.txt").is_err());
        assert!(sandbox.resolve("escape_dir/new.txt").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_dangling_symlink() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path().join("later.txt"), dir.path().join("dangling")).unwrap();

        let sandbox = Sandbox::new(dir.path()).unwrap();
        assert!(sandbox.resolve("dangling").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_allows_symlink_that_stays_inside() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();

        let sandbox = Sandbox::new(dir.path()).unwrap();
        let resolved = sandbox.resolve("alias/file.txt").unwrap();
        assert_eq!(resolved, sandbox.root().join("real").join("file.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_io_failures_are_not_reported_as_escapes() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("file.txt"), "x").unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();

        for requested in ["bad\0name.txt", "file.txt/child.txt"] {
            let err = sandbox.resolve(requested).unwrap_err();
            assert!(
                matches!(err, ToolError::Io { action: "Resolving", .. }),
                "{:?} -> {:?}",
                requested,
                err
            );
        }
    }
}
