/*
 * Tether - Minimal Sandboxed Tool Agent
 * File Path: src/runner.rs
 * Responsibility: Run scripts inside the sandbox with a wall-clock timeout
 */

use crate::error::{ToolError, ToolOutcome};
use crate::guard::Sandbox;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SCRIPT_EXTENSION: &str = "py";
pub const DEFAULT_INTERPRETER: &str = "python3";

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Extension a file must carry to be executable, without the dot.
    pub extension: String,
    pub interpreter: String,
    pub timeout: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            extension: DEFAULT_SCRIPT_EXTENSION.to_string(),
            interpreter: DEFAULT_INTERPRETER.to_string(),
            timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was ended by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Run a script under the sandbox and render its captured output.
pub async fn run_script(
    sandbox: &Sandbox,
    settings: &RunnerSettings,
    path: &str,
    args: &[String],
) -> ToolOutcome {
    let full_path = sandbox.resolve(path)?;

    // Both the requested name and the symlink-resolved target must carry the
    // extension, and the check runs before anything can spawn.
    if !has_extension(Path::new(path), &settings.extension)
        || !has_extension(&full_path, &settings.extension)
    {
        return Err(ToolError::InvalidFileType {
            path: path.to_string(),
            extension: settings.extension.clone(),
        });
    }

    if !full_path.exists() {
        return Err(ToolError::NotFound { path: path.to_string() });
    }
    if !full_path.is_file() {
        return Err(ToolError::NotAFile { path: path.to_string() });
    }

    let outcome = execute(settings, sandbox.root(), &full_path, args)
        .await
        .map_err(|e| ToolError::SpawnFailure {
            path: path.to_string(),
            interpreter: settings.interpreter.clone(),
            message: e.to_string(),
        })?;

    if outcome.timed_out {
        tracing::warn!(path, timeout = ?settings.timeout, "script timed out and was killed");
        return Err(ToolError::Timeout {
            path: path.to_string(),
            secs: settings.timeout.as_secs(),
        });
    }

    Ok(format_outcome(&outcome))
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(extension)
}

/// Spawn `<interpreter> <script> <args...>` in `workdir` and capture everything it prints.
///
/// On timeout the whole process group is killed and the child reaped before
/// returning, so nothing keeps running behind the caller's back.
pub async fn execute(
    settings: &RunnerSettings,
    workdir: &Path,
    script: &Path,
    args: &[String],
) -> io::Result<ExecutionOutcome> {
    let mut command = Command::new(&settings.interpreter);
    command
        .arg(script)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn()?;
    // Taken now: once the child is reaped `id()` is gone, but a backgrounded
    // grandchild can still hold the pipes and keep the group alive.
    let pgid = child.id();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let captured = tokio::time::timeout(settings.timeout, async {
        tokio::try_join!(child.wait(), read_stream(stdout), read_stream(stderr))
    })
    .await;

    match captured {
        Ok(result) => {
            let (status, stdout, stderr) = result?;
            Ok(ExecutionOutcome {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_code: status.code(),
                timed_out: false,
            })
        }
        Err(_) => {
            kill_process_group(pgid);
            if let Err(e) = child.kill().await {
                tracing::debug!("child already gone after timeout: {}", e);
            }
            Ok(ExecutionOutcome {
                timed_out: true,
                ..ExecutionOutcome::default()
            })
        }
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: Option<u32>) {
    if let Some(pgid) = pgid {
        // SAFETY: killpg only sends a signal; the group was created for this child.
        unsafe {
            libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: Option<u32>) {}

async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

pub fn format_outcome(outcome: &ExecutionOutcome) -> String {
    let stdout = outcome.stdout.trim();
    let stderr = outcome.stderr.trim();

    let mut sections = Vec::new();
    if stdout.is_empty() && stderr.is_empty() {
        sections.push("No output produced.".to_string());
    }
    if !stdout.is_empty() {
        sections.push(format!("STDOUT:\n{}", stdout));
    }
    if !stderr.is_empty() {
        sections.push(format!("STDERR:\n{}", stderr));
    }
    match outcome.exit_code {
        Some(0) => {}
        Some(code) => sections.push(format!("Process exited with code {}", code)),
        None => sections.push("Process terminated by signal".to_string()),
    }

    sections.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn outcome(stdout: &str, stderr: &str, exit_code: Option<i32>) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
            timed_out: false,
        }
    }

    #[test]
    fn test_format_outcome_marks_empty_output() {
        assert_eq!(format_outcome(&outcome("", "  \n", Some(0))), "No output produced.");
        assert_eq!(
            format_outcome(&outcome("", "", Some(2))),
            "No output produced.\nProcess exited with code 2"
        );
    }

    #[test]
    fn test_format_outcome_labels_streams_and_exit_code() {
        assert_eq!(format_outcome(&outcome("8\n", "", Some(0))), "STDOUT:\n8");
        assert_eq!(
            format_outcome(&outcome("partial\n", "Traceback\n", Some(1))),
            "STDOUT:\npartial\nSTDERR:\nTraceback\nProcess exited with code 1"
        );
        assert_eq!(
            format_outcome(&outcome("", "killed", None)),
            "STDERR:\nkilled\nProcess terminated by signal"
        );
    }

    #[tokio::test]
    async fn test_rejects_wrong_extension_without_spawning() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "not a script").unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        let settings = RunnerSettings {
            interpreter: "definitely-not-an-interpreter".to_string(),
            ..RunnerSettings::default()
        };

        let err = run_script(&sandbox, &settings, "notes.txt", &[]).await.unwrap_err();
        assert_eq!(
            err,
            ToolError::InvalidFileType {
                path: "notes.txt".to_string(),
                extension: "py".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_rejects_missing_and_outside_scripts() {
        let dir = tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        let settings = RunnerSettings::default();

        assert!(matches!(
            run_script(&sandbox, &settings, "nonexistent.py", &[]).await,
            Err(ToolError::NotFound { .. })
        ));
        assert!(matches!(
            run_script(&sandbox, &settings, "../main.py", &[]).await,
            Err(ToolError::PathOutsideRoot { .. })
        ));
    }

    #[tokio::test]
    async fn test_reports_spawn_failure() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "print(1)").unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        let settings = RunnerSettings {
            interpreter: "definitely-not-an-interpreter".to_string(),
            ..RunnerSettings::default()
        };

        let err = run_script(&sandbox, &settings, "main.py", &[]).await.unwrap_err();
        assert!(matches!(err, ToolError::SpawnFailure { .. }));
    }

    #[cfg(unix)]
    fn shell_settings(timeout: Duration) -> RunnerSettings {
        RunnerSettings {
            extension: "sh".to_string(),
            interpreter: "sh".to_string(),
            timeout,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_streams_args_and_exit_code() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("calc.sh"),
            "echo \"$1 + $2\"\necho warning >&2\nexit 3\n",
        )
        .unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();

        let output = run_script(
            &sandbox,
            &shell_settings(Duration::from_secs(10)),
            "calc.sh",
            &["3".to_string(), "5".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(output, "STDOUT:\n3 + 5\nSTDERR:\nwarning\nProcess exited with code 3");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_with_root_as_working_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg").join("where.sh"), "pwd\n").unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();

        let output = run_script(&sandbox, &shell_settings(Duration::from_secs(10)), "pkg/where.sh", &[])
            .await
            .unwrap();
        assert_eq!(output, format!("STDOUT:\n{}", sandbox.root().display()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_the_script() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("slow.sh"),
            "sleep 3\necho finished > marker.txt\n",
        )
        .unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();

        let started = std::time::Instant::now();
        let err = run_script(&sandbox, &shell_settings(Duration::from_secs(1)), "slow.sh", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { secs: 1, .. }));
        assert!(started.elapsed() < Duration::from_secs(3));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!dir.path().join("marker.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_background_jobs_after_script_exits() {
        let dir = tempdir().unwrap();
        // The script itself exits at once; the background job keeps stdout open.
        fs::write(
            dir.path().join("bg.sh"),
            "(sleep 2; echo late > marker.txt) &\necho started\n",
        )
        .unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();

        let err = run_script(&sandbox, &shell_settings(Duration::from_secs(1)), "bg.sh", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { secs: 1, .. }));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!dir.path().join("marker.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rejects_symlink_to_other_file_type() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "echo should not run > ran.txt\n").unwrap();
        std::os::unix::fs::symlink(dir.path().join("notes.txt"), dir.path().join("x.sh")).unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();

        let err = run_script(&sandbox, &shell_settings(Duration::from_secs(10)), "x.sh", &[])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::InvalidFileType {
                path: "x.sh".to_string(),
                extension: "sh".to_string()
            }
        );
        assert!(!dir.path().join("ran.txt").exists());
    }
}
