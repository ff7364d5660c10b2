//! Sandboxed execution of untrusted code.
//!
//! Each invocation materializes the code into a fresh temporary
//! directory, spawns a Node.js subprocess with a bounded heap, and
//! supervises it under a wall-clock timeout with per-stream output
//! ceilings. The temporary directory is removed on every exit path —
//! normal completion, timeout kill, or spawn failure — by tying its
//! lifetime to a [`tempfile::TempDir`] owned by the invocation.
//!
//! A non-zero exit code is a normal, non-throwing result: the
//! subprocess's own failure belongs to the caller. Only
//! infrastructure-level errors (spawn, pipe or temp-file I/O) surface
//! as [`ExecError`].

mod imports;

pub use imports::{check_modules, scan_modules};

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::SandboxLimits;
use crate::error::ExecError;

/// Chunk size for draining the child's pipes.
const READ_CHUNK: usize = 4096;

/// Outcome of one sandboxed run.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit code of the subprocess; `-1` when it was killed by a
    /// signal (including the timeout kill).
    pub exit_code: i32,
    pub timed_out: bool,
    /// Set when either stream hit the output ceiling and excess
    /// bytes were dropped.
    pub truncated: bool,
}

impl SandboxResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// Node.js subprocess sandbox.
pub struct NodeSandbox {
    limits: SandboxLimits,
}

impl NodeSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    /// Runs `code` under the configured limits. The static import
    /// check rejects disallowed modules before any process exists.
    pub async fn run(
        &self,
        code: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
    ) -> Result<SandboxResult, ExecError> {
        imports::check_modules(code, &self.limits.allowed_modules)?;

        let dir = tempfile::Builder::new()
            .prefix("stride-sandbox-")
            .tempdir()
            .map_err(ExecError::Sandbox)?;
        self.run_in(dir, code, cwd, env).await
    }

    /// Executes the prepared code inside `dir`. Takes ownership of the
    /// temp dir so it is removed on every return path, including the
    /// early `Err` ones.
    pub(crate) async fn run_in(
        &self,
        dir: TempDir,
        code: &str,
        cwd: &Path,
        env: &HashMap<String, String>,
    ) -> Result<SandboxResult, ExecError> {
        let script = dir.path().join("main.js");
        tokio::fs::write(&script, code)
            .await
            .map_err(ExecError::Sandbox)?;

        let mut child = Command::new("node")
            .arg(format!(
                "--max-old-space-size={}",
                self.limits.memory_limit_mb
            ))
            .arg(&script)
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecError::Sandbox)?;

        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Sandbox(std::io::Error::other("stdout pipe unavailable")))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::Sandbox(std::io::Error::other("stderr pipe unavailable")))?;

        let cap = self.limits.max_output_bytes;
        let mut stdout_buf: Vec<u8> = Vec::new();
        let mut stderr_buf: Vec<u8> = Vec::new();
        let mut tmp_stdout = [0u8; READ_CHUNK];
        let mut tmp_stderr = [0u8; READ_CHUNK];
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut truncated = false;
        let mut timed_out = false;
        let mut exit_code: Option<i32> = None;
        let mut child_done = false;

        let timeout = tokio::time::sleep(Duration::from_millis(self.limits.timeout_ms));
        tokio::pin!(timeout);

        // Drive the child, its pipes, and the deadline concurrently.
        // After a timeout kill the loop keeps draining until both pipes
        // reach EOF and the child is reaped.
        while stdout_open || stderr_open || !child_done {
            tokio::select! {
                _ = &mut timeout, if !child_done && !timed_out => {
                    warn!(
                        "Sandboxed code exceeded {}ms, killing subprocess",
                        self.limits.timeout_ms
                    );
                    let _ = child.start_kill();
                    timed_out = true;
                }

                wait = child.wait(), if !child_done => {
                    match wait {
                        Ok(status) => exit_code = status.code(),
                        Err(e) => return Err(ExecError::Sandbox(e)),
                    }
                    child_done = true;
                }

                read = stdout_pipe.read(&mut tmp_stdout), if stdout_open => {
                    match read {
                        Ok(0) => stdout_open = false,
                        Ok(n) => {
                            truncated |= append_capped(&mut stdout_buf, &tmp_stdout[..n], cap);
                        }
                        Err(e) => return Err(ExecError::Sandbox(e)),
                    }
                }

                read = stderr_pipe.read(&mut tmp_stderr), if stderr_open => {
                    match read {
                        Ok(0) => stderr_open = false,
                        Ok(n) => {
                            truncated |= append_capped(&mut stderr_buf, &tmp_stderr[..n], cap);
                        }
                        Err(e) => return Err(ExecError::Sandbox(e)),
                    }
                }
            }
        }

        let result = SandboxResult {
            stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
            exit_code: exit_code.unwrap_or(-1),
            timed_out,
            truncated,
        };
        debug!(
            "Sandbox run finished: exit={} timed_out={} truncated={}",
            result.exit_code, result.timed_out, result.truncated
        );
        Ok(result)
        // `dir` dropped here: temp file and directory removed
    }
}

/// Appends `chunk` to `buf` up to `cap` total bytes. Returns true if
/// anything was dropped.
fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], cap: usize) -> bool {
    let room = cap.saturating_sub(buf.len());
    if chunk.len() <= room {
        buf.extend_from_slice(chunk);
        false
    } else {
        buf.extend_from_slice(&chunk[..room]);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_available() -> bool {
        std::process::Command::new("node")
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    fn limits() -> SandboxLimits {
        SandboxLimits {
            timeout_ms: 5_000,
            max_output_bytes: 4096,
            ..SandboxLimits::default()
        }
    }

    #[test]
    fn test_append_capped() {
        let mut buf = Vec::new();
        assert!(!append_capped(&mut buf, b"hello", 10));
        assert_eq!(buf, b"hello");
        assert!(append_capped(&mut buf, b"world!!", 10));
        assert_eq!(buf, b"helloworld");
        // already full: everything dropped
        assert!(append_capped(&mut buf, b"x", 10));
        assert_eq!(buf.len(), 10);
    }

    #[tokio::test]
    async fn test_module_violation_rejected_before_spawn() {
        let sandbox = NodeSandbox::new(limits());
        let cwd = std::env::temp_dir();
        let err = sandbox
            .run("require('net')", &cwd, &HashMap::new())
            .await
            .unwrap_err();
        match err {
            ExecError::ModuleViolation { modules } => assert_eq!(modules, vec!["net"]),
            other => panic!("expected ModuleViolation, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        if !node_available() {
            eprintln!("node not installed, skipping");
            return;
        }
        let sandbox = NodeSandbox::new(limits());
        let dir = tempfile::tempdir().unwrap();
        let result = sandbox
            .run("console.log('out'); console.error('err');", dir.path(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 0);
        assert!(result.success());
        assert!(result.stdout.contains("out"));
        assert!(result.stderr.contains("err"));
        assert!(!result.timed_out);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_result_not_an_error() {
        if !node_available() {
            eprintln!("node not installed, skipping");
            return;
        }
        let sandbox = NodeSandbox::new(limits());
        let dir = tempfile::tempdir().unwrap();
        let result = sandbox
            .run("process.exit(3)", dir.path(), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_timeout_kills_and_cleans_up() {
        if !node_available() {
            eprintln!("node not installed, skipping");
            return;
        }
        let sandbox = NodeSandbox::new(SandboxLimits {
            timeout_ms: 300,
            ..limits()
        });
        let dir = tempfile::tempdir().unwrap();

        let temp = tempfile::Builder::new()
            .prefix("stride-sandbox-")
            .tempdir()
            .unwrap();
        let temp_path = temp.path().to_path_buf();

        let result = sandbox
            .run_in(temp, "setTimeout(() => {}, 60000);", dir.path(), &HashMap::new())
            .await
            .unwrap();
        assert!(result.timed_out);
        assert_ne!(result.exit_code, 0);
        // temp dir removed even though the child was killed
        assert!(!temp_path.exists());
    }

    #[tokio::test]
    async fn test_output_truncated_at_cap() {
        if !node_available() {
            eprintln!("node not installed, skipping");
            return;
        }
        let sandbox = NodeSandbox::new(SandboxLimits {
            max_output_bytes: 64,
            ..limits()
        });
        let dir = tempfile::tempdir().unwrap();
        let result = sandbox
            .run(
                "for (let i = 0; i < 100; i++) console.log('line', i);",
                dir.path(),
                &HashMap::new(),
            )
            .await
            .unwrap();
        assert!(result.truncated);
        assert!(result.stdout.len() <= 64);
    }

    #[tokio::test]
    async fn test_relative_require_passes_static_check() {
        if !node_available() {
            eprintln!("node not installed, skipping");
            return;
        }
        // the static check lets './util' through; the process then
        // fails at runtime because the file does not exist, which is a
        // normal non-zero exit
        let sandbox = NodeSandbox::new(limits());
        let dir = tempfile::tempdir().unwrap();
        let result = sandbox
            .run("require('./util');", dir.path(), &HashMap::new())
            .await
            .unwrap();
        assert_ne!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_env_is_passed_through() {
        if !node_available() {
            eprintln!("node not installed, skipping");
            return;
        }
        let sandbox = NodeSandbox::new(limits());
        let dir = tempfile::tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("STRIDE_MARKER".to_string(), "42".to_string());
        let result = sandbox
            .run(
                "console.log(process.env.STRIDE_MARKER);",
                dir.path(),
                &env,
            )
            .await
            .unwrap();
        assert!(result.stdout.contains("42"));
    }
}
