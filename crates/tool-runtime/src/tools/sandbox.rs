//! Child-process host for `run_script`.
//!
//! Each evaluation runs in a fresh process started with [`SANDBOX_ARG`]. The
//! child reads one [`SandboxRequest`] from stdin, caps its own address space
//! and CPU time, evaluates the script and writes one reply to stdout. A script
//! that allocates past the cap aborts only the child; the parent kills the
//! child when the wall-clock timeout elapses.

use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{ExitCode, Output, Stdio};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use maidx_core::config::ToolsConfig;

use super::script::{evaluate, ScriptLimits};
use crate::tool::{ToolError, ToolErrorKind};

/// First argument that switches a binary into sandbox-host mode.
pub const SANDBOX_ARG: &str = "__script-sandbox";

/// Executable the parent starts for each script.
#[derive(Debug, Clone)]
pub struct SandboxCommand {
    program: PathBuf,
}

impl SandboxCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The running binary; its `main` must hand [`SANDBOX_ARG`] to [`serve`].
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn from_config(config: &ToolsConfig) -> io::Result<Self> {
        match &config.script_sandbox_bin {
            Some(path) => Ok(Self::new(path)),
            None => Self::current_exe(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SandboxRequest {
    script: String,
    document: String,
    max_output_bytes: usize,
    fuel: u64,
    max_memory_bytes: u64,
    cpu_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum SandboxReply {
    Ok { output: String },
    Error { kind: ToolErrorKind, message: String },
}

/// Evaluate `script` in a child process under `limits`.
pub async fn run(
    command: &SandboxCommand,
    script: &str,
    document: &str,
    limits: &ScriptLimits,
) -> Result<String, ToolError> {
    let request = SandboxRequest {
        script: script.to_string(),
        document: document.to_string(),
        max_output_bytes: limits.max_output_bytes,
        fuel: limits.fuel,
        max_memory_bytes: limits.max_memory_bytes,
        cpu_secs: limits.timeout.as_secs() + 1,
    };
    let payload = serde_json::to_vec(&request)
        .map_err(|e| ToolError::ExecutionFailed(format!("cannot encode script request: {e}")))?;

    let mut child = Command::new(&command.program)
        .arg(SANDBOX_ARG)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            ToolError::ExecutionFailed(format!(
                "cannot start script sandbox {}: {e}",
                command.program.display()
            ))
        })?;
    let stdin = child.stdin.take();

    // Dropping this future on timeout drops the child, which kills it.
    let exchange = async move {
        if let Some(mut stdin) = stdin {
            // A child that exits early closes the pipe; its status tells why.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(error = %e, "Script sandbox closed stdin early");
            }
        }
        child.wait_with_output().await
    };

    match tokio::time::timeout(limits.timeout, exchange).await {
        Ok(Ok(output)) => interpret(&output, limits),
        Ok(Err(e)) => Err(ToolError::ExecutionFailed(format!("script sandbox I/O failed: {e}"))),
        Err(_) => {
            warn!(timeout = ?limits.timeout, "Script timed out, sandbox killed");
            Err(ToolError::SandboxTimeout(format!(
                "script exceeded {} ms",
                limits.timeout.as_millis()
            )))
        }
    }
}

fn interpret(output: &Output, limits: &ScriptLimits) -> Result<String, ToolError> {
    if let Ok(reply) = serde_json::from_slice::<SandboxReply>(&output.stdout) {
        return match reply {
            SandboxReply::Ok { output } => Ok(output),
            SandboxReply::Error { kind, message } => Err(rebuild(kind, message, limits)),
        };
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("memory allocation") {
        warn!(limit_bytes = limits.max_memory_bytes, "Script exhausted its memory limit");
        return Err(ToolError::SandboxViolation(format!(
            "script exceeded the {} MiB memory limit",
            limits.max_memory_bytes / (1024 * 1024)
        )));
    }
    if killed_for_cpu(output) {
        return Err(ToolError::SandboxTimeout(
            "script exceeded its CPU time limit".to_string(),
        ));
    }
    Err(ToolError::ExecutionFailed(format!(
        "script sandbox exited with {}: {}",
        output.status,
        stderr.trim()
    )))
}

#[cfg(unix)]
fn killed_for_cpu(output: &Output) -> bool {
    use std::os::unix::process::ExitStatusExt;
    // SIGXCPU at the soft limit, SIGKILL at the hard one.
    matches!(output.status.signal(), Some(24) | Some(9))
}

#[cfg(not(unix))]
fn killed_for_cpu(_output: &Output) -> bool {
    false
}

fn rebuild(kind: ToolErrorKind, message: String, limits: &ScriptLimits) -> ToolError {
    match kind {
        ToolErrorKind::SandboxViolation => ToolError::SandboxViolation(message),
        ToolErrorKind::SandboxTimeout => ToolError::SandboxTimeout(message),
        ToolErrorKind::OutputTooLarge => ToolError::OutputTooLarge {
            limit: limits.max_output_bytes,
        },
        ToolErrorKind::InvalidArguments => ToolError::InvalidArguments(message),
        _ => ToolError::ExecutionFailed(message),
    }
}

/// Message without the kind prefix `Display` adds.
fn detail(error: &ToolError) -> String {
    match error {
        ToolError::InvalidArguments(m)
        | ToolError::SandboxViolation(m)
        | ToolError::SandboxTimeout(m)
        | ToolError::FetchFailed(m)
        | ToolError::ExecutionFailed(m)
        | ToolError::Fatal(m) => m.clone(),
        other => other.to_string(),
    }
}

// ── Child side ────────────────────────────────────────────────

/// Entry point of the sandbox host process.
///
/// Refuses to evaluate anything when the resource limits cannot be applied.
pub fn serve() -> ExitCode {
    let mut raw = Vec::new();
    if let Err(e) = io::stdin().read_to_end(&mut raw) {
        eprintln!("cannot read script request: {e}");
        return ExitCode::FAILURE;
    }
    let request: SandboxRequest = match serde_json::from_slice(&raw) {
        Ok(request) => request,
        Err(e) => {
            eprintln!("invalid script request: {e}");
            return ExitCode::FAILURE;
        }
    };
    drop(raw);

    if let Err(e) = apply_limits(request.max_memory_bytes, request.cpu_secs) {
        eprintln!("cannot apply resource limits: {e}");
        return ExitCode::FAILURE;
    }

    let limits = ScriptLimits {
        max_output_bytes: request.max_output_bytes,
        fuel: request.fuel,
        max_memory_bytes: request.max_memory_bytes,
        ..ScriptLimits::default()
    };
    let reply = match evaluate(&request.script, &request.document, &limits) {
        Ok(output) => SandboxReply::Ok { output },
        Err(e) => SandboxReply::Error {
            kind: e.kind(),
            message: detail(&e),
        },
    };

    match serde_json::to_writer(io::stdout().lock(), &reply) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("cannot write script reply: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(unix)]
fn apply_limits(max_memory_bytes: u64, cpu_secs: u64) -> io::Result<()> {
    use rlimit::Resource;
    rlimit::setrlimit(Resource::AS, max_memory_bytes, max_memory_bytes)?;
    rlimit::setrlimit(Resource::CPU, cpu_secs, cpu_secs + 1)?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_limits(_max_memory_bytes: u64, _cpu_secs: u64) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process resource limits are only available on unix",
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(raw_status: i32, stdout: &str, stderr: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(raw_status),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_reply_round_trips_error_kind() {
        let limits = ScriptLimits::default();
        let ok = output(0, r#"{"status":"ok","output":"2024-01-05"}"#, "");
        assert_eq!(interpret(&ok, &limits).unwrap(), "2024-01-05");

        let err = output(
            0,
            r#"{"status":"error","kind":"sandbox_violation","message":"unknown function open"}"#,
            "",
        );
        let err = interpret(&err, &limits).unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::SandboxViolation);
        assert_eq!(err.to_string(), "Sandbox violation: unknown function open");
    }

    #[test]
    fn test_crashed_child_is_classified() {
        let limits = ScriptLimits::default();

        // SIGABRT after a failed allocation.
        let oom = output(6, "", "memory allocation of 100000000 bytes failed\n");
        let err = interpret(&oom, &limits).unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::SandboxViolation);
        assert!(err.to_string().contains("256 MiB memory limit"));

        let cpu = output(24, "", "");
        assert_eq!(interpret(&cpu, &limits).unwrap_err().kind(), ToolErrorKind::SandboxTimeout);

        // Exit code 1 is encoded in the high byte of the raw wait status.
        let refused = output(1 << 8, "", "cannot apply resource limits: denied");
        let err = interpret(&refused, &limits).unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::ExecutionFailed);
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_detail_strips_kind_prefix() {
        assert_eq!(detail(&ToolError::SandboxTimeout("slow".to_string())), "slow");
        assert_eq!(
            detail(&ToolError::OutputTooLarge { limit: 8 }),
            "Output too large: exceeded 8 bytes"
        );
    }
}
