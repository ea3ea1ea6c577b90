//! Interpreter process execution.
//!
//! The pipeline only talks to a [`ProcessExecutor`]. The production
//! implementation, [`TokioProcessExecutor`], writes the script to the
//! interpreter's stdin and collects its output under a controller timeout.
//! Tests substitute their own executor.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::config::InterpreterConfig;

/// One interpreter invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    /// Executable to spawn.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Text written to stdin (the script).
    pub stdin: String,
    /// Controller timeout; the process is killed when it expires.
    pub timeout: Duration,
    /// Limit for each of stdout and stderr.
    pub max_output_bytes: usize,
}

impl ProcessRequest {
    /// Request running `script` with the configured interpreter.
    pub fn for_script(interpreter: &InterpreterConfig, script: String, timeout: Duration) -> Self {
        Self {
            program: interpreter.program.clone(),
            args: interpreter.args.clone(),
            stdin: script,
            timeout,
            max_output_bytes: interpreter.max_output_bytes,
        }
    }
}

/// Output of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Captured stdout (lossy UTF-8).
    pub stdout: String,
    /// Captured stderr (lossy UTF-8).
    pub stderr: String,
    /// Exit code, `None` if killed by a signal.
    pub exit_code: Option<i32>,
    /// Wall-clock run time.
    pub duration: Duration,
}

impl ProcessOutput {
    /// `true` if the process exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Why a process did not produce output.
#[derive(Debug, thiserror::Error)]
pub enum ProcessFailure {
    /// The executable could not be started.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Executable that failed.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing the process pipes failed.
    #[error("process I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The controller timeout expired; the process was killed.
    #[error("process exceeded {}ms", .timeout.as_millis())]
    TimedOut {
        /// Timeout that expired.
        timeout: Duration,
    },

    /// A stream produced more than `max_output_bytes`.
    #[error("process {stream} exceeded {limit} bytes")]
    OutputTooLarge {
        /// `stdout` or `stderr`.
        stream: &'static str,
        /// Configured limit.
        limit: usize,
    },
}

/// Runs interpreter processes.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run `request` to completion or failure.
    async fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ProcessFailure>;
}

/// [`ProcessExecutor`] backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessExecutor;

impl TokioProcessExecutor {
    /// Create the executor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessExecutor for TokioProcessExecutor {
    async fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ProcessFailure> {
        let started = Instant::now();
        let timeout = request.timeout;
        match tokio::time::timeout(timeout, spawn_and_collect(request)).await {
            Ok(Ok((stdout, stderr, exit_code))) => Ok(ProcessOutput {
                stdout,
                stderr,
                exit_code,
                duration: started.elapsed(),
            }),
            Ok(Err(failure)) => Err(failure),
            // Dropping the future drops the child, which kills it.
            Err(_) => Err(ProcessFailure::TimedOut { timeout }),
        }
    }
}

async fn spawn_and_collect(
    request: ProcessRequest,
) -> Result<(String, String, Option<i32>), ProcessFailure> {
    let mut child = Command::new(&request.program)
        .args(&request.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProcessFailure::Spawn {
            program: request.program.clone(),
            source,
        })?;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let limit = request.max_output_bytes;

    let write_stdin = async move {
        if let Some(mut pipe) = stdin {
            pipe.write_all(request.stdin.as_bytes()).await?;
            pipe.shutdown().await?;
        }
        Ok::<_, ProcessFailure>(())
    };

    let (written, out, err) = tokio::join!(
        write_stdin,
        read_limited(stdout, limit, "stdout"),
        read_limited(stderr, limit, "stderr"),
    );
    written?;
    let (out, err) = (out?, err?);
    let status = child.wait().await?;

    Ok((
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
        status.code(),
    ))
}

async fn read_limited<R>(
    pipe: Option<R>,
    limit: usize,
    stream: &'static str,
) -> Result<Vec<u8>, ProcessFailure>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
        pipe.take(cap).read_to_end(&mut buf).await?;
    }
    if buf.len() > limit {
        return Err(ProcessFailure::OutputTooLarge { stream, limit });
    }
    Ok(buf)
}
