//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use script_relay::executor::{ProcessExecutor, ProcessFailure, ProcessOutput, ProcessRequest};
use script_relay::protocol::{encode_error, encode_success};

/// One scripted interpreter outcome.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Exit 0 with this stdout.
    Stdout(String),
    /// Exit with `code`, printing `stderr` and nothing on stdout.
    Crash { stderr: String, code: i32 },
    /// The controller timeout expires.
    TimedOut,
    /// Wait, then produce the inner reply.
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn ok(payload: &str) -> Self {
        Self::Stdout(format!("{}\n", encode_success(payload)))
    }

    pub fn err(code: i32, message: &str) -> Self {
        Self::Stdout(format!("{}\n", encode_error(code, message)))
    }

    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

/// [`ProcessExecutor`] that replays scripted replies in order and records
/// every request it receives.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<ProcessRequest>>,
}

impl ScriptedExecutor {
    pub fn new<I: IntoIterator<Item = Reply>>(replies: I) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().push_back(reply);
    }

    pub fn requests(&self) -> Vec<ProcessRequest> {
        self.requests.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn last_script(&self) -> Option<String> {
        self.requests.lock().last().map(|r| r.stdin.clone())
    }
}

#[async_trait]
impl ProcessExecutor for ScriptedExecutor {
    async fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, ProcessFailure> {
        let timeout = request.timeout;
        self.requests.lock().push(request);
        let reply = self.replies.lock().pop_front();
        let Some(mut reply) = reply else {
            return Err(ProcessFailure::Io(std::io::Error::other("no scripted reply left")));
        };

        loop {
            match reply {
                Reply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                },
                Reply::Stdout(stdout) => {
                    return Ok(ProcessOutput {
                        stdout,
                        stderr: String::new(),
                        exit_code: Some(0),
                        duration: Duration::from_millis(1),
                    })
                },
                Reply::Crash { stderr, code } => {
                    return Ok(ProcessOutput {
                        stdout: String::new(),
                        stderr,
                        exit_code: Some(code),
                        duration: Duration::from_millis(1),
                    })
                },
                Reply::TimedOut => return Err(ProcessFailure::TimedOut { timeout }),
            }
        }
    }
}

/// Evaluate an AppleScript string expression made of quoted literals
/// joined with `& quote &`. Returns `None` for anything else.
pub fn eval_string_expr(expr: &str) -> Option<String> {
    let mut out = String::new();
    let mut rest = expr;
    loop {
        rest = rest.strip_prefix('"')?;
        let mut chars = rest.char_indices();
        let end = loop {
            let (i, c) = chars.next()?;
            match c {
                '"' => break i,
                '\\' => {
                    let (_, escaped) = chars.next()?;
                    out.push(match escaped {
                        '\\' => '\\',
                        '"' => '"',
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        _ => return None,
                    });
                },
                other => out.push(other),
            }
        };
        rest = &rest[end + 1..];
        if rest.is_empty() {
            return Some(out);
        }
        rest = rest.strip_prefix(" & quote & ")?;
        out.push('"');
    }
}
