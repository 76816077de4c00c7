use std::future::Future;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::config::ToolSettings;
use crate::error::{Error, Result};

/// Runs the external window-manager CLI.
/// This abstraction allows mocking in tests.
pub trait ToolRunner: Send + Sync + 'static {
    /// Run `binary <prefix> <args...>` and return its stdout.
    fn run(&self, args: Vec<String>) -> impl Future<Output = Result<String>> + Send;
}

/// Rate-limited, concurrency-bounded subprocess runner.
///
/// Invocations start at least `min_interval` apart; callers beyond the
/// start slot are delayed, never rejected. At most `max_concurrent`
/// children run at once and each is killed after `timeout`.
pub struct CommandRunner {
    binary: String,
    prefix_args: Vec<String>,
    gate: Semaphore,
    next_start: Mutex<Instant>,
    min_interval: Duration,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(settings: &ToolSettings) -> Self {
        Self {
            binary: settings.binary.clone(),
            prefix_args: settings.prefix_args.clone(),
            gate: Semaphore::new(settings.max_concurrent.max(1)),
            next_start: Mutex::new(Instant::now()),
            min_interval: settings.min_interval(),
            timeout: settings.timeout(),
        }
    }

    fn describe(&self, args: &[String]) -> String {
        let mut parts = Vec::with_capacity(1 + self.prefix_args.len() + args.len());
        parts.push(self.binary.as_str());
        parts.extend(self.prefix_args.iter().map(String::as_str));
        parts.extend(args.iter().map(String::as_str));
        parts.join(" ")
    }

    /// Reserve the next start slot and return when it opens.
    fn reserve_slot(&self) -> Instant {
        let mut next = self.next_start.lock().expect("runner slot lock poisoned");
        let now = Instant::now();
        let start = if *next > now { *next } else { now };
        *next = start + self.min_interval;
        start
    }
}

impl ToolRunner for CommandRunner {
    async fn run(&self, args: Vec<String>) -> Result<String> {
        let command = self.describe(&args);

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| Error::Io(std::io::Error::other("command gate closed")))?;

        let start = self.reserve_slot();
        tokio::time::sleep_until(start).await;

        tracing::debug!("Running `{}`", command);

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(&self.prefix_args)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                return Err(Error::Timeout {
                    command,
                    after: self.timeout,
                })
            }
            Ok(Err(source)) => return Err(Error::Spawn { command, source }),
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let text = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::Process {
                command,
                status: output.status.code(),
                output: text,
            });
        }

        Ok(stdout)
    }
}
