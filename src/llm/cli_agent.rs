//! Local CLI agent engine.
//!
//! Runs an agent binary as a subprocess, feeding the rendered conversation
//! over stdin and reading the completion from stdout. Repeated failures
//! open a cooldown gate so a wedged engine stops burning pipeline latency.

use super::{ChatMessage, ChatRole, Completion, LlmProvider};
use crate::{Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Configuration for a CLI agent engine.
#[derive(Debug, Clone)]
pub struct CliAgentConfig {
    /// Executable to run.
    pub command: String,
    /// Arguments passed before the prompt flag.
    pub args: Vec<String>,
    /// Model passed as `--model` when set.
    pub model: Option<String>,
    /// Wall-clock limit for one invocation.
    pub timeout: Duration,
    /// Consecutive failures before the cooldown gate opens.
    pub failure_threshold: u32,
    /// How long the gate stays open.
    pub cooldown: Duration,
}

impl Default for CliAgentConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: Vec::new(),
            model: None,
            timeout: Duration::from_secs(120),
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Cooldown gate for a failing engine.
#[derive(Debug)]
struct CooldownBreaker {
    consecutive_failures: u32,
    threshold: u32,
    cooldown: Duration,
    cooldown_until: Option<Instant>,
}

impl CooldownBreaker {
    const fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            threshold,
            cooldown,
            cooldown_until: None,
        }
    }

    /// Seconds remaining when the gate is open, `None` when calls may pass.
    fn check(&mut self, now: Instant) -> Option<u64> {
        if let Some(until) = self.cooldown_until {
            if now < until {
                return Some((until - now).as_secs().max(1));
            }
            // Cooldown elapsed; allow a trial call.
            self.cooldown_until = None;
        }
        None
    }

    fn on_success(&mut self) {
        self.consecutive_failures = 0;
        self.cooldown_until = None;
    }

    fn on_failure(&mut self, now: Instant) -> bool {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold {
            self.cooldown_until = Some(now + self.cooldown);
            return true;
        }
        false
    }
}

/// LLM provider backed by a local CLI agent subprocess.
pub struct CliAgentProvider {
    config: CliAgentConfig,
    breaker: Mutex<CooldownBreaker>,
}

impl CliAgentProvider {
    /// Creates a new provider from the configuration.
    #[must_use]
    pub fn new(config: CliAgentConfig) -> Self {
        let breaker = CooldownBreaker::new(config.failure_threshold.max(1), config.cooldown);
        Self {
            config,
            breaker: Mutex::new(breaker),
        }
    }

    fn render_prompt(messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for message in messages {
            if !prompt.is_empty() {
                prompt.push_str("\n\n");
            }
            match message.role {
                ChatRole::System => prompt.push_str(&message.content),
                ChatRole::User => {
                    prompt.push_str("User:\n");
                    prompt.push_str(&message.content);
                },
                ChatRole::Assistant => {
                    prompt.push_str("Assistant:\n");
                    prompt.push_str(&message.content);
                },
            }
        }
        prompt
    }

    fn guard(&self) -> Result<()> {
        let mut breaker = self
            .breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(retry_after_secs) = breaker.check(Instant::now()) {
            metrics::counter!("cli_agent_cooldown_rejections_total").increment(1);
            return Err(Error::CircuitOpen {
                provider: "cli_agent".to_string(),
                retry_after_secs,
            });
        }
        Ok(())
    }

    fn record_success(&self) {
        self.breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .on_success();
    }

    fn record_failure(&self) {
        let tripped = self
            .breaker
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .on_failure(Instant::now());
        if tripped {
            tracing::warn!(
                command = %self.config.command,
                cooldown_secs = self.config.cooldown.as_secs(),
                "CLI agent entered cooldown"
            );
            metrics::counter!("cli_agent_cooldowns_total").increment(1);
        }
    }

    async fn run_once(&self, prompt: &str) -> Result<String> {
        let mut command = Command::new(&self.config.command);
        command.args(&self.config.args);
        if let Some(model) = &self.config.model {
            command.arg("--model").arg(model);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a timeout kill reaps engine-spawned children.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| Error::OperationFailed {
            operation: "cli_agent_spawn".to_string(),
            cause: format!("{}: {e}", self.config.command),
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| Error::OperationFailed {
                    operation: "cli_agent_stdin".to_string(),
                    cause: e.to_string(),
                })?;
            drop(stdin);
        }

        let started = Instant::now();
        let pid = child.id();
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|e| Error::OperationFailed {
                operation: "cli_agent_wait".to_string(),
                cause: e.to_string(),
            })?,
            Err(_) => {
                // kill_on_drop reaps the direct child only; the group kill
                // takes out anything the engine spawned under itself.
                kill_process_group(pid);
                return Err(Error::Timeout {
                    operation: "cli_agent".to_string(),
                    elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            },
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::OperationFailed {
                operation: "cli_agent".to_string(),
                cause: format!(
                    "exit status {}: {}",
                    output.status,
                    stderr.chars().take(500).collect::<String>()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if stdout.is_empty() {
            return Err(Error::OperationFailed {
                operation: "cli_agent".to_string(),
                cause: "empty output".to_string(),
            });
        }
        Ok(stdout)
    }
}

/// Kills the child's whole process group.
///
/// The child is its own group leader (`process_group(0)` at spawn), so the
/// group id equals its pid even after the leader itself is reaped.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        tracing::debug!(pid, error = %err, "process group kill failed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[async_trait]
impl LlmProvider for CliAgentProvider {
    fn name(&self) -> &'static str {
        "cli_agent"
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        self.guard()?;

        let prompt = Self::render_prompt(messages);
        let started = Instant::now();
        match self.run_once(&prompt).await {
            Ok(text) => {
                self.record_success();
                metrics::histogram!("cli_agent_duration_ms")
                    .record(started.elapsed().as_secs_f64() * 1000.0);
                Ok(Completion {
                    text,
                    ..Completion::default()
                })
            },
            Err(err) => {
                self.record_failure();
                Err(err)
            },
        }
    }
}
