use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

/// Captured output of one external command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Injected capability for running external commands. All OS-facing
/// queries go through this seam so tests can substitute canned output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command_line`, killing it after `timeout`.
    async fn run(&self, command_line: &str, timeout: Duration) -> anyhow::Result<CommandOutput>;
}

/// Real runner backed by `tokio::process`. The command line is split on
/// whitespace; probe/control commands needing shell features should be
/// wrapped in a script.
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, command_line: &str, timeout: Duration) -> anyhow::Result<CommandOutput> {
        let mut parts = command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty command line"))?;

        let fut = Command::new(program)
            .args(parts)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Command timed out after {timeout:?}: {command_line}");
                anyhow::bail!("Command timed out: {command_line}");
            }
        };

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Test runner that replays canned stdout keyed by command prefix and
    /// records every invocation.
    #[derive(Default)]
    pub struct FakeRunner {
        canned: HashMap<String, CommandOutput>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        pub fn with_stdout(mut self, prefix: &str, stdout: &str) -> Self {
            self.canned.insert(
                prefix.to_owned(),
                CommandOutput {
                    stdout: stdout.to_owned(),
                    ..Default::default()
                },
            );
            self
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            command_line: &str,
            _timeout: Duration,
        ) -> anyhow::Result<CommandOutput> {
            self.calls.lock().unwrap().push(command_line.to_owned());
            for (prefix, out) in &self.canned {
                if command_line.starts_with(prefix.as_str()) {
                    return Ok(out.clone());
                }
            }
            anyhow::bail!("No canned output for: {command_line}")
        }
    }
}
