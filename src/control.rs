use std::sync::Arc;
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tracing::{info, warn};

use crate::apps::AppRegistry;
use crate::config::ControlConfig;
use crate::exec::{CommandOutput, CommandRunner};
use crate::models::{Alert, Severity};
use crate::scheduler::MonitoringScheduler;

/// Operator control actions. Invoked by the external glue layer; every
/// failure is a named error to the caller, never process-fatal.
pub struct Controller {
    scheduler: MonitoringScheduler,
    runner: Arc<dyn CommandRunner>,
    cfg: ControlConfig,
    command_timeout: Duration,
}

impl Controller {
    pub fn new(
        scheduler: MonitoringScheduler,
        runner: Arc<dyn CommandRunner>,
        cfg: ControlConfig,
        command_timeout: Duration,
    ) -> Self {
        Self {
            scheduler,
            runner,
            cfg,
            command_timeout,
        }
    }

    fn registry(&self) -> &AppRegistry {
        self.scheduler.registry()
    }

    /// Kill a watched application's process and relaunch it via its
    /// configured restart command, bumping the restart counter.
    pub async fn restart_app(&self, name: &str) -> anyhow::Result<()> {
        let app = self
            .registry()
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown application: {name}"))?;

        let needle = app.process_name().to_lowercase();
        let killed = tokio::task::spawn_blocking(move || {
            let mut sys = System::new();
            sys.refresh_processes(ProcessesToUpdate::All);
            let mut killed = 0u32;
            for proc in sys.processes().values() {
                let pname = proc.name().to_string_lossy().to_lowercase();
                let clean = pname.strip_suffix(".exe").unwrap_or(&pname);
                if (clean == needle || pname == needle) && proc.kill() {
                    killed += 1;
                }
            }
            killed
        })
        .await?;
        info!("Restart of {name}: killed {killed} process(es)");

        let restart_command = app
            .config
            .restart_command
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No restart command configured for {name}"))?;
        let out = self.runner.run(restart_command, self.command_timeout).await?;
        if !out.success() {
            anyhow::bail!(
                "Restart command for {name} exited with {}: {}",
                out.exit_code,
                out.stderr.trim()
            );
        }

        self.registry().note_restart(name);
        Ok(())
    }

    /// Run an operator-supplied script through the executor.
    pub async fn run_script(&self, command_line: &str) -> anyhow::Result<CommandOutput> {
        self.runner.run(command_line, self.command_timeout).await
    }

    /// Put the displays to sleep via the configured command.
    pub async fn sleep_displays(&self) -> anyhow::Result<()> {
        let cmd = self
            .cfg
            .display_sleep_command
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No display sleep command configured"))?;
        let out = self.runner.run(cmd, self.command_timeout).await?;
        if !out.success() {
            anyhow::bail!("Display sleep command exited with {}", out.exit_code);
        }
        Ok(())
    }

    /// Halt monitoring and run the configured emergency command. The
    /// critical alert goes out before anything is torn down.
    pub async fn emergency_stop(&self, reason: &str) -> anyhow::Result<()> {
        self.scheduler
            .raise_alert(Alert::new(
                "emergency-stop",
                format!("Emergency stop requested: {reason}"),
                Severity::Critical,
            ))
            .await;
        self.scheduler.stop();

        if let Some(cmd) = self.cfg.emergency_stop_command.as_deref() {
            match self.runner.run(cmd, self.command_timeout).await {
                Ok(out) if !out.success() => {
                    warn!("Emergency command exited with {}", out.exit_code);
                }
                Ok(_) => {}
                Err(e) => warn!("Emergency command failed: {e}"),
            }
        }
        Ok(())
    }
}
