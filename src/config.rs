use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

/// Root configuration loaded from `config.toml`. Every section has
/// defaults, so an empty file is a valid (if not very useful) config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Identity embedded in every outbound notification. Defaults to the
    /// machine hostname when absent.
    #[serde(default)]
    pub installation_id: Option<String>,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub anomaly: AnomalyTuning,
    #[serde(default)]
    pub probes: ProbeConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub apps: Vec<WatchedAppConfig>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Milliseconds between full sampling cycles.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
    /// Milliseconds between heartbeats, scheduled independently.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// When false, the no-display issue is never raised.
    #[serde(default = "default_true")]
    pub monitor_displays: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            monitor_displays: true,
        }
    }
}

/// Issue thresholds for the status aggregator.
#[derive(Debug, Clone, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_pct_90")]
    pub cpu: f64,
    #[serde(default = "default_pct_90")]
    pub memory: f64,
    #[serde(default = "default_pct_90")]
    pub disk: f64,
    #[serde(default = "default_app_restarts")]
    pub app_restarts: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: default_pct_90(),
            memory: default_pct_90(),
            disk: default_pct_90(),
            app_restarts: default_app_restarts(),
        }
    }
}

/// Anomaly detection tuning. The defaults match long-observed field
/// behavior; override with care.
#[derive(Debug, Clone, Deserialize)]
pub struct AnomalyTuning {
    /// CPU spike fires when latest > factor × baseline average.
    #[serde(default = "default_spike_factor")]
    pub cpu_spike_factor: f64,
    /// Baseline averages at or below this are treated as noise and never
    /// produce a spike.
    #[serde(default = "default_noise_floor")]
    pub cpu_noise_floor: f64,
    /// Memory leak fires when latest > factor × baseline max…
    #[serde(default = "default_leak_factor")]
    pub memory_leak_factor: f64,
    /// …and the growth slope exceeds this many MB per sample.
    #[serde(default = "default_growth_threshold")]
    pub memory_growth_threshold_mb: f64,
}

impl Default for AnomalyTuning {
    fn default() -> Self {
        Self {
            cpu_spike_factor: default_spike_factor(),
            cpu_noise_floor: default_noise_floor(),
            memory_leak_factor: default_leak_factor(),
            memory_growth_threshold_mb: default_growth_threshold(),
        }
    }
}

/// External probe commands and the reachability check. Probe commands are
/// optional; an unset or failing probe degrades that metric to its default.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Prints one display per line: `name<TAB>online|offline`.
    #[serde(default)]
    pub display_command: Option<String>,
    /// Prints `active|wired|compressed|free: <MB>` lines.
    #[serde(default)]
    pub memory_command: Option<String>,
    /// Prints `user system idle` percentages on one line.
    #[serde(default)]
    pub cpu_command: Option<String>,
    /// TCP endpoint used for the internet reachability test.
    #[serde(default = "default_reachability_addr")]
    pub reachability_addr: String,
    #[serde(default = "default_reachability_timeout_ms")]
    pub reachability_timeout_ms: u64,
    /// Timeout applied to every probe/control command.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            display_command: None,
            memory_command: None,
            cpu_command: None,
            reachability_addr: default_reachability_addr(),
            reachability_timeout_ms: default_reachability_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

/// Commands backing the operator control actions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub display_sleep_command: Option<String>,
    #[serde(default)]
    pub emergency_stop_command: Option<String>,
}

/// One watched application, as written in `[[apps]]`.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchedAppConfig {
    pub name: String,
    /// Process-table name to match; defaults to `name`.
    #[serde(default)]
    pub process_name: Option<String>,
    /// Command used by the restart control action.
    #[serde(default)]
    pub restart_command: Option<String>,
}

/// One alert channel, as written in `[[channels]]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub channel_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
    /// Channel-type-specific settings (webhook_url, relay_url, to, …).
    #[serde(default)]
    pub config: HashMap<String, String>,
}

fn default_sample_interval_ms() -> u64 {
    30_000
}
fn default_heartbeat_interval_ms() -> u64 {
    60_000
}
fn default_true() -> bool {
    true
}
fn default_pct_90() -> f64 {
    90.0
}
fn default_app_restarts() -> u32 {
    3
}
fn default_spike_factor() -> f64 {
    3.0
}
fn default_noise_floor() -> f64 {
    1.0
}
fn default_leak_factor() -> f64 {
    1.5
}
fn default_growth_threshold() -> f64 {
    0.1
}
fn default_reachability_addr() -> String {
    "1.1.1.1:443".into()
}
fn default_reachability_timeout_ms() -> u64 {
    3_000
}
fn default_command_timeout_ms() -> u64 {
    10_000
}
fn default_rate_limit_ms() -> u64 {
    60_000
}

impl AppConfig {
    /// Load and parse the config file. Falls back to `./config.toml` next to
    /// the executable if no explicit path is given.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => std::path::PathBuf::from(p),
            None => {
                // Look next to the executable first, then CWD
                let exe_dir = std::env::current_exe()
                    .ok()
                    .and_then(|p| p.parent().map(Path::to_path_buf));

                if let Some(dir) = exe_dir {
                    let candidate = dir.join("config.toml");
                    if candidate.exists() {
                        candidate
                    } else {
                        std::path::PathBuf::from("config.toml")
                    }
                } else {
                    std::path::PathBuf::from("config.toml")
                }
            }
        };

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read config at {}: {e}", path.display()))?;

        let config: AppConfig = toml::from_str(&raw)?;
        Ok(config)
    }
}
