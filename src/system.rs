use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use sysinfo::{Components, Disks, System};
use tokio::net::TcpStream;
use tracing::warn;

use crate::config::ProbeConfig;
use crate::exec::CommandRunner;
use crate::models::{DiskVolume, DisplaySample, MemoryBreakdown, NetworkInterface, SystemSample};

const MB: f64 = 1_048_576.0;

/// Collects point-in-time OS metrics. Every sub-query fails independently:
/// a missing metric degrades to an empty/zero default and the sample as a
/// whole always succeeds.
pub struct SystemSampler {
    sys: Arc<Mutex<System>>,
    runner: Arc<dyn CommandRunner>,
    cfg: ProbeConfig,
}

/// Metrics gathered synchronously from sysinfo on a blocking thread.
struct HostMetrics {
    cpu_percent: f64,
    total_mb: f64,
    used_mb: f64,
    load_average: [f64; 3],
    temperature_c: Option<f64>,
    disks: Vec<DiskVolume>,
    network_interfaces: Vec<NetworkInterface>,
}

impl SystemSampler {
    pub fn new(runner: Arc<dyn CommandRunner>, cfg: ProbeConfig) -> Self {
        Self {
            sys: Arc::new(Mutex::new(System::new_all())),
            runner,
            cfg,
        }
    }

    /// Gather a full system sample. Probe commands, the reachability test
    /// and the sysinfo refresh all run concurrently.
    pub async fn sample(&self) -> SystemSample {
        let timeout = Duration::from_millis(self.cfg.command_timeout_ms);

        let host = self.host_metrics();
        let displays = self.probe_displays(timeout);
        let memory = self.probe_memory(timeout);
        let cpu_split = self.probe_cpu_split(timeout);
        let reachable = self.check_reachability();

        let (host, displays, memory, cpu_split, internet_reachable) =
            tokio::join!(host, displays, memory, cpu_split, reachable);

        let cpu_usage_percent = match cpu_split {
            Some((user, system, idle)) => effective_cpu_percent(user, system, idle),
            None => host.cpu_percent.min(100.0),
        };

        let memory_pressure_percent = match &memory {
            Some(b) => memory_pressure_percent(b, host.total_mb),
            // Plain used/total when no detailed breakdown is available.
            None if host.total_mb > 0.0 => (host.used_mb / host.total_mb * 100.0).min(100.0),
            None => 0.0,
        };

        SystemSample {
            timestamp: Utc::now(),
            cpu_usage_percent,
            memory_pressure_percent,
            memory,
            load_average: host.load_average,
            temperature_c: host.temperature_c,
            disks: host.disks,
            displays,
            network_interfaces: host.network_interfaces,
            internet_reachable,
        }
    }

    /// sysinfo does synchronous work, so it runs on a blocking thread.
    async fn host_metrics(&self) -> HostMetrics {
        let sys = Arc::clone(&self.sys);
        let result = tokio::task::spawn_blocking(move || {
            let mut sys = sys.lock().expect("System mutex poisoned");
            sys.refresh_cpu_usage();
            sys.refresh_memory();

            let load = System::load_average();
            HostMetrics {
                cpu_percent: f64::from(sys.global_cpu_usage()),
                total_mb: sys.total_memory() as f64 / MB,
                used_mb: sys.used_memory() as f64 / MB,
                load_average: [load.one, load.five, load.fifteen],
                temperature_c: read_temperature(),
                disks: read_disks(),
                network_interfaces: read_network_interfaces(),
            }
        })
        .await;

        match result {
            Ok(m) => m,
            Err(e) => {
                warn!("Host metrics task panicked: {e}");
                HostMetrics {
                    cpu_percent: 0.0,
                    total_mb: 0.0,
                    used_mb: 0.0,
                    load_average: [0.0; 3],
                    temperature_c: None,
                    disks: Vec::new(),
                    network_interfaces: Vec::new(),
                }
            }
        }
    }

    async fn probe_displays(&self, timeout: Duration) -> Vec<DisplaySample> {
        let Some(cmd) = &self.cfg.display_command else {
            return Vec::new();
        };
        match self.runner.run(cmd, timeout).await {
            Ok(out) => parse_display_lines(&out.stdout),
            Err(e) => {
                warn!("Display probe failed: {e}");
                Vec::new()
            }
        }
    }

    async fn probe_memory(&self, timeout: Duration) -> Option<MemoryBreakdown> {
        let cmd = self.cfg.memory_command.as_ref()?;
        match self.runner.run(cmd, timeout).await {
            Ok(out) => parse_memory_lines(&out.stdout),
            Err(e) => {
                warn!("Memory probe failed: {e}");
                None
            }
        }
    }

    async fn probe_cpu_split(&self, timeout: Duration) -> Option<(f64, f64, f64)> {
        let cmd = self.cfg.cpu_command.as_ref()?;
        match self.runner.run(cmd, timeout).await {
            Ok(out) => parse_cpu_split(&out.stdout),
            Err(e) => {
                warn!("CPU probe failed: {e}");
                None
            }
        }
    }

    async fn check_reachability(&self) -> bool {
        let timeout = Duration::from_millis(self.cfg.reachability_timeout_ms);
        let connect = TcpStream::connect(self.cfg.reachability_addr.as_str());
        matches!(tokio::time::timeout(timeout, connect).await, Ok(Ok(_)))
    }
}

/// CPU usage from a user/system/idle split: min(user+system, 100−idle),
/// capped at 100.
pub fn effective_cpu_percent(user: f64, system: f64, idle: f64) -> f64 {
    (user + system).min(100.0 - idle).clamp(0.0, 100.0)
}

/// Memory pressure counts active+wired+compressed as used, capped at 100.
pub fn memory_pressure_percent(b: &MemoryBreakdown, total_mb: f64) -> f64 {
    if total_mb <= 0.0 {
        return 0.0;
    }
    ((b.active_mb + b.wired_mb + b.compressed_mb) / total_mb * 100.0).min(100.0)
}

/// One display per line: `name<TAB>online|offline`. A line without the
/// flag counts as online — probes that only print connected displays.
fn parse_display_lines(stdout: &str) -> Vec<DisplaySample> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| {
            let mut parts = line.splitn(2, '\t');
            let name = parts.next().unwrap_or("").trim().to_owned();
            let online = parts
                .next()
                .map(|f| !f.trim().eq_ignore_ascii_case("offline"))
                .unwrap_or(true);
            DisplaySample { name, online }
        })
        .collect()
}

/// `active|wired|compressed|free: <MB>` lines; all four keys required.
fn parse_memory_lines(stdout: &str) -> Option<MemoryBreakdown> {
    let mut active = None;
    let mut wired = None;
    let mut compressed = None;
    let mut free = None;

    for line in stdout.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value: f64 = match value.trim().parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        match key.trim().to_lowercase().as_str() {
            "active" => active = Some(value),
            "wired" => wired = Some(value),
            "compressed" => compressed = Some(value),
            "free" => free = Some(value),
            _ => {}
        }
    }

    Some(MemoryBreakdown {
        active_mb: active?,
        wired_mb: wired?,
        compressed_mb: compressed?,
        free_mb: free?,
    })
}

/// Single line of `user system idle` percentages.
fn parse_cpu_split(stdout: &str) -> Option<(f64, f64, f64)> {
    let mut parts = stdout.split_whitespace();
    let user = parts.next()?.parse().ok()?;
    let system = parts.next()?.parse().ok()?;
    let idle = parts.next()?.parse().ok()?;
    Some((user, system, idle))
}

fn read_temperature() -> Option<f64> {
    let components = Components::new_with_refreshed_list();
    components
        .iter()
        .map(|c| f64::from(c.temperature()))
        .filter(|t| t.is_finite() && *t > 0.0)
        .fold(None, |acc: Option<f64>, t| {
            Some(acc.map_or(t, |a| a.max(t)))
        })
}

fn read_disks() -> Vec<DiskVolume> {
    let disks = Disks::new_with_refreshed_list();
    disks
        .iter()
        .filter(|d| d.total_space() > 0)
        .map(|d| {
            let total = d.total_space() as f64;
            let used = total - d.available_space() as f64;
            DiskVolume {
                mount: d.mount_point().to_string_lossy().into_owned(),
                usage_percent: (used / total * 100.0).clamp(0.0, 100.0),
            }
        })
        .collect()
}

fn read_network_interfaces() -> Vec<NetworkInterface> {
    match local_ip_address::list_afinet_netifas() {
        Ok(ifas) => ifas
            .into_iter()
            .map(|(name, ip)| NetworkInterface {
                connected: !ip.is_loopback() && !ip.is_unspecified(),
                ip: ip.to_string(),
                name,
            })
            .collect(),
        Err(e) => {
            warn!("Interface enumeration failed: {e}");
            Vec::new()
        }
    }
}
