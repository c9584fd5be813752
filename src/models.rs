use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── System sample ───────────────────────────────────────────────

/// Point-in-time snapshot of the whole machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_usage_percent: f64,
    pub memory_pressure_percent: f64,
    pub memory: Option<MemoryBreakdown>,
    pub load_average: [f64; 3],
    /// Best-effort; commonly needs elevated privilege, so `None` is normal.
    pub temperature_c: Option<f64>,
    pub disks: Vec<DiskVolume>,
    pub displays: Vec<DisplaySample>,
    pub network_interfaces: Vec<NetworkInterface>,
    pub internet_reachable: bool,
}

/// Detailed memory accounting in MB. Active+wired+compressed counts as
/// "used" for the pressure figure; plain used/total is the fallback when
/// this breakdown is unavailable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryBreakdown {
    pub active_mb: f64,
    pub wired_mb: f64,
    pub compressed_mb: f64,
    pub free_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskVolume {
    pub mount: String,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplaySample {
    pub name: String,
    pub online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    pub ip: String,
    pub connected: bool,
}

// ── Application sample ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSample {
    pub app_name: String,
    pub status: AppStatus,
    pub pid: Option<u32>,
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub memory_percent: f64,
    pub restart_count: u32,
    pub timestamp: DateTime<Utc>,
}

impl AppSample {
    /// Sample for an app with no matching process.
    pub fn stopped(app_name: &str, restart_count: u32) -> Self {
        Self {
            app_name: app_name.to_owned(),
            status: AppStatus::Stopped,
            pid: None,
            cpu_percent: 0.0,
            memory_mb: 0.0,
            memory_percent: 0.0,
            restart_count,
            timestamp: Utc::now(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == AppStatus::Running
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum AppStatus {
    Running,
    Stopped,
    /// The process query itself failed; carries the error text.
    Error(String),
}

// ── Baseline & anomalies ────────────────────────────────────────

/// Rolling statistical summary of an app's recent running-state samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub avg_cpu: f64,
    pub avg_memory_mb: f64,
    pub max_memory_mb: f64,
    pub min_memory_mb: f64,
    /// OLS slope of memory against sample index, in MB per sample.
    pub memory_growth_rate: f64,
    pub sample_size: usize,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub current: f64,
    pub baseline: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub app_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyKind {
    CpuSpike,
    MemoryLeak,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

// ── Alerts ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub category: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    /// Free-form extra payload forwarded to channels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Alert {
    pub fn new(category: &str, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: category.to_owned(),
            message: message.into(),
            severity,
            timestamp: Utc::now(),
            acknowledged: false,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Canonical outbound notification body. Channel-specific wrappers (Slack
/// attachment, Discord embed, email relay) are derived from this object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: Uuid,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub category: String,
    pub installation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl NotificationPayload {
    pub fn from_alert(alert: &Alert, installation_id: &str) -> Self {
        Self {
            id: alert.id,
            message: alert.message.clone(),
            timestamp: alert.timestamp,
            severity: alert.severity,
            category: alert.category.clone(),
            installation_id: installation_id.to_owned(),
            data: alert.data.clone(),
        }
    }
}

// ── Health status & issues ──────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum Issue {
    HighCpu { usage: f64, limit: f64 },
    HighMemory { usage: f64, limit: f64 },
    HighDisk { mount: String, usage: f64, limit: f64 },
    AppDown { app: String },
    AppUnstable { app: String, restarts: u32 },
    NoDisplay,
}

impl Issue {
    /// Issues that force the aggregate status to critical.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::AppDown { .. } | Self::NoDisplay)
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighCpu { usage, limit } => {
                write!(f, "high-cpu: {usage:.1}% (limit {limit:.0}%)")
            }
            Self::HighMemory { usage, limit } => {
                write!(f, "high-memory: {usage:.1}% (limit {limit:.0}%)")
            }
            Self::HighDisk { mount, usage, limit } => {
                write!(f, "high-disk: {mount} at {usage:.1}% (limit {limit:.0}%)")
            }
            Self::AppDown { app } => write!(f, "app-down: {app}"),
            Self::AppUnstable { app, restarts } => {
                write!(f, "app-unstable: {app} restarted {restarts} times")
            }
            Self::NoDisplay => write!(f, "no-display: no display reports online"),
        }
    }
}

// ── Aggregate monitoring state ──────────────────────────────────

/// Latest view of everything the scheduler knows. Published as snapshots;
/// external readers clone, never mutate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringState {
    pub system: Option<SystemSample>,
    pub apps: HashMap<String, AppSample>,
    pub displays: Vec<DisplaySample>,
    pub status: Option<HealthStatus>,
    pub issues: Vec<Issue>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

// ── Heartbeat payload ───────────────────────────────────────────

/// Lightweight liveness signal, distinct from a full sampling cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub installation_id: String,
    pub status: Option<HealthStatus>,
    pub cpu_usage_percent: f64,
    pub memory_pressure_percent: f64,
    pub watched_apps: usize,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}
