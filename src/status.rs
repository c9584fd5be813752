use crate::config::Thresholds;
use crate::models::{AppSample, AppStatus, DisplaySample, HealthStatus, Issue, SystemSample};

/// Combine the current snapshot into an overall status and issue list.
/// Pure function: identical inputs always yield identical output.
///
/// `displays: None` means display monitoring is disabled and the
/// no-display issue is never raised; `Some(&[])` means zero displays
/// online, which is critical for a kiosk.
pub fn aggregate(
    system: &SystemSample,
    apps: &[AppSample],
    displays: Option<&[DisplaySample]>,
    thresholds: &Thresholds,
) -> (HealthStatus, Vec<Issue>) {
    let mut issues = Vec::new();

    if system.cpu_usage_percent > thresholds.cpu {
        issues.push(Issue::HighCpu {
            usage: system.cpu_usage_percent,
            limit: thresholds.cpu,
        });
    }

    if system.memory_pressure_percent > thresholds.memory {
        issues.push(Issue::HighMemory {
            usage: system.memory_pressure_percent,
            limit: thresholds.memory,
        });
    }

    // Main volume first; the first full volume short-circuits the scan.
    let main_first = system
        .disks
        .iter()
        .filter(|d| d.mount == "/")
        .chain(system.disks.iter().filter(|d| d.mount != "/"));
    for disk in main_first {
        if disk.usage_percent > thresholds.disk {
            issues.push(Issue::HighDisk {
                mount: disk.mount.clone(),
                usage: disk.usage_percent,
                limit: thresholds.disk,
            });
            break;
        }
    }

    for app in apps {
        if app.status == AppStatus::Stopped {
            issues.push(Issue::AppDown {
                app: app.app_name.clone(),
            });
        }
        if app.restart_count > thresholds.app_restarts {
            issues.push(Issue::AppUnstable {
                app: app.app_name.clone(),
                restarts: app.restart_count,
            });
        }
    }

    if let Some(displays) = displays {
        if !displays.iter().any(|d| d.online) {
            issues.push(Issue::NoDisplay);
        }
    }

    let status = if issues.iter().any(Issue::is_critical) {
        HealthStatus::Critical
    } else if issues.is_empty() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Warning
    };

    (status, issues)
}
