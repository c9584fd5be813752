use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use futures_util::future::join_all;
use sysinfo::{ProcessesToUpdate, System};
use tracing::warn;

use crate::config::WatchedAppConfig;
use crate::models::{AppSample, AppStatus};

const MB: f64 = 1_048_576.0;

// ── Watched-application registry ────────────────────────────────

/// One registered application plus its lifetime restart counter.
#[derive(Debug, Clone)]
pub struct WatchedApp {
    pub config: WatchedAppConfig,
    pub restart_count: u32,
}

impl WatchedApp {
    /// Name to match against the process table.
    pub fn process_name(&self) -> &str {
        self.config
            .process_name
            .as_deref()
            .unwrap_or(&self.config.name)
    }
}

/// External CRUD surface for watched applications. The sampler reads a
/// snapshot once per cycle; the control layer bumps restart counters.
#[derive(Clone, Default)]
pub struct AppRegistry {
    inner: Arc<RwLock<HashMap<String, WatchedApp>>>,
}

impl AppRegistry {
    pub fn from_config(apps: &[WatchedAppConfig]) -> Self {
        let registry = Self::default();
        for app in apps {
            registry.add(app.clone());
        }
        registry
    }

    pub fn add(&self, config: WatchedAppConfig) {
        let mut inner = self.inner.write().expect("Registry lock poisoned");
        inner.insert(
            config.name.clone(),
            WatchedApp {
                config,
                restart_count: 0,
            },
        );
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut inner = self.inner.write().expect("Registry lock poisoned");
        inner.remove(name).is_some()
    }

    pub fn list(&self) -> Vec<String> {
        let inner = self.inner.read().expect("Registry lock poisoned");
        let mut names: Vec<String> = inner.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get(&self, name: &str) -> Option<WatchedApp> {
        let inner = self.inner.read().expect("Registry lock poisoned");
        inner.get(name).cloned()
    }

    /// Snapshot of every entry, sorted by name for stable cycle order.
    pub fn snapshot(&self) -> Vec<WatchedApp> {
        let inner = self.inner.read().expect("Registry lock poisoned");
        let mut apps: Vec<WatchedApp> = inner.values().cloned().collect();
        apps.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        apps
    }

    pub fn note_restart(&self, name: &str) {
        let mut inner = self.inner.write().expect("Registry lock poisoned");
        if let Some(app) = inner.get_mut(name) {
            app.restart_count += 1;
        }
    }
}

// ── Application sampler ─────────────────────────────────────────

/// Queries the process table for each watched application.
pub struct ApplicationSampler {
    sys: Arc<Mutex<System>>,
}

impl ApplicationSampler {
    pub fn new() -> Self {
        Self {
            sys: Arc::new(Mutex::new(System::new_all())),
        }
    }

    /// Sample every registered application concurrently.
    pub async fn sample_all(&self, apps: &[WatchedApp]) -> Vec<AppSample> {
        join_all(apps.iter().map(|app| self.sample_app(app))).await
    }

    /// Sample one application. Zero process-table matches means Stopped
    /// with zero metrics; a query failure means Error with the message —
    /// never a panic or an `Err` to the caller.
    pub async fn sample_app(&self, app: &WatchedApp) -> AppSample {
        let sys = Arc::clone(&self.sys);
        let app_name = app.config.name.clone();
        let needle = app.process_name().to_lowercase();
        let restart_count = app.restart_count;

        let result = tokio::task::spawn_blocking(move || {
            let mut sys = sys.lock().expect("System mutex poisoned");
            sys.refresh_processes(ProcessesToUpdate::All);

            let total_mb = sys.total_memory() as f64 / MB;
            let Some(found) = best_match(&sys, &needle) else {
                return AppSample::stopped(&app_name, restart_count);
            };
            let (pid, cpu_percent, mut memory_mb) = found;

            // Enhanced lookup: a targeted refresh of just this pid gives a
            // fresher memory figure. CPU stays from the full refresh — a
            // back-to-back refresh has no usable delta and would read ~0.
            // The process may have exited in between; fall back silently.
            sys.refresh_processes(ProcessesToUpdate::Some(&[pid]));
            if let Some(proc) = sys.process(pid) {
                memory_mb = proc.memory() as f64 / MB;
            }

            let memory_percent = if total_mb > 0.0 {
                (memory_mb / total_mb * 100.0).min(100.0)
            } else {
                0.0
            };

            AppSample {
                app_name,
                status: AppStatus::Running,
                pid: Some(pid.as_u32()),
                cpu_percent,
                memory_mb,
                memory_percent,
                restart_count,
                timestamp: Utc::now(),
            }
        })
        .await;

        match result {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Process query for {} failed: {e}", app.config.name);
                AppSample {
                    app_name: app.config.name.clone(),
                    status: AppStatus::Error(e.to_string()),
                    pid: None,
                    cpu_percent: 0.0,
                    memory_mb: 0.0,
                    memory_percent: 0.0,
                    restart_count: app.restart_count,
                    timestamp: Utc::now(),
                }
            }
        }
    }
}

impl Default for ApplicationSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-insensitive process-name match, `.exe` stripped. Multi-process
/// apps match more than once; keep the one using the most memory.
fn best_match(sys: &System, needle: &str) -> Option<(sysinfo::Pid, f64, f64)> {
    sys.processes()
        .iter()
        .filter(|(_, proc)| {
            let name = proc.name().to_string_lossy().to_lowercase();
            let name_clean = name.strip_suffix(".exe").unwrap_or(&name);
            name_clean == needle || name == needle
        })
        .max_by(|(_, a), (_, b)| a.memory().cmp(&b.memory()))
        .map(|(pid, proc)| {
            (
                *pid,
                f64::from(proc.cpu_usage()),
                proc.memory() as f64 / MB,
            )
        })
}
