use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::alerts::{AlertDispatcher, ChannelTransport, StatusNotifier};
use crate::anomaly::AnomalyDetector;
use crate::apps::{AppRegistry, ApplicationSampler};
use crate::config::AppConfig;
use crate::events::{EventSink, MonitorEvent};
use crate::exec::CommandRunner;
use crate::history::{HealthReport, HistoryStore};
use crate::models::{Alert, Anomaly, Baseline, Heartbeat, MonitoringState, Severity};
use crate::status::aggregate;
use crate::system::SystemSampler;

/// Drives periodic sampling and heartbeats; owns all mutable monitoring
/// state. Cheap to clone — clones share the same scheduler.
#[derive(Clone)]
pub struct MonitoringScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: AppConfig,
    installation_id: String,
    registry: AppRegistry,
    system: SystemSampler,
    apps: ApplicationSampler,
    detector: AnomalyDetector,
    history: Mutex<HistoryStore>,
    notifier: Mutex<StatusNotifier>,
    dispatcher: tokio::sync::Mutex<AlertDispatcher>,
    events: EventSink,
    state_tx: watch::Sender<MonitoringState>,
    state_rx: watch::Receiver<MonitoringState>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl MonitoringScheduler {
    pub fn new(
        cfg: AppConfig,
        registry: AppRegistry,
        runner: Arc<dyn CommandRunner>,
        transport: Arc<dyn ChannelTransport>,
        installation_id: String,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(MonitoringState::default());
        let dispatcher = AlertDispatcher::new(
            cfg.channels.clone(),
            transport,
            installation_id.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                system: SystemSampler::new(Arc::clone(&runner), cfg.probes.clone()),
                apps: ApplicationSampler::new(),
                detector: AnomalyDetector::new(cfg.anomaly.clone()),
                history: Mutex::new(HistoryStore::new()),
                notifier: Mutex::new(StatusNotifier::default()),
                dispatcher: tokio::sync::Mutex::new(dispatcher),
                events: EventSink::default(),
                state_tx,
                state_rx,
                cancel: Mutex::new(None),
                installation_id,
                registry,
                cfg,
            }),
        }
    }

    /// Start the periodic loop. Starting while already running replaces
    /// the existing timers instead of stacking a second loop.
    pub fn start(&self) {
        let token = CancellationToken::new();
        {
            let mut slot = self.inner.cancel.lock().expect("Cancel lock poisoned");
            if let Some(old) = slot.replace(token.clone()) {
                info!("Scheduler restarted — replacing the running loop");
                old.cancel();
            }
        }

        let this = self.clone();
        let sample_every = Duration::from_millis(self.inner.cfg.monitor.sample_interval_ms);
        let heartbeat_every = Duration::from_millis(self.inner.cfg.monitor.heartbeat_interval_ms);

        tokio::spawn(async move {
            this.inner.events.emit(MonitorEvent::MonitoringStarted);
            info!(
                "Monitoring started — sampling every {:?}, heartbeat every {:?}",
                sample_every, heartbeat_every
            );

            let mut sample_tick = tokio::time::interval(sample_every);
            let mut heartbeat_tick = tokio::time::interval(heartbeat_every);
            // Skip-if-busy: a cycle that overruns its interval drops the
            // missed ticks instead of queueing them.
            sample_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sample_tick.tick() => {
                        // A failed cycle is logged and the loop carries on.
                        if let Err(e) = this.run_cycle().await {
                            error!("Monitoring cycle failed: {e:#}");
                        }
                    }
                    _ = heartbeat_tick.tick() => {
                        this.emit_heartbeat().await;
                    }
                }
            }

            this.inner.events.emit(MonitorEvent::MonitoringStopped);
            info!("Monitoring stopped");
        });
    }

    /// Cancel the timers. An in-flight cycle finishes on its own.
    pub fn stop(&self) {
        if let Some(token) = self.inner.cancel.lock().expect("Cancel lock poisoned").take() {
            token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .cancel
            .lock()
            .expect("Cancel lock poisoned")
            .is_some()
    }

    /// One full sampling cycle: gather sub-samples concurrently, record
    /// history, aggregate status, detect anomalies, fire alert triggers.
    pub async fn run_cycle(&self) -> anyhow::Result<()> {
        let inner = &self.inner;
        let watched = inner.registry.snapshot();

        let (system_sample, app_samples) =
            tokio::join!(inner.system.sample(), inner.apps.sample_all(&watched));

        // Judge each sample against the baseline from before it, then
        // record it. The history lock is held only for this synchronous
        // block.
        let anomalies: Vec<Anomaly> = {
            let mut history = inner.history.lock().expect("History lock poisoned");
            app_samples
                .iter()
                .flat_map(|sample| inner.detector.observe(&mut history, sample.clone()))
                .collect()
        };

        let displays = inner
            .cfg
            .monitor
            .monitor_displays
            .then_some(system_sample.displays.as_slice());
        let (status, issues) = aggregate(
            &system_sample,
            &app_samples,
            displays,
            &inner.cfg.thresholds,
        );
        debug!(?status, issues = issues.len(), "Cycle complete");

        let state = {
            let mut state = inner.state_rx.borrow().clone();
            state.displays = system_sample.displays.clone();
            state.system = Some(system_sample);
            state.apps = app_samples
                .into_iter()
                .map(|s| (s.app_name.clone(), s))
                .collect();
            state.status = Some(status);
            state.issues = issues.clone();
            state
        };
        let _ = inner.state_tx.send(state.clone());
        inner
            .events
            .emit(MonitorEvent::DataCollected(Box::new(state)));

        // Edge-triggered status notification.
        let transition = {
            let mut notifier = inner.notifier.lock().expect("Notifier lock poisoned");
            notifier.on_status(status, &issues)
        };
        if let Some(alert) = transition {
            self.raise_alert(alert).await;
        }

        // Every critical anomaly dispatches immediately.
        for anomaly in anomalies {
            if anomaly.severity == Severity::Critical {
                let alert = Alert::new("anomaly", anomaly.message.clone(), Severity::Critical)
                    .with_data(serde_json::to_value(&anomaly)?);
                self.raise_alert(alert).await;
            }
        }

        Ok(())
    }

    async fn emit_heartbeat(&self) {
        let inner = &self.inner;

        let heartbeat = {
            let state = inner.state_rx.borrow();
            Heartbeat {
                installation_id: inner.installation_id.clone(),
                status: state.status,
                cpu_usage_percent: state
                    .system
                    .as_ref()
                    .map_or(0.0, |s| s.cpu_usage_percent),
                memory_pressure_percent: state
                    .system
                    .as_ref()
                    .map_or(0.0, |s| s.memory_pressure_percent),
                watched_apps: state.apps.len(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                timestamp: Utc::now(),
            }
        };

        inner.state_tx.send_modify(|state| {
            state.last_heartbeat = Some(heartbeat.timestamp);
        });
        inner.events.emit(MonitorEvent::Heartbeat(heartbeat));

        // Heartbeats only page while the installation stays critical.
        let reminder = {
            let notifier = inner.notifier.lock().expect("Notifier lock poisoned");
            notifier.on_heartbeat()
        };
        if let Some(alert) = reminder {
            self.raise_alert(alert).await;
        }
    }

    /// Emit and dispatch an alert outside the normal cycle triggers.
    pub async fn raise_alert(&self, alert: Alert) {
        self.inner.events.emit(MonitorEvent::Alert(alert.clone()));
        let mut dispatcher = self.inner.dispatcher.lock().await;
        dispatcher.dispatch(&alert).await;
    }

    // ── Read-only surface (snapshots, never live references) ────

    pub fn state(&self) -> MonitoringState {
        self.inner.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MonitorEvent> {
        self.inner.events.subscribe()
    }

    pub fn registry(&self) -> &AppRegistry {
        &self.inner.registry
    }

    pub fn health_score(&self, app_name: &str) -> HealthReport {
        let history = self.inner.history.lock().expect("History lock poisoned");
        history.health_score(app_name)
    }

    pub fn baseline(&self, app_name: &str) -> Option<Baseline> {
        let history = self.inner.history.lock().expect("History lock poisoned");
        history.baseline(app_name).cloned()
    }

    pub fn anomalies(&self, app_name: &str) -> Vec<Anomaly> {
        let history = self.inner.history.lock().expect("History lock poisoned");
        history
            .history(app_name)
            .map(|h| h.anomalies().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn recent_alerts(&self) -> Vec<Alert> {
        self.inner.dispatcher.lock().await.recent_alerts()
    }

    pub async fn acknowledge_alert(&self, id: Uuid) -> bool {
        self.inner.dispatcher.lock().await.acknowledge(id)
    }
}
