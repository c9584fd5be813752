use std::sync::Arc;

use tracing::{debug, info, warn};

use kioskwatch::alerts::HttpTransport;
use kioskwatch::apps::AppRegistry;
use kioskwatch::config::AppConfig;
use kioskwatch::events::MonitorEvent;
use kioskwatch::exec::TokioCommandRunner;
use kioskwatch::scheduler::MonitoringScheduler;

const BANNER: &str = r#"
  _  ___           _                 _       _
 | |/ (_) ___  ___| | ____      ____| |_ ___| |__
 | ' /| |/ _ \/ __| |/ /\ \ /\ / / _` | __/ __| '_ \
 | . \| | (_) \__ \   <  \ V  V / (_| | || (__| | | |
 |_|\_\_|\___/|___/_|\_\  \_/\_/ \__,_|\__\___|_| |_|
  Kiosk Health Monitoring Agent
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kioskwatch=info".into()),
        )
        .compact()
        .init();

    println!("{BANNER}");

    // ── Config ──────────────────────────────────────────────────
    let cfg = AppConfig::load(std::env::args().nth(1).as_deref())?;
    info!(
        "Config loaded — sampling every {}ms, {} watched app(s), {} channel(s)",
        cfg.monitor.sample_interval_ms,
        cfg.apps.len(),
        cfg.channels.len()
    );

    // ── Identity ────────────────────────────────────────────────
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-kiosk".into());

    let ip = local_ip_address::local_ip()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "127.0.0.1".into());

    let installation_id = cfg
        .installation_id
        .clone()
        .unwrap_or_else(|| hostname.clone());

    info!("Installation: {installation_id} | Host: {hostname} | IP: {ip}");

    // ── Scheduler ───────────────────────────────────────────────
    let registry = AppRegistry::from_config(&cfg.apps);
    let scheduler = MonitoringScheduler::new(
        cfg,
        registry,
        Arc::new(TokioCommandRunner),
        Arc::new(HttpTransport::new()),
        installation_id,
    );

    // ── Spawn: event log ────────────────────────────────────────
    // No presentation layer here; surface events through the log.
    {
        let mut events = scheduler.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(MonitorEvent::Alert(alert)) => {
                        warn!("[{:?}] {}: {}", alert.severity, alert.category, alert.message);
                    }
                    Ok(MonitorEvent::Heartbeat(hb)) => {
                        info!(
                            "Heartbeat — status {:?}, cpu {:.1}%, memory {:.1}%",
                            hb.status, hb.cpu_usage_percent, hb.memory_pressure_percent
                        );
                    }
                    Ok(MonitorEvent::DataCollected(state)) => {
                        debug!(
                            "Cycle — status {:?}, {} issue(s)",
                            state.status,
                            state.issues.len()
                        );
                    }
                    Ok(MonitorEvent::MonitoringStarted | MonitorEvent::MonitoringStopped) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event log lagging, dropped {n} event(s)");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    scheduler.start();

    // ── Shutdown ────────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    scheduler.stop();

    Ok(())
}
