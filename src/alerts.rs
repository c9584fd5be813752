use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ChannelConfig;
use crate::models::{Alert, HealthStatus, Issue, NotificationPayload, Severity};

/// Alerts kept in the in-memory log.
pub const ALERT_LOG_CAPACITY: usize = 100;

// ── Transport seam ──────────────────────────────────────────────

/// Delivers one shaped payload to one endpoint. Behind a trait so tests
/// record instead of POSTing.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn deliver(&self, url: &str, body: &serde_json::Value) -> anyhow::Result<()>;
}

/// Real transport: JSON POST via reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelTransport for HttpTransport {
    async fn deliver(&self, url: &str, body: &serde_json::Value) -> anyhow::Result<()> {
        let response = self.client.post(url).json(body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Channel endpoint returned {}", response.status());
        }
        Ok(())
    }
}

// ── Dispatch outcomes ───────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub channel: String,
    pub delivered: bool,
    /// Rate-limited this round; not an error, not retried.
    pub skipped: bool,
    pub error: Option<String>,
}

// ── Dispatcher ──────────────────────────────────────────────────

/// Rate-limited fan-out of alerts to every configured channel. Channels
/// fail independently; one bad endpoint never blocks the rest.
pub struct AlertDispatcher {
    channels: Vec<ChannelConfig>,
    last_sent: HashMap<String, tokio::time::Instant>,
    log: VecDeque<Alert>,
    transport: Arc<dyn ChannelTransport>,
    installation_id: String,
}

impl AlertDispatcher {
    pub fn new(
        channels: Vec<ChannelConfig>,
        transport: Arc<dyn ChannelTransport>,
        installation_id: String,
    ) -> Self {
        Self {
            channels,
            last_sent: HashMap::new(),
            log: VecDeque::new(),
            transport,
            installation_id,
        }
    }

    /// Log the alert and attempt delivery to every enabled channel that is
    /// not inside its rate-limit window. Rate-limited channels are skipped
    /// outright — no queueing, no later retry.
    pub async fn dispatch(&mut self, alert: &Alert) -> Vec<DispatchOutcome> {
        self.log.push_back(alert.clone());
        while self.log.len() > ALERT_LOG_CAPACITY {
            self.log.pop_front();
        }

        let payload = NotificationPayload::from_alert(alert, &self.installation_id);
        let now = tokio::time::Instant::now();

        let mut outcomes = Vec::new();
        let mut sends = Vec::new();
        for channel in self.channels.iter().filter(|c| c.enabled) {
            if let Some(sent_at) = self.last_sent.get(&channel.name) {
                if now.duration_since(*sent_at) < Duration::from_millis(channel.rate_limit_ms) {
                    outcomes.push(DispatchOutcome {
                        channel: channel.name.clone(),
                        delivered: false,
                        skipped: true,
                        error: None,
                    });
                    continue;
                }
            }

            match shape_payload(channel, &payload) {
                Ok((url, body)) => sends.push((channel.name.clone(), url, body)),
                Err(e) => outcomes.push(DispatchOutcome {
                    channel: channel.name.clone(),
                    delivered: false,
                    skipped: false,
                    error: Some(e.to_string()),
                }),
            }
        }

        let transport = Arc::clone(&self.transport);
        let results = join_all(sends.iter().map(|(name, url, body)| {
            let transport = Arc::clone(&transport);
            async move { (name.clone(), transport.deliver(url, body).await) }
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(()) => {
                    self.last_sent.insert(name.clone(), now);
                    info!("Alert {} delivered to {name}", alert.id);
                    outcomes.push(DispatchOutcome {
                        channel: name,
                        delivered: true,
                        skipped: false,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Alert delivery to {name} failed: {e}");
                    outcomes.push(DispatchOutcome {
                        channel: name,
                        delivered: false,
                        skipped: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        outcomes
    }

    /// Snapshot of the bounded alert log, oldest first.
    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.log.iter().cloned().collect()
    }

    pub fn acknowledge(&mut self, id: Uuid) -> bool {
        for alert in &mut self.log {
            if alert.id == id {
                alert.acknowledged = true;
                return true;
            }
        }
        false
    }
}

// ── Payload shaping ─────────────────────────────────────────────

/// Derive the channel-specific body from the canonical payload. The
/// canonical object stays the single source; wrappers are views.
fn shape_payload(
    channel: &ChannelConfig,
    payload: &NotificationPayload,
) -> anyhow::Result<(String, serde_json::Value)> {
    let require = |key: &str| -> anyhow::Result<String> {
        channel
            .config
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Channel {} missing config key '{key}'", channel.name))
    };

    match channel.channel_type.as_str() {
        "slack" => Ok((
            require("webhook_url")?,
            json!({
                "attachments": [{
                    "color": severity_color_hex(payload.severity),
                    "title": payload.category,
                    "text": payload.message,
                    "footer": payload.installation_id,
                    "ts": payload.timestamp.timestamp(),
                }]
            }),
        )),
        "discord" => Ok((
            require("webhook_url")?,
            json!({
                "embeds": [{
                    "title": payload.category,
                    "description": payload.message,
                    "color": severity_color_int(payload.severity),
                    "timestamp": payload.timestamp.to_rfc3339(),
                    "footer": { "text": payload.installation_id },
                }]
            }),
        )),
        "webhook" => Ok((require("url")?, serde_json::to_value(payload)?)),
        "email" => Ok((
            require("relay_url")?,
            json!({
                "to": require("to")?,
                "subject": format!(
                    "[{:?}] {} — {}",
                    payload.severity, payload.installation_id, payload.category
                ),
                "body": payload.message,
                "notification": payload,
            }),
        )),
        other => anyhow::bail!("Unknown channel type: {other}"),
    }
}

fn severity_color_hex(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "#36a64f",
        Severity::Warning => "#ffae42",
        Severity::Error | Severity::Critical => "#d00000",
    }
}

fn severity_color_int(severity: Severity) -> u32 {
    match severity {
        Severity::Info => 0x36a64f,
        Severity::Warning => 0xffae42,
        Severity::Error | Severity::Critical => 0xd00000,
    }
}

// ── Status-change notifications ─────────────────────────────────

/// Edge-triggered status notifications: one alert per transition, no
/// matter how many polls repeat the same status. Heartbeats only notify
/// while the status is critical.
#[derive(Default)]
pub struct StatusNotifier {
    last_status: Option<HealthStatus>,
}

impl StatusNotifier {
    pub fn on_status(&mut self, status: HealthStatus, issues: &[Issue]) -> Option<Alert> {
        // The first observation seeds the edge detector silently; a kiosk
        // booting critical still pages through the heartbeat path.
        let previous = match self.last_status.replace(status) {
            None => return None,
            Some(prev) if prev == status => return None,
            Some(prev) => prev,
        };

        let severity = match status {
            HealthStatus::Healthy => Severity::Info,
            HealthStatus::Warning => Severity::Warning,
            HealthStatus::Critical => Severity::Critical,
        };

        let issue_list: Vec<String> = issues.iter().map(ToString::to_string).collect();
        Some(
            Alert::new(
                "status-change",
                format!("Status changed {previous:?} → {status:?}"),
                severity,
            )
            .with_data(json!({ "issues": issue_list })),
        )
    }

    pub fn on_heartbeat(&self) -> Option<Alert> {
        if self.last_status == Some(HealthStatus::Critical) {
            Some(Alert::new(
                "heartbeat",
                "Installation still critical",
                Severity::Critical,
            ))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records deliveries; fails any URL containing "fail".
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl ChannelTransport for RecordingTransport {
        async fn deliver(&self, url: &str, body: &serde_json::Value) -> anyhow::Result<()> {
            if url.contains("fail") {
                anyhow::bail!("connection refused");
            }
            self.sent.lock().unwrap().push((url.to_owned(), body.clone()));
            Ok(())
        }
    }

    fn channel(name: &str, channel_type: &str, url_key: &str, url: &str) -> ChannelConfig {
        let mut config = HashMap::new();
        config.insert(url_key.to_owned(), url.to_owned());
        if channel_type == "email" {
            config.insert("to".to_owned(), "ops@example.com".to_owned());
        }
        ChannelConfig {
            name: name.to_owned(),
            channel_type: channel_type.to_owned(),
            enabled: true,
            rate_limit_ms: 60_000,
            config,
        }
    }

    fn dispatcher(
        channels: Vec<ChannelConfig>,
        transport: Arc<RecordingTransport>,
    ) -> AlertDispatcher {
        AlertDispatcher::new(channels, transport, "kiosk-01".into())
    }

    #[tokio::test]
    async fn one_failing_channel_does_not_block_the_rest() {
        let transport = Arc::new(RecordingTransport::default());
        let mut d = dispatcher(
            vec![
                channel("bad", "webhook", "url", "https://fail.example/hook"),
                channel("good", "webhook", "url", "https://ok.example/hook"),
            ],
            Arc::clone(&transport),
        );

        let outcomes = d
            .dispatch(&Alert::new("test", "hello", Severity::Warning))
            .await;
        assert_eq!(outcomes.len(), 2);

        let bad = outcomes.iter().find(|o| o.channel == "bad").unwrap();
        assert!(!bad.delivered);
        assert!(bad.error.as_deref().unwrap().contains("connection refused"));

        let good = outcomes.iter().find(|o| o.channel == "good").unwrap();
        assert!(good.delivered);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_skips_until_the_window_passes() {
        let transport = Arc::new(RecordingTransport::default());
        let mut d = dispatcher(
            vec![channel("ops", "webhook", "url", "https://ok.example/hook")],
            Arc::clone(&transport),
        );
        let alert = Alert::new("test", "hello", Severity::Warning);

        assert!(d.dispatch(&alert).await[0].delivered);

        // Inside the window: skipped, not errored.
        tokio::time::advance(Duration::from_millis(59_999)).await;
        let second = d.dispatch(&alert).await;
        assert!(second[0].skipped);
        assert!(!second[0].delivered);

        // At the boundary the channel is eligible again.
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(d.dispatch(&alert).await[0].delivered);
        assert_eq!(transport.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_sends_are_not_rate_limited() {
        let transport = Arc::new(RecordingTransport::default());
        let mut d = dispatcher(
            vec![channel("bad", "webhook", "url", "https://fail.example/hook")],
            transport,
        );
        let alert = Alert::new("test", "hello", Severity::Warning);

        assert!(d.dispatch(&alert).await[0].error.is_some());
        // Immediately retried on the next dispatch, not skipped.
        assert!(!d.dispatch(&alert).await[0].skipped);
    }

    #[tokio::test]
    async fn disabled_channels_are_never_attempted() {
        let transport = Arc::new(RecordingTransport::default());
        let mut off = channel("off", "webhook", "url", "https://ok.example/hook");
        off.enabled = false;
        let mut d = dispatcher(vec![off], Arc::clone(&transport));

        let outcomes = d
            .dispatch(&Alert::new("test", "hello", Severity::Info))
            .await;
        assert!(outcomes.is_empty());
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_channel_type_is_a_named_error() {
        let transport = Arc::new(RecordingTransport::default());
        let mut d = dispatcher(
            vec![channel("pager", "carrier-pigeon", "url", "https://x")],
            transport,
        );

        let outcomes = d
            .dispatch(&Alert::new("test", "hello", Severity::Info))
            .await;
        assert!(outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("Unknown channel type"));
    }

    #[tokio::test]
    async fn payload_wrappers_derive_from_the_canonical_object() {
        let transport = Arc::new(RecordingTransport::default());
        let mut d = dispatcher(
            vec![
                channel("slack", "slack", "webhook_url", "https://slack.example"),
                channel("discord", "discord", "webhook_url", "https://discord.example"),
                channel("hook", "webhook", "url", "https://hook.example"),
                channel("mail", "email", "relay_url", "https://relay.example"),
            ],
            Arc::clone(&transport),
        );
        let alert = Alert::new("anomaly", "Foo is leaking", Severity::Critical);
        d.dispatch(&alert).await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 4);

        let slack = &sent.iter().find(|(u, _)| u.contains("slack")).unwrap().1;
        assert_eq!(slack["attachments"][0]["text"], "Foo is leaking");
        assert_eq!(slack["attachments"][0]["color"], "#d00000");

        let discord = &sent.iter().find(|(u, _)| u.contains("discord")).unwrap().1;
        assert_eq!(discord["embeds"][0]["description"], "Foo is leaking");

        // The generic webhook body IS the canonical schema.
        let hook = &sent.iter().find(|(u, _)| u.contains("hook.")).unwrap().1;
        assert_eq!(hook["message"], "Foo is leaking");
        assert_eq!(hook["severity"], "critical");
        assert_eq!(hook["category"], "anomaly");
        assert_eq!(hook["installationId"], "kiosk-01");
        assert!(hook["timestamp"].is_string());
        assert!(hook["id"].is_string());

        let mail = &sent.iter().find(|(u, _)| u.contains("relay")).unwrap().1;
        assert_eq!(mail["to"], "ops@example.com");
        assert_eq!(mail["notification"]["installationId"], "kiosk-01");
    }

    #[tokio::test]
    async fn alert_log_is_bounded_and_acknowledgeable() {
        let transport = Arc::new(RecordingTransport::default());
        let mut d = dispatcher(Vec::new(), transport);

        for i in 0..(ALERT_LOG_CAPACITY + 5) {
            d.dispatch(&Alert::new("test", format!("alert {i}"), Severity::Info))
                .await;
        }
        let log = d.recent_alerts();
        assert_eq!(log.len(), ALERT_LOG_CAPACITY);
        assert_eq!(log[0].message, "alert 5");

        let id = log.last().unwrap().id;
        assert!(d.acknowledge(id));
        assert!(d.recent_alerts().last().unwrap().acknowledged);
        assert!(!d.acknowledge(Uuid::new_v4()));
    }

    #[test]
    fn status_notifier_fires_once_per_transition() {
        let mut notifier = StatusNotifier::default();

        // The first observation seeds silently; healthy → warning →
        // critical → healthy then emits exactly 3, repeats produce none.
        assert!(notifier.on_status(HealthStatus::Healthy, &[]).is_none());
        assert!(notifier.on_status(HealthStatus::Healthy, &[]).is_none());
        assert!(notifier.on_status(HealthStatus::Warning, &[]).is_some());
        assert!(notifier.on_status(HealthStatus::Warning, &[]).is_none());
        let critical = notifier.on_status(HealthStatus::Critical, &[]).unwrap();
        assert_eq!(critical.severity, Severity::Critical);
        assert!(notifier.on_status(HealthStatus::Critical, &[]).is_none());
        let recovered = notifier.on_status(HealthStatus::Healthy, &[]).unwrap();
        assert_eq!(recovered.severity, Severity::Info);
        assert!(recovered.message.contains("Critical"));
    }

    #[test]
    fn first_observation_never_notifies_even_when_critical() {
        let mut notifier = StatusNotifier::default();
        assert!(notifier.on_status(HealthStatus::Critical, &[]).is_none());
        // Recovery from the seeded status is a real transition.
        assert!(notifier.on_status(HealthStatus::Healthy, &[]).is_some());
    }

    #[test]
    fn heartbeat_notifies_only_while_critical() {
        let mut notifier = StatusNotifier::default();
        assert!(notifier.on_heartbeat().is_none());

        notifier.on_status(HealthStatus::Critical, &[]);
        assert!(notifier.on_heartbeat().is_some());

        notifier.on_status(HealthStatus::Healthy, &[]);
        assert!(notifier.on_heartbeat().is_none());
    }
}
