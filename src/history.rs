use std::collections::{HashMap, VecDeque};

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::models::{Anomaly, AppSample, Baseline, Severity};

/// Samples kept per application (~24h at a 30s interval).
pub const HISTORY_CAPACITY: usize = 2880;
/// Baseline window: the most recent running-state samples considered.
pub const BASELINE_WINDOW: usize = 120;
/// Minimum recorded samples before a baseline is computed.
pub const MIN_BASELINE_SAMPLES: usize = 10;
/// Anomalies kept per application.
pub const ANOMALY_CAPACITY: usize = 50;
/// Minimum points for a meaningful growth slope (and a health score).
const MIN_TREND_SAMPLES: usize = 5;

/// Per-application trend history: bounded sample ring, rolling baseline,
/// bounded anomaly list. Owned exclusively by the `HistoryStore`.
#[derive(Debug, Clone, Default)]
pub struct AppHistory {
    samples: VecDeque<AppSample>,
    pub baseline: Option<Baseline>,
    anomalies: VecDeque<Anomaly>,
}

impl AppHistory {
    pub fn samples(&self) -> impl Iterator<Item = &AppSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&AppSample> {
        self.samples.back()
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &Anomaly> {
        self.anomalies.iter()
    }
}

/// Health score report for one application. `Unknown` is not the same as
/// healthy — it means there is not enough data to judge.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub score: u32,
    pub rating: HealthRating,
    pub issues: Vec<String>,
    pub recent_anomalies: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthRating {
    Unknown,
    Critical,
    Warning,
    Good,
    Excellent,
}

/// Owns every application's trend history.
#[derive(Debug, Default)]
pub struct HistoryStore {
    apps: HashMap<String, AppHistory>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample, evicting oldest-first beyond capacity, and
    /// recompute the baseline once enough points exist.
    pub fn record(&mut self, sample: AppSample) {
        let history = self.apps.entry(sample.app_name.clone()).or_default();

        history.samples.push_back(sample);
        while history.samples.len() > HISTORY_CAPACITY {
            history.samples.pop_front();
        }

        if history.samples.len() >= MIN_BASELINE_SAMPLES {
            if let Some(baseline) = compute_baseline(&history.samples) {
                history.baseline = Some(baseline);
            }
        }
    }

    pub fn history(&self, app_name: &str) -> Option<&AppHistory> {
        self.apps.get(app_name)
    }

    pub fn baseline(&self, app_name: &str) -> Option<&Baseline> {
        self.apps.get(app_name)?.baseline.as_ref()
    }

    /// Append an anomaly to the app's bounded list.
    pub fn push_anomaly(&mut self, anomaly: Anomaly) {
        let history = self.apps.entry(anomaly.app_name.clone()).or_default();
        history.anomalies.push_back(anomaly);
        while history.anomalies.len() > ANOMALY_CAPACITY {
            history.anomalies.pop_front();
        }
    }

    /// Score an application: start at 100, subtract 30 per critical and
    /// 15 per warning anomaly within the last hour, subtract 20 when the
    /// latest sample has restarted more than 3 times, floor at 0.
    pub fn health_score(&self, app_name: &str) -> HealthReport {
        let Some(history) = self.apps.get(app_name) else {
            return HealthReport {
                score: 100,
                rating: HealthRating::Unknown,
                issues: vec!["insufficient data".into()],
                recent_anomalies: 0,
            };
        };
        if history.samples.len() < MIN_TREND_SAMPLES {
            return HealthReport {
                score: 100,
                rating: HealthRating::Unknown,
                issues: vec!["insufficient data".into()],
                recent_anomalies: 0,
            };
        }

        let cutoff = Utc::now() - Duration::hours(1);
        let mut score: i64 = 100;
        let mut issues = Vec::new();
        let mut recent = 0;

        for anomaly in history.anomalies.iter().filter(|a| a.timestamp >= cutoff) {
            recent += 1;
            score -= match anomaly.severity {
                Severity::Critical => 30,
                _ => 15,
            };
            issues.push(anomaly.message.clone());
        }

        if let Some(latest) = history.samples.back() {
            if latest.restart_count > 3 {
                score -= 20;
                issues.push(format!(
                    "restarted {} times since registration",
                    latest.restart_count
                ));
            }
        }

        let score = score.max(0) as u32;
        let rating = match score {
            s if s < 30 => HealthRating::Critical,
            s if s < 60 => HealthRating::Warning,
            s if s < 85 => HealthRating::Good,
            _ => HealthRating::Excellent,
        };

        HealthReport {
            score,
            rating,
            issues,
            recent_anomalies: recent,
        }
    }
}

/// Baseline over the most recent `BASELINE_WINDOW` points, running-state
/// samples only. A window with no running samples yields no baseline.
/// Recomputed from scratch each call; O(window) is fine at this scale.
fn compute_baseline(samples: &VecDeque<AppSample>) -> Option<Baseline> {
    let start = samples.len().saturating_sub(BASELINE_WINDOW);
    let running: Vec<&AppSample> = samples
        .iter()
        .skip(start)
        .filter(|s| s.is_running())
        .collect();
    if running.is_empty() {
        return None;
    }

    let n = running.len() as f64;
    let avg_cpu = running.iter().map(|s| s.cpu_percent).sum::<f64>() / n;
    let avg_memory_mb = running.iter().map(|s| s.memory_mb).sum::<f64>() / n;
    let max_memory_mb = running.iter().map(|s| s.memory_mb).fold(f64::MIN, f64::max);
    let min_memory_mb = running.iter().map(|s| s.memory_mb).fold(f64::MAX, f64::min);

    Some(Baseline {
        avg_cpu,
        avg_memory_mb,
        max_memory_mb,
        min_memory_mb,
        memory_growth_rate: memory_growth_slope(&running),
        sample_size: running.len(),
        computed_at: Utc::now(),
    })
}

/// Ordinary least-squares slope of memory against sample index, in MB per
/// sample. Too few points for a meaningful trend gives 0.
fn memory_growth_slope(samples: &[&AppSample]) -> f64 {
    let n = samples.len();
    if n < MIN_TREND_SAMPLES {
        return 0.0;
    }

    let nf = n as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (i, s) in samples.iter().enumerate() {
        let x = i as f64;
        sum_x += x;
        sum_y += s.memory_mb;
        sum_xy += x * s.memory_mb;
        sum_xx += x * x;
    }

    let denom = nf * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    (nf * sum_xy - sum_x * sum_y) / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnomalyKind, AppStatus};
    use chrono::Utc;

    fn running_sample(app: &str, cpu: f64, memory_mb: f64) -> AppSample {
        AppSample {
            app_name: app.to_owned(),
            status: AppStatus::Running,
            pid: Some(42),
            cpu_percent: cpu,
            memory_mb,
            memory_percent: 1.0,
            restart_count: 0,
            timestamp: Utc::now(),
        }
    }

    fn anomaly(app: &str, severity: Severity) -> Anomaly {
        Anomaly {
            kind: AnomalyKind::CpuSpike,
            severity,
            current: 50.0,
            baseline: 5.0,
            message: format!("{severity:?} anomaly"),
            timestamp: Utc::now(),
            app_name: app.to_owned(),
        }
    }

    #[test]
    fn capacity_is_a_hard_bound_evicting_oldest_first() {
        let mut store = HistoryStore::new();
        for i in 0..(HISTORY_CAPACITY + 25) {
            store.record(running_sample("Foo", i as f64, 100.0));
        }

        let history = store.history("Foo").unwrap();
        assert_eq!(history.len(), HISTORY_CAPACITY);
        // The first 25 samples (cpu 0..24) were evicted.
        let oldest = history.samples().next().unwrap();
        assert_eq!(oldest.cpu_percent, 25.0);
    }

    #[test]
    fn no_baseline_before_ten_samples() {
        let mut store = HistoryStore::new();
        for _ in 0..9 {
            store.record(running_sample("Foo", 5.0, 100.0));
        }
        assert!(store.baseline("Foo").is_none());

        store.record(running_sample("Foo", 5.0, 100.0));
        assert!(store.baseline("Foo").is_some());
    }

    #[test]
    fn baseline_ignores_non_running_samples() {
        let mut store = HistoryStore::new();
        for i in 0..20 {
            let mut s = running_sample("Foo", 10.0, 100.0);
            if i % 2 == 0 {
                s.status = AppStatus::Stopped;
                s.cpu_percent = 99.0; // must not pollute the average
            }
            store.record(s);
        }

        let baseline = store.baseline("Foo").unwrap();
        assert_eq!(baseline.sample_size, 10);
        assert!((baseline.avg_cpu - 10.0).abs() < 1e-9);
    }

    #[test]
    fn all_stopped_history_yields_no_baseline() {
        let mut store = HistoryStore::new();
        for _ in 0..30 {
            store.record(AppSample::stopped("Foo", 0));
        }
        assert!(store.baseline("Foo").is_none());
    }

    #[test]
    fn growth_slope_matches_a_linear_ramp() {
        let mut store = HistoryStore::new();
        // memory = 100 + 2*i → slope 2 MB/sample
        for i in 0..40 {
            store.record(running_sample("Foo", 5.0, 100.0 + 2.0 * i as f64));
        }
        let baseline = store.baseline("Foo").unwrap();
        assert!((baseline.memory_growth_rate - 2.0).abs() < 1e-6);
        assert_eq!(baseline.max_memory_mb, 178.0);
        assert_eq!(baseline.min_memory_mb, 100.0);
    }

    #[test]
    fn flat_memory_has_zero_slope() {
        let samples: Vec<AppSample> = (0..30)
            .map(|_| running_sample("Foo", 5.0, 256.0))
            .collect();
        let refs: Vec<&AppSample> = samples.iter().collect();
        assert_eq!(memory_growth_slope(&refs), 0.0);
    }

    #[test]
    fn slope_is_zero_below_five_points() {
        let samples: Vec<AppSample> = (0..4)
            .map(|i| running_sample("Foo", 5.0, 100.0 + 50.0 * i as f64))
            .collect();
        let refs: Vec<&AppSample> = samples.iter().collect();
        assert_eq!(memory_growth_slope(&refs), 0.0);
    }

    #[test]
    fn anomaly_list_is_bounded_fifo() {
        let mut store = HistoryStore::new();
        for _ in 0..(ANOMALY_CAPACITY + 10) {
            store.push_anomaly(anomaly("Foo", Severity::Warning));
        }
        let history = store.history("Foo").unwrap();
        assert_eq!(history.anomalies().count(), ANOMALY_CAPACITY);
    }

    #[test]
    fn unknown_rating_without_enough_data() {
        let mut store = HistoryStore::new();
        let report = store.health_score("Foo");
        assert_eq!(report.score, 100);
        assert_eq!(report.rating, HealthRating::Unknown);

        for _ in 0..4 {
            store.record(running_sample("Foo", 5.0, 100.0));
        }
        assert_eq!(store.health_score("Foo").rating, HealthRating::Unknown);

        store.record(running_sample("Foo", 5.0, 100.0));
        assert_eq!(store.health_score("Foo").rating, HealthRating::Excellent);
    }

    #[test]
    fn score_subtracts_per_recent_anomaly() {
        let mut store = HistoryStore::new();
        for _ in 0..10 {
            store.record(running_sample("Foo", 5.0, 100.0));
        }

        store.push_anomaly(anomaly("Foo", Severity::Warning));
        let report = store.health_score("Foo");
        assert_eq!(report.score, 85);
        assert_eq!(report.rating, HealthRating::Excellent);
        assert_eq!(report.recent_anomalies, 1);

        store.push_anomaly(anomaly("Foo", Severity::Critical));
        let report = store.health_score("Foo");
        assert_eq!(report.score, 55);
        assert_eq!(report.rating, HealthRating::Warning);
        assert_eq!(report.recent_anomalies, 2);
    }

    #[test]
    fn score_floors_at_zero_and_counts_restarts() {
        let mut store = HistoryStore::new();
        for _ in 0..9 {
            store.record(running_sample("Foo", 5.0, 100.0));
        }
        let mut unstable = running_sample("Foo", 5.0, 100.0);
        unstable.restart_count = 4;
        store.record(unstable);

        for _ in 0..5 {
            store.push_anomaly(anomaly("Foo", Severity::Critical));
        }

        let report = store.health_score("Foo");
        // 100 - 5*30 - 20 floors at 0
        assert_eq!(report.score, 0);
        assert_eq!(report.rating, HealthRating::Critical);
        assert!(report.issues.iter().any(|m| m.contains("restarted")));
    }
}
