use chrono::Utc;

use crate::config::AnomalyTuning;
use crate::history::HistoryStore;
use crate::models::{Anomaly, AnomalyKind, AppSample, Baseline, Severity};

/// Compares fresh samples against an application's baseline.
pub struct AnomalyDetector {
    tuning: AnomalyTuning,
}

impl AnomalyDetector {
    pub fn new(tuning: AnomalyTuning) -> Self {
        Self { tuning }
    }

    /// Integrated per-sample path used by the sampling cycle: judge the
    /// sample against the baseline as it stood *before* recording, then
    /// record it. Recording first would fold the sample into the
    /// baseline extrema and a leak could never exceed its own maximum.
    pub fn observe(&self, store: &mut HistoryStore, sample: AppSample) -> Vec<Anomaly> {
        let baseline = store.baseline(&sample.app_name).cloned();
        let anomalies = baseline.map_or_else(Vec::new, |b| self.check(&sample, &b));
        store.record(sample);
        for anomaly in &anomalies {
            store.push_anomaly(anomaly.clone());
        }
        anomalies
    }

    /// Check one sample against the baseline. Only running samples are
    /// considered; both rules may fire from the same sample.
    pub fn check(&self, latest: &AppSample, baseline: &Baseline) -> Vec<Anomaly> {
        if !latest.is_running() {
            return Vec::new();
        }

        let mut anomalies = Vec::new();

        // CPU spike: well above the average, and the average itself is
        // above the noise floor so near-zero baselines never trigger.
        if latest.cpu_percent > self.tuning.cpu_spike_factor * baseline.avg_cpu
            && baseline.avg_cpu > self.tuning.cpu_noise_floor
        {
            anomalies.push(Anomaly {
                kind: AnomalyKind::CpuSpike,
                severity: Severity::Warning,
                current: latest.cpu_percent,
                baseline: baseline.avg_cpu,
                message: format!(
                    "{}: CPU at {:.1}%, baseline average {:.1}%",
                    latest.app_name, latest.cpu_percent, baseline.avg_cpu
                ),
                timestamp: Utc::now(),
                app_name: latest.app_name.clone(),
            });
        }

        // Memory leak: above the historical maximum with a sustained
        // upward slope.
        if latest.memory_mb > self.tuning.memory_leak_factor * baseline.max_memory_mb
            && baseline.memory_growth_rate > self.tuning.memory_growth_threshold_mb
        {
            anomalies.push(Anomaly {
                kind: AnomalyKind::MemoryLeak,
                severity: Severity::Critical,
                current: latest.memory_mb,
                baseline: baseline.max_memory_mb,
                message: format!(
                    "{}: memory at {:.0} MB, baseline max {:.0} MB, growing {:.2} MB/sample",
                    latest.app_name,
                    latest.memory_mb,
                    baseline.max_memory_mb,
                    baseline.memory_growth_rate
                ),
                timestamp: Utc::now(),
                app_name: latest.app_name.clone(),
            });
        }

        anomalies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppStatus;

    fn detector() -> AnomalyDetector {
        AnomalyDetector::new(AnomalyTuning::default())
    }

    fn baseline(avg_cpu: f64, max_memory_mb: f64, growth: f64) -> Baseline {
        Baseline {
            avg_cpu,
            avg_memory_mb: max_memory_mb / 2.0,
            max_memory_mb,
            min_memory_mb: 10.0,
            memory_growth_rate: growth,
            sample_size: 120,
            computed_at: Utc::now(),
        }
    }

    fn sample(cpu: f64, memory_mb: f64) -> AppSample {
        AppSample {
            app_name: "Foo".into(),
            status: AppStatus::Running,
            pid: Some(42),
            cpu_percent: cpu,
            memory_mb,
            memory_percent: 1.0,
            restart_count: 0,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn cpu_spike_needs_three_times_the_average() {
        let b = baseline(10.0, 100.0, 0.0);
        // 35 > 30 fires; 30 exactly does not
        assert_eq!(detector().check(&sample(35.0, 50.0), &b).len(), 1);
        assert!(detector().check(&sample(30.0, 50.0), &b).is_empty());
        // 31 > 30 fires
        let fired = detector().check(&sample(31.0, 50.0), &b);
        assert_eq!(fired[0].kind, AnomalyKind::CpuSpike);
        assert_eq!(fired[0].severity, Severity::Warning);
    }

    #[test]
    fn near_zero_baselines_never_spike() {
        // avg_cpu=0.5 is under the noise floor; 50× the average stays quiet
        let b = baseline(0.5, 100.0, 0.0);
        assert!(detector().check(&sample(25.0, 50.0), &b).is_empty());
    }

    #[test]
    fn memory_leak_needs_both_excess_and_growth() {
        let growing = baseline(5.0, 100.0, 0.2);
        let flat = baseline(5.0, 100.0, 0.05);

        // 160 > 150 with growth 0.2 → leak
        let fired = detector().check(&sample(5.0, 160.0), &growing);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, AnomalyKind::MemoryLeak);
        assert_eq!(fired[0].severity, Severity::Critical);

        // 140 ≤ 150 → no leak
        assert!(detector().check(&sample(5.0, 140.0), &growing).is_empty());
        // growth under threshold → no leak even at 160
        assert!(detector().check(&sample(5.0, 160.0), &flat).is_empty());
    }

    #[test]
    fn both_rules_can_fire_from_one_sample() {
        let b = baseline(10.0, 100.0, 0.5);
        let fired = detector().check(&sample(50.0, 200.0), &b);
        assert_eq!(fired.len(), 2);
    }

    #[test]
    fn non_running_samples_are_ignored() {
        let b = baseline(10.0, 100.0, 0.5);
        let mut s = sample(50.0, 200.0);
        s.status = AppStatus::Stopped;
        assert!(detector().check(&s, &b).is_empty());
        s.status = AppStatus::Error("query failed".into());
        assert!(detector().check(&s, &b).is_empty());
    }

    #[test]
    fn observe_judges_against_the_pre_record_baseline() {
        let d = detector();
        let mut store = HistoryStore::new();

        // Growing memory 100→119 MB builds a baseline with max 119 and a
        // slope of ~1 MB/sample.
        for i in 0..20 {
            let quiet = sample(5.0, 100.0 + f64::from(i));
            assert!(d.observe(&mut store, quiet).is_empty());
        }
        assert!(store.baseline("Foo").unwrap().memory_growth_rate > 0.9);

        // 500 MB is far past 1.5×119. The baseline recomputed after this
        // sample will carry max ≥ 500; detection must still have fired.
        let fired = d.observe(&mut store, sample(5.0, 500.0));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, AnomalyKind::MemoryLeak);
        assert!(store.baseline("Foo").unwrap().max_memory_mb >= 500.0);
        assert_eq!(store.history("Foo").unwrap().anomalies().count(), 1);
    }

    #[test]
    fn observe_catches_a_spike_the_cycle_after_quiet_samples() {
        let d = detector();
        let mut store = HistoryStore::new();

        for _ in 0..10 {
            assert!(d.observe(&mut store, sample(5.0, 100.0)).is_empty());
        }
        let fired = d.observe(&mut store, sample(50.0, 100.0));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].kind, AnomalyKind::CpuSpike);
    }

    #[test]
    fn tuning_overrides_are_respected() {
        let tuning = AnomalyTuning {
            cpu_spike_factor: 2.0,
            cpu_noise_floor: 1.0,
            memory_leak_factor: 1.5,
            memory_growth_threshold_mb: 0.1,
        };
        let d = AnomalyDetector::new(tuning);
        let b = baseline(10.0, 100.0, 0.0);
        // 2× factor: 25 > 20 fires where the default 3× would not
        assert_eq!(d.check(&sample(25.0, 50.0), &b).len(), 1);
    }
}
