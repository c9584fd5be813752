//! Kiosk health monitoring core: system/application sampling, per-app
//! trend history with baselines, anomaly detection, status aggregation,
//! and rate-limited multi-channel alerting.

pub mod alerts;
pub mod anomaly;
pub mod apps;
pub mod config;
pub mod control;
pub mod events;
pub mod exec;
pub mod history;
pub mod models;
pub mod scheduler;
pub mod status;
pub mod system;
