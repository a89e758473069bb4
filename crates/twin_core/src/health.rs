//! Health verdicts and alerting
//!
//! [`HealthAggregator::evaluate`] is a pure function of the model outputs and
//! the current reading. Repeated alerts are debounced separately by
//! [`AlertThrottle`], which the caller owns.

use crate::config::{HealthConfig, SensorConfig};
use crate::models::{AnomalyDetector, Estimator, FailurePredictor, ModelOutputs, RulEstimator};
use crate::sensors::SensorReading;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Overall machine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// Signal an alert was raised on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSignal {
    Anomaly,
    Failure,
    Rul,
    Temperature,
    Vibration,
}

impl AlertSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSignal::Anomaly => "anomaly",
            AlertSignal::Failure => "failure",
            AlertSignal::Rul => "rul",
            AlertSignal::Temperature => "temperature",
            AlertSignal::Vibration => "vibration",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub signal: AlertSignal,
    pub title: String,
    /// Human-readable text carrying the live value
    pub message: String,
}

impl Alert {
    fn new(severity: AlertSeverity, signal: AlertSignal, title: &str, message: String) -> Self {
        Self {
            severity,
            signal,
            title: title.to_string(),
            message,
        }
    }

    /// Stable identity for debouncing; excludes the live value
    pub fn key(&self) -> String {
        let severity = match self.severity {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        };
        format!("{}:{}:{}", self.signal.as_str(), severity, self.title)
    }
}

/// Resolved model scores
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// In [0, 1]
    pub anomaly_score: f64,
    /// In [0, 1]
    pub failure_probability: f64,
    /// Hours, never negative
    pub rul_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthVerdict {
    pub status: HealthStatus,
    pub prediction: PredictionResult,
    pub alerts: Vec<Alert>,
    /// Per-joint health in [0, 1]
    pub component_health: BTreeMap<String, f64>,
    /// Models that fell back to neutral values this tick
    pub degraded_models: Vec<String>,
}

pub struct HealthAggregator {
    config: HealthConfig,
    base_temperature: f64,
    thermal_span: f64,
    vibration_span: f64,
}

impl HealthAggregator {
    pub fn new(config: HealthConfig, sensors: &SensorConfig) -> Self {
        let positive = |v: f64| if v > 0.0 { v } else { 1.0 };
        Self {
            config,
            base_temperature: sensors.base_temperature,
            thermal_span: positive(sensors.max_temperature - sensors.base_temperature),
            vibration_span: positive(sensors.vibration_max),
        }
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Resolve unavailable models to neutral values, then evaluate
    pub fn evaluate(&self, outputs: &ModelOutputs, reading: &SensorReading) -> HealthVerdict {
        let mut degraded_models = Vec::new();
        let mut resolve = |name: &str, inference: &crate::models::Inference, neutral: f64| {
            inference.value().unwrap_or_else(|| {
                degraded_models.push(name.to_string());
                neutral
            })
        };
        let prediction = PredictionResult {
            anomaly_score: resolve(AnomalyDetector::NAME, &outputs.anomaly, 0.0).clamp(0.0, 1.0),
            failure_probability: resolve(FailurePredictor::NAME, &outputs.failure, 0.0)
                .clamp(0.0, 1.0),
            rul_hours: resolve(RulEstimator::NAME, &outputs.rul, self.config.neutral_rul_hours)
                .max(0.0),
        };

        let mut verdict = self.evaluate_scores(prediction, reading);
        verdict.degraded_models = degraded_models;
        verdict
    }

    /// Verdict from already-resolved scores
    pub fn evaluate_scores(
        &self,
        prediction: PredictionResult,
        reading: &SensorReading,
    ) -> HealthVerdict {
        HealthVerdict {
            status: self.status(&prediction),
            prediction,
            alerts: self.alerts(&prediction, reading),
            component_health: self.component_health(reading),
            degraded_models: Vec::new(),
        }
    }

    fn status(&self, p: &PredictionResult) -> HealthStatus {
        let c = &self.config;
        if p.failure_probability > c.failure_critical || p.rul_hours < c.rul_critical_hours {
            HealthStatus::Critical
        } else if p.failure_probability > c.failure_warning || p.rul_hours < c.rul_warning_hours {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }

    fn alerts(&self, p: &PredictionResult, reading: &SensorReading) -> Vec<Alert> {
        use AlertSeverity::{Critical, Warning};
        let c = &self.config;
        let mut alerts = Vec::new();

        let anomaly = p.anomaly_score;
        if anomaly > c.anomaly_critical {
            alerts.push(Alert::new(
                Critical,
                AlertSignal::Anomaly,
                "Critical Anomaly",
                format!("Critical anomaly score: {:.2}", anomaly),
            ));
        } else if anomaly > c.anomaly_warning {
            alerts.push(Alert::new(
                Warning,
                AlertSignal::Anomaly,
                "Potential Anomaly",
                format!("Elevated anomaly score: {:.2}", anomaly),
            ));
        }

        let failure = p.failure_probability;
        if failure > c.failure_critical {
            alerts.push(Alert::new(
                Critical,
                AlertSignal::Failure,
                "Failure Imminent",
                format!("Failure probability: {:.2}", failure),
            ));
        } else if failure > c.failure_warning {
            alerts.push(Alert::new(
                Warning,
                AlertSignal::Failure,
                "Failure Risk",
                format!("Elevated failure risk: {:.2}", failure),
            ));
        }

        let rul = p.rul_hours;
        if rul < c.rul_critical_hours {
            alerts.push(Alert::new(
                Critical,
                AlertSignal::Rul,
                "Critical RUL",
                format!("Remaining useful life critical: {:.1} hours", rul),
            ));
        } else if rul < c.rul_warning_hours {
            alerts.push(Alert::new(
                Warning,
                AlertSignal::Rul,
                "Low RUL",
                format!("Remaining useful life low: {:.1} hours", rul),
            ));
        }

        let temperature = reading.mean_temperature();
        if temperature > c.temperature_critical {
            alerts.push(Alert::new(
                Critical,
                AlertSignal::Temperature,
                "Overheating",
                format!("Mean joint temperature critical: {:.1}°C", temperature),
            ));
        } else if temperature > c.temperature_warning {
            alerts.push(Alert::new(
                Warning,
                AlertSignal::Temperature,
                "High Temperature",
                format!("Mean joint temperature high: {:.1}°C", temperature),
            ));
        }

        let vibration = reading.overall_vibration;
        if vibration > c.vibration_critical {
            alerts.push(Alert::new(
                Critical,
                AlertSignal::Vibration,
                "High Vibration",
                format!("Vibration level critical: {:.2}g", vibration),
            ));
        } else if vibration > c.vibration_warning {
            alerts.push(Alert::new(
                Warning,
                AlertSignal::Vibration,
                "Elevated Vibration",
                format!("Vibration level elevated: {:.2}g", vibration),
            ));
        }

        alerts
    }

    fn component_health(&self, reading: &SensorReading) -> BTreeMap<String, f64> {
        reading
            .joint_temperatures
            .iter()
            .map(|(name, temperature)| {
                let vibration = reading.joint_vibrations.get(name).copied().unwrap_or(0.0);
                let health = 1.0
                    - (temperature - self.base_temperature) / self.thermal_span
                    - vibration / self.vibration_span;
                let health = if health.is_nan() { 0.0 } else { health.clamp(0.0, 1.0) };
                (name.clone(), health)
            })
            .collect()
    }
}

/// Debounces alerts by key using the last time each was emitted
pub struct AlertThrottle {
    interval: Duration,
    last_emitted: HashMap<String, DateTime<Utc>>,
}

impl AlertThrottle {
    pub fn new(interval_secs: u64) -> Self {
        Self {
            interval: i64::try_from(interval_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            last_emitted: HashMap::new(),
        }
    }

    /// Whether more than the interval has elapsed since `key` was last emitted
    pub fn should_emit(&self, key: &str, now: DateTime<Utc>) -> bool {
        match self.last_emitted.get(key) {
            Some(last) => now.signed_duration_since(*last) > self.interval,
            None => true,
        }
    }

    pub fn record(&mut self, key: String, now: DateTime<Utc>) {
        self.last_emitted.insert(key, now);
    }

    /// Filter to alerts due for emission and record them
    pub fn admit(&mut self, alerts: &[Alert], now: DateTime<Utc>) -> Vec<Alert> {
        let admitted: Vec<Alert> = alerts
            .iter()
            .filter(|alert| self.should_emit(&alert.key(), now))
            .cloned()
            .collect();
        for alert in &admitted {
            self.record(alert.key(), now);
        }

        // keys idle for ten intervals are forgotten; no cutoff when that is out of range
        let cutoff = self
            .interval
            .checked_mul(10)
            .and_then(|idle| now.checked_sub_signed(idle));
        if let Some(cutoff) = cutoff {
            self.last_emitted.retain(|_, &mut time| time > cutoff);
        }
        admitted
    }

    pub fn len(&self) -> usize {
        self.last_emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_emitted.is_empty()
    }

    pub fn clear(&mut self) {
        self.last_emitted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Inference;

    fn reading(temperature: f64, vibration: f64) -> SensorReading {
        SensorReading {
            timestamp: 0.0,
            joint_temperatures: BTreeMap::from([
                ("joint1".to_string(), temperature),
                ("joint2".to_string(), temperature),
            ]),
            joint_vibrations: BTreeMap::from([
                ("joint1".to_string(), vibration),
                ("joint2".to_string(), vibration),
            ]),
            overall_vibration: vibration,
            power_consumption: 0.0,
        }
    }

    fn aggregator() -> HealthAggregator {
        HealthAggregator::new(HealthConfig::default(), &SensorConfig::default())
    }

    fn scores(anomaly: f64, failure: f64, rul: f64) -> PredictionResult {
        PredictionResult {
            anomaly_score: anomaly,
            failure_probability: failure,
            rul_hours: rul,
        }
    }

    #[test]
    fn test_status_thresholds() {
        let agg = aggregator();
        let r = reading(25.0, 0.1);
        assert_eq!(agg.evaluate_scores(scores(0.0, 0.1, 400.0), &r).status, HealthStatus::Healthy);
        assert_eq!(agg.evaluate_scores(scores(0.0, 0.5, 400.0), &r).status, HealthStatus::Warning);
        assert_eq!(agg.evaluate_scores(scores(0.0, 0.1, 80.0), &r).status, HealthStatus::Warning);
        assert_eq!(agg.evaluate_scores(scores(0.0, 0.8, 400.0), &r).status, HealthStatus::Critical);
        assert_eq!(agg.evaluate_scores(scores(0.0, 0.0, 10.0), &r).status, HealthStatus::Critical);
        // boundaries are strict
        assert_eq!(agg.evaluate_scores(scores(0.0, 0.7, 50.0), &r).status, HealthStatus::Warning);
    }

    #[test]
    fn test_two_tier_alerts() {
        let agg = aggregator();
        let verdict = agg.evaluate_scores(scores(0.9, 0.5, 30.0), &reading(65.0, 1.9));
        let keys: Vec<String> = verdict.alerts.iter().map(Alert::key).collect();
        assert!(keys.contains(&"anomaly:critical:Critical Anomaly".to_string()));
        assert!(keys.contains(&"failure:warning:Failure Risk".to_string()));
        assert!(keys.contains(&"rul:critical:Critical RUL".to_string()));
        assert!(keys.contains(&"temperature:warning:High Temperature".to_string()));
        assert!(keys.contains(&"vibration:critical:High Vibration".to_string()));
    }

    #[test]
    fn test_component_health() {
        let agg = aggregator();
        let verdict = agg.evaluate_scores(scores(0.0, 0.0, 500.0), &reading(52.5, 0.5));
        // 1 - 27.5/55 - 0.5/2
        assert!((verdict.component_health["joint1"] - 0.25).abs() < 1e-12);

        let hot = agg.evaluate_scores(scores(0.0, 0.0, 500.0), &reading(80.0, 2.0));
        assert_eq!(hot.component_health["joint2"], 0.0);
    }

    #[test]
    fn test_unavailable_models_use_neutral_values() {
        let agg = aggregator();
        let outputs = ModelOutputs {
            anomaly: Inference::Scored(0.2),
            failure: Inference::Unavailable("not trained".into()),
            rul: Inference::Unavailable("not trained".into()),
        };
        let verdict = agg.evaluate(&outputs, &reading(25.0, 0.1));
        assert_eq!(verdict.prediction.failure_probability, 0.0);
        assert_eq!(verdict.prediction.rul_hours, 1000.0);
        assert_eq!(verdict.status, HealthStatus::Healthy);
        assert_eq!(verdict.degraded_models, vec!["failure_predictor", "rul_estimator"]);
    }

    #[test]
    fn test_throttle_debounces_by_key() {
        let agg = aggregator();
        let mut throttle = AlertThrottle::new(10);
        let t0 = Utc::now();

        let first = agg.evaluate_scores(scores(0.9, 0.0, 500.0), &reading(25.0, 0.1));
        assert_eq!(throttle.admit(&first.alerts, t0).len(), 1);

        // same alert, different live value, inside the window
        let second = agg.evaluate_scores(scores(0.95, 0.0, 500.0), &reading(25.0, 0.1));
        assert!(throttle.admit(&second.alerts, t0 + Duration::seconds(5)).is_empty());

        // exactly at the interval is still suppressed
        assert!(throttle.admit(&second.alerts, t0 + Duration::seconds(10)).is_empty());
        assert_eq!(throttle.admit(&second.alerts, t0 + Duration::seconds(11)).len(), 1);
    }

    #[test]
    fn test_throttle_prunes_stale_keys() {
        let mut throttle = AlertThrottle::new(1);
        let alert = Alert::new(AlertSeverity::Warning, AlertSignal::Rul, "Low RUL", "x".into());
        let t0 = Utc::now();
        throttle.admit(&[alert], t0);
        assert_eq!(throttle.len(), 1);
        throttle.admit(&[], t0 + Duration::seconds(60));
        assert!(throttle.is_empty());
    }

    #[test]
    fn test_throttle_with_huge_interval() {
        let alert = Alert::new(
            AlertSeverity::Critical,
            AlertSignal::Failure,
            "Failure Imminent",
            "x".into(),
        );
        let alerts = std::slice::from_ref(&alert);
        let t0 = Utc::now();
        for secs in [u64::MAX, 10_000_000_000_000_000, u64::MAX / 2_000_000] {
            let mut throttle = AlertThrottle::new(secs);
            assert!(throttle.admit(&[], t0).is_empty());
            assert_eq!(throttle.admit(alerts, t0).len(), 1);
            // never re-emitted, never pruned
            assert!(throttle.admit(alerts, t0 + Duration::days(365)).is_empty());
            assert_eq!(throttle.len(), 1);
        }
    }
}
