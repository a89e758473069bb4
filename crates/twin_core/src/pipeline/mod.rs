//! Pipeline context: one pass of simulate → sense → featurize → predict → aggregate
//!
//! [`PipelineContext`] owns every piece of mutable pipeline state and is the
//! single writer of it. [`PipelineContext::tick`] never fails: faults inside a
//! pass are logged, substituted with safe values, and listed on the returned
//! [`TickSnapshot`].

pub mod bootstrap;
pub mod scheduler;

pub use bootstrap::{BootstrapOutcome, BootstrapReport};
pub use scheduler::PipelineService;

use crate::config::TwinConfig;
use crate::description::MachineDescription;
use crate::error::{Result, TwinError};
use crate::features::{FeatureEngineer, FeatureVector, Metric, MetricSample};
use crate::health::{Alert, AlertSeverity, AlertThrottle, HealthAggregator, HealthVerdict};
use crate::models::{ModelOutputs, ModelSuite};
use crate::sensors::{FaultKind, SensorReading, SensorSynthesizer};
use crate::simulation::{build_simulator, JointSimulator, JointState, TemporalReductionBuffer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Commands applied between ticks
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Reset,
    InjectFault { kind: FaultKind, severity: f64 },
}

/// Fully formed output of one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSnapshot {
    /// Ticks completed since start or the last reset
    pub tick: u64,
    pub sim_time: f64,
    pub wall_time: DateTime<Utc>,
    pub joints: Vec<JointState>,
    pub reading: SensorReading,
    pub degradation_factor: f64,
    pub metrics: MetricSample,
    pub outputs: ModelOutputs,
    pub verdict: HealthVerdict,
    /// Alerts that passed the throttle this tick
    pub emitted_alerts: Vec<Alert>,
    /// Faults substituted during this tick
    pub faults: Vec<String>,
}

impl TickSnapshot {
    pub fn is_degraded(&self) -> bool {
        !self.faults.is_empty()
    }
}

pub struct PipelineContext {
    config: TwinConfig,
    description: MachineDescription,
    simulator: Box<dyn JointSimulator>,
    synthesizer: SensorSynthesizer,
    reduction: Option<TemporalReductionBuffer>,
    engineer: FeatureEngineer,
    models: ModelSuite,
    aggregator: HealthAggregator,
    throttle: AlertThrottle,
    last_metrics: MetricSample,
    ticks: u64,
}

impl PipelineContext {
    /// Build the context with untrained models
    pub fn new(config: TwinConfig, description: MachineDescription) -> Self {
        let simulator = build_simulator(&config.simulation, &description);
        let joint_names: Vec<String> = simulator
            .joint_specs()
            .iter()
            .map(|spec| spec.name.clone())
            .collect();
        let synthesizer =
            SensorSynthesizer::new(config.sensors.clone(), joint_names, config.simulation.seed);
        let reduction = config
            .simulation
            .reduction_enabled
            .then(|| TemporalReductionBuffer::new(config.simulation.reduction_factor));

        info!(
            "Pipeline for {} ready: {} joints at {} Hz{}",
            description.name,
            simulator.joint_specs().len(),
            config.simulation.frequency_hz,
            if reduction.is_some() { ", reduction on" } else { "" }
        );

        Self {
            engineer: FeatureEngineer::new(config.features.window_size),
            models: ModelSuite::new(&config.models),
            aggregator: HealthAggregator::new(config.health.clone(), &config.sensors),
            throttle: AlertThrottle::new(config.health.alert_dedup_secs),
            simulator,
            synthesizer,
            reduction,
            config,
            description,
            last_metrics: MetricSample::new(),
            ticks: 0,
        }
    }

    pub fn config(&self) -> &TwinConfig {
        &self.config
    }

    pub fn description(&self) -> &MachineDescription {
        &self.description
    }

    pub fn simulator(&self) -> &dyn JointSimulator {
        self.simulator.as_ref()
    }

    pub fn synthesizer(&self) -> &SensorSynthesizer {
        &self.synthesizer
    }

    pub fn engineer(&self) -> &FeatureEngineer {
        &self.engineer
    }

    pub fn models(&self) -> &ModelSuite {
        &self.models
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Load persisted models, training and saving new ones when that fails
    pub fn load_or_bootstrap(&mut self) -> Result<BootstrapOutcome> {
        bootstrap::load_or_bootstrap(
            &self.config,
            &self.description,
            &mut self.engineer,
            &mut self.models,
        )
    }

    /// Train fresh models regardless of what is on disk
    pub fn retrain(&mut self) -> Result<BootstrapReport> {
        bootstrap::train_models(
            &self.config,
            &self.description,
            &mut self.engineer,
            &mut self.models,
        )
    }

    /// Run one full pass at the current wall-clock time
    pub fn tick(&mut self) -> TickSnapshot {
        self.tick_at(Utc::now())
    }

    /// Run one full pass; `now` only drives alert throttling
    pub fn tick_at(&mut self, now: DateTime<Utc>) -> TickSnapshot {
        let mut faults = Vec::new();

        self.simulator.step();
        let raw = self.simulator.snapshot();
        let sim_time = self.simulator.sim_time();
        let reading = self.synthesizer.generate(&raw, sim_time);

        let kinematics = match self.reduction.as_mut() {
            Some(buffer) => {
                buffer.add_state(raw.clone());
                if buffer.is_ready() {
                    buffer.get_reduced_state()
                } else {
                    raw.clone()
                }
            }
            None => raw.clone(),
        };

        let metrics = self.sanitize(derive_metrics(&kinematics, &reading), &mut faults);
        self.engineer.add_sample(&metrics);
        let features = self.engineer.extract_features(&metrics);
        let outputs = self.predict(&features, &mut faults);

        let verdict = self.aggregator.evaluate(&outputs, &reading);
        for model in &verdict.degraded_models {
            faults.push(format!("{} substituted with a neutral value", model));
        }

        let emitted_alerts = self.throttle.admit(&verdict.alerts, now);
        for alert in &emitted_alerts {
            match alert.severity {
                AlertSeverity::Critical => warn!("[{}] {}", alert.title, alert.message),
                AlertSeverity::Warning => info!("[{}] {}", alert.title, alert.message),
            }
        }

        self.ticks += 1;
        debug!(
            "Tick {} t={:.1}s status={} degradation={:.4}",
            self.ticks,
            sim_time,
            verdict.status,
            self.synthesizer.degradation_factor()
        );

        TickSnapshot {
            tick: self.ticks,
            sim_time,
            wall_time: now,
            joints: raw,
            degradation_factor: self.synthesizer.degradation_factor(),
            reading,
            metrics,
            outputs,
            verdict,
            emitted_alerts,
            faults,
        }
    }

    fn predict(&mut self, features: &FeatureVector, faults: &mut Vec<String>) -> ModelOutputs {
        match self.engineer.prepare_for_ml(features) {
            Ok(x) => self.models.infer(&x),
            Err(e) => {
                warn!("Feature preparation failed, predictions unavailable: {}", e);
                faults.push(e.to_string());
                ModelOutputs::unavailable(&e.to_string())
            }
        }
    }

    /// Replace non-finite metrics with the last sanitized value, or 0
    fn sanitize(&mut self, mut metrics: MetricSample, faults: &mut Vec<String>) -> MetricSample {
        for (metric, value) in metrics.iter_mut() {
            if !value.is_finite() {
                let substitute = self.last_metrics.get(metric).copied().unwrap_or(0.0);
                let fault = TwinError::NumericFault(format!(
                    "{} was {}, using {}",
                    metric.as_str(),
                    value,
                    substitute
                ));
                warn!("{}", fault);
                faults.push(fault.to_string());
                *value = substitute;
            }
        }
        self.last_metrics = metrics.clone();
        metrics
    }

    /// Restore simulator, sensors, and buffers; fitted models are kept
    pub fn reset(&mut self) {
        self.simulator.reset();
        self.synthesizer.reset();
        if let Some(buffer) = self.reduction.as_mut() {
            buffer.reset();
        }
        self.engineer.clear_buffers();
        self.throttle.clear();
        self.last_metrics.clear();
        self.ticks = 0;
        info!("Pipeline reset");
    }

    pub fn inject_fault(&mut self, kind: FaultKind, severity: f64) {
        self.synthesizer.inject_fault(kind, severity);
    }

    pub fn apply(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Reset => self.reset(),
            ControlCommand::InjectFault { kind, severity } => self.inject_fault(kind, severity),
        }
    }
}

/// The six per-tick metrics fed to the feature engineer
pub fn derive_metrics(joints: &[JointState], reading: &SensorReading) -> MetricSample {
    let mean_abs = |f: fn(&JointState) -> f64| {
        if joints.is_empty() {
            0.0
        } else {
            joints.iter().map(|j| f(j).abs()).sum::<f64>() / joints.len() as f64
        }
    };

    MetricSample::from([
        (Metric::Temperature, reading.mean_temperature()),
        (Metric::Vibration, reading.overall_vibration),
        (Metric::Power, reading.power_consumption),
        (Metric::Velocity, mean_abs(|j| j.velocity)),
        (Metric::Torque, mean_abs(|j| j.torque)),
        (Metric::Angle, mean_abs(|j| j.angle)),
    ])
}
