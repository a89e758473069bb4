//! Model bootstrap: load persisted artifacts or train from synthetic history

use super::derive_metrics;
use crate::config::TwinConfig;
use crate::description::MachineDescription;
use crate::error::{Result, TwinError};
use crate::features::{FeatureEngineer, MetricSample};
use crate::models::{ModelSuite, TrainingReport, NORMALIZER_ARTIFACT};
use crate::sensors::{FaultKind, SensorSynthesizer};
use crate::simulation::{JointSimulator, SyntheticSimulator};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Degradation above which a sample is labelled as failing
pub const FAILURE_DEGRADATION: f64 = 0.7;
/// RUL (hours) of a machine with no wear
pub const NOMINAL_LIFE_HOURS: f64 = 500.0;

const WEAR_FAULT_PERIOD: usize = 1000;
const WEAR_FAULT_PHASE: usize = 500;
const WEAR_FAULT_SEVERITY: f64 = 0.3;

/// Synthetic history with its ground-truth wear
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    pub samples: Vec<MetricSample>,
    pub degradation: Vec<f64>,
}

impl TrainingHistory {
    pub fn failure_labels(&self) -> Vec<f64> {
        self.degradation
            .iter()
            .map(|&d| if d > FAILURE_DEGRADATION { 1.0 } else { 0.0 })
            .collect()
    }

    pub fn rul_targets(&self) -> Vec<f64> {
        self.degradation
            .iter()
            .map(|&d| NOMINAL_LIFE_HOURS * (1.0 - d))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapReport {
    pub samples: usize,
    pub nominal_samples: usize,
    pub failure: TrainingReport,
    pub rul: TrainingReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    Loaded,
    Trained(BootstrapReport),
}

/// Run a private simulator/synthesizer pair for `n` samples
///
/// A wear fault is injected every thousand samples, offset by five hundred,
/// so the history spans nominal through failing machines.
pub fn generate_history(
    config: &TwinConfig,
    description: &MachineDescription,
    n: usize,
) -> TrainingHistory {
    let seed = Some(config.models.random_seed);
    let mut sim_config = config.simulation.clone();
    sim_config.seed = seed;

    let joints = description.controllable_joints();
    let names: Vec<String> = joints.iter().map(|j| j.name.clone()).collect();
    let mut simulator = SyntheticSimulator::new(joints, &sim_config);
    let mut synthesizer = SensorSynthesizer::new(config.sensors.clone(), names, seed);

    let mut history = TrainingHistory {
        samples: Vec::with_capacity(n),
        degradation: Vec::with_capacity(n),
    };
    for i in 0..n {
        if i % WEAR_FAULT_PERIOD == WEAR_FAULT_PHASE {
            synthesizer.inject_fault(FaultKind::Degradation, WEAR_FAULT_SEVERITY);
        }
        simulator.step();
        let joints = simulator.joint_states();
        let reading = synthesizer.generate(joints, simulator.sim_time());
        history.samples.push(derive_metrics(joints, &reading));
        history.degradation.push(synthesizer.degradation_factor());
    }
    history
}

/// Train all three models from synthetic history and persist them
///
/// Any error here is fatal to the caller.
pub fn train_models(
    config: &TwinConfig,
    description: &MachineDescription,
    engineer: &mut FeatureEngineer,
    models: &mut ModelSuite,
) -> Result<BootstrapReport> {
    let n = config.models.bootstrap_samples;
    info!("Generating {} synthetic training samples", n);
    let history = generate_history(config, description, n);

    let matrix = engineer.create_training_dataset(&history.samples)?;
    engineer.clear_buffers();

    let labels = history.failure_labels();
    let targets = history.rul_targets();
    let nominal: Vec<Vec<f64>> = matrix
        .rows
        .iter()
        .zip(&labels)
        .filter(|(_, &label)| label == 0.0)
        .map(|(row, _)| row.clone())
        .collect();
    if nominal.is_empty() {
        return Err(TwinError::InvalidTrainingData(
            "no nominal samples to train the anomaly detector".into(),
        ));
    }

    models.anomaly.train(&nominal)?;
    let failure = models.failure.train(&matrix.rows, &labels)?;
    let rul = models.rul.train(&matrix.rows, &targets)?;

    let dir = &config.models.models_dir;
    models.save_all(dir)?;
    engineer.save_normalizer(dir.join(NORMALIZER_ARTIFACT))?;

    let report = BootstrapReport {
        samples: matrix.len(),
        nominal_samples: nominal.len(),
        failure,
        rul,
    };
    info!(
        "Bootstrap training done: {} samples ({} nominal), artifacts in {}",
        report.samples,
        report.nominal_samples,
        dir.display()
    );
    Ok(report)
}

/// Load every artifact; on any load failure train and save fresh ones
pub fn load_or_bootstrap(
    config: &TwinConfig,
    description: &MachineDescription,
    engineer: &mut FeatureEngineer,
    models: &mut ModelSuite,
) -> Result<BootstrapOutcome> {
    let dir = &config.models.models_dir;
    let loaded = models
        .load_all(dir)
        .and_then(|_| engineer.load_normalizer(dir.join(NORMALIZER_ARTIFACT)));

    match loaded {
        Ok(()) => Ok(BootstrapOutcome::Loaded),
        Err(e) => {
            match &e {
                TwinError::ModelNotFound(path) => {
                    warn!("No trained model at {}, bootstrapping", path.display())
                }
                other => warn!("Persisted models unusable ({}), bootstrapping", other),
            }
            train_models(config, description, engineer, models).map(BootstrapOutcome::Trained)
        }
    }
}
