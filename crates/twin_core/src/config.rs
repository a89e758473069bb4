//! Configuration management for the twin pipeline.
//!
//! Loads settings from a TOML file or uses defaults. Every field carries a
//! serde default, so a partial file only overrides what it names.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/twin/twin.toml";

/// Fallback config path next to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/twin.toml";

/// Which joint simulator drives the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulatorVariant {
    /// Sinusoidal synthetic trajectories
    Synthetic,
    /// Cyclic replay of a recorded joint-angle trace
    Replay,
}

/// Joint kinematics simulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Tick rate in Hz
    #[serde(default = "default_frequency")]
    pub frequency_hz: f64,

    #[serde(default = "default_variant")]
    pub variant: SimulatorVariant,

    /// Recorded trace for the replay variant (CSV, angles in degrees)
    #[serde(default)]
    pub replay_path: Option<PathBuf>,

    /// Average raw joint states over `reduction_factor` ticks before featurizing
    #[serde(default)]
    pub reduction_enabled: bool,

    #[serde(default = "default_reduction_factor")]
    pub reduction_factor: usize,

    /// Seed for simulation and sensor noise; entropy when absent
    #[serde(default)]
    pub seed: Option<u64>,

    /// Oscillation frequency of the first joint (Hz)
    #[serde(default = "default_base_frequency")]
    pub base_frequency: f64,

    /// Frequency increment per joint index (Hz)
    #[serde(default = "default_frequency_step")]
    pub frequency_step: f64,

    /// Oscillation amplitude as a fraction of the joint range
    #[serde(default = "default_amplitude_fraction")]
    pub amplitude_fraction: f64,

    #[serde(default = "default_angle_noise")]
    pub angle_noise_std: f64,

    #[serde(default = "default_velocity_noise")]
    pub velocity_noise_std: f64,

    /// Viscous friction coefficient in the torque model
    #[serde(default = "default_friction")]
    pub friction_coefficient: f64,
}

fn default_frequency() -> f64 {
    10.0
}

fn default_variant() -> SimulatorVariant {
    SimulatorVariant::Synthetic
}

fn default_reduction_factor() -> usize {
    10 // 100 Hz -> 10 Hz
}

fn default_base_frequency() -> f64 {
    0.3
}

fn default_frequency_step() -> f64 {
    0.1
}

fn default_amplitude_fraction() -> f64 {
    0.3
}

fn default_angle_noise() -> f64 {
    0.01
}

fn default_velocity_noise() -> f64 {
    0.05
}

fn default_friction() -> f64 {
    0.1
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            frequency_hz: default_frequency(),
            variant: default_variant(),
            replay_path: None,
            reduction_enabled: false,
            reduction_factor: default_reduction_factor(),
            seed: None,
            base_frequency: default_base_frequency(),
            frequency_step: default_frequency_step(),
            amplitude_fraction: default_amplitude_fraction(),
            angle_noise_std: default_angle_noise(),
            velocity_noise_std: default_velocity_noise(),
            friction_coefficient: default_friction(),
        }
    }
}

impl SimulationConfig {
    /// Fixed time increment per tick (seconds)
    pub fn dt(&self) -> f64 {
        if self.frequency_hz > 0.0 {
            1.0 / self.frequency_hz
        } else {
            1.0 / default_frequency()
        }
    }
}

/// Sensor synthesis and degradation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Ambient baseline temperature (°C)
    #[serde(default = "default_base_temperature")]
    pub base_temperature: f64,

    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,

    /// Vibration floor (g)
    #[serde(default = "default_vibration_base")]
    pub vibration_base: f64,

    #[serde(default = "default_vibration_max")]
    pub vibration_max: f64,

    /// Cycles at which the degradation factor saturates
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u64,

    /// Heat generated per unit |torque|
    #[serde(default = "default_heat_gain")]
    pub heat_gain: f64,

    /// Heat lost per degree above baseline
    #[serde(default = "default_heat_dissipation")]
    pub heat_dissipation: f64,

    /// Integration rate of the thermal balance per tick
    #[serde(default = "default_thermal_rate")]
    pub thermal_rate: f64,

    /// Extra temperature at full degradation (°C)
    #[serde(default = "default_degradation_temperature")]
    pub degradation_temperature: f64,

    #[serde(default = "default_temperature_noise")]
    pub temperature_noise_std: f64,

    /// Vibration per unit |velocity|
    #[serde(default = "default_vibration_velocity_gain")]
    pub vibration_velocity_gain: f64,

    /// Extra vibration at full degradation (g)
    #[serde(default = "default_degradation_vibration")]
    pub degradation_vibration: f64,

    #[serde(default = "default_vibration_noise")]
    pub vibration_noise_std: f64,

    /// Watts per unit |torque * velocity|
    #[serde(default = "default_power_constant")]
    pub power_constant: f64,

    /// Baseline temperature rise for a thermal fault at severity 1 (°C)
    #[serde(default = "default_thermal_fault_delta")]
    pub thermal_fault_delta: f64,

    /// Cycles added by a wear fault at severity 1
    #[serde(default = "default_wear_fault_cycles")]
    pub wear_fault_cycles: u64,
}

fn default_base_temperature() -> f64 {
    25.0
}

fn default_max_temperature() -> f64 {
    80.0
}

fn default_vibration_base() -> f64 {
    0.1
}

fn default_vibration_max() -> f64 {
    2.0
}

fn default_max_cycles() -> u64 {
    100_000
}

fn default_heat_gain() -> f64 {
    2.0
}

fn default_heat_dissipation() -> f64 {
    0.1
}

fn default_thermal_rate() -> f64 {
    0.01
}

fn default_degradation_temperature() -> f64 {
    10.0
}

fn default_temperature_noise() -> f64 {
    0.5
}

fn default_vibration_velocity_gain() -> f64 {
    0.1
}

fn default_degradation_vibration() -> f64 {
    0.5
}

fn default_vibration_noise() -> f64 {
    0.05
}

fn default_power_constant() -> f64 {
    10.0
}

fn default_thermal_fault_delta() -> f64 {
    30.0
}

fn default_wear_fault_cycles() -> u64 {
    50_000
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            base_temperature: default_base_temperature(),
            max_temperature: default_max_temperature(),
            vibration_base: default_vibration_base(),
            vibration_max: default_vibration_max(),
            max_cycles: default_max_cycles(),
            heat_gain: default_heat_gain(),
            heat_dissipation: default_heat_dissipation(),
            thermal_rate: default_thermal_rate(),
            degradation_temperature: default_degradation_temperature(),
            temperature_noise_std: default_temperature_noise(),
            vibration_velocity_gain: default_vibration_velocity_gain(),
            degradation_vibration: default_degradation_vibration(),
            vibration_noise_std: default_vibration_noise(),
            power_constant: default_power_constant(),
            thermal_fault_delta: default_thermal_fault_delta(),
            wear_fault_cycles: default_wear_fault_cycles(),
        }
    }
}

/// Feature engineering settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Rolling window size W
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

fn default_window_size() -> usize {
    10
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

/// Model training and persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Directory holding persisted model and normalizer artifacts
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Expected anomaly rate among nominal samples
    #[serde(default = "default_contamination")]
    pub anomaly_contamination: f64,

    /// Isolation forest size
    #[serde(default = "default_isolation_trees")]
    pub isolation_trees: usize,

    /// Decision threshold for the binary failure prediction
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,

    /// Boosting rounds for the failure and RUL ensembles
    #[serde(default = "default_estimators")]
    pub n_estimators: usize,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Seed for model sampling and holdout splits
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Synthetic samples generated when no artifacts exist
    #[serde(default = "default_bootstrap_samples")]
    pub bootstrap_samples: usize,
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("data/trained_models")
}

fn default_contamination() -> f64 {
    0.05
}

fn default_isolation_trees() -> usize {
    100
}

fn default_failure_threshold() -> f64 {
    0.7
}

fn default_estimators() -> usize {
    100
}

fn default_max_depth() -> usize {
    6
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_random_seed() -> u64 {
    42
}

fn default_bootstrap_samples() -> usize {
    5000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            anomaly_contamination: default_contamination(),
            isolation_trees: default_isolation_trees(),
            failure_threshold: default_failure_threshold(),
            n_estimators: default_estimators(),
            max_depth: default_max_depth(),
            learning_rate: default_learning_rate(),
            random_seed: default_random_seed(),
            bootstrap_samples: default_bootstrap_samples(),
        }
    }
}

/// Health aggregation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_failure_critical")]
    pub failure_critical: f64,

    #[serde(default = "default_failure_warning")]
    pub failure_warning: f64,

    #[serde(default = "default_rul_critical")]
    pub rul_critical_hours: f64,

    #[serde(default = "default_rul_warning")]
    pub rul_warning_hours: f64,

    #[serde(default = "default_anomaly_critical")]
    pub anomaly_critical: f64,

    #[serde(default = "default_anomaly_warning")]
    pub anomaly_warning: f64,

    /// Mean joint temperature thresholds (°C)
    #[serde(default = "default_temperature_critical")]
    pub temperature_critical: f64,

    #[serde(default = "default_temperature_warning")]
    pub temperature_warning: f64,

    /// Aggregate vibration thresholds (g)
    #[serde(default = "default_vibration_critical")]
    pub vibration_critical: f64,

    #[serde(default = "default_vibration_warning")]
    pub vibration_warning: f64,

    /// RUL reported when the estimator is unavailable
    #[serde(default = "default_neutral_rul")]
    pub neutral_rul_hours: f64,

    /// Minimum seconds between two emissions of the same alert
    #[serde(default = "default_alert_interval")]
    pub alert_dedup_secs: u64,
}

fn default_failure_critical() -> f64 {
    0.7
}

fn default_failure_warning() -> f64 {
    0.4
}

fn default_rul_critical() -> f64 {
    50.0
}

fn default_rul_warning() -> f64 {
    100.0
}

fn default_anomaly_critical() -> f64 {
    0.7
}

fn default_anomaly_warning() -> f64 {
    0.4
}

fn default_temperature_critical() -> f64 {
    75.0
}

fn default_temperature_warning() -> f64 {
    60.0
}

fn default_vibration_critical() -> f64 {
    1.8
}

fn default_vibration_warning() -> f64 {
    1.2
}

fn default_neutral_rul() -> f64 {
    1000.0
}

fn default_alert_interval() -> u64 {
    10
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_critical: default_failure_critical(),
            failure_warning: default_failure_warning(),
            rul_critical_hours: default_rul_critical(),
            rul_warning_hours: default_rul_warning(),
            anomaly_critical: default_anomaly_critical(),
            anomaly_warning: default_anomaly_warning(),
            temperature_critical: default_temperature_critical(),
            temperature_warning: default_temperature_warning(),
            vibration_critical: default_vibration_critical(),
            vibration_warning: default_vibration_warning(),
            neutral_rul_hours: default_neutral_rul(),
            alert_dedup_secs: default_alert_interval(),
        }
    }
}

/// Tick loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// First backoff after a failed tick (ms)
    #[serde(default = "default_backoff_base")]
    pub error_backoff_ms: u64,

    /// Backoff ceiling (ms)
    #[serde(default = "default_backoff_max")]
    pub max_backoff_ms: u64,
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_backoff_max() -> u64 {
    8000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            error_backoff_ms: default_backoff_base(),
            max_backoff_ms: default_backoff_max(),
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwinConfig {
    #[serde(default)]
    pub simulation: SimulationConfig,

    #[serde(default)]
    pub sensors: SensorConfig,

    #[serde(default)]
    pub features: FeatureConfig,

    #[serde(default)]
    pub models: ModelConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl TwinConfig {
    /// Load config from the standard locations, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                TwinConfig::default()
            })
    }

    /// Load config from specific path
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: TwinConfig = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
