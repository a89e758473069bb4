//! Sensor telemetry synthesis with wear and thermal state
//!
//! The synthesizer owns the machine's degradation state: a cycle counter that
//! advances once per [`SensorSynthesizer::generate`] call, a per-joint
//! accumulated temperature, and the offset contributed by vibration faults.
//! Readings are recomputed every tick from the current joint states.

use crate::config::SensorConfig;
use crate::error::TwinError;
use crate::simulation::{JointState, NoiseSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// One tick of synthesized telemetry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Simulated time of the reading (s)
    pub timestamp: f64,
    /// Per-joint temperature (°C)
    pub joint_temperatures: BTreeMap<String, f64>,
    /// Per-joint vibration (g)
    pub joint_vibrations: BTreeMap<String, f64>,
    /// RMS vibration across joints (g)
    pub overall_vibration: f64,
    /// Total power draw (W)
    pub power_consumption: f64,
}

impl SensorReading {
    pub fn mean_temperature(&self) -> f64 {
        mean(self.joint_temperatures.values().copied())
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Wear and thermal state owned by the synthesizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationState {
    /// Operating cycles; only `reset` moves it backwards
    pub cycles: u64,
    /// Accumulated contribution of vibration-effect faults
    pub fault_offset: f64,
    /// min(1, cycles / N_max + fault_offset)
    pub degradation_factor: f64,
    /// Per-joint accumulated temperature before noise and wear offset (°C)
    pub joint_temperatures: BTreeMap<String, f64>,
}

/// Injectable fault kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    Temperature,
    Overload,
    Vibration,
    PressureLoss,
    Degradation,
    Drift,
}

/// What a fault does to the degradation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultEffect {
    /// Raise accumulated joint temperatures
    Thermal,
    /// Raise the degradation factor directly
    Vibration,
    /// Fast-forward the cycle counter
    Wear,
}

impl FaultKind {
    pub fn effect(&self) -> FaultEffect {
        match self {
            FaultKind::Temperature | FaultKind::Overload => FaultEffect::Thermal,
            FaultKind::Vibration | FaultKind::PressureLoss => FaultEffect::Vibration,
            FaultKind::Degradation | FaultKind::Drift => FaultEffect::Wear,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Temperature => "temperature",
            FaultKind::Overload => "overload",
            FaultKind::Vibration => "vibration",
            FaultKind::PressureLoss => "pressure_loss",
            FaultKind::Degradation => "degradation",
            FaultKind::Drift => "drift",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultKind {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temperature" | "thermal" => Ok(FaultKind::Temperature),
            "overload" => Ok(FaultKind::Overload),
            "vibration" => Ok(FaultKind::Vibration),
            "pressure_loss" => Ok(FaultKind::PressureLoss),
            "degradation" | "wear" => Ok(FaultKind::Degradation),
            "drift" => Ok(FaultKind::Drift),
            other => Err(TwinError::UnknownFault(other.to_string())),
        }
    }
}

pub struct SensorSynthesizer {
    config: SensorConfig,
    state: DegradationState,
    noise: NoiseSource,
}

impl SensorSynthesizer {
    pub fn new<I, S>(config: SensorConfig, joint_names: I, seed: Option<u64>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let joint_temperatures = joint_names
            .into_iter()
            .map(|name| (name.into(), config.base_temperature))
            .collect();
        Self {
            state: DegradationState {
                cycles: 0,
                fault_offset: 0.0,
                degradation_factor: 0.0,
                joint_temperatures,
            },
            config,
            noise: NoiseSource::new(seed),
        }
    }

    pub fn degradation(&self) -> &DegradationState {
        &self.state
    }

    pub fn degradation_factor(&self) -> f64 {
        self.state.degradation_factor
    }

    fn refresh_factor(&mut self) {
        let n_max = self.config.max_cycles.max(1) as f64;
        let factor = self.state.cycles as f64 / n_max + self.state.fault_offset;
        self.state.degradation_factor = factor.clamp(0.0, 1.0);
    }

    /// Advance one cycle and synthesize a reading for `joints`
    pub fn generate(&mut self, joints: &[JointState], timestamp: f64) -> SensorReading {
        self.state.cycles += 1;
        self.refresh_factor();
        let degradation = self.state.degradation_factor;
        let cfg = &self.config;

        let mut joint_temperatures = BTreeMap::new();
        let mut joint_vibrations = BTreeMap::new();
        let mut sum_squares = 0.0;
        let mut power = 0.0;

        for joint in joints {
            let accumulated = self
                .state
                .joint_temperatures
                .entry(joint.name.clone())
                .or_insert(cfg.base_temperature);
            let generation = joint.torque.abs() * cfg.heat_gain;
            let dissipation = (*accumulated - cfg.base_temperature) * cfg.heat_dissipation;
            *accumulated += (generation - dissipation) * cfg.thermal_rate;

            let temperature = *accumulated
                + degradation * cfg.degradation_temperature
                + self.noise.gaussian(cfg.temperature_noise_std);
            let temperature =
                clip_or_floor(temperature, cfg.base_temperature, cfg.max_temperature);
            joint_temperatures.insert(joint.name.clone(), temperature);

            let vibration = cfg.vibration_base
                + joint.velocity.abs() * cfg.vibration_velocity_gain
                + degradation * cfg.degradation_vibration
                + self.noise.gaussian(cfg.vibration_noise_std);
            let vibration = clip_or_floor(vibration, 0.0, cfg.vibration_max);
            joint_vibrations.insert(joint.name.clone(), vibration);
            sum_squares += vibration * vibration;

            power += (joint.torque * joint.velocity).abs() * cfg.power_constant;
        }

        let overall_vibration = if joints.is_empty() {
            0.0
        } else {
            (sum_squares / joints.len() as f64).sqrt()
        };

        SensorReading {
            timestamp,
            joint_temperatures,
            joint_vibrations,
            overall_vibration,
            power_consumption: if power.is_finite() { power } else { 0.0 },
        }
    }

    /// Apply a fault cumulatively; severity is clamped to [0, 1]
    pub fn inject_fault(&mut self, kind: FaultKind, severity: f64) {
        let severity = if severity.is_nan() {
            0.0
        } else {
            severity.clamp(0.0, 1.0)
        };

        match kind.effect() {
            FaultEffect::Thermal => {
                let delta = severity * self.config.thermal_fault_delta;
                for temperature in self.state.joint_temperatures.values_mut() {
                    *temperature += delta;
                }
            }
            FaultEffect::Vibration => {
                self.state.fault_offset += severity;
            }
            FaultEffect::Wear => {
                let cycles = (severity * self.config.wear_fault_cycles as f64) as u64;
                self.state.cycles = self.state.cycles.saturating_add(cycles);
            }
        }
        self.refresh_factor();

        info!(
            "Injected {} fault (severity {:.2}), degradation now {:.4}",
            kind, severity, self.state.degradation_factor
        );
    }

    /// Zero wear and restore baseline temperatures
    pub fn reset(&mut self) {
        self.state.cycles = 0;
        self.state.fault_offset = 0.0;
        self.state.degradation_factor = 0.0;
        for temperature in self.state.joint_temperatures.values_mut() {
            *temperature = self.config.base_temperature;
        }
        self.noise.reseed();
        debug!("Sensor synthesizer reset");
    }
}

/// Clamp into [low, high]; NaN maps to `low`
fn clip_or_floor(value: f64, low: f64, high: f64) -> f64 {
    if value.is_nan() {
        low
    } else {
        value.clamp(low, high)
    }
}
