//! Joint kinematics simulation
//!
//! Produces per-tick mechanical joint state for the controllable joints of a
//! machine description. Two interchangeable variants share the
//! [`JointSimulator`] contract:
//!
//! - [`SyntheticSimulator`]: phase-shifted sinusoidal trajectories with a
//!   simplified torque model
//! - [`ReplaySimulator`]: cyclic replay of a recorded joint-angle trace
//!
//! [`TemporalReductionBuffer`] optionally averages raw snapshots to decouple a
//! high tick rate from the downstream feature rate.

pub mod reduction;
pub mod replay;
pub mod synthetic;

pub use reduction::TemporalReductionBuffer;
pub use replay::{ReplaySimulator, ReplayTable};
pub use synthetic::SyntheticSimulator;

use crate::config::{SimulationConfig, SimulatorVariant};
use crate::description::{JointSpec, MachineDescription};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Current state of a joint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    pub name: String,
    /// Angle (rad), always within the joint limits
    pub angle: f64,
    /// Velocity (rad/s)
    pub velocity: f64,
    /// Acceleration (rad/s^2)
    pub acceleration: f64,
    /// Torque (Nm)
    pub torque: f64,
}

impl JointState {
    /// Joint at rest at the given angle
    pub fn at_rest(name: impl Into<String>, angle: f64) -> Self {
        Self {
            name: name.into(),
            angle,
            velocity: 0.0,
            acceleration: 0.0,
            torque: 0.0,
        }
    }
}

/// Common contract for joint simulators
pub trait JointSimulator: Send {
    /// Advance one fixed time increment and recompute every joint
    fn step(&mut self);

    /// Current joint states in description order
    fn joint_states(&self) -> &[JointState];

    /// Restore the initial state: zero elapsed time, neutral pose
    fn reset(&mut self);

    /// Elapsed simulated time (s)
    fn sim_time(&self) -> f64;

    /// Fixed time increment (s)
    fn dt(&self) -> f64;

    /// Specs of the simulated joints
    fn joint_specs(&self) -> &[JointSpec];

    /// Owned copy of the current states
    fn snapshot(&self) -> Vec<JointState> {
        self.joint_states().to_vec()
    }
}

/// Build the simulator variant selected by configuration
pub fn build_simulator(
    config: &SimulationConfig,
    description: &MachineDescription,
) -> Box<dyn JointSimulator> {
    let joints = description.controllable_joints();
    match config.variant {
        SimulatorVariant::Synthetic => {
            info!("Using synthetic trajectory simulator ({} joints)", joints.len());
            Box::new(SyntheticSimulator::new(joints, config))
        }
        SimulatorVariant::Replay => {
            let simulator = match &config.replay_path {
                Some(path) => {
                    info!("Using replay simulator from {}", path.display());
                    ReplaySimulator::open(joints, path, config.dt())
                }
                None => {
                    warn!("Replay variant selected without a replay_path");
                    ReplaySimulator::new(joints, ReplayTable::default(), config.dt())
                }
            };
            Box::new(simulator)
        }
    }
}

/// Seeded Gaussian noise shared by the simulators and the sensor synthesizer
pub(crate) struct NoiseSource {
    seed: Option<u64>,
    rng: StdRng,
}

impl NoiseSource {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        Self {
            seed,
            rng: Self::make_rng(seed),
        }
    }

    fn make_rng(seed: Option<u64>) -> StdRng {
        match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Zero-mean sample; a non-positive deviation yields exactly 0
    pub(crate) fn gaussian(&mut self, std_dev: f64) -> f64 {
        if !(std_dev > 0.0) || !std_dev.is_finite() {
            return 0.0;
        }
        match Normal::new(0.0, std_dev) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => 0.0,
        }
    }

    /// Restart the stream from the configured seed
    pub(crate) fn reseed(&mut self) {
        self.rng = Self::make_rng(self.seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn description() -> MachineDescription {
        MachineDescription::from_joints(
            "arm",
            vec![
                JointSpec::revolute("joint1", -1.0, 1.0),
                JointSpec::revolute("joint2", -2.0, 2.0),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_build_synthetic() {
        let config = SimulationConfig::default();
        let mut sim = build_simulator(&config, &description());
        assert_eq!(sim.joint_states().len(), 2);
        sim.step();
        assert!((sim.sim_time() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_build_replay_without_path_runs_zeroed() {
        let config = SimulationConfig {
            variant: SimulatorVariant::Replay,
            ..SimulationConfig::default()
        };
        let mut sim = build_simulator(&config, &description());
        for _ in 0..5 {
            sim.step();
        }
        assert!(sim.joint_states().iter().all(|s| s.angle == 0.0 && s.torque == 0.0));
    }

    #[test]
    fn test_noise_zero_deviation() {
        let mut noise = NoiseSource::new(Some(1));
        assert_eq!(noise.gaussian(0.0), 0.0);
        assert_eq!(noise.gaussian(-1.0), 0.0);
        assert_eq!(noise.gaussian(f64::NAN), 0.0);
    }

    #[test]
    fn test_noise_reseed_repeats_stream() {
        let mut noise = NoiseSource::new(Some(9));
        let first: Vec<f64> = (0..4).map(|_| noise.gaussian(1.0)).collect();
        noise.reseed();
        let second: Vec<f64> = (0..4).map(|_| noise.gaussian(1.0)).collect();
        assert_eq!(first, second);
    }
}
