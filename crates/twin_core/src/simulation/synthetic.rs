//! Synthetic trajectory simulator
//!
//! Each joint oscillates around the midpoint of its range with its own
//! frequency (`base + index * step`) so joints move out of phase. Velocity and
//! acceleration are the closed-form derivatives of the position; torque is
//! `acceleration + friction * velocity` (unit inertia), clipped to the effort
//! limit.

use super::{JointSimulator, JointState, NoiseSource};
use crate::config::SimulationConfig;
use crate::description::JointSpec;
use std::f64::consts::PI;

pub struct SyntheticSimulator {
    specs: Vec<JointSpec>,
    states: Vec<JointState>,
    dt: f64,
    ticks: u64,
    base_frequency: f64,
    frequency_step: f64,
    amplitude_fraction: f64,
    angle_noise_std: f64,
    velocity_noise_std: f64,
    friction: f64,
    noise: NoiseSource,
}

impl SyntheticSimulator {
    pub fn new(specs: Vec<JointSpec>, config: &SimulationConfig) -> Self {
        let states = neutral_pose(&specs);
        Self {
            specs,
            states,
            dt: config.dt(),
            ticks: 0,
            base_frequency: config.base_frequency,
            frequency_step: config.frequency_step,
            amplitude_fraction: config.amplitude_fraction,
            angle_noise_std: config.angle_noise_std,
            velocity_noise_std: config.velocity_noise_std,
            friction: config.friction_coefficient,
            noise: NoiseSource::new(config.seed),
        }
    }

    /// Oscillation frequency (Hz) of the joint at `index`
    pub fn joint_frequency(&self, index: usize) -> f64 {
        self.base_frequency + index as f64 * self.frequency_step
    }
}

fn neutral_pose(specs: &[JointSpec]) -> Vec<JointState> {
    specs
        .iter()
        .map(|spec| JointState::at_rest(spec.name.clone(), spec.midpoint()))
        .collect()
}

impl JointSimulator for SyntheticSimulator {
    fn step(&mut self) {
        self.ticks += 1;
        let t = self.sim_time();

        for (i, (spec, state)) in self.specs.iter().zip(self.states.iter_mut()).enumerate() {
            let freq = self.base_frequency + i as f64 * self.frequency_step;
            let omega = 2.0 * PI * freq;
            let amplitude = spec.range() * self.amplitude_fraction;
            let phase = omega * t;

            let target_angle = spec.midpoint() + amplitude * phase.sin();
            let target_velocity = amplitude * omega * phase.cos();
            let target_acceleration = -amplitude * omega * omega * phase.sin();

            let angle_noise = self.noise.gaussian(self.angle_noise_std);
            let velocity_noise = self.noise.gaussian(self.velocity_noise_std);

            state.angle = spec.clamp_angle(target_angle + angle_noise);
            state.velocity = target_velocity + velocity_noise;
            state.acceleration = target_acceleration;
            state.torque = (state.acceleration + self.friction * state.velocity)
                .clamp(-spec.effort, spec.effort);
        }
    }

    fn joint_states(&self) -> &[JointState] {
        &self.states
    }

    fn reset(&mut self) {
        self.ticks = 0;
        self.states = neutral_pose(&self.specs);
        self.noise.reseed();
    }

    fn sim_time(&self) -> f64 {
        self.ticks as f64 * self.dt
    }

    fn dt(&self) -> f64 {
        self.dt
    }

    fn joint_specs(&self) -> &[JointSpec] {
        &self.specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn specs() -> Vec<JointSpec> {
        vec![
            JointSpec::revolute("joint1", -2.0, 2.0),
            JointSpec::revolute("joint2", 0.0, 1.0),
            JointSpec::revolute("joint3", -0.5, 0.5).with_effort(0.2),
        ]
    }

    fn quiet_config() -> SimulationConfig {
        SimulationConfig {
            angle_noise_std: 0.0,
            velocity_noise_std: 0.0,
            seed: Some(3),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_initial_pose_is_midpoint() {
        let sim = SyntheticSimulator::new(specs(), &quiet_config());
        let states = sim.joint_states();
        assert_eq!(states[0].angle, 0.0);
        assert_eq!(states[1].angle, 0.5);
        assert!(states.iter().all(|s| s.velocity == 0.0 && s.torque == 0.0));
    }

    #[test]
    fn test_closed_form_trajectory() {
        let config = quiet_config();
        let mut sim = SyntheticSimulator::new(specs(), &config);
        sim.step();

        let t = 0.1;
        let omega = 2.0 * PI * 0.3;
        let amplitude = 4.0 * 0.3;
        let state = &sim.joint_states()[0];
        assert_abs_diff_eq!(state.angle, amplitude * (omega * t).sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(state.velocity, amplitude * omega * (omega * t).cos(), epsilon = 1e-12);
        assert_abs_diff_eq!(
            state.acceleration,
            -amplitude * omega * omega * (omega * t).sin(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            state.torque,
            state.acceleration + 0.1 * state.velocity,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_joints_have_distinct_frequencies() {
        let sim = SyntheticSimulator::new(specs(), &quiet_config());
        assert_abs_diff_eq!(sim.joint_frequency(0), 0.3, epsilon = 1e-12);
        assert_abs_diff_eq!(sim.joint_frequency(2), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_limits_hold_under_noise() {
        let config = SimulationConfig {
            angle_noise_std: 5.0,
            amplitude_fraction: 0.5,
            seed: Some(11),
            ..SimulationConfig::default()
        };
        let specs = specs();
        let mut sim = SyntheticSimulator::new(specs.clone(), &config);
        for _ in 0..500 {
            sim.step();
            for (spec, state) in specs.iter().zip(sim.joint_states()) {
                assert!(state.angle >= spec.lower && state.angle <= spec.upper);
                assert!(state.torque.abs() <= spec.effort);
            }
        }
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut sim = SyntheticSimulator::new(specs(), &quiet_config());
        let initial = sim.snapshot();
        for _ in 0..37 {
            sim.step();
        }
        sim.reset();
        assert_eq!(sim.sim_time(), 0.0);
        assert_eq!(sim.snapshot(), initial);
    }

    #[test]
    fn test_reset_is_deterministic_with_seed() {
        let config = SimulationConfig {
            seed: Some(5),
            ..SimulationConfig::default()
        };
        let mut sim = SyntheticSimulator::new(specs(), &config);
        sim.step();
        let first = sim.snapshot();
        sim.reset();
        sim.step();
        assert_eq!(sim.snapshot(), first);
    }
}
