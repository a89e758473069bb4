//! Temporal reduction of raw joint-state snapshots

use super::JointState;
use std::collections::VecDeque;

/// Fixed-capacity FIFO of joint-state snapshots with per-field averaging
#[derive(Debug, Clone)]
pub struct TemporalReductionBuffer {
    capacity: usize,
    snapshots: VecDeque<Vec<JointState>>,
}

impl TemporalReductionBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            snapshots: VecDeque::with_capacity(capacity),
        }
    }

    /// Push a snapshot, evicting the oldest beyond capacity
    pub fn add_state(&mut self, states: Vec<JointState>) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(states);
    }

    pub fn is_ready(&self) -> bool {
        self.snapshots.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Per-joint, per-field mean across buffered snapshots; empty when nothing is buffered
    ///
    /// Joints are matched positionally; names come from the newest snapshot.
    pub fn get_reduced_state(&self) -> Vec<JointState> {
        let Some(latest) = self.snapshots.back() else {
            return Vec::new();
        };

        latest
            .iter()
            .enumerate()
            .map(|(i, joint)| {
                let mut sum = JointState::at_rest(joint.name.clone(), 0.0);
                let mut count = 0usize;
                for snapshot in &self.snapshots {
                    if let Some(s) = snapshot.get(i) {
                        sum.angle += s.angle;
                        sum.velocity += s.velocity;
                        sum.acceleration += s.acceleration;
                        sum.torque += s.torque;
                        count += 1;
                    }
                }
                let n = count.max(1) as f64;
                sum.angle /= n;
                sum.velocity /= n;
                sum.acceleration /= n;
                sum.torque /= n;
                sum
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.snapshots.clear();
    }
}
