//! Static machine description
//!
//! Joint and link metadata loaded once at startup from a TOML file:
//!
//! ```toml
//! name = "armpi_fpv"
//!
//! [[joints]]
//! name = "joint1"
//! kind = "revolute"
//! axis = [0.0, 0.0, 1.0]
//! lower = -2.09
//! upper = 2.09
//! effort = 1000.0
//! velocity = 10.0
//!
//! [[links]]
//! name = "base_link"
//! ```
//!
//! A description that fails to parse or validate is the one fatal error of
//! the core: nothing downstream can run without joint limits.

use crate::error::{Result, TwinError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;

/// Joint kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    Revolute,
    Continuous,
    Prismatic,
    Fixed,
    Floating,
    Planar,
}

/// Immutable joint specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointSpec {
    pub name: String,
    pub kind: JointKind,
    /// Rotation axis
    #[serde(default = "default_axis")]
    pub axis: [f64; 3],
    /// Lower angle limit (rad)
    #[serde(default = "default_lower")]
    pub lower: f64,
    /// Upper angle limit (rad)
    #[serde(default = "default_upper")]
    pub upper: f64,
    /// Effort (torque) limit (Nm)
    #[serde(default = "default_effort")]
    pub effort: f64,
    /// Velocity limit (rad/s)
    #[serde(default = "default_velocity")]
    pub velocity: f64,
}

fn default_axis() -> [f64; 3] {
    [0.0, 0.0, 1.0]
}

fn default_lower() -> f64 {
    -3.14
}

fn default_upper() -> f64 {
    3.14
}

fn default_effort() -> f64 {
    1000.0
}

fn default_velocity() -> f64 {
    10.0
}

impl JointSpec {
    /// Revolute joint with default limits
    pub fn revolute(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            kind: JointKind::Revolute,
            axis: default_axis(),
            lower,
            upper,
            effort: default_effort(),
            velocity: default_velocity(),
        }
    }

    pub fn with_effort(mut self, effort: f64) -> Self {
        self.effort = effort;
        self
    }

    /// Midpoint of the angular range
    pub fn midpoint(&self) -> f64 {
        (self.lower + self.upper) / 2.0
    }

    pub fn range(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn clamp_angle(&self, angle: f64) -> f64 {
        angle.clamp(self.lower, self.upper)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TwinError::Configuration("joint with empty name".into()));
        }
        let limits = [self.lower, self.upper, self.effort, self.velocity];
        if limits.iter().chain(self.axis.iter()).any(|v| !v.is_finite()) {
            return Err(TwinError::Configuration(format!(
                "joint '{}' has non-finite limits or axis",
                self.name
            )));
        }
        if self.lower > self.upper {
            return Err(TwinError::Configuration(format!(
                "joint '{}' lower limit {} exceeds upper limit {}",
                self.name, self.lower, self.upper
            )));
        }
        if self.effort <= 0.0 {
            return Err(TwinError::Configuration(format!(
                "joint '{}' effort limit must be positive",
                self.name
            )));
        }
        if self.axis.iter().all(|a| *a == 0.0) {
            return Err(TwinError::Configuration(format!(
                "joint '{}' has a zero rotation axis",
                self.name
            )));
        }
        Ok(())
    }
}

/// Link metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    pub name: String,
    #[serde(default)]
    pub mass: Option<f64>,
}

/// Parsed machine description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineDescription {
    pub name: String,
    #[serde(default)]
    pub joints: Vec<JointSpec>,
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

/// Serializable metadata view for the transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineSummary {
    pub name: String,
    pub num_joints: usize,
    pub joints: Vec<JointSpec>,
    pub links: Vec<String>,
}

impl MachineDescription {
    /// Load and validate a description file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            TwinError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let description = Self::parse(&content)?;
        info!(
            "Loaded machine description '{}' ({} controllable joints)",
            description.name,
            description.controllable_joints().len()
        );
        Ok(description)
    }

    /// Parse and validate description TOML
    pub fn parse(content: &str) -> Result<Self> {
        let description: MachineDescription = toml::from_str(content)
            .map_err(|e| TwinError::Configuration(format!("malformed description: {}", e)))?;
        description.validate()?;
        Ok(description)
    }

    /// Build from joint specs (links left empty)
    pub fn from_joints(name: impl Into<String>, joints: Vec<JointSpec>) -> Result<Self> {
        let description = Self {
            name: name.into(),
            joints,
            links: Vec::new(),
        };
        description.validate()?;
        Ok(description)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for joint in &self.joints {
            joint.validate()?;
            if !seen.insert(joint.name.as_str()) {
                return Err(TwinError::Configuration(format!(
                    "duplicate joint name '{}'",
                    joint.name
                )));
            }
        }
        if self.controllable_joints().is_empty() {
            return Err(TwinError::Configuration(format!(
                "machine '{}' has no revolute joints",
                self.name
            )));
        }
        Ok(())
    }

    /// Revolute joints, in declaration order
    pub fn controllable_joints(&self) -> Vec<JointSpec> {
        self.joints
            .iter()
            .filter(|j| j.kind == JointKind::Revolute)
            .cloned()
            .collect()
    }

    pub fn joint(&self, name: &str) -> Option<&JointSpec> {
        self.joints.iter().find(|j| j.name == name)
    }

    pub fn summary(&self) -> MachineSummary {
        let joints = self.controllable_joints();
        MachineSummary {
            name: self.name.clone(),
            num_joints: joints.len(),
            joints,
            links: self.links.iter().map(|l| l.name.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
name = "test_arm"

[[joints]]
name = "joint1"
kind = "revolute"
lower = -1.5
upper = 1.5
effort = 5.0

[[joints]]
name = "gripper_mount"
kind = "fixed"

[[joints]]
name = "joint2"
kind = "revolute"

[[links]]
name = "base_link"
mass = 0.4
"#;

    #[test]
    fn test_parse_sample() {
        let description = MachineDescription::parse(SAMPLE).unwrap();
        assert_eq!(description.name, "test_arm");
        assert_eq!(description.joints.len(), 3);

        let controllable = description.controllable_joints();
        assert_eq!(controllable.len(), 2);
        assert_eq!(controllable[0].name, "joint1");
        assert_eq!(controllable[1].name, "joint2");

        // Defaults applied when limits are omitted
        assert_eq!(controllable[1].lower, -3.14);
        assert_eq!(controllable[1].effort, 1000.0);
        assert_eq!(controllable[1].axis, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_summary() {
        let summary = MachineDescription::parse(SAMPLE).unwrap().summary();
        assert_eq!(summary.num_joints, 2);
        assert_eq!(summary.links, vec!["base_link".to_string()]);
    }

    #[test]
    fn test_malformed_is_configuration_error() {
        let err = MachineDescription::parse("name = ").unwrap_err();
        assert!(matches!(err, TwinError::Configuration(_)));
    }

    #[test]
    fn test_inverted_limits_rejected() {
        let err = MachineDescription::from_joints(
            "bad",
            vec![JointSpec::revolute("j", 1.0, -1.0)],
        )
        .unwrap_err();
        assert!(matches!(err, TwinError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = MachineDescription::from_joints(
            "dup",
            vec![
                JointSpec::revolute("j", -1.0, 1.0),
                JointSpec::revolute("j", -1.0, 1.0),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_no_revolute_joints_rejected() {
        let toml_str = r#"
name = "static"
[[joints]]
name = "mount"
kind = "fixed"
"#;
        assert!(MachineDescription::parse(toml_str).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = MachineDescription::load("/nonexistent/arm.toml").unwrap_err();
        assert!(matches!(err, TwinError::Configuration(_)));
    }
}
