//! Time-windowed feature engineering
//!
//! Features are named by [`FeatureName`] rather than free-form strings, and
//! the model-facing order is fixed by a versioned [`FeatureSchema`]. The
//! normalizer is fit against that schema, so train-time and serve-time
//! vectors always line up column for column.

pub mod engineer;
pub mod normalizer;
pub mod rolling;

pub use engineer::{FeatureEngineer, TrainingMatrix};
pub use normalizer::MinMaxNormalizer;
pub use rolling::{RollingBuffer, RollingStats};

use crate::error::TwinError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Scalar metrics derived from each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Mean joint temperature
    Temperature,
    /// Aggregate RMS vibration
    Vibration,
    /// Total power draw
    Power,
    /// Mean |velocity|
    Velocity,
    /// Mean |torque|
    Torque,
    /// Mean |angle|
    Angle,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Temperature,
        Metric::Vibration,
        Metric::Power,
        Metric::Velocity,
        Metric::Torque,
        Metric::Angle,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Vibration => "vibration",
            Metric::Power => "power",
            Metric::Velocity => "velocity",
            Metric::Torque => "torque",
            Metric::Angle => "angle",
        }
    }
}

impl FromStr for Metric {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| TwinError::Configuration(format!("unknown metric '{}'", s)))
    }
}

/// Rolling-window statistic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Statistic {
    Mean,
    Std,
    Max,
    Min,
    Range,
}

impl Statistic {
    pub const ALL: [Statistic; 5] = [
        Statistic::Mean,
        Statistic::Std,
        Statistic::Max,
        Statistic::Min,
        Statistic::Range,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Mean => "mean",
            Statistic::Std => "std",
            Statistic::Max => "max",
            Statistic::Min => "min",
            Statistic::Range => "range",
        }
    }
}

/// Cross-metric ratio features
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Ratio {
    /// temperature / |velocity|
    TempVelocity,
    /// torque / |angle|
    TorqueAngle,
}

impl Ratio {
    pub const ALL: [Ratio; 2] = [Ratio::TempVelocity, Ratio::TorqueAngle];

    /// Denominator guard
    pub const EPSILON: f64 = 1e-10;

    pub fn as_str(&self) -> &'static str {
        match self {
            Ratio::TempVelocity => "temp_velocity_ratio",
            Ratio::TorqueAngle => "torque_angle_ratio",
        }
    }

    /// (numerator, denominator) metrics
    pub fn operands(&self) -> (Metric, Metric) {
        match self {
            Ratio::TempVelocity => (Metric::Temperature, Metric::Velocity),
            Ratio::TorqueAngle => (Metric::Torque, Metric::Angle),
        }
    }
}

/// Name of one engineered feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureName {
    Current(Metric),
    Rolling(Metric, Statistic),
    Ratio(Ratio),
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureName::Current(m) => write!(f, "{}_current", m.as_str()),
            FeatureName::Rolling(m, s) => write!(f, "{}_{}", m.as_str(), s.as_str()),
            FeatureName::Ratio(r) => f.write_str(r.as_str()),
        }
    }
}

impl FromStr for FeatureName {
    type Err = TwinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(ratio) = Ratio::ALL.iter().find(|r| r.as_str() == s) {
            return Ok(FeatureName::Ratio(*ratio));
        }
        let (metric, suffix) = s
            .rsplit_once('_')
            .ok_or_else(|| TwinError::Configuration(format!("unknown feature '{}'", s)))?;
        let metric: Metric = metric.parse()?;
        if suffix == "current" {
            return Ok(FeatureName::Current(metric));
        }
        Statistic::ALL
            .iter()
            .find(|stat| stat.as_str() == suffix)
            .map(|stat| FeatureName::Rolling(metric, *stat))
            .ok_or_else(|| TwinError::Configuration(format!("unknown feature '{}'", s)))
    }
}

impl Serialize for FeatureName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FeatureName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Ordered, versioned list of model input features
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    version: u32,
    names: Vec<FeatureName>,
}

impl FeatureSchema {
    pub const CURRENT_VERSION: u32 = 1;

    /// Per metric: current, mean, std, max, min, range; then the ratios
    pub fn v1() -> Self {
        let mut names = Vec::with_capacity(Metric::ALL.len() * 6 + Ratio::ALL.len());
        for metric in Metric::ALL {
            names.push(FeatureName::Current(metric));
            for stat in Statistic::ALL {
                names.push(FeatureName::Rolling(metric, stat));
            }
        }
        names.extend(Ratio::ALL.iter().map(|r| FeatureName::Ratio(*r)));
        Self {
            version: Self::CURRENT_VERSION,
            names,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn names(&self) -> &[FeatureName] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, name: FeatureName) -> Option<usize> {
        self.names.iter().position(|n| *n == name)
    }

    /// Feature names as strings, in schema order
    pub fn labels(&self) -> Vec<String> {
        self.names.iter().map(|n| n.to_string()).collect()
    }

    /// Schema-ordered cells; `None` where the vector lacks the feature
    pub fn project(&self, features: &FeatureVector) -> Vec<Option<f64>> {
        self.names.iter().map(|n| features.get(*n)).collect()
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::v1()
    }
}

/// One tick's metric values
pub type MetricSample = BTreeMap<Metric, f64>;

/// Named feature values for one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector(BTreeMap<FeatureName, f64>);

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: FeatureName, value: f64) {
        self.0.insert(name, value);
    }

    pub fn get(&self, name: FeatureName) -> Option<f64> {
        self.0.get(&name).copied()
    }

    pub fn contains(&self, name: FeatureName) -> bool {
        self.0.contains_key(&name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureName, f64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}
