//! Twin Core - predictive-maintenance digital twin
//!
//! Simulate joint kinematics, synthesize sensor telemetry with wear, engineer
//! windowed features, predict anomaly / failure / remaining life, and
//! aggregate a health verdict.

pub mod config;
pub mod description;
pub mod error;
pub mod features;
pub mod health;
pub mod models;
pub mod pipeline;
pub mod sensors;
pub mod simulation;

pub use config::TwinConfig;
pub use description::{JointSpec, MachineDescription};
pub use error::{Result, TwinError};
pub use features::{FeatureEngineer, FeatureSchema, FeatureVector, Metric, MetricSample};
pub use health::{Alert, AlertThrottle, HealthAggregator, HealthStatus, HealthVerdict};
pub use models::{AnomalyDetector, Estimator, FailurePredictor, Inference, ModelSuite, RulEstimator};
pub use pipeline::{ControlCommand, PipelineContext, PipelineService, TickSnapshot};
pub use sensors::{FaultKind, SensorReading, SensorSynthesizer};
pub use simulation::{JointSimulator, JointState, ReplaySimulator, SyntheticSimulator};
