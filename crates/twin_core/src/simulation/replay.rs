//! Recorded-trace replay simulator
//!
//! Consumes a table of joint angles (degrees) cyclically, one row per tick.
//! Columns are matched to joints by exact name, then `joint_{i+1}`, then
//! `j{i+1}`. Velocity and torque are not recorded and stay at zero.

use super::{JointSimulator, JointState};
use crate::description::JointSpec;
use crate::error::{Result, TwinError};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Joint-angle trace, one row per sample
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayTable {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl ReplayTable {
    /// Load a CSV trace with a header row
    ///
    /// Rows with a non-numeric cell are skipped. A missing file or a trace
    /// without data rows is `DataUnavailable`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            TwinError::DataUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;

        let mut lines = content.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().ok_or_else(|| {
            TwinError::DataUnavailable(format!("{} is empty", path.display()))
        })?;
        let columns: Vec<String> = header.split(',').map(|c| c.trim().to_string()).collect();

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for line in lines {
            let parsed: std::result::Result<Vec<f64>, _> =
                line.split(',').map(|cell| cell.trim().parse::<f64>()).collect();
            match parsed {
                Ok(row) if row.len() == columns.len() => rows.push(row),
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!("Skipped {} malformed rows in {}", skipped, path.display());
        }

        let table = Self::from_rows(columns, rows);
        if table.is_empty() {
            return Err(TwinError::DataUnavailable(format!(
                "{} has no data rows",
                path.display()
            )));
        }
        info!("Loaded replay trace with {} rows", table.len());
        Ok(table)
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column for the joint at `index`: exact name, then `joint_{i+1}`, then `j{i+1}`
    fn column_for(&self, name: &str, index: usize) -> Option<usize> {
        let candidates = [
            name.to_string(),
            format!("joint_{}", index + 1),
            format!("j{}", index + 1),
        ];
        candidates
            .iter()
            .find_map(|candidate| self.columns.iter().position(|c| c == candidate))
    }

    fn value(&self, row: usize, column: usize) -> Option<f64> {
        self.rows.get(row).and_then(|r| r.get(column)).copied()
    }
}

pub struct ReplaySimulator {
    specs: Vec<JointSpec>,
    states: Vec<JointState>,
    table: ReplayTable,
    columns: Vec<Option<usize>>,
    cursor: usize,
    ticks: u64,
    dt: f64,
}

impl ReplaySimulator {
    pub fn new(specs: Vec<JointSpec>, table: ReplayTable, dt: f64) -> Self {
        let columns = specs
            .iter()
            .enumerate()
            .map(|(i, spec)| table.column_for(&spec.name, i))
            .collect::<Vec<_>>();
        for (spec, column) in specs.iter().zip(&columns) {
            if column.is_none() && !table.is_empty() {
                debug!("No replay column for joint '{}'", spec.name);
            }
        }
        let states = neutral_pose(&specs);
        Self {
            specs,
            states,
            table,
            columns,
            cursor: 0,
            ticks: 0,
            dt,
        }
    }

    /// Open a CSV trace; a missing or empty source degrades to zeroed states
    pub fn open(specs: Vec<JointSpec>, path: impl AsRef<Path>, dt: f64) -> Self {
        let table = match ReplayTable::load(path) {
            Ok(table) => table,
            Err(e) => {
                warn!("Replay data unavailable, running with zeroed joints: {}", e);
                ReplayTable::default()
            }
        };
        Self::new(specs, table, dt)
    }

    /// True when there is no trace to replay
    pub fn data_unavailable(&self) -> bool {
        self.table.is_empty()
    }
}

fn neutral_pose(specs: &[JointSpec]) -> Vec<JointState> {
    specs
        .iter()
        .map(|spec| JointState::at_rest(spec.name.clone(), spec.clamp_angle(0.0)))
        .collect()
}

impl JointSimulator for ReplaySimulator {
    fn step(&mut self) {
        self.ticks += 1;
        if self.table.is_empty() {
            return;
        }

        let row = self.cursor % self.table.len();
        for ((spec, state), column) in self
            .specs
            .iter()
            .zip(self.states.iter_mut())
            .zip(&self.columns)
        {
            let degrees = column.and_then(|c| self.table.value(row, c));
            if let Some(degrees) = degrees.filter(|d| d.is_finite()) {
                state.angle = spec.clamp_angle(degrees.to_radians());
            }
            state.velocity = 0.0;
            state.acceleration = 0.0;
            state.torque = 0.0;
        }
        self.cursor = (row + 1) % self.table.len();
    }

    fn joint_states(&self) -> &[JointState] {
        &self.states
    }

    fn reset(&mut self) {
        self.cursor = 0;
        self.ticks = 0;
        self.states = neutral_pose(&self.specs);
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
