//! Machine configuration - kinematic mode, axes and unit conventions
//!
//! Loaded once from JSON and treated as read-only by the interpreter

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uom::si::f64::Length;
use uom::si::length::{inch, millimeter};

/// Kinematic mode of the machine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MachineType {
    #[serde(rename = "fff", alias = "FFF")]
    Fff,
    #[serde(rename = "laser", alias = "LASER")]
    Laser,
    #[serde(rename = "cnc", alias = "CNC")]
    Cnc,
    #[serde(rename = "lathe", alias = "LATHE")]
    Lathe,
    #[serde(rename = "milling", alias = "MILLING", alias = "mill")]
    #[default]
    Milling,
    #[serde(rename = "default", alias = "DEFAULT")]
    Default,
    #[serde(rename = "hmc", alias = "HMC")]
    Hmc,
    #[serde(rename = "five_axis_bc", alias = "FIVE_AXIS_BC")]
    FiveAxisBc,
    #[serde(rename = "lathe_tailstock", alias = "LATHE_TAILSTOCK")]
    LatheTailstock,
    #[serde(rename = "milling_tailstock", alias = "MILLING_TAILSTOCK")]
    MillingTailstock,
    #[serde(rename = "hmc_tailstock", alias = "HMC_TAILSTOCK")]
    HmcTailstock,
    #[serde(rename = "five_axis_bc_tailstock", alias = "FIVE_AXIS_BC_TAILSTOCK")]
    FiveAxisBcTailstock,
}

impl MachineType {
    /// Turning kinematics: X is radial, Z is axial, the spindle doubles as C
    pub fn is_lathe(self) -> bool {
        matches!(self, MachineType::Lathe | MachineType::LatheTailstock)
    }

    /// Milling kinematics, vertical or horizontal
    pub fn is_milling(self) -> bool {
        matches!(
            self,
            MachineType::Milling
                | MachineType::Hmc
                | MachineType::MillingTailstock
                | MachineType::HmcTailstock
        )
    }

    pub fn satisfies(self, requirement: MachineRequirement) -> bool {
        match requirement {
            MachineRequirement::Lathe => self.is_lathe(),
            MachineRequirement::Milling => self.is_milling(),
            MachineRequirement::MillingOrLathe => self.is_lathe() || self.is_milling(),
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
    }
}

/// Kinematics a cycle needs before it may read any parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineRequirement {
    Lathe,
    Milling,
    MillingOrLathe,
}

impl MachineRequirement {
    /// Operator-facing instruction; the wording is what the front panels match on
    pub fn message(self) -> &'static str {
        match self {
            MachineRequirement::Lathe => "Change to Lathe Mode First!",
            MachineRequirement::Milling => "Change to Milling Mode First!",
            MachineRequirement::MillingOrLathe => "Change to Milling, HMC, or Lathe Mode First!",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Units {
    #[serde(rename = "mm", alias = "metric")]
    #[default]
    Metric,
    #[serde(rename = "inch", alias = "imperial")]
    Imperial,
}

impl Units {
    /// Convert a user length into machine millimetres
    pub fn to_mm(self, value: f64) -> f64 {
        match self {
            Units::Metric => value,
            Units::Imperial => Length::new::<inch>(value).get::<millimeter>(),
        }
    }

    /// Convert machine millimetres back into user units
    pub fn from_mm(self, value: f64) -> f64 {
        match self {
            Units::Metric => value,
            Units::Imperial => Length::new::<millimeter>(value).get::<inch>(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read machine config: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid machine config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("axis '{0}' is configured twice")]
    DuplicateAxis(char),

    #[error("axis letter '{0}' is not a valid axis")]
    InvalidAxis(char),
}

/// Letters that may name an axis; the rest are parameter letters
pub const AXIS_LETTERS: &[char] = &['X', 'Y', 'Z', 'U', 'V', 'W', 'A', 'B', 'C', 'D'];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MachineConfig {
    pub machine_type: MachineType,
    pub axes: Vec<char>,
    pub units: Units,
    pub diameter_mode: bool,
    pub move_queue_capacity: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            machine_type: MachineType::Milling,
            axes: vec!['X', 'Y', 'Z'],
            units: Units::Metric,
            diameter_mode: false,
            move_queue_capacity: 256,
        }
    }
}

impl MachineConfig {
    pub fn new(machine_type: MachineType, axes: &str) -> Self {
        Self {
            machine_type,
            axes: axes.chars().map(|c| c.to_ascii_uppercase()).collect(),
            ..Self::default()
        }
    }

    pub fn with_diameter_mode(mut self, diameter_mode: bool) -> Self {
        self.diameter_mode = diameter_mode;
        self
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.units = units;
        self
    }

    /// Load from a JSON file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let mut config: MachineConfig = serde_json::from_str(json)?;
        config.axes = config.axes.iter().map(|c| c.to_ascii_uppercase()).collect();
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        for (i, &axis) in self.axes.iter().enumerate() {
            if !AXIS_LETTERS.contains(&axis) {
                return Err(ConfigError::InvalidAxis(axis));
            }
            if self.axes[..i].contains(&axis) {
                return Err(ConfigError::DuplicateAxis(axis));
            }
        }
        Ok(())
    }

    pub fn has_axis(&self, letter: char) -> bool {
        self.axes.contains(&letter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_capabilities() {
        assert!(MachineType::Lathe.is_lathe());
        assert!(MachineType::LatheTailstock.is_lathe());
        assert!(!MachineType::Lathe.is_milling());
        assert!(MachineType::HmcTailstock.is_milling());
        assert!(!MachineType::FiveAxisBc.is_milling());
        assert!(!MachineType::Fff.satisfies(MachineRequirement::MillingOrLathe));
        assert!(MachineType::Hmc.satisfies(MachineRequirement::MillingOrLathe));
        assert!(!MachineType::Milling.satisfies(MachineRequirement::Lathe));
    }

    #[test]
    fn test_inch_conversion() {
        assert!((Units::Imperial.to_mm(1.0) - 25.4).abs() < 1e-9);
        assert!((Units::Imperial.from_mm(50.8) - 2.0).abs() < 1e-9);
        assert_eq!(Units::Metric.to_mm(3.5), 3.5);
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "machine_type": "lathe",
            "axes": ["x", "z", "c"],
            "diameter_mode": true
        }"#;

        let config = MachineConfig::from_json(json).unwrap();
        assert_eq!(config.machine_type, MachineType::Lathe);
        assert_eq!(config.axes, vec!['X', 'Z', 'C']);
        assert!(config.diameter_mode);
        assert_eq!(config.units, Units::Metric);
        assert_eq!(config.move_queue_capacity, 256);
    }

    #[test]
    fn test_config_rejects_duplicate_axis() {
        let json = r#"{ "axes": ["X", "Z", "X"] }"#;
        assert!(matches!(
            MachineConfig::from_json(json),
            Err(ConfigError::DuplicateAxis('X'))
        ));
    }

    #[test]
    fn test_parse_machine_type_name() {
        assert_eq!(MachineType::parse("hmc"), Some(MachineType::Hmc));
        assert_eq!(MachineType::parse("LATHE"), Some(MachineType::Lathe));
        assert_eq!(MachineType::parse("printer"), None);
    }
}
