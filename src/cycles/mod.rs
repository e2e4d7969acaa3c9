//! Canned cycle expansion
//!
//! Every cycle runs in two phases. The Set phase checks the machine mode, reads and
//! validates the command's parameters and returns them as a typed struct. The Run phase
//! reads the live tool position and expands the cycle into an ordered list of
//! `PrimitiveCommand`s. Nothing is emitted here; the channel hands the list to the sink.
//!
//! All lengths are millimetres by the time they reach a cycle. In diameter mode the X
//! parameters are diameters and are halved on the way out.

pub mod boring;
pub mod drilling;
pub mod geometry;
pub mod milling;
pub mod threading;
pub mod turning;

use crate::channel::Position;
use crate::machine::{MachineConfig, MachineRequirement};
use crate::reply::{CommandError, CommandResult};
use crate::sink::PrimitiveCommand;

pub use drilling::{G83Params, G84Params};
pub use threading::{G32Params, G76Params};

/// Comparison slack for accumulated pass depths
pub const NUMERIC_TOLERANCE: f64 = 1e-6;

pub type Program = Vec<PrimitiveCommand>;

/// Parameters of the cycle that currently owns the channel's modal slot
#[derive(Debug, Clone, PartialEq)]
pub enum CycleParameters {
    Threading(G32Params),
    PeckDrill(G83Params),
    Tapping(G84Params),
}

impl CycleParameters {
    pub fn code(&self) -> &'static str {
        match self {
            CycleParameters::Threading(_) => "G32",
            CycleParameters::PeckDrill(_) => "G83",
            CycleParameters::Tapping(_) => "G84",
        }
    }
}

/// What a cycle may read about the machine and the channel it runs on
#[derive(Debug, Clone, Copy)]
pub struct CycleContext<'a> {
    pub machine: &'a MachineConfig,
    pub position: &'a Position,
}

impl<'a> CycleContext<'a> {
    pub fn new(machine: &'a MachineConfig, position: &'a Position) -> Self {
        Self { machine, position }
    }

    /// Live position of a configured axis
    pub fn axis(&self, code: &str, letter: char) -> CommandResult<f64> {
        if !self.machine.has_axis(letter) {
            return Err(CommandError::MissingAxis {
                code: code.to_string(),
                axis: letter,
            });
        }
        Ok(self.position.get(letter).unwrap_or(0.0))
    }

    pub fn require(&self, requirement: MachineRequirement) -> CommandResult<()> {
        if self.machine.machine_type.satisfies(requirement) {
            Ok(())
        } else {
            Err(CommandError::Mode(requirement))
        }
    }

    pub fn diameter_mode(&self) -> bool {
        self.machine.diameter_mode
    }

    /// X as the operator writes it (diameter) to X as the machine moves it (radius)
    pub fn radial(&self, x: f64) -> f64 {
        if self.diameter_mode() {
            x / 2.0
        } else {
            x
        }
    }

    /// Machine X back into the operator's convention
    pub fn displayed_x(&self, x: f64) -> f64 {
        if self.diameter_mode() {
            x * 2.0
        } else {
            x
        }
    }
}

/// +1 if the target lies above the start, -1 otherwise
pub fn direction_sign(start: f64, target: f64) -> f64 {
    if target > start {
        1.0
    } else {
        -1.0
    }
}

/// Pass increments must be positive or the pass loop would never finish
pub fn positive(value: f64, letter: char) -> CommandResult<f64> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(CommandError::invalid(format!(
            "{} parameter must be greater than 0",
            letter
        )))
    }
}

/// Successive pass depths `min(step * k, total)`
///
/// For `total > 0` and `step > 0` this yields exactly `ceil(total / step)` values, the
/// last one equal to `total`. With a skim pass an extra leading depth of 0 is produced.
#[derive(Debug, Clone)]
pub struct Passes {
    total: f64,
    step: f64,
    index: i64,
}

impl Passes {
    pub fn new(total: f64, step: f64) -> Self {
        Self {
            total: total.abs(),
            step,
            index: 0,
        }
    }

    /// Start with a pass at depth 0 before stepping in
    pub fn with_skim(total: f64, step: f64) -> Self {
        Self {
            total: total.abs(),
            step,
            index: -1,
        }
    }
}

impl Iterator for Passes {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        if self.step <= 0.0 || !self.step.is_finite() {
            return None;
        }
        let done = self.index as f64 * self.step;
        if self.index >= 0 && done >= self.total - NUMERIC_TOLERANCE {
            return None;
        }
        self.index += 1;
        let depth = self.index as f64 * self.step;
        Some(depth.clamp(0.0, self.total))
    }
}
