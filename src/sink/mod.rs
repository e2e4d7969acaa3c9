//! Move/spindle emission
//!
//! Cycle expansion produces `PrimitiveCommand`s; a sink either queues them for the
//! motion executor or writes them out as a G-code program for later replay.

use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use thiserror::Error;

/// Ordered axis targets, machine units (mm, degrees)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Target(Vec<(char, f64)>);

impl Target {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an axis, replacing an earlier value for the same letter
    pub fn with(mut self, axis: char, value: f64) -> Self {
        match self.0.iter_mut().find(|(a, _)| *a == axis) {
            Some(slot) => slot.1 = value,
            None => self.0.push((axis, value)),
        }
        self
    }

    pub fn get(&self, axis: char) -> Option<f64> {
        self.0.iter().find(|(a, _)| *a == axis).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (char, f64)> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Shorthand for a single-axis target
pub fn axis(letter: char, value: f64) -> Target {
    Target::new().with(letter, value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcDirection {
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpindleState {
    Clockwise,
    CounterClockwise,
    Off,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveCommand {
    /// `feed_rate: None` is a rapid
    LinearMove {
        target: Target,
        feed_rate: Option<f64>,
    },
    /// Centre given as I/J offsets from the start point
    ArcMove {
        target: Target,
        center_offset: (f64, f64),
        feed_rate: f64,
        direction: ArcDirection,
    },
    Dwell {
        milliseconds: u32,
    },
    Spindle {
        rpm: f64,
        state: SpindleState,
    },
    SelectCoordinateSystem {
        index: u8,
    },
    Home {
        axes: Vec<char>,
    },
    SetPosition {
        target: Target,
    },
    SpindleOrient {
        angle: f64,
    },
    RotaryBrake {
        engaged: bool,
    },
    ToolSelect {
        tool: u32,
    },
    RawPassthrough {
        text: String,
    },
}

impl PrimitiveCommand {
    pub fn rapid(target: Target) -> Self {
        PrimitiveCommand::LinearMove {
            target,
            feed_rate: None,
        }
    }

    pub fn feed(target: Target, feed_rate: f64) -> Self {
        PrimitiveCommand::LinearMove {
            target,
            feed_rate: Some(feed_rate),
        }
    }

    pub fn dwell(milliseconds: u32) -> Self {
        PrimitiveCommand::Dwell { milliseconds }
    }

    pub fn raw(text: impl Into<String>) -> Self {
        PrimitiveCommand::RawPassthrough { text: text.into() }
    }

    pub fn spindle_on(rpm: f64) -> Self {
        PrimitiveCommand::Spindle {
            rpm,
            state: SpindleState::Clockwise,
        }
    }

    pub fn spindle_off() -> Self {
        PrimitiveCommand::Spindle {
            rpm: 0.0,
            state: SpindleState::Off,
        }
    }

    pub fn home(axes: &str) -> Self {
        PrimitiveCommand::Home {
            axes: axes.chars().collect(),
        }
    }

    /// Axis targets this command moves to, if it changes the position
    pub fn target(&self) -> Option<&Target> {
        match self {
            PrimitiveCommand::LinearMove { target, .. }
            | PrimitiveCommand::ArcMove { target, .. }
            | PrimitiveCommand::SetPosition { target } => Some(target),
            _ => None,
        }
    }
}

/// Format with up to three decimals, without trailing zeros
pub fn num(value: f64) -> String {
    let s = format!("{:.3}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    match s {
        "-0" | "" => "0".to_string(),
        _ => s.to_string(),
    }
}

fn write_target(f: &mut fmt::Formatter<'_>, target: &Target) -> fmt::Result {
    for (axis, value) in target.iter() {
        write!(f, " {}{}", axis, num(value))?;
    }
    Ok(())
}

impl fmt::Display for PrimitiveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveCommand::LinearMove { target, feed_rate } => {
                write!(f, "{}", if feed_rate.is_some() { "G1" } else { "G0" })?;
                write_target(f, target)?;
                if let Some(feed) = feed_rate {
                    write!(f, " F{}", num(*feed))?;
                }
                Ok(())
            }
            PrimitiveCommand::ArcMove {
                target,
                center_offset: (i, j),
                feed_rate,
                direction,
            } => {
                let code = match direction {
                    ArcDirection::Clockwise => "G2",
                    ArcDirection::CounterClockwise => "G3",
                };
                write!(f, "{}", code)?;
                write_target(f, target)?;
                write!(f, " I{} J{} F{}", num(*i), num(*j), num(*feed_rate))
            }
            PrimitiveCommand::Dwell { milliseconds } => write!(f, "G4 P{}", milliseconds),
            PrimitiveCommand::Spindle { rpm, state } => match state {
                SpindleState::Clockwise => write!(f, "M3 S{}", num(*rpm)),
                SpindleState::CounterClockwise => write!(f, "M4 S{}", num(*rpm)),
                SpindleState::Off => write!(f, "M5"),
            },
            PrimitiveCommand::SelectCoordinateSystem { index } => write!(f, "G{}", 54 + index),
            PrimitiveCommand::Home { axes } => {
                write!(f, "G28")?;
                for axis in axes {
                    write!(f, " {}", axis)?;
                }
                Ok(())
            }
            PrimitiveCommand::SetPosition { target } => {
                write!(f, "G92")?;
                write_target(f, target)
            }
            PrimitiveCommand::SpindleOrient { angle } => write!(f, "M19 A{}", num(*angle)),
            PrimitiveCommand::RotaryBrake { engaged: true } => write!(f, "M800"),
            PrimitiveCommand::RotaryBrake { engaged: false } => write!(f, "M801"),
            PrimitiveCommand::ToolSelect { tool } => write!(f, "T{}", tool),
            PrimitiveCommand::RawPassthrough { text } => write!(f, "{}", text),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmissionError {
    #[error("move queue full")]
    Full,

    #[error("output closed")]
    Closed,

    #[error("output write failed: {0}")]
    Io(String),
}

/// Anything that accepts primitives in program order
pub trait EmissionSink {
    fn emit(&mut self, command: PrimitiveCommand) -> Result<(), EmissionError>;

    /// Number of primitives that can be accepted right now without blocking
    fn capacity_left(&self) -> usize {
        usize::MAX
    }

    /// Persisting sinks write to storage and need the FileSystem resource
    fn persists(&self) -> bool {
        false
    }
}

impl EmissionSink for Vec<PrimitiveCommand> {
    fn emit(&mut self, command: PrimitiveCommand) -> Result<(), EmissionError> {
        self.push(command);
        Ok(())
    }
}

impl<S: EmissionSink + ?Sized> EmissionSink for Box<S> {
    fn emit(&mut self, command: PrimitiveCommand) -> Result<(), EmissionError> {
        (**self).emit(command)
    }

    fn capacity_left(&self) -> usize {
        (**self).capacity_left()
    }

    fn persists(&self) -> bool {
        (**self).persists()
    }
}

/// Bounded FIFO between the interpreter and the motion executor
#[derive(Debug)]
pub struct MoveQueue {
    buffer: VecDeque<PrimitiveCommand>,
    capacity: usize,
    closed: bool,
}

impl MoveQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            closed: false,
        }
    }

    /// Executor side: take the oldest primitive
    pub fn pop_front(&mut self) -> Option<PrimitiveCommand> {
        self.buffer.pop_front()
    }

    pub fn drain(&mut self) -> Vec<PrimitiveCommand> {
        self.buffer.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl EmissionSink for MoveQueue {
    fn emit(&mut self, command: PrimitiveCommand) -> Result<(), EmissionError> {
        if self.closed {
            return Err(EmissionError::Closed);
        }
        if self.buffer.len() >= self.capacity {
            return Err(EmissionError::Full);
        }
        self.buffer.push_back(command);
        Ok(())
    }

    fn capacity_left(&self) -> usize {
        if self.closed {
            // Let the next emit surface the error
            return usize::MAX;
        }
        self.capacity - self.buffer.len()
    }
}

/// Writes primitives as numbered G-code lines
pub struct ProgramWriter<W: Write> {
    writer: W,
    line_number: u32,
    step: u32,
}

impl<W: Write> ProgramWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            line_number: 10,
            step: 10,
        }
    }

    pub fn flush(&mut self) -> Result<(), EmissionError> {
        self.writer
            .flush()
            .map_err(|e| EmissionError::Io(e.to_string()))
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EmissionSink for ProgramWriter<W> {
    fn emit(&mut self, command: PrimitiveCommand) -> Result<(), EmissionError> {
        writeln!(self.writer, "N{:04} {}", self.line_number, command)
            .map_err(|e| EmissionError::Io(e.to_string()))?;
        self.line_number += self.step;
        Ok(())
    }

    fn persists(&self) -> bool {
        true
    }
}
