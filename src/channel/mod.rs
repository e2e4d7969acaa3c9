//! Per-channel interpreter state
//!
//! A channel is one command source (network, USB, panel, file, internal queue). It owns
//! its modal state, the live position it has commanded, the primitives it still has to
//! hand to the sink and a short history of executed lines. The step logic that moves a
//! channel between states lives in `gcodes`.

use crate::cycles::CycleParameters;
use crate::machine::Units;
use crate::params::CodeLine;
use crate::resource::ChannelId;
use crate::sink::{PrimitiveCommand, Target};
use log::debug;
use std::collections::VecDeque;
use std::fmt;

pub const HISTORY_LEN: usize = 32;

/// Commanded position of every configured axis, in millimetres or degrees
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Position {
    axes: Vec<(char, f64)>,
}

impl Position {
    pub fn new(letters: &[char]) -> Self {
        Self {
            axes: letters.iter().map(|&l| (l, 0.0)).collect(),
        }
    }

    pub fn get(&self, letter: char) -> Option<f64> {
        self.axes
            .iter()
            .find(|(l, _)| *l == letter)
            .map(|(_, v)| *v)
    }

    /// Letters the machine does not have are ignored
    pub fn set(&mut self, letter: char, value: f64) {
        if let Some(slot) = self.axes.iter_mut().find(|(l, _)| *l == letter) {
            slot.1 = value;
        }
    }

    pub fn apply(&mut self, target: &Target) {
        for (letter, value) in target.iter() {
            self.set(letter, value);
        }
    }

    /// Track what a primitive does to the position once the sink has accepted it
    pub fn follow(&mut self, command: &PrimitiveCommand) {
        match command {
            PrimitiveCommand::Home { axes } => {
                for &letter in axes {
                    self.set(letter, 0.0);
                }
            }
            other => {
                if let Some(target) = other.target() {
                    self.apply(target);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (char, f64)> + '_ {
        self.axes.iter().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Http,
    Telnet,
    Usb,
    Aux,
    File,
    Queue,
    Daemon,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelKind::Http => "HTTP",
            ChannelKind::Telnet => "Telnet",
            ChannelKind::Usb => "USB",
            ChannelKind::Aux => "Aux",
            ChannelKind::File => "File",
            ChannelKind::Queue => "Queue",
            ChannelKind::Daemon => "Daemon",
        };
        write!(f, "{}", name)
    }
}

/// Where a channel pulls its next line from
pub trait LineSource {
    fn next_line(&mut self) -> Option<String>;

    fn has_line(&self) -> bool;
}

/// Lines queued up front, e.g. the contents of a program file
#[derive(Debug, Clone, Default)]
pub struct LineQueue {
    lines: VecDeque<String>,
}

impl LineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
    }
}

impl LineSource for LineQueue {
    fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    fn has_line(&self) -> bool {
        !self.lines.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionMode {
    Rapid,
    Linear,
    ArcClockwise,
    ArcCounterClockwise,
}

impl MotionMode {
    pub fn code(self) -> &'static str {
        match self {
            MotionMode::Rapid => "G0",
            MotionMode::Linear => "G1",
            MotionMode::ArcClockwise => "G2",
            MotionMode::ArcCounterClockwise => "G3",
        }
    }
}

/// What a line without a G/M word continues
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Modal {
    #[default]
    None,
    Motion(MotionMode),
    Cycle(CycleParameters),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModalState {
    pub units: Units,
    pub relative: bool,
    pub modal: Modal,
    pub feed_rate: Option<f64>,
    pub rpm: Option<f64>,
    /// 0 for G54 through 5 for G59
    pub coordinate_system: u8,
    pub tool: Option<u32>,
}

impl ModalState {
    pub fn new(units: Units) -> Self {
        Self {
            units,
            relative: false,
            modal: Modal::None,
            feed_rate: None,
            rpm: None,
            coordinate_system: 0,
            tool: None,
        }
    }

    pub fn active_cycle(&self) -> Option<&CycleParameters> {
        match &self.modal {
            Modal::Cycle(cycle) => Some(cycle),
            _ => None,
        }
    }

    /// Deactivate whatever modal command or cycle is running
    pub fn close_modal(&mut self) {
        self.modal = Modal::None;
    }

    /// Activation of one cycle always ends the previous one
    pub fn activate_cycle(&mut self, cycle: CycleParameters) {
        self.close_modal();
        self.modal = Modal::Cycle(cycle);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelState {
    Idle,
    FetchLine,
    Dispatch(CodeLine),
    /// Waiting for a lock another channel holds
    AwaitResource(CodeLine),
    /// Pending primitives still going to the sink
    AwaitCompletion,
    /// M799 waiting for the operator, until `deadline` in clock milliseconds
    AwaitInterlock { deadline: u64 },
    Aborted { reason: String },
}

impl ChannelState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ChannelState::Idle)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, ChannelState::Aborted { .. })
    }
}

pub struct Channel {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub state: ChannelState,
    pub modal: ModalState,
    pub position: Position,
    /// Line being executed, for replies and history
    pub current: Option<CodeLine>,
    pub pending: VecDeque<PrimitiveCommand>,
    source: Box<dyn LineSource>,
    pushed: VecDeque<String>,
    history: VecDeque<String>,
    /// Emergency stops this channel has already acted on
    pub(crate) seen_stops: u64,
    pub(crate) cancel_requested: bool,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Channel {
    pub fn new(
        id: ChannelId,
        kind: ChannelKind,
        source: Box<dyn LineSource>,
        axes: &[char],
        units: Units,
    ) -> Self {
        Self {
            id,
            kind,
            state: ChannelState::Idle,
            modal: ModalState::new(units),
            position: Position::new(axes),
            current: None,
            pending: VecDeque::new(),
            source,
            pushed: VecDeque::new(),
            history: VecDeque::with_capacity(HISTORY_LEN),
            seen_stops: 0,
            cancel_requested: false,
        }
    }

    pub fn push_line(&mut self, line: impl Into<String>) {
        self.pushed.push_back(line.into());
    }

    pub fn has_input(&self) -> bool {
        !self.pushed.is_empty() || self.source.has_line()
    }

    /// Lines pushed by the host come before the channel's own source
    pub fn next_line(&mut self) -> Option<String> {
        self.pushed.pop_front().or_else(|| self.source.next_line())
    }

    pub fn record(&mut self, line: &str) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(line.to_string());
    }

    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    pub fn print_history(&self) {
        debug!("{} channel history, oldest first:", self.kind);
        for line in &self.history {
            debug!("  {}", line);
        }
    }

    /// Drop everything in flight; nothing queued is ever sent after this
    pub fn discard(&mut self) {
        self.pending.clear();
        self.current = None;
        self.modal.close_modal();
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.discard();
        self.state = ChannelState::Aborted {
            reason: reason.into(),
        };
    }

    /// Back to Idle with default modal state; the commanded position is kept
    pub fn reset(&mut self) {
        self.discard();
        self.modal = ModalState::new(self.modal.units);
        self.cancel_requested = false;
        self.state = ChannelState::Idle;
    }
}
