//! Tool-changer interlocks: the clamp wait (M799), IO status word (M1999) and ATC checks
//!
//! The operator panel is told about interlock changes through short `:S` messages.
//! They are collected here and drained by the interpreter.

use crate::channel::Position;
use crate::cycles::NUMERIC_TOLERANCE;
use crate::params::Params;
use crate::reply::{CommandError, CommandResult};
use crate::sink::{num, PrimitiveCommand};
use log::{info, warn};

pub const PANEL_UNLOCK: &str = ":S UNLOCK";
pub const PANEL_IDLE_TOOL: &str = ":S IDLETOOL";

/// ATC pockets hold tools 10 through 33
pub const ATC_TOOLS: std::ops::RangeInclusive<u32> = 10..=33;

/// Input bits reported by the IO board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoStatus(u32);

impl IoStatus {
    pub const DOOR_OPEN: u32 = 1 << 0;
    pub const DOOR_CLOSED: u32 = 1 << 1;
    pub const TOOL_EMPTY: u32 = 1 << 2;
    pub const TOOL_CLAMP: u32 = 1 << 3;
    pub const TOOL_RELEASE: u32 = 1 << 4;
    pub const TOOL_DETECT: u32 = 1 << 5;

    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    fn has(self, bit: u32) -> bool {
        self.0 & bit != 0
    }

    pub fn door_open(self) -> bool {
        self.has(Self::DOOR_OPEN)
    }

    pub fn door_closed(self) -> bool {
        self.has(Self::DOOR_CLOSED)
    }

    /// Spindle holds no tool
    pub fn tool_empty(self) -> bool {
        self.has(Self::TOOL_EMPTY)
    }

    pub fn tool_clamped(self) -> bool {
        self.has(Self::TOOL_CLAMP)
    }

    pub fn tool_released(self) -> bool {
        self.has(Self::TOOL_RELEASE)
    }

    /// A tool sits in the ATC pocket in front of the spindle
    pub fn tool_detected(self) -> bool {
        self.has(Self::TOOL_DETECT)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Interlock {
    /// Tool clamp interlock; stays set until the operator clears it
    locked: bool,
    io: IoStatus,
    mill_tool: Option<u32>,
    previous_mill_tool: Option<u32>,
    /// Measured length of the mill tool, mm
    tool_length: f64,
    messages: Vec<String>,
}

impl Default for Interlock {
    fn default() -> Self {
        Self {
            locked: true,
            io: IoStatus::default(),
            mill_tool: None,
            previous_mill_tool: None,
            tool_length: 0.0,
            messages: Vec::new(),
        }
    }
}

impl Interlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) {
        info!("tool clamp interlock {}", if locked { "locked" } else { "cleared" });
        self.locked = locked;
    }

    pub fn io(&self) -> IoStatus {
        self.io
    }

    pub fn mill_tool(&self) -> Option<u32> {
        self.mill_tool
    }

    pub fn tool_length(&self) -> f64 {
        self.tool_length
    }

    pub fn take_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    fn panel(&mut self, message: &str) {
        self.messages.push(message.to_string());
    }

    /// M799 P<ms>: announce the wait and return its deadline
    pub fn begin_wait(&mut self, params: &Params, now_ms: u64) -> CommandResult<u64> {
        let timeout = params.require_int('P')?.max(0) as u64;
        self.panel(PANEL_UNLOCK);
        Ok(now_ms + timeout)
    }

    /// One poll of a running M799: `Ok(true)` once the operator has cleared the interlock
    pub fn poll_wait(&mut self, deadline: u64, now_ms: u64) -> CommandResult<bool> {
        if !self.locked {
            self.panel(PANEL_IDLE_TOOL);
            return Ok(true);
        }
        if now_ms >= deadline {
            self.panel(PANEL_IDLE_TOOL);
            warn!("tool clamp interlock timed out");
            return Err(CommandError::InterlockTimeout);
        }
        Ok(false)
    }

    /// M1999 I<bits>
    pub fn set_io_status(&mut self, params: &Params) -> CommandResult<()> {
        let bits = params.require_int('I')?;
        self.io = IoStatus::new(bits.max(0) as u32);
        Ok(())
    }

    /// M1994 P1 before withdrawing expects a tool in the pocket, P0 before depositing
    /// expects the pocket empty
    pub fn check_pocket(&self, params: &Params) -> CommandResult<()> {
        let withdraw = params.require_int('P')? != 0;
        let detected = self.io.tool_detected();
        if withdraw && !detected {
            return Err(CommandError::Interlock(format!(
                "No tool detected in ATC pocket #{}",
                pocket_label(self.mill_tool)
            )));
        }
        if !withdraw && detected {
            return Err(CommandError::Interlock(format!(
                "No space detected in ATC pocket #{}",
                pocket_label(self.previous_mill_tool)
            )));
        }
        Ok(())
    }

    fn require_open_door(&self) -> CommandResult<()> {
        if self.io.door_open() && !self.io.door_closed() {
            Ok(())
        } else {
            Err(CommandError::Interlock("No open door!".to_string()))
        }
    }

    /// M1995: fetch the mill tool from its pocket into an empty spindle
    pub fn withdraw(&mut self) -> CommandResult<Vec<PrimitiveCommand>> {
        self.require_open_door()?;
        if !self.io.tool_empty() {
            self.panel(&format!("No withdraw tool #{}", pocket_label(self.mill_tool)));
            return Ok(Vec::new());
        }
        let tool = atc_tool(self.mill_tool)?;
        Ok(vec![atc_macro("WITHDRAW", tool)])
    }

    /// M1996: put the previous mill tool back into its pocket
    pub fn deposit(&mut self) -> CommandResult<Vec<PrimitiveCommand>> {
        self.require_open_door()?;
        if self.io.tool_empty() {
            self.panel(&format!(
                "No deposit tool #{}",
                pocket_label(self.previous_mill_tool)
            ));
            return Ok(Vec::new());
        }
        let tool = atc_tool(self.previous_mill_tool)?;
        Ok(vec![atc_macro("DEPOSIT", tool)])
    }

    /// M1989: refuse a change to the tool that is already clamped
    pub fn check_not_loaded(&self, current: Option<u32>) -> CommandResult<()> {
        match (self.mill_tool, current) {
            (Some(mill), Some(tool)) if mill == tool => Err(CommandError::Interlock(format!(
                "Tool{} is already in the spindle",
                mill
            ))),
            _ => Ok(()),
        }
    }

    /// M1990: every axis must read zero after homing
    pub fn check_home_position(&self, position: &Position) -> CommandResult<()> {
        if position.iter().any(|(_, v)| v.abs() > NUMERIC_TOLERANCE) {
            warn!("home position check failed at {:?}", position);
            return Err(CommandError::Interlock("Home position error!".to_string()));
        }
        Ok(())
    }

    /// M1992: clear the mill tool's length offset
    pub fn clear_tool_offset(&self) -> CommandResult<Vec<PrimitiveCommand>> {
        let tool = self.offset_tool()?;
        Ok(vec![PrimitiveCommand::raw(format!("G10 P{} Z0", tool))])
    }

    /// M1993 [Z<length>]: apply the measured length as the mill tool's offset
    pub fn apply_tool_offset(&mut self, params: &Params) -> CommandResult<Vec<PrimitiveCommand>> {
        let tool = self.offset_tool()?;
        if let Some(length) = params.distance('Z')? {
            self.tool_length = length;
        }
        Ok(vec![PrimitiveCommand::raw(format!(
            "G10 P{} Z{}",
            tool,
            num(self.tool_length)
        ))])
    }

    fn offset_tool(&self) -> CommandResult<u32> {
        self.mill_tool
            .ok_or_else(|| CommandError::invalid("No mill tool recorded"))
    }

    /// M1998: the selected tool becomes the mill tool when it lives in the changer
    pub fn record_mill_tool(&mut self, current: Option<u32>) -> Vec<PrimitiveCommand> {
        match current {
            Some(tool) if ATC_TOOLS.contains(&tool) => {
                self.previous_mill_tool = self.mill_tool;
                self.mill_tool = Some(tool);
                vec![PrimitiveCommand::raw(format!("M1997 S{}", tool))]
            }
            _ => Vec::new(),
        }
    }
}

fn pocket_label(tool: Option<u32>) -> String {
    tool.map(|t| t.to_string()).unwrap_or_else(|| "-1".to_string())
}

fn atc_tool(tool: Option<u32>) -> CommandResult<u32> {
    match tool {
        Some(t) if ATC_TOOLS.contains(&t) => Ok(t),
        _ => Err(CommandError::Interlock(format!(
            "Tool #{} has no ATC pocket",
            pocket_label(tool)
        ))),
    }
}

fn atc_macro(action: &str, tool: u32) -> PrimitiveCommand {
    PrimitiveCommand::raw(format!(
        "M98 P\"/macros/ATC/ATC_{}_TOOL_{}.g\"",
        action, tool
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::Units;
    use crate::params::CodeLine;
    use pretty_assertions::assert_eq;

    fn with_line<T>(text: &str, f: impl FnOnce(&Params) -> T) -> T {
        let line = CodeLine::parse(text).unwrap();
        f(&Params::new(&line, Units::Metric))
    }

    fn ready_to_change(interlock: &mut Interlock, bits: u32) {
        with_line(&format!("M1999 I{}", bits), |p| interlock.set_io_status(p)).unwrap();
    }

    #[test]
    fn test_io_bits() {
        let io = IoStatus::new(IoStatus::DOOR_OPEN | IoStatus::TOOL_DETECT);
        assert!(io.door_open());
        assert!(!io.door_closed());
        assert!(io.tool_detected());
        assert!(!io.tool_empty());
    }

    #[test]
    fn test_m1999_requires_bits() {
        let mut interlock = Interlock::new();
        let err = with_line("M1999", |p| interlock.set_io_status(p)).unwrap_err();
        assert_eq!(err.to_string(), "I parameter not found");
        ready_to_change(&mut interlock, 0b100101);
        assert_eq!(interlock.io().bits(), 0b100101);
    }

    #[test]
    fn test_wait_until_cleared() {
        let mut interlock = Interlock::new();
        let deadline = with_line("M799 P5000", |p| interlock.begin_wait(p, 1000)).unwrap();
        assert_eq!(deadline, 6000);
        assert_eq!(interlock.poll_wait(deadline, 2000), Ok(false));

        interlock.set_locked(false);
        assert_eq!(interlock.poll_wait(deadline, 3000), Ok(true));
        assert_eq!(
            interlock.take_messages(),
            vec![PANEL_UNLOCK.to_string(), PANEL_IDLE_TOOL.to_string()]
        );
    }

    #[test]
    fn test_wait_times_out_and_stays_locked() {
        let mut interlock = Interlock::new();
        let deadline = with_line("M799 P100", |p| interlock.begin_wait(p, 0)).unwrap();
        assert_eq!(
            interlock.poll_wait(deadline, 100),
            Err(CommandError::InterlockTimeout)
        );
        assert!(interlock.is_locked());
    }

    #[test]
    fn test_wait_needs_timeout() {
        let mut interlock = Interlock::new();
        let err = with_line("M799", |p| interlock.begin_wait(p, 0)).unwrap_err();
        assert_eq!(err, CommandError::MissingParameter('P'));
        assert!(interlock.take_messages().is_empty());
    }

    #[test]
    fn test_pocket_checks() {
        let mut interlock = Interlock::new();
        interlock.record_mill_tool(Some(12));
        let err = with_line("M1994 P1", |p| interlock.check_pocket(p)).unwrap_err();
        assert_eq!(err.to_string(), "No tool detected in ATC pocket #12");
        assert!(err.escalates());

        ready_to_change(&mut interlock, IoStatus::TOOL_DETECT);
        assert!(with_line("M1994 P1", |p| interlock.check_pocket(p)).is_ok());
        let err = with_line("M1994 P0", |p| interlock.check_pocket(p)).unwrap_err();
        assert_eq!(err.to_string(), "No space detected in ATC pocket #-1");
    }

    #[test]
    fn test_withdraw_needs_open_door() {
        let mut interlock = Interlock::new();
        interlock.record_mill_tool(Some(15));
        ready_to_change(&mut interlock, IoStatus::DOOR_OPEN | IoStatus::DOOR_CLOSED);
        assert_eq!(
            interlock.withdraw().unwrap_err().to_string(),
            "No open door!"
        );

        ready_to_change(&mut interlock, IoStatus::DOOR_OPEN | IoStatus::TOOL_EMPTY);
        assert_eq!(
            interlock.withdraw().unwrap(),
            vec![PrimitiveCommand::raw(
                "M98 P\"/macros/ATC/ATC_WITHDRAW_TOOL_15.g\""
            )]
        );
    }

    #[test]
    fn test_deposit_previous_tool() {
        let mut interlock = Interlock::new();
        interlock.record_mill_tool(Some(10));
        interlock.record_mill_tool(Some(11));
        ready_to_change(&mut interlock, IoStatus::DOOR_OPEN | IoStatus::TOOL_CLAMP);
        assert_eq!(
            interlock.deposit().unwrap(),
            vec![PrimitiveCommand::raw(
                "M98 P\"/macros/ATC/ATC_DEPOSIT_TOOL_10.g\""
            )]
        );

        // Spindle already empty: nothing to put back
        ready_to_change(&mut interlock, IoStatus::DOOR_OPEN | IoStatus::TOOL_EMPTY);
        assert!(interlock.deposit().unwrap().is_empty());
        assert_eq!(interlock.take_messages(), vec!["No deposit tool #10".to_string()]);
    }

    #[test]
    fn test_change_to_loaded_tool_aborts() {
        let mut interlock = Interlock::new();
        assert!(interlock.check_not_loaded(Some(12)).is_ok());
        interlock.record_mill_tool(Some(12));
        let err = interlock.check_not_loaded(Some(12)).unwrap_err();
        assert_eq!(err.to_string(), "Tool12 is already in the spindle");
        assert!(err.escalates());
        assert!(interlock.check_not_loaded(Some(14)).is_ok());
        assert!(interlock.check_not_loaded(None).is_ok());
    }

    #[test]
    fn test_home_position_must_be_zero() {
        let interlock = Interlock::new();
        let mut position = Position::new(&['X', 'Y', 'Z']);
        assert!(interlock.check_home_position(&position).is_ok());

        position.set('Z', 0.2);
        let err = interlock.check_home_position(&position).unwrap_err();
        assert_eq!(err.to_string(), "Home position error!");
        assert!(err.escalates());
    }

    #[test]
    fn test_tool_length_offsets() {
        let mut interlock = Interlock::new();
        assert_eq!(
            interlock.clear_tool_offset().unwrap_err().to_string(),
            "No mill tool recorded"
        );

        interlock.record_mill_tool(Some(21));
        assert_eq!(
            interlock.clear_tool_offset().unwrap(),
            vec![PrimitiveCommand::raw("G10 P21 Z0")]
        );
        assert_eq!(
            with_line("M1993 Z42.125", |p| interlock.apply_tool_offset(p)).unwrap(),
            vec![PrimitiveCommand::raw("G10 P21 Z42.125")]
        );
        // Without Z the last measured length is reused
        assert_eq!(
            with_line("M1993", |p| interlock.apply_tool_offset(p)).unwrap(),
            vec![PrimitiveCommand::raw("G10 P21 Z42.125")]
        );
        assert_eq!(interlock.tool_length(), 42.125);
    }

    #[test]
    fn test_record_mill_tool() {
        let mut interlock = Interlock::new();
        assert!(interlock.record_mill_tool(Some(5)).is_empty());
        assert_eq!(interlock.mill_tool(), None);
        assert_eq!(
            interlock.record_mill_tool(Some(33)),
            vec![PrimitiveCommand::raw("M1997 S33")]
        );
        assert_eq!(interlock.mill_tool(), Some(33));
    }
}
