//! Command dispatch
//!
//! `route` picks exactly one handler from the command word and the channel's modal slot.
//! `execute` runs it against the channel and returns the primitives to emit. Nothing here
//! touches the sink or the lock table; the interpreter does that around the call.

use crate::channel::{Channel, Modal, MotionMode};
use crate::cycles::geometry::{arc_center_from_radius, Point};
use crate::cycles::{
    boring, drilling, milling, threading, turning, CycleContext, CycleParameters, Program,
};
use crate::interlock::Interlock;
use crate::machine::{MachineConfig, Units, AXIS_LETTERS};
use crate::params::{tool_number, CodeLine, Params};
use crate::reply::{CommandError, CommandResult};
use crate::resource::Resource;
use crate::sink::{num, ArcDirection, PrimitiveCommand, SpindleState, Target};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Handler {
    Motion(MotionMode),
    Dwell,
    SetUnits(Units),
    Home,
    SelectCoordinates(u8),
    CancelModal,
    DistanceMode { relative: bool },
    SetPosition,
    FeedRate,
    Spindle(SpindleState),
    /// Bare `S` line, spindle on at that speed
    SpindleSpeed,
    ToolSelect,

    Threading,
    ThreadCycle,
    PeckDrill,
    Tapping,
    /// Axis words continuing the active cycle
    CycleRun,
    Facing,
    Boring,
    Circle,
    Spiral,
    Hobbing,
    Turning,
    PolygonSide,
    SideMill,
    FaceMill,
    PolygonFace,
    Grooving,
    LatheDrill,

    ClampWait,
    ToolLoadedCheck,
    HomeCheck,
    ClearToolOffset,
    ApplyToolOffset,
    PocketCheck,
    AtcWithdraw,
    AtcDeposit,
    RecordMillTool,
    IoStatus,

    Unknown,
}

impl Handler {
    /// Locks the handler needs before it runs
    pub fn resources(self, sink_persists: bool) -> Vec<Resource> {
        match self {
            Handler::SetUnits(_)
            | Handler::CancelModal
            | Handler::DistanceMode { .. }
            | Handler::FeedRate
            | Handler::ClampWait
            | Handler::ToolLoadedCheck
            | Handler::HomeCheck
            | Handler::PocketCheck
            | Handler::IoStatus
            | Handler::Unknown => Vec::new(),
            _ if sink_persists => vec![Resource::Movement, Resource::FileSystem],
            _ => vec![Resource::Movement],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Program(Program),
    /// Suspend until the tool clamp interlock clears or `deadline` passes
    Wait { deadline: u64 },
    Warning(String),
}

pub fn route(line: &CodeLine, modal: &Modal) -> CommandResult<Handler> {
    let letter = match line.command_letter() {
        Some(letter) => letter,
        None => return Ok(Handler::Unknown),
    };
    let number = line.command_number().unwrap_or(-1);

    let handler = match letter {
        'G' => match number {
            0 => Handler::Motion(MotionMode::Rapid),
            1 => Handler::Motion(MotionMode::Linear),
            2 => Handler::Motion(MotionMode::ArcClockwise),
            3 => Handler::Motion(MotionMode::ArcCounterClockwise),
            4 => Handler::Dwell,
            20 => Handler::SetUnits(Units::Imperial),
            21 => Handler::SetUnits(Units::Metric),
            28 => Handler::Home,
            32 => Handler::Threading,
            54..=59 => Handler::SelectCoordinates((number - 54) as u8),
            72 => Handler::Facing,
            76 => Handler::ThreadCycle,
            80 => Handler::CancelModal,
            83 => Handler::PeckDrill,
            84 => Handler::Tapping,
            90 => Handler::DistanceMode { relative: false },
            91 => Handler::DistanceMode { relative: true },
            92 => Handler::SetPosition,
            _ => Handler::Unknown,
        },
        'M' => match number {
            3 => Handler::Spindle(SpindleState::Clockwise),
            4 => Handler::Spindle(SpindleState::CounterClockwise),
            5 => Handler::Spindle(SpindleState::Off),
            460 => Handler::Boring,
            799 => Handler::ClampWait,
            1989 => Handler::ToolLoadedCheck,
            1990 => Handler::HomeCheck,
            1992 => Handler::ClearToolOffset,
            1993 => Handler::ApplyToolOffset,
            1994 => Handler::PocketCheck,
            1995 => Handler::AtcWithdraw,
            1996 => Handler::AtcDeposit,
            1998 => Handler::RecordMillTool,
            1999 => Handler::IoStatus,
            2000 => Handler::Circle,
            2001 => Handler::Spiral,
            2002 => Handler::Hobbing,
            2003 => Handler::Turning,
            2004 => Handler::PolygonSide,
            2005 => Handler::SideMill,
            2006 => Handler::FaceMill,
            2007 => Handler::PolygonFace,
            2008 => Handler::Grooving,
            2009 => Handler::LatheDrill,
            _ => Handler::Unknown,
        },
        'T' => Handler::ToolSelect,
        'S' => Handler::SpindleSpeed,
        'F' => Handler::FeedRate,
        l if AXIS_LETTERS.contains(&l) => match modal {
            Modal::Cycle(_) => Handler::CycleRun,
            Modal::Motion(mode) => Handler::Motion(*mode),
            Modal::None => return Err(CommandError::NoModalCommand),
        },
        _ => Handler::Unknown,
    };
    debug!("{:?} routed to {:?}", line.text, handler);
    Ok(handler)
}

pub fn execute(
    handler: Handler,
    line: &CodeLine,
    channel: &mut Channel,
    config: &MachineConfig,
    interlock: &mut Interlock,
    now_ms: u64,
) -> CommandResult<Outcome> {
    let params = Params::new(line, channel.modal.units);
    let ctx = CycleContext::new(config, &channel.position);
    let modal = &mut channel.modal;

    let program = match handler {
        Handler::Motion(mode) => {
            modal.modal = Modal::Motion(mode);
            if let Some(feed) = params.feed_rate('F')? {
                modal.feed_rate = Some(feed);
            }
            let target = axis_target(&params, &ctx, modal.relative)?;
            motion(mode, target, &params, &ctx, modal.feed_rate)?
        }
        Handler::Dwell => {
            let ms = match (params.float('P')?, params.float('S')?) {
                (Some(p), _) => p,
                (None, Some(s)) => s * 1000.0,
                (None, None) => return Err(CommandError::MissingParameter('P')),
            };
            vec![PrimitiveCommand::dwell(ms.max(0.0).round() as u32)]
        }
        Handler::SetUnits(units) => {
            modal.units = units;
            Program::new()
        }
        Handler::Home => {
            let mut axes: Vec<char> = config
                .axes
                .iter()
                .copied()
                .filter(|&a| params.seen(a))
                .collect();
            if axes.is_empty() {
                axes = config.axes.clone();
            }
            vec![PrimitiveCommand::Home { axes }]
        }
        Handler::SelectCoordinates(index) => {
            modal.coordinate_system = index;
            vec![PrimitiveCommand::SelectCoordinateSystem { index }]
        }
        Handler::CancelModal => {
            modal.close_modal();
            Program::new()
        }
        Handler::DistanceMode { relative } => {
            modal.relative = relative;
            Program::new()
        }
        Handler::SetPosition => {
            let target = axis_target(&params, &ctx, false)?;
            if target.is_empty() {
                Program::new()
            } else {
                vec![PrimitiveCommand::SetPosition { target }]
            }
        }
        Handler::FeedRate => {
            modal.feed_rate = params.axis_word('F')?;
            Program::new()
        }
        Handler::Spindle(SpindleState::Off) => vec![PrimitiveCommand::spindle_off()],
        Handler::Spindle(state) => {
            let rpm = match params.float('S')? {
                Some(rpm) => rpm,
                None => modal.rpm.ok_or(CommandError::MissingParameter('S'))?,
            };
            modal.rpm = Some(rpm);
            vec![PrimitiveCommand::Spindle { rpm, state }]
        }
        Handler::SpindleSpeed => {
            let rpm = line.modal_command_number().unwrap_or(0.0);
            modal.rpm = Some(rpm);
            vec![PrimitiveCommand::spindle_on(rpm)]
        }
        Handler::ToolSelect => {
            let tool = tool_number(line.command_number().unwrap_or(0));
            modal.tool = Some(tool);
            vec![PrimitiveCommand::ToolSelect { tool }]
        }

        Handler::Threading => {
            let mut p = threading::set_g32(&params)?;
            let result = threading::run_g32(&mut p, &params, &ctx);
            modal.activate_cycle(CycleParameters::Threading(p));
            result?
        }
        Handler::ThreadCycle => {
            let p = threading::set_g76(&params)?;
            // Runs once and leaves nothing active behind
            modal.close_modal();
            threading::run_g76(&p, &ctx)?
        }
        Handler::PeckDrill => {
            let p = drilling::set_g83(&params, &ctx)?;
            let result = drilling::run_g83(&p, &params, &ctx);
            modal.activate_cycle(CycleParameters::PeckDrill(p));
            result?
        }
        Handler::Tapping => {
            let p = drilling::set_g84(&params, &ctx)?;
            let mut program = drilling::tapping_preamble(&ctx);
            let result = drilling::run_g84(&p, &params, &ctx);
            modal.activate_cycle(CycleParameters::Tapping(p));
            program.extend(result?);
            program
        }
        Handler::CycleRun => match &mut modal.modal {
            Modal::Cycle(CycleParameters::Threading(p)) => threading::run_g32(p, &params, &ctx)?,
            Modal::Cycle(CycleParameters::PeckDrill(p)) => drilling::run_g83(p, &params, &ctx)?,
            Modal::Cycle(CycleParameters::Tapping(p)) => drilling::run_g84(p, &params, &ctx)?,
            _ => return Err(CommandError::NoModalCommand),
        },
        Handler::Facing => turning::run_g72(&params, &ctx)?,
        Handler::Boring => {
            let p = boring::set_m460(&params)?;
            boring::run_m460(&p, &ctx)?
        }
        Handler::Circle => boring::run_m2000(&params, &ctx)?,
        Handler::Spiral => boring::run_m2001(&params, &ctx)?,
        Handler::Hobbing => milling::run_m2002(&params, &ctx)?,
        Handler::Turning => turning::run_m2003(&params, &ctx)?,
        Handler::PolygonSide => milling::run_m2004(&params, &ctx)?,
        Handler::SideMill => milling::run_m2005(&params, &ctx)?,
        Handler::FaceMill => milling::run_m2006(&params, &ctx)?,
        Handler::PolygonFace => milling::run_m2007(&params, &ctx)?,
        Handler::Grooving => turning::run_m2008(&params, &ctx)?,
        Handler::LatheDrill => drilling::run_m2009(&params, &ctx)?,

        Handler::ClampWait => {
            let deadline = interlock.begin_wait(&params, now_ms)?;
            return Ok(Outcome::Wait { deadline });
        }
        Handler::ToolLoadedCheck => {
            interlock.check_not_loaded(modal.tool)?;
            Program::new()
        }
        Handler::HomeCheck => {
            interlock.check_home_position(ctx.position)?;
            Program::new()
        }
        Handler::ClearToolOffset => interlock.clear_tool_offset()?,
        Handler::ApplyToolOffset => interlock.apply_tool_offset(&params)?,
        Handler::PocketCheck => {
            interlock.check_pocket(&params)?;
            Program::new()
        }
        Handler::AtcWithdraw => interlock.withdraw()?,
        Handler::AtcDeposit => interlock.deposit()?,
        Handler::RecordMillTool => interlock.record_mill_tool(modal.tool),
        Handler::IoStatus => {
            interlock.set_io_status(&params)?;
            Program::new()
        }

        Handler::Unknown => {
            let code = match (line.command_letter(), line.modal_command_number()) {
                (Some(letter), Some(n)) => format!("{}{}", letter, num(n)),
                _ => line.text.trim().to_string(),
            };
            return Ok(Outcome::Warning(format!("{} is not supported", code)));
        }
    };
    Ok(Outcome::Program(program))
}

/// Axis words of the line in machine coordinates
fn axis_target(params: &Params, ctx: &CycleContext, relative: bool) -> CommandResult<Target> {
    let mut target = Target::new();
    for &letter in &ctx.machine.axes {
        let value = match params.axis_word(letter)? {
            Some(v) if letter == 'X' => ctx.radial(v),
            Some(v) => v,
            None => continue,
        };
        let value = if relative {
            ctx.position.get(letter).unwrap_or(0.0) + value
        } else {
            value
        };
        target = target.with(letter, value);
    }
    Ok(target)
}

fn motion(
    mode: MotionMode,
    target: Target,
    params: &Params,
    ctx: &CycleContext,
    feed: Option<f64>,
) -> CommandResult<Program> {
    if target.is_empty() {
        return Ok(Program::new());
    }
    if mode == MotionMode::Rapid {
        return Ok(vec![PrimitiveCommand::rapid(target)]);
    }
    let feed = feed.ok_or(CommandError::MissingParameter('F'))?;
    let direction = match mode {
        MotionMode::Linear => return Ok(vec![PrimitiveCommand::feed(target, feed)]),
        MotionMode::ArcClockwise => ArcDirection::Clockwise,
        _ => ArcDirection::CounterClockwise,
    };

    let here = |letter| ctx.position.get(letter).unwrap_or(0.0);
    let start = Point::new(here('X'), here('Y'));
    let end = Point::new(
        target.get('X').unwrap_or(start.x),
        target.get('Y').unwrap_or(start.y),
    );
    let center_offset = match params.distance('R')? {
        Some(radius) => {
            let offset = arc_center_from_radius(start, end, radius, direction).ok_or_else(|| {
                CommandError::invalid("Arc radius is too small to reach the end point")
            })?;
            (offset.x, offset.y)
        }
        None => {
            let i = params.distance('I')?;
            let j = params.distance('J')?;
            if i.is_none() && j.is_none() {
                return Err(CommandError::invalid("G2/G3 needs I and J or R"));
            }
            (i.unwrap_or(0.0), j.unwrap_or(0.0))
        }
    };
    Ok(vec![PrimitiveCommand::ArcMove {
        target,
        center_offset,
        feed_rate: feed,
        direction,
    }])
}
