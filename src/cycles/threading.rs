//! Spindle-synchronized threading: G32 single pass and G76 multi-pass
//!
//! The spindle runs as the rotary C axis in position mode. Feeding C together with Z
//! is what keeps the thread lead: every millimetre of Z travel costs `1 / pitch` turns.

use super::{direction_sign, positive, CycleContext, Passes, Program};
use crate::machine::Units;
use crate::params::Params;
use crate::reply::{CommandError, CommandResult};
use crate::sink::{axis, PrimitiveCommand, Target};
use log::debug;

const DEGREES_PER_TURN: f64 = 360.0;

/// Axial advance per spindle revolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lead {
    /// Millimetres per turn
    Pitch(f64),
    ThreadsPerInch(f64),
}

impl Lead {
    /// Spindle turns needed to travel `axial` millimetres
    pub fn turns(self, axial: f64) -> f64 {
        match self {
            Lead::Pitch(pitch) => axial / pitch,
            Lead::ThreadsPerInch(tpi) => Units::Imperial.from_mm(axial) * tpi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct G32Params {
    pub pitch: Option<f64>,
    pub total_turns: f64,
}

/// G32: arm single-pass threading; the pitch may also come with each move
pub fn set_g32(params: &Params) -> CommandResult<G32Params> {
    Ok(G32Params {
        pitch: params.distance('F')?,
        total_turns: 0.0,
    })
}

/// One synchronized threading move to the X/U and Z/W words on the line
pub fn run_g32(state: &mut G32Params, params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    if let Some(pitch) = params.distance('F')? {
        state.pitch = Some(pitch);
    }
    let rpm = params.require_float('S')?;
    let pitch = state.pitch.unwrap_or(0.0).abs();
    if pitch == 0.0 {
        return Err(CommandError::invalid("pitch cannot be 0"));
    }

    let x_now = ctx.axis("G32", 'X')?;
    let z_now = ctx.axis("G32", 'Z')?;

    let x = match (params.axis_word('X')?, params.axis_word('U')?) {
        (Some(x), _) => ctx.radial(x),
        (None, Some(u)) => x_now + ctx.radial(u),
        (None, None) => x_now,
    };
    let z = match (params.axis_word('Z')?, params.axis_word('W')?) {
        (Some(z), _) => z,
        (None, Some(w)) => z_now + w,
        (None, None) => z_now,
    };

    state.total_turns += (z - z_now).abs() / pitch;
    debug!("G32 to Z{} at {} turns", z, state.total_turns);

    let mut target = Target::new().with('X', x).with('Z', z);
    // Synchronized C only on machines that have it
    if ctx.machine.has_axis('C') {
        target = target.with('C', state.total_turns * DEGREES_PER_TURN);
    }
    Ok(vec![PrimitiveCommand::feed(target, rpm * pitch)])
}

#[derive(Debug, Clone, PartialEq)]
pub struct G76Params {
    /// Final thread diameter, or radius when not in diameter mode
    pub thread_x: f64,
    pub start_z: f64,
    pub end_z: f64,
    pub depth_per_pass: f64,
    pub lead: Lead,
    pub rpm: f64,
}

/// G76 Set: X thread diameter, Z start, Q end, P depth per pass, F pitch or I TPI, S rpm
pub fn set_g76(params: &Params) -> CommandResult<G76Params> {
    let thread_x = params.require_distance('X')?;
    let start_z = params.require_distance('Z')?;
    let end_z = params.require_distance('Q')?;
    let depth_per_pass = positive(params.require_distance('P')?.abs(), 'P')?;

    let lead = match params.units() {
        Units::Metric => {
            let pitch = params.require_distance('F')?.abs();
            if pitch == 0.0 {
                return Err(CommandError::invalid("pitch of thread cannot be 0"));
            }
            Lead::Pitch(pitch)
        }
        Units::Imperial => {
            let tpi = params.require_float('I')?.abs();
            if tpi == 0.0 {
                return Err(CommandError::invalid("number of thread cannot be 0"));
            }
            Lead::ThreadsPerInch(tpi)
        }
    };
    let rpm = params.require_float('S')?;

    Ok(G76Params {
        thread_x,
        start_z,
        end_z,
        depth_per_pass,
        lead,
        rpm,
    })
}

/// G76 Run: radial infeed passes, each starting on a whole spindle turn
pub fn run_g76(p: &G76Params, ctx: &CycleContext) -> CommandResult<Program> {
    let x_now = ctx.axis("G76", 'X')?;
    ctx.axis("G76", 'Z')?;
    ctx.axis("G76", 'C')?;

    // Compare in the operator's X convention, emit in machine X
    let start_x = ctx.displayed_x(x_now);
    let direction = direction_sign(start_x, p.thread_x);
    let depth = (p.thread_x - start_x).abs();
    let turns_per_pass = p.lead.turns((p.end_z - p.start_z).abs());
    let feed = p.rpm * DEGREES_PER_TURN;

    let mut program = vec![
        PrimitiveCommand::home("A"),
        PrimitiveCommand::dwell(3000),
        PrimitiveCommand::raw("M1102"),
    ];

    let mut turns: f64 = 0.0;
    for pass in Passes::new(depth, p.depth_per_pass) {
        let x = ctx.radial(start_x + pass * direction);
        let start_turn = whole_turns(turns);
        turns = start_turn + turns_per_pass;

        program.push(PrimitiveCommand::rapid(
            Target::new()
                .with('Z', p.start_z)
                .with('C', start_turn * DEGREES_PER_TURN),
        ));
        program.push(PrimitiveCommand::rapid(axis('X', x)));
        program.push(PrimitiveCommand::dwell(10));
        program.push(PrimitiveCommand::feed(
            Target::new()
                .with('Z', p.end_z)
                .with('C', turns * DEGREES_PER_TURN),
            feed,
        ));
        program.push(PrimitiveCommand::dwell(10));
        program.push(PrimitiveCommand::rapid(axis('X', x_now)));
        program.push(PrimitiveCommand::dwell(300));
    }

    let final_turn = whole_turns(turns);
    program.push(PrimitiveCommand::rapid(
        Target::new()
            .with('Z', p.start_z)
            .with('C', final_turn * DEGREES_PER_TURN),
    ));
    program.push(PrimitiveCommand::dwell(300));
    program.push(PrimitiveCommand::SetPosition {
        target: axis('C', 0.0),
    });
    program.push(PrimitiveCommand::rapid(
        Target::new().with('Z', p.start_z).with('X', x_now),
    ));
    program.push(PrimitiveCommand::raw("M5002"));

    debug!("G76 expanded to {} primitives", program.len());
    Ok(program)
}

/// Round up to the next whole turn so every pass enters the thread at the same phase
fn whole_turns(turns: f64) -> f64 {
    (turns - super::NUMERIC_TOLERANCE).ceil().max(0.0)
}
