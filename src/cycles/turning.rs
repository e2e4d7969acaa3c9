//! Lathe stock removal: turning (M2003), facing (G72) and grooving (M2008)

use super::{direction_sign, positive, CycleContext, Passes, Program};
use crate::machine::MachineRequirement;
use crate::params::Params;
use crate::reply::CommandResult;
use crate::sink::{axis, PrimitiveCommand, Target};

/// M2003: X start, E end X, Z start, Q end Z, P depth per cut, F feed, S rpm
pub fn run_m2003(params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    ctx.require(MachineRequirement::Lathe)?;

    let start_x = params.require_distance('X')?;
    let end_x = params.require_distance('E')?;
    let start_z = params.require_distance('Z')?;
    let end_z = params.require_distance('Q')?;
    let cut = positive(params.require_distance('P')?.abs(), 'P')?;
    let feed = positive(params.require_feed_rate('F')?, 'F')?;
    let rpm = params.require_float('S')?;

    let direction = direction_sign(start_x, end_x);
    let depth = (end_x - start_x).abs();
    let home = Target::new()
        .with('Z', start_z)
        .with('X', ctx.radial(start_x));

    let mut program = vec![
        PrimitiveCommand::spindle_on(rpm),
        PrimitiveCommand::dwell(500),
        PrimitiveCommand::rapid(home.clone()),
    ];
    for pass in Passes::new(depth, cut) {
        let x = ctx.radial(start_x + pass * direction);
        program.push(PrimitiveCommand::rapid(axis('Z', start_z)));
        program.push(PrimitiveCommand::feed(axis('X', x), feed));
        program.push(PrimitiveCommand::dwell(10));
        program.push(PrimitiveCommand::feed(axis('Z', end_z), feed));
        program.push(PrimitiveCommand::dwell(10));
        program.push(PrimitiveCommand::rapid(axis('X', ctx.radial(start_x))));
    }
    program.push(PrimitiveCommand::rapid(home));
    program.push(PrimitiveCommand::spindle_off());
    Ok(program)
}

/// G72: W depth per cut, R clearance, P start Z, Q end Z, X start, U end X, F, S
///
/// Each pass feeds across the face in X; the tool then backs off in Z to
/// `R` beyond the start face before rapiding out in X.
pub fn run_g72(params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    ctx.require(MachineRequirement::Lathe)?;

    let cut = positive(params.require_distance('W')?.abs(), 'W')?;
    let clearance = params.require_distance('R')?.abs();
    let start_z = params.require_distance('P')?;
    let end_z = params.require_distance('Q')?;
    let start_x = params.require_distance('X')?;
    let end_x = params.require_distance('U')?;
    let feed = positive(params.require_feed_rate('F')?, 'F')?;
    let rpm = params.require_float('S')?;

    let direction = direction_sign(start_z, end_z);
    let depth = (end_z - start_z).abs();
    let retract_z = start_z - clearance * direction;
    let home = Target::new()
        .with('Z', start_z)
        .with('X', ctx.radial(start_x));

    let mut program = vec![
        PrimitiveCommand::spindle_on(rpm),
        PrimitiveCommand::dwell(500),
        PrimitiveCommand::rapid(home.clone()),
    ];
    for pass in Passes::new(depth, cut) {
        program.push(PrimitiveCommand::rapid(axis('Z', start_z + pass * direction)));
        program.push(PrimitiveCommand::feed(axis('X', ctx.radial(end_x)), feed));
        program.push(PrimitiveCommand::dwell(10));
        program.push(PrimitiveCommand::rapid(axis('Z', retract_z)));
        program.push(PrimitiveCommand::dwell(10));
        program.push(PrimitiveCommand::rapid(axis('X', ctx.radial(start_x))));
    }
    program.push(PrimitiveCommand::rapid(home));
    program.push(PrimitiveCommand::spindle_off());
    Ok(program)
}

/// M2008: W depth per cut, X start, U end X, Z groove position, F, S
pub fn run_m2008(params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    ctx.require(MachineRequirement::Lathe)?;

    let cut = positive(params.require_distance('W')?.abs(), 'W')?;
    let start_x = params.require_distance('X')?;
    let end_x = params.require_distance('U')?;
    let z = params.require_distance('Z')?;
    let feed = positive(params.require_feed_rate('F')?, 'F')?;
    let rpm = params.require_float('S')?;

    let direction = direction_sign(start_x, end_x);
    let depth = (end_x - start_x).abs();
    let clear_x = ctx.radial(start_x);

    let mut program = vec![
        PrimitiveCommand::spindle_on(rpm),
        PrimitiveCommand::rapid(axis('X', clear_x)),
        PrimitiveCommand::rapid(axis('Z', z)),
    ];
    for pass in Passes::new(depth, cut) {
        program.push(PrimitiveCommand::feed(
            axis('X', ctx.radial(start_x + pass * direction)),
            feed,
        ));
        program.push(PrimitiveCommand::dwell(10));
        program.push(PrimitiveCommand::rapid(axis('X', clear_x)));
    }
    program.push(PrimitiveCommand::rapid(axis('Z', z)));
    program.push(PrimitiveCommand::rapid(axis('X', clear_x)));
    program.push(PrimitiveCommand::spindle_off());
    Ok(program)
}
