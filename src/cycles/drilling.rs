//! Peck drilling (G83), rigid tapping (G84) and lathe drilling (M2009)
//!
//! Milling and lathe variants are kept as separate expansions. They look alike but
//! reposition different axes and tap with different spindle axes.

use super::{direction_sign, positive, CycleContext, Passes, Program};
use crate::machine::MachineRequirement;
use crate::params::Params;
use crate::reply::{CommandError, CommandResult};
use crate::sink::{axis, PrimitiveCommand, Target};
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct G83Params {
    pub retract: f64,
    pub peck: f64,
    /// Absolute Z of the hole bottom
    pub bottom: f64,
    pub feed: f64,
}

/// G83 Set: R retract plane, Q peck, Z bottom, F feed
pub fn set_g83(params: &Params, ctx: &CycleContext) -> CommandResult<G83Params> {
    ctx.require(MachineRequirement::MillingOrLathe)?;

    let retract = params.require_distance('R')?;
    let peck = positive(params.require_distance('Q')?, 'Q')?;
    let bottom = params.require_distance('Z')?;
    let feed = positive(params.require_feed_rate('F')?, 'F')?;

    Ok(G83Params {
        retract,
        peck,
        bottom,
        feed,
    })
}

/// Drill one hole at the X/Y words of the line, or where the tool is now
pub fn run_g83(p: &G83Params, params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    if ctx.machine.machine_type.is_lathe() {
        run_g83_lathe(p, params, ctx)
    } else {
        run_g83_milling(p, params, ctx)
    }
}

fn run_g83_milling(p: &G83Params, params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    let z_start = ctx.axis("G83", 'Z')?;
    let mut program = Program::new();

    let mut over_hole = Target::new();
    if let Some(x) = params.axis_word('X')? {
        ctx.axis("G83", 'X')?;
        over_hole = over_hole.with('X', x);
    }
    if let Some(y) = params.axis_word('Y')? {
        ctx.axis("G83", 'Y')?;
        over_hole = over_hole.with('Y', y);
    }
    if !over_hole.is_empty() {
        program.push(PrimitiveCommand::rapid(over_hole));
    }

    let direction = direction_sign(p.retract, p.bottom);
    let depth = (p.bottom - p.retract).abs();
    let mut z = p.retract;

    for pass in Passes::new(depth, p.peck) {
        // Rapid back down to where the last peck stopped
        program.push(PrimitiveCommand::rapid(axis('Z', z)));
        program.push(PrimitiveCommand::dwell(10));
        z = p.retract + pass * direction;
        program.push(PrimitiveCommand::feed(axis('Z', z), p.feed));
        program.push(PrimitiveCommand::rapid(axis('Z', p.retract)));
        program.push(PrimitiveCommand::dwell(10));
    }

    program.push(PrimitiveCommand::rapid(axis('Z', z_start)));
    Ok(program)
}

fn run_g83_lathe(p: &G83Params, params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    let z_start = ctx.axis("G83", 'Z')?;
    let mut program = Program::new();

    // On the lathe the drill sits on the spindle axis; X only offsets it radially
    if let Some(x) = params.axis_word('X')? {
        ctx.axis("G83", 'X')?;
        program.push(PrimitiveCommand::rapid(axis('X', ctx.radial(x))));
    }

    let direction = direction_sign(p.retract, p.bottom);
    let depth = (p.bottom - p.retract).abs();
    let mut z = p.retract;

    for pass in Passes::new(depth, p.peck) {
        program.push(PrimitiveCommand::rapid(axis('Z', z)));
        program.push(PrimitiveCommand::dwell(10));
        z = p.retract + pass * direction;
        program.push(PrimitiveCommand::feed(axis('Z', z), p.feed));
        program.push(PrimitiveCommand::rapid(axis('Z', p.retract)));
        program.push(PrimitiveCommand::dwell(10));
    }

    program.push(PrimitiveCommand::rapid(axis('Z', z_start)));
    Ok(program)
}

#[derive(Debug, Clone, PartialEq)]
pub struct G84Params {
    pub retract: f64,
    pub peck: f64,
    pub bottom: f64,
    /// Thread pitch, millimetres per spindle turn
    pub pitch: f64,
    pub rpm: f64,
}

/// G84 Set: R retract plane, Q peck, Z bottom, F pitch, S rpm
pub fn set_g84(params: &Params, ctx: &CycleContext) -> CommandResult<G84Params> {
    ctx.require(MachineRequirement::MillingOrLathe)?;

    let retract = params.require_distance('R')?;
    let peck = positive(params.require_distance('Q')?, 'Q')?;
    let bottom = params.require_distance('Z')?;
    let pitch = params.require_distance('F')?;
    if pitch == 0.0 {
        return Err(CommandError::invalid("pitch of thread is 0"));
    }
    let rpm = params.require_float('S')?;

    Ok(G84Params {
        retract,
        peck,
        bottom,
        pitch,
        rpm,
    })
}

/// Switch the spindle into position mode before the first hole
pub fn tapping_preamble(ctx: &CycleContext) -> Program {
    if ctx.machine.machine_type.is_lathe() {
        vec![
            PrimitiveCommand::home("A"),
            PrimitiveCommand::dwell(3000),
            PrimitiveCommand::RotaryBrake { engaged: false },
        ]
    } else {
        vec![
            PrimitiveCommand::home("D"),
            PrimitiveCommand::dwell(4000),
            PrimitiveCommand::raw("M5001"),
        ]
    }
}

pub fn run_g84(p: &G84Params, params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    if ctx.machine.machine_type.is_lathe() {
        run_g84_lathe(p, params, ctx)
    } else {
        run_g84_milling(p, params, ctx)
    }
}

/// Milling spindle is the D axis, counted in revolutions
fn run_g84_milling(p: &G84Params, params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    let z_start = ctx.axis("G84", 'Z')?;
    ctx.axis("G84", 'D')?;
    let mut program = Program::new();

    let mut over_hole = Target::new();
    if let Some(x) = params.axis_word('X')? {
        ctx.axis("G84", 'X')?;
        over_hole = over_hole.with('X', x);
    }
    if let Some(y) = params.axis_word('Y')? {
        ctx.axis("G84", 'Y')?;
        over_hole = over_hole.with('Y', y);
    }
    if !over_hole.is_empty() {
        program.push(PrimitiveCommand::rapid(over_hole));
    }

    let direction = direction_sign(p.retract, p.bottom);
    let depth = (p.bottom - p.retract).abs();
    let feed = p.rpm * p.pitch.abs();

    program.push(PrimitiveCommand::rapid(
        Target::new().with('Z', p.retract).with('D', 0.0),
    ));
    program.push(PrimitiveCommand::dwell(100));

    for pass in Passes::new(depth, p.peck) {
        let turns = pass / p.pitch;
        program.push(PrimitiveCommand::feed(
            Target::new()
                .with('Z', p.retract + pass * direction)
                .with('D', -turns),
            feed,
        ));
        program.push(PrimitiveCommand::dwell(100));
        // Reverse out along the same helix
        program.push(PrimitiveCommand::feed(
            Target::new().with('Z', p.retract).with('D', 0.0),
            feed,
        ));
        program.push(PrimitiveCommand::dwell(100));
    }

    program.push(PrimitiveCommand::rapid(axis('Z', z_start)));
    program.push(PrimitiveCommand::dwell(10));
    debug!("G84 milling expanded to {} primitives", program.len());
    Ok(program)
}

/// Lathe spindle is the C axis, in degrees
fn run_g84_lathe(p: &G84Params, params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    let z_start = ctx.axis("G84", 'Z')?;
    ctx.axis("G84", 'C')?;
    let mut program = Program::new();

    if let Some(x) = params.axis_word('X')? {
        ctx.axis("G84", 'X')?;
        program.push(PrimitiveCommand::rapid(axis('X', ctx.radial(x))));
    }

    let direction = direction_sign(p.retract, p.bottom);
    let depth = (p.bottom - p.retract).abs();
    let feed = p.rpm * 360.0;

    program.push(PrimitiveCommand::rapid(
        Target::new().with('Z', p.retract).with('C', 0.0),
    ));
    program.push(PrimitiveCommand::dwell(1000));

    for pass in Passes::new(depth, p.peck) {
        let turns = pass / p.pitch;
        program.push(PrimitiveCommand::feed(
            Target::new()
                .with('Z', p.retract + pass * direction)
                .with('C', turns * 360.0),
            feed,
        ));
        program.push(PrimitiveCommand::dwell(100));
        program.push(PrimitiveCommand::feed(
            Target::new().with('Z', p.retract).with('C', 0.0),
            feed,
        ));
        program.push(PrimitiveCommand::dwell(100));
    }

    program.push(PrimitiveCommand::rapid(axis('Z', z_start)));
    program.push(PrimitiveCommand::dwell(10));
    debug!("G84 lathe expanded to {} primitives", program.len());
    Ok(program)
}

/// M2009 lathe drilling: Z start, U end, X offset, Q peck, F feed, S rpm
pub fn run_m2009(params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    ctx.require(MachineRequirement::Lathe)?;

    let start_z = params.require_distance('Z')?;
    let end_z = params.require_distance('U')?;
    let x = params.require_distance('X')?;
    let peck = positive(params.require_distance('Q')?, 'Q')?;
    let feed = positive(params.require_feed_rate('F')?, 'F')?;
    let rpm = params.require_float('S')?;

    let direction = direction_sign(start_z, end_z);
    let depth = (end_z - start_z).abs();

    let mut program = vec![
        PrimitiveCommand::spindle_on(rpm),
        PrimitiveCommand::rapid(axis('X', ctx.radial(x))),
        PrimitiveCommand::rapid(axis('Z', start_z)),
    ];
    for pass in Passes::new(depth, peck) {
        program.push(PrimitiveCommand::feed(axis('Z', start_z + pass * direction), feed));
        program.push(PrimitiveCommand::dwell(10));
        program.push(PrimitiveCommand::rapid(axis('Z', start_z)));
    }
    program.push(PrimitiveCommand::rapid(axis('Z', start_z)));
    program.push(PrimitiveCommand::rapid(axis('X', ctx.radial(x))));
    program.push(PrimitiveCommand::spindle_off());
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Position;
    use crate::machine::{MachineConfig, MachineType, Units};
    use crate::params::CodeLine;
    use pretty_assertions::assert_eq;

    fn feed_depths(program: &Program, letter: char) -> Vec<f64> {
        program
            .iter()
            .filter_map(|c| match c {
                PrimitiveCommand::LinearMove { target, feed_rate: Some(_) } => target.get(letter),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_g83_milling_pecks_and_retracts() {
        let config = MachineConfig::new(MachineType::Milling, "XYZ");
        let mut position = Position::new(&config.axes);
        position.set('Z', 20.0);
        let ctx = CycleContext::new(&config, &position);

        let line = CodeLine::parse("G83 R5 Q2 Z-5 F1000").unwrap();
        let params = Params::new(&line, Units::Metric);
        let p = set_g83(&params, &ctx).unwrap();
        let program = run_g83(&p, &params, &ctx).unwrap();

        // Five pecks 2, 4, 6, 8, 10 below the retract plane
        assert_eq!(feed_depths(&program, 'Z'), vec![3.0, 1.0, -1.0, -3.0, -5.0]);

        // Every cut is followed by a rapid back up to R
        for (i, cmd) in program.iter().enumerate() {
            if let PrimitiveCommand::LinearMove { feed_rate: Some(_), .. } = cmd {
                assert_eq!(program[i + 1], PrimitiveCommand::rapid(axis('Z', 5.0)));
            }
        }
        assert_eq!(program.last(), Some(&PrimitiveCommand::rapid(axis('Z', 20.0))));
    }

    #[test]
    fn test_g83_pass_count_for_uneven_depth() {
        let config = MachineConfig::new(MachineType::Milling, "XYZ");
        let position = Position::new(&config.axes);
        let ctx = CycleContext::new(&config, &position);

        let line = CodeLine::parse("G83 R5 Q2 Z-10 F1000").unwrap();
        let params = Params::new(&line, Units::Metric);
        let p = set_g83(&params, &ctx).unwrap();
        let depths = feed_depths(&run_g83(&p, &params, &ctx).unwrap(), 'Z');

        // 15 mm from R to the bottom: ceil(15 / 2) pecks, the last one 1 mm
        assert_eq!(depths.len(), 8);
        assert_eq!(depths[6] - depths[7], 1.0);
        assert_eq!(*depths.last().unwrap(), -10.0);
    }

    #[test]
    fn test_g83_milling_moves_over_hole() {
        let config = MachineConfig::new(MachineType::Milling, "XYZ");
        let position = Position::new(&config.axes);
        let ctx = CycleContext::new(&config, &position);

        let line = CodeLine::parse("X10 Y-4").unwrap();
        let set_line = CodeLine::parse("G83 R2 Q1 Z-1 F100").unwrap();
        let p = set_g83(&Params::new(&set_line, Units::Metric), &ctx).unwrap();
        let program = run_g83(&p, &Params::new(&line, Units::Metric), &ctx).unwrap();
        assert_eq!(
            program[0],
            PrimitiveCommand::rapid(Target::new().with('X', 10.0).with('Y', -4.0))
        );
    }

    #[test]
    fn test_g83_lathe_ignores_y_and_halves_x() {
        let config = MachineConfig::new(MachineType::Lathe, "XZC").with_diameter_mode(true);
        let position = Position::new(&config.axes);
        let ctx = CycleContext::new(&config, &position);

        let set_line = CodeLine::parse("G83 R1 Q3 Z-5 F80").unwrap();
        let p = set_g83(&Params::new(&set_line, Units::Metric), &ctx).unwrap();
        let line = CodeLine::parse("X8 Y3").unwrap();
        let program = run_g83(&p, &Params::new(&line, Units::Metric), &ctx).unwrap();

        assert_eq!(program[0], PrimitiveCommand::rapid(axis('X', 4.0)));
        assert_eq!(feed_depths(&program, 'Z'), vec![-2.0, -5.0]);
    }

    #[test]
    fn test_g83_mode_checked_before_parameters() {
        let config = MachineConfig::new(MachineType::Fff, "XYZ");
        let position = Position::new(&config.axes);
        let ctx = CycleContext::new(&config, &position);

        let line = CodeLine::parse("G83").unwrap();
        let err = set_g83(&Params::new(&line, Units::Metric), &ctx).unwrap_err();
        assert_eq!(err.to_string(), "Change to Milling, HMC, or Lathe Mode First!");
    }

    #[test]
    fn test_g83_each_missing_parameter_is_named() {
        let config = MachineConfig::new(MachineType::Milling, "XYZ");
        let position = Position::new(&config.axes);
        let ctx = CycleContext::new(&config, &position);

        for (text, letter) in [
            ("G83 Q2 Z-5 F100", 'R'),
            ("G83 R5 Z-5 F100", 'Q'),
            ("G83 R5 Q2 F100", 'Z'),
            ("G83 R5 Q2 Z-5", 'F'),
        ] {
            let line = CodeLine::parse(text).unwrap();
            let err = set_g83(&Params::new(&line, Units::Metric), &ctx).unwrap_err();
            assert_eq!(err, CommandError::MissingParameter(letter));
        }
    }

    #[test]
    fn test_g83_rejects_zero_peck() {
        let config = MachineConfig::new(MachineType::Milling, "XYZ");
        let position = Position::new(&config.axes);
        let ctx = CycleContext::new(&config, &position);
        let line = CodeLine::parse("G83 R5 Q0 Z-5 F100").unwrap();
        assert!(set_g83(&Params::new(&line, Units::Metric), &ctx).is_err());
    }

    #[test]
    fn test_g83_needs_z_axis() {
        let config = MachineConfig::new(MachineType::Milling, "XY");
        let position = Position::new(&config.axes);
        let ctx = CycleContext::new(&config, &position);
        let line = CodeLine::parse("G83 R5 Q2 Z-5 F100").unwrap();
        let params = Params::new(&line, Units::Metric);
        let p = set_g83(&params, &ctx).unwrap();
        assert_eq!(
            run_g83(&p, &params, &ctx).unwrap_err(),
            CommandError::MissingAxis {
                code: "G83".into(),
                axis: 'Z'
            }
        );
    }

    #[test]
    fn test_g84_milling_synchronizes_d() {
        let config = MachineConfig::new(MachineType::Milling, "XYZD");
        let mut position = Position::new(&config.axes);
        position.set('Z', 10.0);
        let ctx = CycleContext::new(&config, &position);

        let line = CodeLine::parse("G84 R2 Q3 Z-4 F1.5 S200").unwrap();
        let params = Params::new(&line, Units::Metric);
        let p = set_g84(&params, &ctx).unwrap();
        let program = run_g84(&p, &params, &ctx).unwrap();

        assert_eq!(
            program[2],
            PrimitiveCommand::feed(Target::new().with('Z', -1.0).with('D', -2.0), 300.0)
        );
        assert_eq!(
            program[4],
            PrimitiveCommand::feed(Target::new().with('Z', 2.0).with('D', 0.0), 300.0)
        );
        assert_eq!(feed_depths(&program, 'D'), vec![-2.0, 0.0, -4.0, 0.0]);
        assert_eq!(
            tapping_preamble(&ctx),
            vec![
                PrimitiveCommand::home("D"),
                PrimitiveCommand::dwell(4000),
                PrimitiveCommand::raw("M5001"),
            ]
        );
    }

    #[test]
    fn test_g84_lathe_synchronizes_c_in_degrees() {
        let config = MachineConfig::new(MachineType::Lathe, "XZC");
        let position = Position::new(&config.axes);
        let ctx = CycleContext::new(&config, &position);

        let line = CodeLine::parse("G84 R1 Q10 Z-3 F2 S100").unwrap();
        let params = Params::new(&line, Units::Metric);
        let p = set_g84(&params, &ctx).unwrap();
        let program = run_g84(&p, &params, &ctx).unwrap();

        assert_eq!(
            program[2],
            PrimitiveCommand::feed(Target::new().with('Z', -3.0).with('C', 720.0), 36000.0)
        );
        assert_eq!(tapping_preamble(&ctx)[2], PrimitiveCommand::RotaryBrake { engaged: false });
    }

    #[test]
    fn test_g84_zero_pitch() {
        let config = MachineConfig::new(MachineType::Milling, "XYZD");
        let position = Position::new(&config.axes);
        let ctx = CycleContext::new(&config, &position);
        let line = CodeLine::parse("G84 R2 Q3 Z-4 F0 S200").unwrap();
        assert_eq!(
            set_g84(&Params::new(&line, Units::Metric), &ctx)
                .unwrap_err()
                .to_string(),
            "pitch of thread is 0"
        );
    }

    #[test]
    fn test_m2009_pecks_by_q() {
        let config = MachineConfig::new(MachineType::Lathe, "XZ");
        let position = Position::new(&config.axes);
        let ctx = CycleContext::new(&config, &position);

        let line = CodeLine::parse("M2009 Z2 U-7 X0 Q3 F60 S900").unwrap();
        let program = run_m2009(&Params::new(&line, Units::Metric), &ctx).unwrap();
        assert_eq!(feed_depths(&program, 'Z'), vec![-1.0, -4.0, -7.0]);
        assert_eq!(program[0], PrimitiveCommand::spindle_on(900.0));
        assert_eq!(program.last(), Some(&PrimitiveCommand::spindle_off()));
    }

    #[test]
    fn test_m2009_lathe_only() {
        let config = MachineConfig::new(MachineType::Milling, "XYZ");
        let position = Position::new(&config.axes);
        let ctx = CycleContext::new(&config, &position);
        let line = CodeLine::parse("M2009 Z2 U-7 X0 Q3 F60 S900").unwrap();
        assert_eq!(
            run_m2009(&Params::new(&line, Units::Metric), &ctx).unwrap_err(),
            CommandError::Mode(MachineRequirement::Lathe)
        );
    }
}
