//! Raster milling (M2005 side, M2006 face), indexed polygons (M2004, M2007) and M2002

use super::{direction_sign, positive, CycleContext, Passes, Program};
use crate::machine::MachineRequirement;
use crate::params::Params;
use crate::reply::{CommandError, CommandResult};
use crate::sink::{axis, PrimitiveCommand, Target};
use log::info;

const SWITCH_TO_C_AXIS: &str = "M98 P\"/macros/0_SW_C_AXIS.g\"";

/// Side milling: X strokes, stepping the line over in Y
#[derive(Debug, Clone, PartialEq)]
pub struct SideMill {
    pub start_x: f64,
    pub end_x: f64,
    pub start_y: f64,
    pub end_y: f64,
    pub step: f64,
    pub z: f64,
    pub rpm: f64,
    pub feed: f64,
}

impl SideMill {
    fn expand(&self, program: &mut Program) {
        let direction = direction_sign(self.start_y, self.end_y);

        program.push(PrimitiveCommand::spindle_on(self.rpm));
        program.push(PrimitiveCommand::rapid(
            Target::new().with('X', self.start_x).with('Y', self.start_y),
        ));
        program.push(PrimitiveCommand::rapid(axis('Z', self.z)));

        for pass in Passes::with_skim(self.end_y - self.start_y, self.step) {
            program.push(PrimitiveCommand::rapid(axis('X', self.start_x)));
            program.push(PrimitiveCommand::rapid(axis('Y', self.start_y + pass * direction)));
            program.push(PrimitiveCommand::feed(axis('X', self.end_x), self.feed));
            program.push(PrimitiveCommand::dwell(10));
            program.push(PrimitiveCommand::rapid(axis('Y', self.start_y)));
        }
        program.push(PrimitiveCommand::rapid(
            Target::new().with('Z', self.z).with('X', self.start_x),
        ));
    }
}

/// Face milling: Y strokes at depth, stepping over in X
#[derive(Debug, Clone, PartialEq)]
pub struct FaceMill {
    pub start_x: f64,
    pub end_x: f64,
    pub start_y: f64,
    pub end_y: f64,
    pub start_z: f64,
    pub cut_z: f64,
    pub step: f64,
    pub rpm: f64,
    pub feed: f64,
}

impl FaceMill {
    fn expand(&self, program: &mut Program) {
        let direction = direction_sign(self.start_x, self.end_x);
        let start = Target::new().with('X', self.start_x).with('Y', self.start_y);

        program.push(PrimitiveCommand::spindle_on(self.rpm));
        program.push(PrimitiveCommand::rapid(start.clone()));
        program.push(PrimitiveCommand::rapid(axis('Z', self.start_z)));

        for pass in Passes::with_skim(self.end_x - self.start_x, self.step) {
            program.push(PrimitiveCommand::rapid(axis('X', self.start_x + pass * direction)));
            program.push(PrimitiveCommand::rapid(axis('Y', self.start_y)));
            program.push(PrimitiveCommand::rapid(axis('Z', self.cut_z)));
            program.push(PrimitiveCommand::feed(axis('Y', self.end_y), self.feed));
            program.push(PrimitiveCommand::dwell(10));
            program.push(PrimitiveCommand::rapid(axis('Z', self.start_z)));
        }
        program.push(PrimitiveCommand::rapid(axis('Z', self.start_z)));
        program.push(PrimitiveCommand::rapid(start));
    }
}

/// M2005: X start, N end X, Y start, D end Y, E stepover, Z, S, F
pub fn run_m2005(params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    ctx.require(MachineRequirement::Milling)?;

    let side = SideMill {
        start_x: params.require_distance('X')?,
        end_x: params.require_distance('N')?,
        start_y: params.require_distance('Y')?,
        end_y: params.require_distance('D')?,
        step: positive(params.require_distance('E')?.abs(), 'E')?,
        z: params.require_distance('Z')?,
        rpm: params.require_float('S')?,
        feed: positive(params.require_feed_rate('F')?, 'F')?,
    };
    let mut program = Program::new();
    side.expand(&mut program);
    Ok(program)
}

/// M2006: X start, N end X, Y start, D end Y, Z clearance, W cutting Z, E stepover, S, F
pub fn run_m2006(params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    ctx.require(MachineRequirement::Milling)?;

    let face = FaceMill {
        start_x: params.require_distance('X')?,
        end_x: params.require_distance('N')?,
        start_y: params.require_distance('Y')?,
        end_y: params.require_distance('D')?,
        start_z: params.require_distance('Z')?,
        cut_z: params.require_distance('W')?,
        step: positive(params.require_distance('E')?.abs(), 'E')?,
        rpm: params.require_float('S')?,
        feed: positive(params.require_feed_rate('F')?, 'F')?,
    };
    let mut program = Program::new();
    face.expand(&mut program);
    Ok(program)
}

/// How the workpiece is turned to the next polygon face
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Release the brake and orient the spindle servo
    Orient,
    /// Move the rotary axis
    Rotary,
    /// Orient, then clamp with the brake
    OrientAndBrake,
}

impl IndexMode {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => IndexMode::Rotary,
            2 => IndexMode::OrientAndBrake,
            _ => IndexMode::Orient,
        }
    }

    fn index_to(self, rotary: char, angle: f64, program: &mut Program) {
        match self {
            IndexMode::Rotary => program.push(PrimitiveCommand::rapid(axis(rotary, angle))),
            IndexMode::Orient | IndexMode::OrientAndBrake => {
                program.push(PrimitiveCommand::RotaryBrake { engaged: false });
                program.push(PrimitiveCommand::dwell(500));
                program.push(PrimitiveCommand::SpindleOrient { angle });
                program.push(PrimitiveCommand::dwell(1000));
                if self == IndexMode::OrientAndBrake {
                    program.push(PrimitiveCommand::RotaryBrake { engaged: true });
                }
            }
        }
    }
}

fn polygon_sides(params: &Params) -> CommandResult<u32> {
    let sides = params.require_int('Q')?;
    if sides < 3 {
        return Err(CommandError::invalid("Q parameter must be at least 3"));
    }
    Ok(sides as u32)
}

/// Start on the first face and, for a rotary index, hand the spindle over to the C axis
fn polygon_preamble(start: &Target, z: f64, rpm: f64, mode: IndexMode) -> Program {
    let mut program = vec![PrimitiveCommand::spindle_on(rpm)];
    for (letter, value) in start.iter() {
        program.push(PrimitiveCommand::rapid(axis(letter, value)));
    }
    program.push(PrimitiveCommand::rapid(axis('Z', z)));
    if mode == IndexMode::Rotary {
        program.push(PrimitiveCommand::raw("M5 A"));
        program.push(PrimitiveCommand::RotaryBrake { engaged: true });
        program.push(PrimitiveCommand::raw(SWITCH_TO_C_AXIS));
    }
    program
}

fn polygon_return(start: &Target, z: f64, program: &mut Program) {
    program.push(PrimitiveCommand::rapid(axis('Z', z)));
    for (letter, value) in start.iter() {
        program.push(PrimitiveCommand::rapid(axis(letter, value)));
    }
    program.push(PrimitiveCommand::spindle_off());
}

/// Face angles `K + 360·i/Q` for `i` in `0..Q`
fn face_angles(sides: u32, start_angle: f64) -> impl Iterator<Item = f64> {
    let step = 360.0 / sides as f64;
    (0..sides).map(move |i| start_angle + step * i as f64)
}

/// M2004: Q sides, D across flats, H tool dia, Y start, E stepover, X start, N end X,
/// Z, K start angle, S, F, J index mode
pub fn run_m2004(params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    ctx.require(MachineRequirement::Milling)?;

    let sides = polygon_sides(params)?;
    let across_flats = params.require_distance('D')?.abs();
    let tool_radius = params.require_distance('H')?.abs() / 2.0;
    let start_y = params.require_distance('Y')?;
    let step = positive(params.require_distance('E')?.abs(), 'E')?;
    let start_x = params.require_distance('X')?;
    let end_x = params.require_distance('N')?;
    let z = params.require_distance('Z')?;
    let start_angle = params.require_float('K')?;
    let rpm = params.require_float('S')?;
    let feed = positive(params.require_feed_rate('F')?, 'F')?;
    let mode = IndexMode::from_code(params.require_int('J')?);

    // Tool centre finishes one radius outside the flat, on the side it starts from
    let mut end_y = across_flats / 2.0 + tool_radius;
    if start_y < 0.0 {
        end_y = -end_y;
    }
    let side = SideMill {
        start_x,
        end_x,
        start_y,
        end_y,
        step,
        z,
        rpm,
        feed,
    };

    let start = Target::new().with('X', start_x).with('Y', start_y);
    let mut program = polygon_preamble(&start, z, rpm, mode);
    for angle in face_angles(sides, start_angle) {
        mode.index_to('A', angle, &mut program);
        side.expand(&mut program);
    }
    polygon_return(&start, z, &mut program);
    info!("M2004 milled {} sides in {} primitives", sides, program.len());
    Ok(program)
}

/// M2007: Q sides, D across flats, H tool dia, Y start, I end Y, X start, N end X,
/// W stepover, Z, K start angle, S, F, E index mode
pub fn run_m2007(params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    ctx.require(MachineRequirement::Milling)?;

    let sides = polygon_sides(params)?;
    let across_flats = params.require_distance('D')?.abs();
    let tool_radius = params.require_distance('H')?.abs() / 2.0;
    let start_y = params.require_distance('Y')?;
    let end_y = params.require_distance('I')?;
    let mut start_x = params.require_distance('X')?;
    let mut end_x = params.require_distance('N')?;
    let step = positive(params.require_distance('W')?.abs(), 'W')?;
    let z = params.require_distance('Z')?;
    let start_angle = params.require_float('K')?;
    let rpm = params.require_float('S')?;
    let feed = positive(params.require_feed_rate('F')?, 'F')?;
    let mode = IndexMode::from_code(params.require_int('E')?);

    // Keep the cutter inside the X span
    let direction = direction_sign(start_x, end_x);
    start_x += tool_radius * direction;
    end_x -= tool_radius * direction;

    let face = FaceMill {
        start_x,
        end_x,
        start_y,
        end_y,
        start_z: z,
        cut_z: across_flats / 2.0,
        step,
        rpm,
        feed,
    };

    let start = Target::new().with('X', start_x).with('Y', start_y);
    let mut program = polygon_preamble(&start, z, rpm, mode);
    for angle in face_angles(sides, start_angle) {
        mode.index_to('C', angle, &mut program);
        face.expand(&mut program);
    }
    polygon_return(&start, z, &mut program);
    info!("M2007 faced {} sides in {} primitives", sides, program.len());
    Ok(program)
}

/// M2002 gear hobbing: checks its parameters, the hobbing motion itself is not generated
pub fn run_m2002(params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    ctx.require(MachineRequirement::Milling)?;

    for letter in ['Y', 'Q', 'X', 'Z', 'P', 'S', 'F'] {
        params.require_float(letter)?;
    }
    info!("M2002 parameters accepted, no motion generated");
    Ok(Program::new())
}
