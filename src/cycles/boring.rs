//! Helical boring (M460), circle/helix interpolation (M2000) and spiral pocketing (M2001)

use super::geometry::{circle_point, direction_from_code, spiral_points, Point};
use super::{positive, CycleContext, Passes, Program};
use crate::params::Params;
use crate::reply::{CommandError, CommandResult};
use crate::sink::{axis, ArcDirection, PrimitiveCommand, Target};
use cgmath::{Deg, Rad};
use log::debug;

/// Spiral used between the helix ring and the finished wall
const BORE_STEPOVER: f64 = 1.0;
const BORE_RESOLUTION: f64 = 1.0;

const DEFAULT_SEGMENTS: i32 = 360;

fn xy(point: Point) -> Target {
    Target::new().with('X', point.x).with('Y', point.y)
}

fn full_circle(start: Point, center: Point, z: Option<f64>, feed: f64, direction: ArcDirection) -> PrimitiveCommand {
    let mut target = xy(start);
    if let Some(z) = z {
        target = target.with('Z', z);
    }
    let offset = center - start;
    PrimitiveCommand::ArcMove {
        target,
        center_offset: (offset.x, offset.y),
        feed_rate: feed,
        direction,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct M460Params {
    pub hole_diameter: f64,
    pub cutter_diameter: f64,
    pub depth: f64,
    pub step: f64,
    pub feed: f64,
    pub rpm: f64,
    pub direction: ArcDirection,
}

/// M460 Set: A hole dia, B cutter dia, C depth, E depth per helix, F feed, S rpm, H direction
pub fn set_m460(params: &Params) -> CommandResult<M460Params> {
    let hole_diameter = params.require_distance('A')?;
    let cutter_diameter = params.require_distance('B')?;
    let depth = params.require_distance('C')?.abs();
    let step = positive(params.require_distance('E')?.abs(), 'E')?;
    let feed = positive(params.require_feed_rate('F')?, 'F')?;
    let rpm = params.require_float('S')?;
    let direction = direction_from_code(params.int('H')?.unwrap_or(0));

    if cutter_diameter > hole_diameter {
        return Err(CommandError::invalid(
            "Tool diameter parameter is bigger than pocket diameter",
        ));
    }

    Ok(M460Params {
        hole_diameter,
        cutter_diameter,
        depth,
        step,
        feed,
        rpm,
        direction,
    })
}

/// Bore around the current XY: helix down one step, spiral out, finish the wall, repeat
pub fn run_m460(p: &M460Params, ctx: &CycleContext) -> CommandResult<Program> {
    let z_start = ctx.axis("M460", 'Z')?;
    let x = ctx.axis("M460", 'X')?;
    let y = ctx.axis("M460", 'Y')?;
    let center = Point::new(x, y);

    let finish_radius = (p.hole_diameter - p.cutter_diameter) / 2.0;
    let ring = (p.cutter_diameter / 2.0).min(finish_radius);

    let mut program = vec![PrimitiveCommand::spindle_on(p.rpm)];
    let mut z = z_start;

    for pass in Passes::new(p.depth, p.step) {
        program.push(PrimitiveCommand::feed(xy(center).with('Z', z), p.feed));
        let next_z = z_start - pass;

        if ring <= 0.0 {
            // Cutter fills the hole, there is nothing to ramp around
            program.push(PrimitiveCommand::feed(axis('Z', next_z), p.feed));
            z = next_z;
            continue;
        }

        let ring_start = circle_point(center, ring, Rad(0.0), p.direction);
        program.push(PrimitiveCommand::feed(xy(ring_start), p.feed));
        program.push(full_circle(ring_start, center, Some(next_z), p.feed, p.direction));
        // Clean up the ramp floor
        program.push(full_circle(ring_start, center, None, p.feed, p.direction));
        z = next_z;

        for point in spiral_points(center, ring, finish_radius, BORE_STEPOVER, BORE_RESOLUTION, p.direction) {
            program.push(PrimitiveCommand::feed(xy(point), p.feed));
        }

        let wall_start = circle_point(center, finish_radius, Rad(0.0), p.direction);
        program.push(PrimitiveCommand::feed(xy(wall_start), p.feed));
        program.push(full_circle(wall_start, center, None, p.feed, p.direction));
    }

    program.push(PrimitiveCommand::feed(xy(center), p.feed));
    program.push(PrimitiveCommand::rapid(axis('Z', z_start)));
    program.push(PrimitiveCommand::spindle_off());
    debug!("M460 bored to Z{} in {} primitives", z, program.len());
    Ok(program)
}

/// M2000: R radius, F feed, optional X/Y centre, E total descent, N segments, H direction
pub fn run_m2000(params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    let x = ctx.axis("M2000", 'X')?;
    let y = ctx.axis("M2000", 'Y')?;
    let z = ctx.axis("M2000", 'Z')?;

    let center = Point::new(
        params.axis_word('X')?.unwrap_or(x),
        params.axis_word('Y')?.unwrap_or(y),
    );
    let radius = positive(params.require_distance('R')?, 'R')?;
    let feed = positive(params.require_feed_rate('F')?, 'F')?;
    let descent = params.distance('E')?;
    let segments = match params.int('N')? {
        Some(n) if (3..=9999).contains(&n) => n,
        _ => DEFAULT_SEGMENTS,
    };
    let direction = direction_from_code(params.int('H')?.unwrap_or(0));

    let mut program = Program::with_capacity(segments as usize + 1);
    for i in 0..=segments {
        let fraction = i as f64 / segments as f64;
        let point = circle_point(center, radius, Deg(360.0 * fraction).into(), direction);
        let mut target = xy(point);
        if let Some(e) = descent {
            target = target.with('Z', z - e * fraction);
        }
        program.push(PrimitiveCommand::feed(target, feed));
    }
    Ok(program)
}

/// M2001: A pocket dia, B cutter dia, F feed, R resolution, C start radius, P stepover
pub fn run_m2001(params: &Params, ctx: &CycleContext) -> CommandResult<Program> {
    let x = ctx.axis("M2001", 'X')?;
    let y = ctx.axis("M2001", 'Y')?;

    let center = Point::new(
        params.axis_word('X')?.unwrap_or(x),
        params.axis_word('Y')?.unwrap_or(y),
    );
    let pocket_diameter = params.require_distance('A')?;
    let cutter_diameter = params.require_distance('B')?;
    let feed = positive(params.require_feed_rate('F')?, 'F')?;
    let resolution = positive(params.require_distance('R')?, 'R')?;
    let start_radius = params.distance('C')?.unwrap_or(0.0).abs();
    let stepover = positive(params.distance('P')?.unwrap_or(1.0), 'P')?;
    let direction = direction_from_code(params.int('H')?.unwrap_or(0));

    let limit = (pocket_diameter - cutter_diameter) / 2.0;
    let program: Program = spiral_points(center, start_radius, limit, stepover, resolution, direction)
        .into_iter()
        .map(|point| PrimitiveCommand::feed(xy(point), feed))
        .collect();
    debug!("M2001 spiral of {} points", program.len());
    Ok(program)
}
