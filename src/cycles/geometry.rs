//! Plane geometry for circular and spiral toolpaths

use crate::sink::ArcDirection;
use cgmath::{Angle, EuclideanSpace, InnerSpace, Point2, Rad, Vector2};
use std::f64::consts::TAU;

pub type Point = Point2<f64>;

/// 0 = clockwise, 1 = counter-clockwise; anything else falls back to clockwise
pub fn direction_from_code(code: i32) -> ArcDirection {
    if code == 1 {
        ArcDirection::CounterClockwise
    } else {
        ArcDirection::Clockwise
    }
}

/// Point on a circle, measured from +X counter-clockwise or from +Y clockwise
///
/// Both conventions start a full revolution at the same place they end, so the
/// direction only decides which way the path travels.
pub fn circle_point(center: Point, radius: f64, angle: Rad<f64>, direction: ArcDirection) -> Point {
    let (sin, cos) = angle.sin_cos();
    let offset = match direction {
        ArcDirection::CounterClockwise => Vector2::new(cos, sin),
        ArcDirection::Clockwise => Vector2::new(sin, cos),
    };
    center + offset * radius
}

/// Points of an Archimedean spiral with adaptive resolution
///
/// The radius is `start_radius + angle * stepover / 2π`. Every full turn the number of
/// points per turn is recomputed as `round(2π·r / resolution)` so chord length stays near
/// `resolution` as the spiral widens. Points stop before the radius reaches `limit`.
pub fn spiral_points(
    center: Point,
    start_radius: f64,
    limit: f64,
    stepover: f64,
    resolution: f64,
    direction: ArcDirection,
) -> Vec<Point> {
    let growth = stepover / TAU;
    let mut points = Vec::new();
    let mut radius = start_radius;
    let mut theta = 0.0;
    let mut per_turn: usize = 5;
    let mut count = 0;

    while radius < limit {
        theta += TAU / per_turn as f64;
        radius = start_radius + theta * growth;
        if count % per_turn == 0 {
            per_turn = ((TAU * radius / resolution).round() as usize).max(3);
            count = 0;
        }
        if radius >= limit {
            break;
        }
        points.push(circle_point(center, radius, Rad(theta), direction));
        count += 1;
    }
    points
}

/// Centre offset (I, J) of an arc given by its radius
///
/// A positive radius picks the short arc, a negative one the long arc. Returns `None`
/// when the end point is farther than a diameter away.
pub fn arc_center_from_radius(
    start: Point,
    end: Point,
    radius: f64,
    direction: ArcDirection,
) -> Option<Vector2<f64>> {
    let chord = end - start;
    let half = chord.magnitude() / 2.0;
    if half == 0.0 || half > radius.abs() + 1e-9 {
        return None;
    }
    let height = (radius * radius - half * half).max(0.0).sqrt();
    let normal = Vector2::new(-chord.y, chord.x).normalize();

    // Centre sits left of the chord for a short counter-clockwise arc
    let side = match direction {
        ArcDirection::CounterClockwise => 1.0,
        ArcDirection::Clockwise => -1.0,
    } * radius.signum();

    let mid = start.midpoint(end);
    let center = mid + normal * (height * side);
    Some(center - start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Deg;

    fn close(a: Point, b: Point) -> bool {
        (a - b).magnitude() < 1e-9
    }

    #[test]
    fn test_circle_point_conventions() {
        let c = Point::new(10.0, 5.0);
        let ccw = circle_point(c, 2.0, Deg(90.0).into(), ArcDirection::CounterClockwise);
        assert!(close(ccw, Point::new(10.0, 7.0)));

        let cw = circle_point(c, 2.0, Deg(90.0).into(), ArcDirection::Clockwise);
        assert!(close(cw, Point::new(12.0, 5.0)));
    }

    #[test]
    fn test_spiral_stays_inside_limit_and_grows() {
        let c = Point::origin();
        let points = spiral_points(c, 0.0, 8.0, 1.0, 0.5, ArcDirection::Clockwise);
        assert!(!points.is_empty());

        let radii: Vec<f64> = points.iter().map(|p| (p - c).magnitude()).collect();
        assert!(radii.iter().all(|r| *r < 8.0));
        for pair in radii.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_spiral_resolution_adapts() {
        let c = Point::origin();
        let points = spiral_points(c, 0.0, 20.0, 1.0, 0.5, ArcDirection::CounterClockwise);
        let first = (points[1] - points[0]).magnitude();
        let n = points.len();
        let last = (points[n - 1] - points[n - 2]).magnitude();
        // Chords stay close to the resolution instead of growing with the radius
        assert!(last < 0.6, "outer chord {}", last);
        assert!(first < 1.0);
    }

    #[test]
    fn test_spiral_empty_when_cutter_fills_hole() {
        let points = spiral_points(Point::origin(), 0.0, 0.0, 1.0, 0.5, ArcDirection::Clockwise);
        assert!(points.is_empty());
    }

    #[test]
    fn test_arc_center_from_radius() {
        let start = Point::new(0.0, 0.0);
        let end = Point::new(10.0, 0.0);

        let ccw = arc_center_from_radius(start, end, 5.0, ArcDirection::CounterClockwise).unwrap();
        assert!((ccw - Vector2::new(5.0, 0.0)).magnitude() < 1e-9);

        let short_cw = arc_center_from_radius(start, end, 10.0, ArcDirection::Clockwise).unwrap();
        assert!(short_cw.y < 0.0);
        let short_ccw =
            arc_center_from_radius(start, end, 10.0, ArcDirection::CounterClockwise).unwrap();
        assert!(short_ccw.y > 0.0);

        assert!(arc_center_from_radius(start, end, 4.0, ArcDirection::Clockwise).is_none());
    }
}
