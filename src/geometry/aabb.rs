use std::ops::Sub;

use arrayvec::ArrayVec;

use super::{SplitPlane, WorldBox, WorldPoint, WorldVector, ZERO_TOLERANCE};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AABB<Point> {
    pub min: Point,
    pub max: Point,
}

impl<Point> AABB<Point> {
    pub fn new(min: Point, max: Point) -> AABB<Point> {
        AABB { min, max }
    }

    pub fn map<Point2, F: FnMut(&Point) -> Point2>(&self, mut f: F) -> AABB<Point2> {
        AABB {
            min: f(&self.min),
            max: f(&self.max),
        }
    }

    pub fn zip_map<Point2, Point3, F: FnMut(&Point, &Point2) -> Point3>(
        &self,
        rhs: &AABB<Point2>,
        mut f: F,
    ) -> AABB<Point3> {
        AABB {
            min: f(&self.min, &rhs.min),
            max: f(&self.max, &rhs.max),
        }
    }
}

impl<Point: Sub + Copy> AABB<Point> {
    pub fn size(&self) -> Point::Output {
        self.max - self.min
    }
}

impl<Point> From<[Point; 2]> for AABB<Point> {
    fn from(value: [Point; 2]) -> Self {
        let [min, max] = value;
        AABB { min, max }
    }
}

/// A triangle clipped by the 6 planes of a box has at most 9 vertices,
/// some slack is kept for numerically non-convex inputs.
const CLIP_BUFFER_SIZE: usize = 12;
type ClipPolygon = ArrayVec<WorldPoint, CLIP_BUFFER_SIZE>;

impl WorldBox {
    /// Box that contains nothing, `min > max` on every axis.
    pub fn degenerate() -> WorldBox {
        AABB {
            min: WorldPoint::from([f32::MAX; 3]),
            max: WorldPoint::from([-f32::MAX; 3]),
        }
    }

    /// Bounding box of the points, degenerate if there are none.
    pub fn build_from<'a>(points: impl IntoIterator<Item = &'a WorldPoint>) -> WorldBox {
        let mut ret = WorldBox::degenerate();
        for p in points {
            ret.expand_by_point(p);
        }
        ret
    }

    pub fn expand_by_point(&mut self, point: &WorldPoint) {
        self.min = self.min.inf(point);
        self.max = self.max.sup(point);
    }

    pub fn expand_by_box(&mut self, other: &WorldBox) {
        self.min = self.min.inf(&other.min);
        self.max = self.max.sup(&other.max);
    }

    pub fn is_degenerate(&self) -> bool {
        (0..3).any(|axis| self.min[axis] > self.max[axis])
    }

    /// True if the box has zero extent along the axis.
    pub fn is_planar(&self, axis: usize) -> bool {
        self.min[axis] == self.max[axis]
    }

    /// Half of the surface area, only ever used in ratios.
    pub fn surface_area(&self) -> f32 {
        let size = self.size();
        size.x * size.y + size.x * size.z + size.y * size.z
    }

    pub fn center(&self) -> WorldPoint {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn contains(&self, point: &WorldPoint) -> bool {
        (0..3).all(|axis| self.min[axis] <= point[axis] && point[axis] <= self.max[axis])
    }

    /// Axes ordered by descending extent.
    pub fn axes_by_extent(&self) -> [usize; 3] {
        let size = self.size();
        if size.x > size.y {
            if size.x > size.z {
                if size.y > size.z { [0, 1, 2] } else { [0, 2, 1] }
            } else {
                [2, 0, 1]
            }
        } else if size.y > size.z {
            if size.x > size.z { [1, 0, 2] } else { [1, 2, 0] }
        } else {
            [2, 1, 0]
        }
    }

    /// The 8 corner points.
    pub fn corners(&self) -> [WorldPoint; 8] {
        std::array::from_fn(|i| {
            WorldPoint::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    /// Splits the box by the plane.
    /// A plane outside of the box leaves the whole box on one side and a zero sized box
    /// at the origin on the other.
    pub fn split(&self, plane: &SplitPlane) -> (WorldBox, WorldBox) {
        let axis = plane.axis;
        let empty = || WorldBox::new(WorldPoint::origin(), WorldPoint::origin());

        if plane.position < self.min[axis] {
            (empty(), self.clone())
        } else if plane.position > self.max[axis] {
            (self.clone(), empty())
        } else {
            let mut left = self.clone();
            let mut right = self.clone();
            left.max[axis] = plane.position;
            right.min[axis] = plane.position;
            (left, right)
        }
    }

    /// Bounding box of the part of the triangle that lies inside this box.
    /// Degenerate if the triangle doesn't touch the box at all.
    pub fn clip_triangle(&self, triangle: &[WorldPoint; 3]) -> WorldBox {
        let mut polygon: ClipPolygon = triangle.iter().copied().collect();
        let mut scratch = ClipPolygon::new();

        let planes = [
            (0, self.min.x, 1.0),
            (1, self.min.y, 1.0),
            (2, self.min.z, 1.0),
            (0, self.max.x, -1.0),
            (1, self.max.y, -1.0),
            (2, self.max.z, -1.0),
        ];

        for (axis, position, direction) in planes {
            clip_polygon(&mut polygon, &mut scratch, axis, position, direction);
            if polygon.is_empty() {
                break;
            }
        }

        WorldBox::build_from(&polygon)
    }
}

/// Clips the convex polygon against a half-space `direction * (p[axis] - position) >= 0`.
fn clip_polygon(
    polygon: &mut ClipPolygon,
    scratch: &mut ClipPolygon,
    axis: usize,
    position: f32,
    direction: f32,
) {
    let distance = |p: &WorldPoint| direction * (p[axis] - position);

    let all_in = polygon.iter().all(|p| distance(p) >= 0.0);
    if all_in {
        return;
    }
    let all_out = polygon.iter().all(|p| distance(p) < 0.0);
    if all_out {
        polygon.clear();
        return;
    }

    scratch.clear();
    let mut previous = polygon[0];
    let mut previous_distance = distance(&previous);
    let mut inside = previous_distance >= 0.0;

    for i in 0..polygon.len() {
        let current = polygon[(i + 1) % polygon.len()];
        let current_distance = distance(&current);

        if inside && current_distance >= 0.0 {
            let _ = scratch.try_push(current);
        } else if !inside && current_distance >= 0.0 {
            let t = previous_distance / (previous_distance - current_distance);
            let mut crossing = previous + (current - previous) * t;
            crossing[axis] = position;
            let _ = scratch.try_push(crossing);
            let _ = scratch.try_push(current);
            inside = true;
        } else if inside && current_distance < 0.0 {
            let t = current_distance / (current_distance - previous_distance);
            let mut crossing = current + (previous - current) * t;
            crossing[axis] = position;
            let _ = scratch.try_push(crossing);
            inside = false;
        }

        previous = current;
        previous_distance = current_distance;
    }

    // Drop vertices that collapsed onto their predecessor
    polygon.clear();
    let count = scratch.len();
    for i in 0..count {
        let step: WorldVector = scratch[i] - scratch[(i + count - 1) % count];
        if step.norm() > ZERO_TOLERANCE {
            polygon.push(scratch[i]);
        }
    }
}
