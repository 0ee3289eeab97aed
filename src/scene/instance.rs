use crate::geometry::{Transform, WorldBox};

use super::GeometryIdx;

/// Placement of a geometry in the world.
#[derive(Clone, Debug)]
pub struct Instance {
    geometry: GeometryIdx,
    transform: Transform,
    /// World space box, slightly inflated
    bounds: WorldBox,
}

impl Instance {
    pub(super) fn new(geometry: GeometryIdx, transform: Transform, geometry_bounds: &WorldBox) -> Instance {
        let bounds = world_bounds(&transform, geometry_bounds);
        Instance {
            geometry,
            transform,
            bounds,
        }
    }

    pub fn geometry(&self) -> GeometryIdx {
        self.geometry
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn bounds(&self) -> &WorldBox {
        &self.bounds
    }

    pub(super) fn set_transform(&mut self, transform: Transform, geometry_bounds: &WorldBox) {
        self.bounds = world_bounds(&transform, geometry_bounds);
        self.transform = transform;
    }

    pub(super) fn update_bounds(&mut self, geometry_bounds: &WorldBox) {
        self.bounds = world_bounds(&self.transform, geometry_bounds);
    }
}

/// Box around the transformed corners of the object space box.
/// Empty geometries keep a degenerate box.
fn world_bounds(transform: &Transform, geometry_bounds: &WorldBox) -> WorldBox {
    if geometry_bounds.is_degenerate() {
        return WorldBox::degenerate();
    }
    let corners = geometry_bounds.corners().map(|p| transform.transform_point(&p));
    let mut bounds = WorldBox::build_from(&corners);
    inflate(&mut bounds);
    bounds
}

/// Grows the box by roughly 11% of each coordinate's magnitude, away from the origin
/// on the outer side and towards it on the inner side.
fn inflate(bounds: &mut WorldBox) {
    for axis in 0..3 {
        let min = bounds.min[axis];
        let max = bounds.max[axis];
        bounds.min[axis] = min * if min < 0.0 { 1.111 } else { 0.999 };
        bounds.max[axis] = max * if max < 0.0 { 0.999 } else { 1.111 };
    }
}
