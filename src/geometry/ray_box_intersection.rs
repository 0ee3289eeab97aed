use wide::{CmpLe as _, f32x4};

use super::{Ray, RayPacket, WorldBox};
use crate::util::simd::{Lanes, PACKET_GROUPS};

impl WorldBox {
    /// Clips the ray's `[tnear, tfar]` interval to the box with a slab test.
    /// Returns false and leaves the ray untouched if the interval becomes empty
    /// or the box is degenerate.
    ///
    /// A slab distance is NaN if the ray lies in the slab's bounding plane and is parallel
    /// to it, such slabs don't restrict the interval.
    pub fn clip_ray(&self, ray: &mut Ray) -> bool {
        if self.is_degenerate() {
            return false;
        }

        let mut near = ray.tnear;
        let mut far = ray.tfar;

        for axis in 0..3 {
            let mut slab_near = (self.min[axis] - ray.origin[axis]) * ray.inv_direction[axis];
            let mut slab_far = (self.max[axis] - ray.origin[axis]) * ray.inv_direction[axis];

            if slab_near > slab_far {
                std::mem::swap(&mut slab_near, &mut slab_far);
            }
            if slab_near.is_nan() || slab_far.is_nan() {
                continue;
            }

            near = near.max(slab_near);
            far = far.min(slab_far);
        }

        if near > far {
            return false;
        }

        ray.tnear = near;
        ray.tfar = far;
        true
    }

    /// Branch free variant of `clip_ray`.
    /// NaN slab distances are filtered by the order of min/max operands.
    pub fn clip_ray_branchless(&self, ray: &mut Ray) -> bool {
        if self.is_degenerate() {
            return false;
        }

        let mut near = ray.tnear;
        let mut far = ray.tfar;

        for axis in 0..3 {
            let l1 = (self.min[axis] - ray.origin[axis]) * ray.inv_direction[axis];
            let l2 = (self.max[axis] - ray.origin[axis]) * ray.inv_direction[axis];

            // f32::max/min return the non-NaN operand
            let slab_near = l1.max(f32::NEG_INFINITY).min(l2.max(f32::NEG_INFINITY));
            let slab_far = l1.min(f32::INFINITY).max(l2.min(f32::INFINITY));

            near = near.max(slab_near);
            far = far.min(slab_far);
        }

        let hit = near <= far;
        ray.tnear = if hit { near } else { ray.tnear };
        ray.tfar = if hit { far } else { ray.tfar };
        hit
    }

    /// SIMD variant of `clip_ray`, all three slabs at once.
    pub fn clip_ray_simd(&self, ray: &mut Ray) -> bool {
        if self.is_degenerate() {
            return false;
        }

        let to_lanes = |x: f32, y: f32, z: f32, pad: f32| f32x4::from([x, y, z, pad]);

        // The padding lane produces (-inf, +inf) and doesn't affect the reduction
        let box_min = to_lanes(self.min.x, self.min.y, self.min.z, f32::NEG_INFINITY);
        let box_max = to_lanes(self.max.x, self.max.y, self.max.z, f32::INFINITY);
        let origin = to_lanes(ray.origin.x, ray.origin.y, ray.origin.z, 0.0);
        let inv_direction = to_lanes(
            ray.inv_direction.x,
            ray.inv_direction.y,
            ray.inv_direction.z,
            1.0,
        );

        let l1 = (box_min - origin) * inv_direction;
        let l2 = (box_max - origin) * inv_direction;

        // `min` and `max` of wide pick the non-NaN operand
        let plus_inf = f32x4::splat(f32::INFINITY);
        let minus_inf = f32x4::splat(f32::NEG_INFINITY);
        let slab_far = l1.min(plus_inf).max(l2.min(plus_inf));
        let slab_near = l1.max(minus_inf).min(l2.max(minus_inf));

        let near = slab_near
            .to_array()
            .into_iter()
            .fold(ray.tnear, |acc, x| acc.max(x));
        let far = slab_far
            .to_array()
            .into_iter()
            .fold(ray.tfar, |acc, x| acc.min(x));

        if near > far {
            return false;
        }
        ray.tnear = near;
        ray.tfar = far;
        true
    }

    /// Clips every active ray of a packet against the box.
    ///
    /// All active rays must share the direction octant given by `dir_signs`, which selects
    /// the near and far slab planes. Intervals of inactive lanes are left untouched.
    /// Returns the lanes that remain active (non-empty interval).
    pub fn clip_packet(&self, packet: &mut RayPacket, dir_signs: &[usize; 3], active: &Lanes) -> Lanes {
        let corners = [self.min, self.max];

        std::array::from_fn::<f32x4, PACKET_GROUPS, _>(|group| {
            let mut near = packet.tnear[group];
            let mut far = packet.tfar[group];

            for (axis, sign) in dir_signs.iter().enumerate() {
                let near_plane = f32x4::splat(corners[*sign][axis]);
                let far_plane = f32x4::splat(corners[1 - *sign][axis]);
                let origin = packet.origin[axis][group];
                let inv_direction = packet.inv_direction[axis][group];

                // Slab distance first, a NaN there selects the running value
                near = ((near_plane - origin) * inv_direction).max(near);
                far = ((far_plane - origin) * inv_direction).min(far);
            }

            let mask = active[group];
            packet.tnear[group] = mask.blend(near, packet.tnear[group]);
            packet.tfar[group] = mask.blend(far, packet.tfar[group]);

            mask & near.cmp_le(far)
        })
    }
}
