use wide::f32x4;

use super::{Ray, WorldPoint, WorldVector};
use crate::util::simd::{
    FULL_PACKET_MASK, Lanes, PACKET_GROUPS, PACKET_SIZE, PacketMask, SIMD_WIDTH, lane, move_mask,
    set_lane, splat_lanes,
};

pub const OCTANT_COUNT: usize = 8;

/// 16 rays in structure of arrays layout, 4 SIMD groups of 4 lanes.
#[derive(Clone, Debug)]
pub struct RayPacket {
    pub origin: [Lanes; 3],
    pub direction: [Lanes; 3],
    pub inv_direction: [Lanes; 3],

    pub tnear: Lanes,
    pub tfar: Lanes,

    /// Rays that take part in the trace.
    pub mask: PacketMask,

    /// Direction sign bits of each ray, one mask per axis.
    pub sign_masks: [PacketMask; 3],
}

impl Default for RayPacket {
    fn default() -> Self {
        RayPacket {
            origin: [splat_lanes(0.0); 3],
            direction: [splat_lanes(0.0); 3],
            inv_direction: [splat_lanes(0.0); 3],
            tnear: splat_lanes(0.0),
            tfar: splat_lanes(f32::MAX),
            mask: 0,
            sign_masks: [0; 3],
        }
    }
}

impl RayPacket {
    /// Packet from 16 individual rays, all of them active.
    pub fn from_rays(rays: &[Ray; PACKET_SIZE]) -> RayPacket {
        let mut packet = RayPacket::default();
        for (i, ray) in rays.iter().enumerate() {
            packet.set_ray(i, ray);
        }
        packet.mask = FULL_PACKET_MASK;
        packet.update();
        packet
    }

    /// Writes origin, direction and interval of a single ray.
    /// Derived fields need `update()` afterwards.
    pub fn set_ray(&mut self, index: usize, ray: &Ray) {
        for axis in 0..3 {
            set_lane(&mut self.origin[axis], index, ray.origin[axis]);
            set_lane(&mut self.direction[axis], index, ray.direction[axis]);
        }
        set_lane(&mut self.tnear, index, ray.tnear);
        set_lane(&mut self.tfar, index, ray.tfar);
    }

    /// Extracts a single ray, including its current interval.
    pub fn ray(&self, index: usize) -> Ray {
        let mut ray = Ray::new(
            WorldPoint::new(
                lane(&self.origin[0], index),
                lane(&self.origin[1], index),
                lane(&self.origin[2], index),
            ),
            WorldVector::new(
                lane(&self.direction[0], index),
                lane(&self.direction[1], index),
                lane(&self.direction[2], index),
            ),
        );
        ray.tnear = lane(&self.tnear, index);
        ray.tfar = lane(&self.tfar, index);
        ray
    }

    /// Recomputes reciprocal directions and sign masks.
    pub fn update(&mut self) {
        for axis in 0..3 {
            let mut signs = 0u32;
            for group in 0..PACKET_GROUPS {
                let direction = self.direction[axis][group];
                self.inv_direction[axis][group] = f32x4::ONE / direction;
                signs |= move_mask(direction) << (group * SIMD_WIDTH);
            }
            self.sign_masks[axis] = signs as PacketMask;
        }
    }

    /// All 16 rays point into the same octant.
    pub fn is_coherent(&self) -> bool {
        self.sign_masks
            .iter()
            .all(|&m| m == 0 || m == FULL_PACKET_MASK)
    }

    /// Octant of a single ray, bit `axis` set when the direction is negative along it.
    pub fn ray_octant(&self, index: usize) -> usize {
        (0..3)
            .map(|axis| (((self.sign_masks[axis] >> index) & 1) as usize) << axis)
            .sum()
    }

    /// Splits the rays selected by `mask` by their octant.
    /// Entry `q` holds the rays of `mask` pointing into octant `q`.
    pub fn octant_masks(&self, mask: PacketMask) -> [PacketMask; OCTANT_COUNT] {
        std::array::from_fn(|octant| {
            (0..3).fold(mask, |acc, axis| {
                let signs = self.sign_masks[axis];
                if (octant >> axis) & 1 != 0 {
                    acc & signs
                } else {
                    acc & !signs
                }
            })
        })
    }
}
