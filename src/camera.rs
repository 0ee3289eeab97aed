use assert2::assert;
use bon::bon;
use nalgebra::Unit;
use wide::f32x4;

use crate::geometry::{Ray, RayPacket, WorldPoint, WorldVector};
use crate::screen_block::ScreenSize;
use crate::util::simd::{FULL_PACKET_MASK, Lanes, PACKET_GROUPS};

/// Source of primary rays.
/// Screen coordinates are in pixels, `(0, 0)` is the bottom left corner of the viewport.
pub trait Camera: Send + Sync {
    fn viewport(&self) -> ScreenSize;

    fn ray(&self, x: f32, y: f32) -> Ray;

    /// 16 rays at once, all of them active.
    fn ray_packet(&self, x: &Lanes, y: &Lanes) -> RayPacket;
}

#[derive(Copy, Clone, Debug)]
pub struct PerspectiveCamera {
    position: WorldPoint,
    viewport: ScreenSize,

    /// Direction towards the bottom left corner of the near plane.
    base: WorldVector,
    /// Near plane offset of one pixel along x and y.
    pixel_u: WorldVector,
    pixel_v: WorldVector,

    simd_position: [f32x4; 3],
    simd_base: [f32x4; 3],
    simd_pixel_u: [f32x4; 3],
    simd_pixel_v: [f32x4; 3],
}

#[bon]
impl PerspectiveCamera {
    #[builder]
    pub fn new(
        position: WorldPoint,
        look_at: WorldPoint,
        #[builder(default = WorldVector::y())] up: WorldVector,
        // Vertical field of view in degrees
        #[builder(default = 60.0)]
        fovy: f32,
        #[builder(default = 1.0)] near: f32,
        viewport: ScreenSize,
    ) -> Self {
        assert!(viewport.x > 0);
        assert!(viewport.y > 0);
        assert!(fovy > 0.0 && fovy < 180.0);
        assert!(near > 0.0);

        let axis_z = Unit::try_new(position - look_at, f32::EPSILON)
            .expect("Camera position and target must differ");
        let axis_x = Unit::try_new(up.cross(axis_z.as_ref()), f32::EPSILON)
            .expect("`up` and view direction must be linearly independent");
        let axis_y = axis_z.cross(axis_x.as_ref());

        let sy = near * (fovy.to_radians() / 2.0).tan();
        let sx = sy * viewport.x as f32 / viewport.y as f32;

        let base = -axis_x.as_ref() * sx - axis_y * sy - axis_z.as_ref() * near;
        let pixel_u = axis_x.as_ref() * (2.0 * sx / viewport.x as f32);
        let pixel_v = axis_y * (2.0 * sy / viewport.y as f32);

        let broadcast = |v: &WorldVector| -> [f32x4; 3] { std::array::from_fn(|axis| f32x4::splat(v[axis])) };

        PerspectiveCamera {
            position,
            viewport,
            base,
            pixel_u,
            pixel_v,
            simd_position: broadcast(&position.coords),
            simd_base: broadcast(&base),
            simd_pixel_u: broadcast(&pixel_u),
            simd_pixel_v: broadcast(&pixel_v),
        }
    }
}

impl Camera for PerspectiveCamera {
    fn viewport(&self) -> ScreenSize {
        self.viewport
    }

    fn ray(&self, x: f32, y: f32) -> Ray {
        Ray::new(self.position, self.base + self.pixel_u * x + self.pixel_v * y)
    }

    fn ray_packet(&self, x: &Lanes, y: &Lanes) -> RayPacket {
        let mut packet = RayPacket::default();
        for axis in 0..3 {
            packet.origin[axis] = [self.simd_position[axis]; PACKET_GROUPS];
            for group in 0..PACKET_GROUPS {
                packet.direction[axis][group] = self.simd_base[axis]
                    + self.simd_pixel_u[axis] * x[group]
                    + self.simd_pixel_v[axis] * y[group];
            }
        }
        packet.mask = FULL_PACKET_MASK;
        packet.update();
        packet
    }
}
