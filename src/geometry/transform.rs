use nalgebra::Matrix3;
use wide::f32x4;

use super::{Ray, RayPacket, WorldMatrix, WorldPoint, WorldVector};
use crate::util::simd::PACKET_GROUPS;

/// Affine object to world transform with its precomputed inverse.
///
/// Points and vectors are transformed with explicitly ordered arithmetic, so that the
/// single ray and the packet path produce bit identical rays.
#[derive(Clone, Debug, PartialEq)]
pub struct Transform {
    matrix: WorldMatrix,
    inverse: WorldMatrix,
    inverse_transpose: Matrix3<f32>,
}

impl Transform {
    /// Returns None if the matrix is not invertible.
    pub fn new(matrix: WorldMatrix) -> Option<Transform> {
        let inverse = matrix.try_inverse()?;
        if inverse.iter().any(|x| !x.is_finite()) {
            return None;
        }
        let inverse_transpose = inverse.fixed_view::<3, 3>(0, 0).transpose();
        Some(Transform {
            matrix,
            inverse,
            inverse_transpose,
        })
    }

    pub fn identity() -> Transform {
        Transform {
            matrix: WorldMatrix::identity(),
            inverse: WorldMatrix::identity(),
            inverse_transpose: Matrix3::identity(),
        }
    }

    pub fn matrix(&self) -> &WorldMatrix {
        &self.matrix
    }

    pub fn transform_point(&self, p: &WorldPoint) -> WorldPoint {
        affine_point(&self.matrix, p)
    }

    pub fn transform_vector(&self, v: &WorldVector) -> WorldVector {
        linear_vector(&self.matrix, v)
    }

    /// Object space normal to world space, normalized.
    pub fn transform_normal(&self, n: &WorldVector) -> WorldVector {
        (self.inverse_transpose * n).normalize()
    }

    pub fn inverse_transform_point(&self, p: &WorldPoint) -> WorldPoint {
        affine_point(&self.inverse, p)
    }

    pub fn inverse_transform_vector(&self, v: &WorldVector) -> WorldVector {
        linear_vector(&self.inverse, v)
    }

    /// World space ray to object space.
    /// The direction is not normalized, so distances stay comparable between spaces.
    pub fn inverse_transform_ray(&self, ray: &Ray) -> Ray {
        let mut ret = *ray;
        ret.origin = self.inverse_transform_point(&ray.origin);
        ret.direction = self.inverse_transform_vector(&ray.direction);
        ret.update();
        ret
    }

    /// World space packet to object space, same arithmetic as `inverse_transform_ray`.
    pub fn inverse_transform_packet(&self, packet: &RayPacket) -> RayPacket {
        let m = &self.inverse;
        let row = |i: usize, j: usize| f32x4::splat(m[(i, j)]);

        let mut ret = packet.clone();
        for group in 0..PACKET_GROUPS {
            let o = |axis: usize| packet.origin[axis][group];
            let d = |axis: usize| packet.direction[axis][group];
            for i in 0..3 {
                ret.origin[i][group] =
                    row(i, 0) * o(0) + row(i, 1) * o(1) + row(i, 2) * o(2) + row(i, 3);
                ret.direction[i][group] = row(i, 0) * d(0) + row(i, 1) * d(1) + row(i, 2) * d(2);
            }
        }
        ret.update();
        ret
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::identity()
    }
}

fn affine_point(m: &WorldMatrix, p: &WorldPoint) -> WorldPoint {
    WorldPoint::from(std::array::from_fn::<f32, 3, _>(|i| {
        m[(i, 0)] * p.x + m[(i, 1)] * p.y + m[(i, 2)] * p.z + m[(i, 3)]
    }))
}

fn linear_vector(m: &WorldMatrix, v: &WorldVector) -> WorldVector {
    WorldVector::from(std::array::from_fn::<f32, 3, _>(|i| {
        m[(i, 0)] * v.x + m[(i, 1)] * v.y + m[(i, 2)] * v.z
    }))
}
