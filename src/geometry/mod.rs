mod aabb;
mod ray_box_intersection;
mod ray_packet;
mod transform;
mod tri_accel;

pub use aabb::AABB;
pub use ray_packet::{OCTANT_COUNT, RayPacket};
pub use transform::Transform;
pub use tri_accel::{TriAccel, TriangleHit, TriangleHitPacket};

pub type WorldPoint = nalgebra::Point3<f32>;
pub type WorldVector = nalgebra::Vector3<f32>;
pub type WorldMatrix = nalgebra::Matrix4<f32>;
pub type WorldBox = AABB<WorldPoint>;
pub type TexturePoint = nalgebra::Point2<f32>;

/// Distance below which two clipped polygon vertices are considered the same.
pub const ZERO_TOLERANCE: f32 = 1e-6;

/// Slack allowed when accepting triangle hits at the boundary of a traversal cell.
pub const INTERSECT_EPSILON: f32 = 1e-4;

/// Axis aligned plane, `axis` is 0, 1 or 2.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SplitPlane {
    pub axis: usize,
    pub position: f32,
}

impl SplitPlane {
    pub fn new(axis: usize, position: f32) -> SplitPlane {
        debug_assert!(axis < 3);
        SplitPlane { axis, position }
    }
}

/// Index of the child visited first for a direction sign bit (0 = positive).
/// Near child is `left + sign`, far child is `left + (1 - sign)`.
pub fn octant_signs(octant: usize) -> [usize; 3] {
    [octant & 1, (octant >> 1) & 1, (octant >> 2) & 1]
}

#[derive(Copy, Clone, Debug)]
pub struct Ray {
    pub origin: WorldPoint,
    /// Direction of the ray, not necessarily normalized.
    /// Distances along the ray are measured in multiples of its length.
    pub direction: WorldVector,

    pub tnear: f32,
    pub tfar: f32,

    /// Componentwise inverse of the ray direction.
    /// Zeros turn into infinities of the same sign.
    pub inv_direction: WorldVector,
    /// 1 where the direction has its sign bit set, 0 otherwise
    pub dir_signs: [usize; 3],
}

impl Ray {
    pub fn new(origin: WorldPoint, direction: WorldVector) -> Ray {
        let mut ray = Ray {
            origin,
            direction,
            tnear: 0.0,
            tfar: f32::MAX,
            inv_direction: WorldVector::zeros(),
            dir_signs: [0; 3],
        };
        ray.update();
        ray
    }

    /// Recomputes the derived fields, must be called after changing the direction.
    pub fn update(&mut self) {
        self.inv_direction = self.direction.map(|x| 1.0 / x);
        self.dir_signs = std::array::from_fn(|i| self.direction[i].is_sign_negative() as usize);
    }

    pub fn point_at(&self, distance: f32) -> WorldPoint {
        self.origin + self.direction * distance
    }

    /// Octant index of the direction, bit `axis` set when negative along `axis`.
    pub fn octant(&self) -> usize {
        self.dir_signs[0] | (self.dir_signs[1] << 1) | (self.dir_signs[2] << 2)
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use assert2::assert;
    use proptest::prelude::*;
    use test_case::test_case;

    /// Helper macro that creates a wrapper around a type that implements Deref and Arbitrary
    macro_rules! arbitrary_wrapper {
        ( $wrapper_name:ident ( $type:ty ) -> $block:block ) => {
            #[derive(Clone, Debug)]
            pub struct $wrapper_name(pub $type);

            impl std::ops::Deref for $wrapper_name {
                type Target = $type;
                fn deref(&self) -> &$type {
                    &self.0
                }
            }

            impl Arbitrary for $wrapper_name {
                type Parameters = ();
                type Strategy = proptest::strategy::BoxedStrategy<Self>;
                fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
                    $block.prop_map(|x| $wrapper_name(x)).boxed()
                }
            }
        };
    }

    fn simple_float() -> BoxedStrategy<f32> {
        (-100_000i32..100_000).prop_map(|n| n as f32 * 1e-3).boxed()
    }

    arbitrary_wrapper! {
        NonzeroWorldVectorWrapper(WorldVector) -> {
            (simple_float(), simple_float(), simple_float())
                .prop_filter_map(
                    "vector is zero",
                    |coords| {
                        let vector = WorldVector::new(coords.0, coords.1, coords.2);
                        if vector.norm() < 1e-3 {
                            None
                        } else {
                            Some(vector)
                        }
                    })
        }
    }

    arbitrary_wrapper! {
        WorldPointWrapper(WorldPoint) -> {
            (simple_float(), simple_float(), simple_float())
                .prop_map(|coords| WorldPoint::new(coords.0, coords.1, coords.2))
        }
    }

    arbitrary_wrapper! {
        WorldBoxWrapper(WorldBox) -> {
            (simple_float(), simple_float(), simple_float(), 0.01f32..50.0, 0.01f32..50.0, 0.01f32..50.0)
                .prop_map(|(x, y, z, w, h, d)| {
                    let min = WorldPoint::new(x, y, z);
                    WorldBox::new(min, min + WorldVector::new(w, h, d))
                })
        }
    }

    #[test]
    fn update_computes_inverse_and_signs() {
        let ray = Ray::new(WorldPoint::origin(), WorldVector::new(2.0, -4.0, 0.5));
        assert!(ray.inv_direction == WorldVector::new(0.5, -0.25, 2.0));
        assert!(ray.dir_signs == [0, 1, 0]);
        assert!(ray.octant() == 2);
    }

    #[test_case(0.0, f32::INFINITY, 0 ; "positive_zero")]
    #[test_case(-0.0, f32::NEG_INFINITY, 1 ; "negative_zero")]
    fn zero_direction_component(component: f32, expected_inverse: f32, expected_sign: usize) {
        let ray = Ray::new(WorldPoint::origin(), WorldVector::new(component, 1.0, 1.0));
        assert!(ray.inv_direction.x == expected_inverse);
        assert!(ray.dir_signs[0] == expected_sign);
    }

    #[test]
    fn octant_signs_table() {
        for octant in 0..8 {
            let signs = octant_signs(octant);
            assert!(signs[0] | (signs[1] << 1) | (signs[2] << 2) == octant);
        }
    }
}
