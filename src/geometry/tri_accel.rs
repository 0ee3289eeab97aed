use wide::{CmpGe as _, CmpLe as _, CmpLt as _, f32x4, i32x4};

use super::{INTERSECT_EPSILON, Ray, RayPacket, WorldPoint};
use crate::util::simd::{IntLanes, Lanes, PACKET_GROUPS, move_mask, select_int, splat_lanes};

/// Precomputed triangle for the projected barycentric ray test.
///
/// The triangle is projected along its dominant normal axis `k` onto the remaining
/// `u`, `v` axes. Its plane is `x_k + n_u * x_u + n_v * x_v = n_d`, the two edge
/// equations give the barycentric coordinates of v1 and v2 directly.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TriAccel {
    k: usize,

    n_u: f32,
    n_v: f32,
    n_d: f32,

    b_nu: f32,
    b_nv: f32,
    b_d: f32,

    c_nu: f32,
    c_nv: f32,
    c_d: f32,

    triangle_id: u32,
}

/// Result of the single ray test.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TriangleHit {
    pub triangle: u32,
    /// Weights of the triangle's vertices v0, v1, v2 at the hit point.
    pub barycentric: [f32; 3],
    pub distance: f32,
}

impl Default for TriangleHit {
    fn default() -> Self {
        TriangleHit {
            triangle: u32::MAX,
            barycentric: [0.0; 3],
            distance: f32::MAX,
        }
    }
}

impl TriangleHit {
    pub fn is_hit(&self) -> bool {
        self.triangle != u32::MAX
    }
}

/// Closest hits of a packet, triangle id is -1 in lanes without a hit.
#[derive(Clone, Debug)]
pub struct TriangleHitPacket {
    pub triangle: IntLanes,
    pub barycentric: [Lanes; 3],
    pub distance: Lanes,
}

impl Default for TriangleHitPacket {
    fn default() -> Self {
        TriangleHitPacket {
            triangle: [i32x4::splat(-1); PACKET_GROUPS],
            barycentric: [splat_lanes(0.0); 3],
            distance: splat_lanes(f32::MAX),
        }
    }
}

#[inline(always)]
fn projection_axes(k: usize) -> (usize, usize) {
    ((k + 1) % 3, (k + 2) % 3)
}

impl TriAccel {
    pub fn new(v0: &WorldPoint, v1: &WorldPoint, v2: &WorldPoint, triangle_id: u32) -> TriAccel {
        let b = v2 - v0;
        let c = v1 - v0;
        let normal = c.cross(&b);

        let abs = normal.abs();
        let k = if abs.x > abs.y {
            if abs.x > abs.z { 0 } else { 2 }
        } else if abs.y > abs.z {
            1
        } else {
            2
        };
        let (u, v) = projection_axes(k);

        let inv_nk = 1.0 / normal[k];
        let inv_denominator = 1.0 / (b[u] * c[v] - b[v] * c[u]);

        TriAccel {
            k,
            n_u: normal[u] * inv_nk,
            n_v: normal[v] * inv_nk,
            n_d: v0.coords.dot(&(normal * inv_nk)),

            b_nu: -b[v] * inv_denominator,
            b_nv: b[u] * inv_denominator,
            b_d: (b[v] * v0[u] - b[u] * v0[v]) * inv_denominator,

            c_nu: c[v] * inv_denominator,
            c_nv: -c[u] * inv_denominator,
            c_d: (c[u] * v0[v] - c[v] * v0[u]) * inv_denominator,

            triangle_id,
        }
    }

    /// False for degenerate triangles, their coefficients are not finite.
    pub fn valid(&self) -> bool {
        [
            self.n_u, self.n_v, self.n_d, self.b_nu, self.b_nv, self.b_d, self.c_nu, self.c_nv,
            self.c_d,
        ]
        .iter()
        .all(|x| x.is_finite())
    }

    pub fn triangle_id(&self) -> u32 {
        self.triangle_id
    }

    /// Tests the ray against the triangle, replacing `best` if the hit is closer.
    /// Hits are accepted within `INTERSECT_EPSILON` of the ray's interval.
    #[inline]
    pub fn intersect(&self, ray: &Ray, best: &mut TriangleHit) -> bool {
        let (u, v) = projection_axes(self.k);
        let o = &ray.origin;
        let d = &ray.direction;

        let nd = 1.0 / (d[self.k] + self.n_u * d[u] + self.n_v * d[v]);
        let f = nd * (self.n_d - o[self.k] - self.n_u * o[u] - self.n_v * o[v]);

        // Written as positive conditions so that NaN rejects
        if !(f < best.distance
            && f >= ray.tnear - INTERSECT_EPSILON
            && f <= ray.tfar + INTERSECT_EPSILON)
        {
            return false;
        }

        let hu = o[u] + f * d[u];
        let hv = o[v] + f * d[v];

        let lambda = hu * self.b_nu + hv * self.b_nv + self.b_d;
        if !(lambda >= 0.0) {
            return false;
        }
        let mu = hu * self.c_nu + hv * self.c_nv + self.c_d;
        if !(mu >= 0.0) {
            return false;
        }
        let psi = 1.0 - lambda - mu;
        if !(psi >= 0.0) {
            return false;
        }

        *best = TriangleHit {
            triangle: self.triangle_id,
            barycentric: [psi, lambda, mu],
            distance: f,
        };
        true
    }

    /// Tests all `active` rays of the packet against the triangle, improving `best`
    /// lane by lane. Returns the lanes that were updated.
    pub fn intersect_packet(
        &self,
        packet: &RayPacket,
        active: &Lanes,
        best: &mut TriangleHitPacket,
    ) -> Lanes {
        let (u, v) = projection_axes(self.k);
        let splat = f32x4::splat;
        let zero = f32x4::ZERO;
        let epsilon = splat(INTERSECT_EPSILON);

        std::array::from_fn(|group| {
            if move_mask(active[group]) == 0 {
                return zero;
            }

            let o = |axis: usize| packet.origin[axis][group];
            let d = |axis: usize| packet.direction[axis][group];

            let nd = f32x4::ONE / (d(self.k) + splat(self.n_u) * d(u) + splat(self.n_v) * d(v));
            let f = nd
                * (splat(self.n_d) - o(self.k) - splat(self.n_u) * o(u) - splat(self.n_v) * o(v));

            let mut mask = active[group]
                & f.cmp_lt(best.distance[group])
                & f.cmp_ge(packet.tnear[group] - epsilon)
                & f.cmp_le(packet.tfar[group] + epsilon);
            if move_mask(mask) == 0 {
                return zero;
            }

            let hu = o(u) + f * d(u);
            let hv = o(v) + f * d(v);

            let lambda = hu * splat(self.b_nu) + hv * splat(self.b_nv) + splat(self.b_d);
            mask = mask & lambda.cmp_ge(zero);
            let mu = hu * splat(self.c_nu) + hv * splat(self.c_nv) + splat(self.c_d);
            mask = mask & mu.cmp_ge(zero);
            let psi = f32x4::ONE - lambda - mu;
            mask = mask & psi.cmp_ge(zero);
            if move_mask(mask) == 0 {
                return zero;
            }

            best.distance[group] = mask.blend(f, best.distance[group]);
            best.triangle[group] = select_int(
                mask,
                i32x4::splat(self.triangle_id as i32),
                best.triangle[group],
            );
            for (coordinate, value) in best.barycentric.iter_mut().zip([psi, lambda, mu]) {
                coordinate[group] = mask.blend(value, coordinate[group]);
            }

            mask
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{WorldVector, test::WorldPointWrapper};
    use crate::util::simd::{FULL_PACKET_MASK, PACKET_SIZE, int_lane, lane, packet_mask_to_lanes};
    use assert2::{assert, check};
    use proptest::prop_assume;
    use test_strategy::proptest;

    fn unit_triangle() -> [WorldPoint; 3] {
        [
            WorldPoint::new(0.0, 0.0, 0.0),
            WorldPoint::new(1.0, 0.0, 0.0),
            WorldPoint::new(0.0, 1.0, 0.0),
        ]
    }

    fn accel(t: &[WorldPoint; 3]) -> TriAccel {
        TriAccel::new(&t[0], &t[1], &t[2], 7)
    }

    #[test]
    fn dominant_axis() {
        let t = unit_triangle();
        assert!(accel(&t).k == 2);
        let rotated = t.map(|p| WorldPoint::new(p.z, p.x, p.y));
        assert!(accel(&rotated).k == 0);
    }

    #[test]
    fn degenerate_triangles_are_invalid() {
        let p = WorldPoint::new(1.0, 2.0, 3.0);
        let q = WorldPoint::new(2.0, 4.0, 6.0);
        let r = WorldPoint::new(3.0, 6.0, 9.0);
        assert!(!TriAccel::new(&p, &q, &r, 0).valid());
        assert!(!TriAccel::new(&p, &p, &q, 0).valid());
        assert!(accel(&unit_triangle()).valid());
    }

    #[test]
    fn barycentric_coordinates_match_vertices() {
        let t = unit_triangle();
        let a = accel(&t);
        for (i, vertex) in t.iter().enumerate() {
            let target = vertex + (WorldPoint::new(0.25, 0.25, 0.0) - vertex) * 0.01;
            let ray = Ray::new(target + WorldVector::z(), -WorldVector::z());
            let mut hit = TriangleHit::default();
            assert!(a.intersect(&ray, &mut hit));
            assert!(hit.barycentric[i] > 0.9);
        }
    }

    #[test]
    fn misses() {
        let a = accel(&unit_triangle());
        let mut hit = TriangleHit::default();

        let outside = Ray::new(WorldPoint::new(0.8, 0.8, 1.0), -WorldVector::z());
        check!(!a.intersect(&outside, &mut hit));

        let behind = Ray::new(WorldPoint::new(0.2, 0.2, 1.0), WorldVector::z());
        check!(!a.intersect(&behind, &mut hit));

        let parallel = Ray::new(WorldPoint::new(0.2, 0.2, 1.0), WorldVector::x());
        check!(!a.intersect(&parallel, &mut hit));

        let mut short = Ray::new(WorldPoint::new(0.2, 0.2, 1.0), -WorldVector::z());
        short.tfar = 0.5;
        check!(!a.intersect(&short, &mut hit));

        assert!(!hit.is_hit());
    }

    #[test]
    fn only_closer_hits_replace_best() {
        let a = accel(&unit_triangle());
        let ray = Ray::new(WorldPoint::new(0.2, 0.2, 2.0), -WorldVector::z());

        let mut hit = TriangleHit {
            distance: 1.5,
            ..TriangleHit::default()
        };
        assert!(!a.intersect(&ray, &mut hit));

        hit.distance = 2.5;
        assert!(a.intersect(&ray, &mut hit));
        assert!(hit.distance == 2.0);
        assert!(hit.triangle == 7);
    }

    #[proptest]
    fn centroid_round_trip(a: WorldPointWrapper, b: WorldPointWrapper, c: WorldPointWrapper) {
        let triangle = [*a, *b, *c];
        let normal = (triangle[1] - triangle[0]).cross(&(triangle[2] - triangle[0]));
        let area = normal.norm();
        let longest_edge = (0..3)
            .map(|i| (triangle[(i + 1) % 3] - triangle[i]).norm())
            .fold(0.0, f32::max);
        // Slivers have too imprecise coefficients for tight bounds
        prop_assume!(area > 1e-2 * longest_edge * longest_edge && area > 1e-3);

        let accel = TriAccel::new(&triangle[0], &triangle[1], &triangle[2], 1);
        assert!(accel.valid());

        let centroid = WorldPoint::from((a.coords + b.coords + c.coords) / 3.0);
        let unit_normal = normal / area;
        let ray = Ray::new(centroid + unit_normal, -unit_normal);

        let mut hit = TriangleHit::default();
        assert!(accel.intersect(&ray, &mut hit));
        assert!((hit.distance - 1.0).abs() < 1e-3);
        assert!((hit.barycentric.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        for coordinate in hit.barycentric {
            assert!(coordinate >= 0.0);
            assert!((coordinate - 1.0 / 3.0).abs() < 1e-2);
        }
    }

    #[test]
    fn packet_matches_single_rays() {
        let a = accel(&unit_triangle());
        let rays: [Ray; PACKET_SIZE] = std::array::from_fn(|i| {
            let x = (i % 4) as f32 * 0.3 - 0.1;
            let y = (i / 4) as f32 * 0.3 - 0.1;
            Ray::new(WorldPoint::new(x, y, 3.0), WorldVector::new(0.01 * i as f32, 0.0, -1.0))
        });
        let packet = RayPacket::from_rays(&rays);

        let mut best = TriangleHitPacket::default();
        let active = packet_mask_to_lanes(FULL_PACKET_MASK);
        a.intersect_packet(&packet, &active, &mut best);

        for (i, ray) in rays.iter().enumerate() {
            let mut hit = TriangleHit::default();
            if a.intersect(ray, &mut hit) {
                assert!(int_lane(&best.triangle, i) == 7);
                assert!(lane(&best.distance, i) == hit.distance);
                for (coordinate, expected) in best.barycentric.iter().zip(hit.barycentric) {
                    assert!(lane(coordinate, i) == expected);
                }
            } else {
                assert!(int_lane(&best.triangle, i) == -1);
                assert!(lane(&best.distance, i) == f32::MAX);
            }
        }
    }

    #[test]
    fn inactive_lanes_are_untouched() {
        let a = accel(&unit_triangle());
        let rays = [Ray::new(WorldPoint::new(0.2, 0.2, 1.0), -WorldVector::z()); PACKET_SIZE];
        let packet = RayPacket::from_rays(&rays);

        let mut best = TriangleHitPacket::default();
        let updated = a.intersect_packet(&packet, &packet_mask_to_lanes(0x00F0), &mut best);

        assert!(crate::util::simd::lanes_to_packet_mask(&updated) == 0x00F0);
        for i in 0..PACKET_SIZE {
            let expected = if (4..8).contains(&i) { 7 } else { -1 };
            assert!(int_lane(&best.triangle, i) == expected);
        }
    }
}
