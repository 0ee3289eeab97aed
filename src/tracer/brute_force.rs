//! Reference queries that skip both trees and test every triangle of every instance.

use crate::{
    geometry::{Ray, TriangleHit},
    shading::RayState,
};

use super::{Hit, Tracer};

impl Tracer<'_> {
    /// Closest hit along the ray's interval, by testing every triangle.
    pub fn closest_hit_brute_force(&mut self, ray: &Ray) -> Option<Hit> {
        let scene = self.scene;
        let mut best = TriangleHit::default();
        let mut best_instance = None;

        for (instance_idx, instance) in scene.instances().iter_enumerated() {
            let local = instance.transform().inverse_transform_ray(ray);
            let geometry = scene.geometry(instance.geometry());
            for accel in &geometry.tri_accel {
                self.counters.triangle_tests += 1;
                if accel.intersect(&local, &mut best) {
                    best_instance = Some(instance_idx);
                }
            }
        }

        best_instance.map(|instance_idx| Hit::new(&best, instance_idx, scene.instance(instance_idx).geometry()))
    }

    pub fn any_hit_brute_force(&mut self, ray: &Ray) -> bool {
        let scene = self.scene;
        for instance in scene.instances() {
            let local = instance.transform().inverse_transform_ray(ray);
            for accel in &scene.geometry(instance.geometry()).tri_accel {
                self.counters.triangle_tests += 1;
                if accel.intersect(&local, &mut TriangleHit::default()) {
                    return true;
                }
            }
        }
        false
    }

    /// `trace_single` without the acceleration structures.
    pub fn trace_brute_force(&mut self, state: &mut RayState) {
        state.ray.tnear = self.scene.settings.ray_epsilon;
        state.ray.tfar = f32::MAX;
        state.hit = self.closest_hit_brute_force(&state.ray);
        self.shade(state);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{WorldMatrix, WorldPoint, WorldVector};
    use crate::scene::{InstanceIdx, Scene};
    use crate::test_fixtures;

    use assert2::{assert, check, let_assert};

    fn two_cubes() -> Scene {
        let mut scene = Scene::new();
        let (vertices, triangles) = test_fixtures::cube_mesh();
        let geometry = scene
            .add_geometry(test_fixtures::geometry_from_mesh(&vertices, &triangles))
            .unwrap();
        scene.instantiate(geometry, WorldMatrix::identity()).unwrap();
        scene
            .instantiate(geometry, WorldMatrix::new_translation(&WorldVector::new(0.0, 0.0, -3.0)))
            .unwrap();
        scene.prepare_frame();
        scene
    }

    #[test]
    fn closest_of_all_instances() {
        let scene = two_cubes();
        let mut tracer = Tracer::new(&scene);

        let ray = Ray::new(WorldPoint::new(0.1, 0.2, 5.0), -WorldVector::z());
        let_assert!(Some(hit) = tracer.closest_hit_brute_force(&ray));
        assert!(hit.instance == InstanceIdx::from_raw(0));
        check!((hit.distance - 4.5).abs() < 1e-4);
        check!((hit.barycentric.iter().sum::<f32>() - 1.0).abs() < 1e-5);

        let ray = Ray::new(WorldPoint::new(0.1, 0.2, -10.0), WorldVector::z());
        let_assert!(Some(hit) = tracer.closest_hit_brute_force(&ray));
        assert!(hit.instance == InstanceIdx::from_raw(1));
        check!((hit.distance - 6.5).abs() < 1e-4);
    }

    #[test]
    fn tests_every_triangle() {
        let scene = two_cubes();
        let mut tracer = Tracer::new(&scene);
        let ray = Ray::new(WorldPoint::new(5.0, 5.0, 5.0), WorldVector::x());
        assert!(tracer.closest_hit_brute_force(&ray).is_none());
        assert!(tracer.counters().triangle_tests == 24);
    }

    #[test]
    fn any_hit_stops_at_tfar() {
        let scene = two_cubes();
        let mut tracer = Tracer::new(&scene);
        let mut ray = Ray::new(WorldPoint::new(0.1, 0.2, 5.0), -WorldVector::z());
        assert!(tracer.any_hit_brute_force(&ray));
        ray.tfar = 4.0;
        assert!(!tracer.any_hit_brute_force(&ray));
    }

    #[test]
    fn trace_brute_force_matches_trace_single() {
        let scene = two_cubes();
        let mut tracer = Tracer::new(&scene);
        let ray = Ray::new(WorldPoint::new(0.3, -0.2, 5.0), WorldVector::new(0.0, 0.0, -2.0));

        let mut brute = RayState::new(ray);
        tracer.trace_brute_force(&mut brute);
        let mut tree = RayState::new(ray);
        tracer.trace_single(&mut tree);

        let_assert!(Some(brute_hit) = brute.hit);
        let_assert!(Some(tree_hit) = tree.hit);
        assert!(brute_hit.triangle == tree_hit.triangle);
        check!((brute_hit.distance - 2.25).abs() < 1e-4);
        check!((brute_hit.distance - tree_hit.distance).abs() < 1e-5);
    }
}
