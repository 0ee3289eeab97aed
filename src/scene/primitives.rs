//! Procedural shapes assembled through a `GeometryBuilder`.

use std::f32::consts::{PI, TAU};
use std::sync::Arc;

use itertools::iproduct;

use super::{GeometryBuilder, PrimitiveKind, Scene, SceneError};
use crate::{
    geometry::{WorldMatrix, WorldPoint, WorldVector},
    kd_tree::BuildSettings,
    shading::{LambertMaterial, PhongMaterial, PointLight, SingleColorEnvironment},
    util::Color,
};

/// Appends a UV sphere with `segments` slices around the z axis and `rings` stacks
/// between the poles. Vertices carry the exact sphere normals.
pub fn sphere(builder: &mut GeometryBuilder, center: WorldPoint, radius: f32, segments: u32, rings: u32) {
    assert!(radius > 0.0);
    assert!(segments >= 3);
    assert!(rings >= 2);

    let direction = |ring: u32, segment: u32| {
        let theta = PI * ring as f32 / rings as f32;
        let phi = TAU * (segment % segments) as f32 / segments as f32;
        WorldVector::new(theta.sin() * phi.cos(), theta.sin() * phi.sin(), theta.cos())
    };

    builder.begin(PrimitiveKind::Triangles);
    for ring in 0..rings {
        for segment in 0..segments {
            let a = direction(ring, segment);
            let b = direction(ring + 1, segment);
            let c = direction(ring + 1, segment + 1);
            let d = direction(ring, segment + 1);

            // Triangles touching a pole collapse to a single one
            let mut triangles = arrayvec::ArrayVec::<[WorldVector; 3], 2>::new();
            if ring + 1 < rings {
                triangles.push([a, b, c]);
            }
            if ring > 0 {
                triangles.push([a, c, d]);
            }
            for normal in triangles.into_iter().flatten() {
                builder.normal(normal).vertex(center + normal * radius);
            }
        }
    }
    builder.end();
}

/// Appends a parallelogram with corners `corner`, `corner + u`, `corner + v` and `corner + u + v`,
/// facing along `u × v`.
pub fn quad(builder: &mut GeometryBuilder, corner: WorldPoint, u: WorldVector, v: WorldVector) {
    builder
        .normal(u.cross(&v).normalize())
        .begin(PrimitiveKind::TriangleStrip)
        .vertex(corner)
        .vertex(corner + u)
        .vertex(corner + v)
        .vertex(corner + u + v)
        .end();
}

/// Prepared scene with a `count` by `count` grid of reflective unit spheres standing on a floor,
/// lit by a single point light. All spheres are instances of one geometry.
pub fn demo_spheres(count: u32, settings: &BuildSettings) -> Result<Scene, SceneError> {
    assert!(count > 0);
    let spacing = 3.0;
    let extent = spacing * count as f32;

    let mut scene = Scene::new();
    scene.build_settings = settings.clone();
    scene.set_environment(Arc::new(SingleColorEnvironment {
        color: Color::new(0.4, 0.6, 0.9),
    }));
    let sphere_material = scene.add_material(Arc::new(PhongMaterial::builder().reflectivity(0.3).build()));
    let floor_material = scene.add_material(Arc::new(LambertMaterial::default()));

    let mut builder = GeometryBuilder::new();
    builder.material(sphere_material).color(Color::new(0.9, 0.4, 0.2));
    sphere(&mut builder, WorldPoint::origin(), 1.0, 32, 16);
    let sphere_geometry = scene.add_geometry(builder.build(settings))?;

    let mut builder = GeometryBuilder::new();
    builder.material(floor_material).color(Color::new(0.8, 0.8, 0.8));
    quad(
        &mut builder,
        WorldPoint::new(-extent, -1.0, extent),
        WorldVector::x() * (2.0 * extent),
        WorldVector::z() * (-2.0 * extent),
    );
    let floor_geometry = scene.add_geometry(builder.build(settings))?;
    scene.instantiate(floor_geometry, WorldMatrix::identity())?;

    let offset = spacing * (count - 1) as f32 / 2.0;
    for (i, j) in iproduct!(0..count, 0..count) {
        let position = WorldVector::new(spacing * i as f32 - offset, 0.0, spacing * j as f32 - offset);
        scene.instantiate(sphere_geometry, WorldMatrix::new_translation(&position))?;
    }

    scene.add_light(Arc::new(
        PointLight::builder()
            .position(WorldPoint::new(extent / 2.0, extent, extent))
            .attenuation([1.0, 0.0, 0.0])
            .build(),
    ));
    scene.prepare_frame();
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Ray, WorldMatrix};
    use crate::kd_tree::BuildSettings;
    use crate::scene::Scene;
    use crate::tracer::Tracer;

    use assert2::{assert, check, let_assert};
    use test_case::test_case;

    fn sphere_scene(center: WorldPoint, radius: f32) -> Scene {
        let mut builder = GeometryBuilder::new();
        sphere(&mut builder, center, radius, 32, 16);
        let mut scene = Scene::new();
        let geometry = scene.add_geometry(builder.build(&BuildSettings::default())).unwrap();
        scene.instantiate(geometry, WorldMatrix::identity()).unwrap();
        scene.prepare_frame();
        scene
    }

    #[test_case(3, 2)]
    #[test_case(8, 5)]
    #[test_case(32, 16)]
    fn sphere_triangle_count(segments: u32, rings: u32) {
        let mut builder = GeometryBuilder::new();
        sphere(&mut builder, WorldPoint::origin(), 1.0, segments, rings);
        assert!(builder.triangle_count() == (segments * (2 * rings - 2)) as usize);
    }

    #[test]
    fn sphere_vertices_on_surface() {
        let center = WorldPoint::new(1.0, 2.0, 3.0);
        let mut builder = GeometryBuilder::new();
        sphere(&mut builder, center, 2.0, 12, 6);
        let geometry = builder.build(&BuildSettings::default());

        for (vertex, normal) in geometry.vertices.iter().zip(&geometry.normals) {
            check!(((vertex - center).norm() - 2.0).abs() < 1e-5);
            check!((vertex - center - normal * 2.0).norm() < 1e-5);
        }
    }

    #[test]
    fn direct_hit_through_center() {
        let scene = sphere_scene(WorldPoint::new(1.0, 2.0, 3.0), 1.0);
        let mut tracer = Tracer::new(&scene);
        // Just off the pole vertex
        let ray = Ray::new(WorldPoint::new(1.05, 2.03, 0.0), WorldVector::z());

        let_assert!(Some(hit) = tracer.closest_hit(&ray));
        // Tessellated surface is slightly inside the sphere
        check!(hit.distance > 2.001);
        check!(hit.distance < 2.01);
    }

    #[test]
    fn ray_passing_by() {
        let scene = sphere_scene(WorldPoint::new(1.0, 2.0, 3.0), 1.0);
        let mut tracer = Tracer::new(&scene);
        let ray = Ray::new(WorldPoint::new(2.5, 2.0, 0.0), WorldVector::z());
        assert!(tracer.closest_hit(&ray).is_none());
    }

    #[test]
    fn demo_scene_instances() {
        let scene = demo_spheres(3, &BuildSettings::default()).unwrap();
        assert!(!scene.is_dirty());
        assert!(scene.geometries().len() == 2);
        assert!(scene.instances().len() == 10);
        assert!(scene.lights().len() == 1);

        // Straight down onto the middle sphere
        let mut tracer = Tracer::new(&scene);
        let ray = Ray::new(WorldPoint::new(0.02, 10.0, 0.03), -WorldVector::y());
        let_assert!(Some(hit) = tracer.closest_hit(&ray));
        assert!(hit.geometry == scene.instance(hit.instance).geometry());
        check!((hit.distance - 9.0).abs() < 0.01);
    }

    #[test]
    fn quad_faces_cross_product() {
        let mut builder = GeometryBuilder::new();
        quad(&mut builder, WorldPoint::new(-1.0, 0.0, -1.0), WorldVector::z() * 2.0, WorldVector::x() * 2.0);
        let geometry = builder.build(&BuildSettings::default());

        assert!(geometry.triangle_count() == 2);
        assert!(geometry.normals.iter().all(|n| (n - WorldVector::y()).norm() < 1e-6));
        check!(geometry.bounds().min == WorldPoint::new(-1.0, 0.0, -1.0));
        check!(geometry.bounds().max == WorldPoint::new(1.0, 0.0, 1.0));
    }
}
