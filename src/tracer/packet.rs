use wide::{CmpGe as _, CmpLe as _, f32x4, i32x4};

use crate::{
    geometry::{RayPacket, octant_signs},
    kd_tree::KdTree,
    scene::InstanceIdx,
    shading::RayPacketState,
    util::simd::{
        FULL_PACKET_MASK, Lanes, PACKET_GROUPS, PacketMask, lanes_to_packet_mask, move_mask, packet_mask_to_lanes,
        select_int,
    },
};

use super::{HitPacket, PacketStackEntry, Tracer, push};

/// Packet version of the single ray descent.
///
/// A child is skipped only when no active ray needs it. When both are needed the back
/// child is pushed with the intervals behind the plane and the packet continues with
/// the intervals in front of it, dropping rays whose interval became empty.
fn find_leaf(
    tree: &KdTree,
    mut node_index: usize,
    packet: &mut RayPacket,
    signs: &[usize; 3],
    active: &mut Lanes,
    stack: &mut Vec<PacketStackEntry>,
) -> usize {
    loop {
        let node = tree.node(node_index);
        if node.is_leaf() {
            return node_index;
        }

        let axis = node.axis();
        let left = node.left_child();
        let front = left + signs[axis];
        let back = left + (1 - signs[axis]);

        let split = f32x4::splat(node.split());
        let d: Lanes =
            std::array::from_fn(|group| (split - packet.origin[axis][group]) * packet.inv_direction[axis][group]);

        let needs_front = (0..d.len()).fold(0, |acc, group| {
            acc | move_mask(active[group] & packet.tnear[group].cmp_le(d[group]))
        });
        if needs_front == 0 {
            node_index = back;
            continue;
        }

        let needs_back = (0..d.len()).fold(0, |acc, group| {
            acc | move_mask(active[group] & packet.tfar[group].cmp_ge(d[group]))
        });
        if needs_back == 0 {
            node_index = front;
            continue;
        }

        push(
            stack,
            PacketStackEntry {
                node: back,
                tnear: std::array::from_fn(|group| d[group].max(packet.tnear[group])),
                tfar: packet.tfar,
            },
        );
        for group in 0..d.len() {
            packet.tfar[group] = d[group].min(packet.tfar[group]);
            active[group] = active[group] & packet.tnear[group].cmp_le(packet.tfar[group]);
        }
        node_index = front;
    }
}

/// Pops the next cell, restores the intervals and reactivates the rays that are not
/// done yet and have a non-empty interval in it.
fn pop(
    stack: &mut Vec<PacketStackEntry>,
    packet: &mut RayPacket,
    done: PacketMask,
    active: &mut Lanes,
) -> Option<usize> {
    let entry = stack.pop()?;
    packet.tnear = entry.tnear;
    packet.tfar = entry.tfar;

    let not_done = packet_mask_to_lanes(!done);
    *active = std::array::from_fn(|group| not_done[group] & packet.tnear[group].cmp_le(packet.tfar[group]));
    Some(entry.node)
}

impl Tracer<'_> {
    /// Closest hits of all rays in `packet.mask`, within their intervals.
    ///
    /// Coherent packets are traced in one pass. Otherwise the rays are split by their
    /// direction octant and each group is traced separately.
    pub fn closest_hit_packet(&mut self, packet: &RayPacket) -> HitPacket {
        let mut hits = HitPacket::default();
        let mask = packet.mask;
        if mask == 0 {
            return hits;
        }

        if packet.is_coherent() {
            self.trace_instances_packet(packet, mask, packet.ray_octant(0), &mut hits);
        } else {
            for (octant, octant_mask) in packet.octant_masks(mask).into_iter().enumerate() {
                if octant_mask != 0 {
                    self.trace_instances_packet(packet, octant_mask, octant, &mut hits);
                }
            }
        }
        hits
    }

    /// Traces the 16 rays of a packet and shades them into `state.colors`.
    ///
    /// Rays outside `state.packet.mask` are left alone.
    pub fn trace_packet(&mut self, state: &mut RayPacketState) {
        let epsilon = self.scene.settings.ray_epsilon;
        state.packet.tnear = crate::util::simd::splat_lanes(epsilon);
        state.packet.tfar = crate::util::simd::splat_lanes(f32::MAX);

        state.hits = self.closest_hit_packet(&state.packet);
        self.shade_packet(state);
    }

    /// Instance tree traversal of the rays in `mask`, all pointing into `octant`.
    fn trace_instances_packet(&mut self, world: &RayPacket, mask: PacketMask, octant: usize, hits: &mut HitPacket) {
        let scene = self.scene;
        let tree = scene.instance_tree();
        let signs = octant_signs(octant);

        let mut packet = world.clone();
        let mut active = tree.bounds().clip_packet(&mut packet, &signs, &packet_mask_to_lanes(mask));
        if lanes_to_packet_mask(&active) == 0 {
            return;
        }

        let mut done = !mask;
        self.stacks.instance_packet.clear();
        let mut node_index = tree.root();
        loop {
            node_index = find_leaf(
                tree,
                node_index,
                &mut packet,
                &signs,
                &mut active,
                &mut self.stacks.instance_packet,
            );
            self.counters.instance_leaves += 1;

            let active_mask = lanes_to_packet_mask(&active);
            if active_mask != 0 {
                for &instance_id in tree.leaf_elements(tree.node(node_index)) {
                    let instance = scene.instance(InstanceIdx::from_raw(instance_id));
                    let local = instance.transform().inverse_transform_packet(&packet);

                    // A transform can spread a coherent packet over several octants
                    if local.is_coherent() {
                        self.trace_geometry_packet(instance_id, &local, active_mask, local.ray_octant(0), hits);
                    } else {
                        for (local_octant, local_mask) in local.octant_masks(active_mask).into_iter().enumerate() {
                            if local_mask != 0 {
                                self.trace_geometry_packet(instance_id, &local, local_mask, local_octant, hits);
                            }
                        }
                    }
                }
            }

            done |= hits.hit_mask();
            if done == FULL_PACKET_MASK {
                return;
            }

            match pop(&mut self.stacks.instance_packet, &mut packet, done, &mut active) {
                Some(next) => node_index = next,
                None => return,
            }
        }
    }

    /// Geometry traversal of one instance for the rays in `mask`, all pointing into
    /// `octant` in object space.
    ///
    /// Lanes improved in a leaf get the instance and geometry ids and stop traversing.
    pub fn trace_geometry_packet(
        &mut self,
        instance_id: u32,
        local: &RayPacket,
        mask: PacketMask,
        octant: usize,
        hits: &mut HitPacket,
    ) {
        let scene = self.scene;
        let geometry_idx = scene.instance(InstanceIdx::from_raw(instance_id)).geometry();
        let geometry = scene.geometry(geometry_idx);
        let tree = geometry.kd_tree();
        let signs = octant_signs(octant);

        let mut packet = local.clone();
        let mut active = tree.bounds().clip_packet(&mut packet, &signs, &packet_mask_to_lanes(mask));
        let mut done = !lanes_to_packet_mask(&active);
        if done == FULL_PACKET_MASK {
            return;
        }
        self.counters.geometry_traversals += 1;

        let instance_ids = i32x4::splat(instance_id as i32);
        let geometry_ids = i32x4::splat(geometry_idx.raw() as i32);

        self.stacks.geometry_packet.clear();
        let mut node_index = tree.root();
        loop {
            node_index = find_leaf(
                tree,
                node_index,
                &mut packet,
                &signs,
                &mut active,
                &mut self.stacks.geometry_packet,
            );
            self.counters.geometry_leaves += 1;

            let elements = tree.leaf_elements(tree.node(node_index));
            if !elements.is_empty() {
                let mut improved = [f32x4::ZERO; PACKET_GROUPS];
                for &triangle in elements {
                    self.counters.triangle_tests += 1;
                    let updated = geometry.tri_accel[triangle as usize].intersect_packet(
                        &packet,
                        &active,
                        &mut hits.triangles,
                    );
                    for (acc, lanes) in improved.iter_mut().zip(updated) {
                        *acc = *acc | lanes;
                    }
                }

                let improved_mask = lanes_to_packet_mask(&improved);
                if improved_mask != 0 {
                    for group in 0..improved.len() {
                        hits.instance[group] = select_int(improved[group], instance_ids, hits.instance[group]);
                        hits.geometry[group] = select_int(improved[group], geometry_ids, hits.geometry[group]);
                    }
                    done |= improved_mask;
                    if done == FULL_PACKET_MASK {
                        return;
                    }
                }
            }

            match pop(&mut self.stacks.geometry_packet, &mut packet, done, &mut active) {
                Some(next) => node_index = next,
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{Ray, WorldMatrix, WorldPoint, WorldVector};
    use crate::scene::Scene;
    use crate::test_fixtures;
    use crate::util::simd::PACKET_SIZE;

    use assert2::{assert, check};
    use rand::{Rng, SeedableRng, rngs::SmallRng};
    use test_case::test_case;
    use test_strategy::proptest;

    fn soup_scene() -> Scene {
        let mut scene = Scene::new();
        let (vertices, triangles) = test_fixtures::random_soup(400, 0.3, 77);
        let geometry = scene
            .add_geometry(test_fixtures::geometry_from_mesh(&vertices, &triangles))
            .unwrap();
        scene.instantiate(geometry, WorldMatrix::identity()).unwrap();
        // Mirrored instance, flips the octant of every ray in object space
        let mirrored = WorldMatrix::new_translation(&WorldVector::new(1.5, 0.0, 0.5))
            * WorldMatrix::new_nonuniform_scaling(&WorldVector::new(-1.0, 1.0, 1.0));
        scene.instantiate(geometry, mirrored).unwrap();
        scene.prepare_frame();
        scene
    }

    fn check_against_single(tracer: &mut Tracer, rays: &[Ray; PACKET_SIZE], mask: PacketMask) {
        let mut packet = RayPacket::from_rays(rays);
        packet.mask = mask;
        let hits = tracer.closest_hit_packet(&packet);

        for (i, ray) in rays.iter().enumerate() {
            if (mask >> i) & 1 == 0 {
                assert!(hits.hit(i).is_none());
                continue;
            }
            let single = tracer.closest_hit(ray);
            let packet_hit = hits.hit(i);
            assert!(single.is_some() == packet_hit.is_some(), "ray {}", i);
            if let (Some(single), Some(packet_hit)) = (single, packet_hit) {
                check!((single.distance - packet_hit.distance).abs() < 1e-3, "ray {}", i);
                check!(single.instance == packet_hit.instance, "ray {}", i);
            }
        }
    }

    fn coherent_rays(rng: &mut SmallRng) -> [Ray; PACKET_SIZE] {
        // Every target is in the +x +y -z octant from the origin
        let origin = WorldPoint::new(-0.5, -0.5, 5.0);
        std::array::from_fn(|_| {
            let target = WorldPoint::new(rng.random_range(0.0..1.6), rng.random_range(0.0..1.0), 0.5);
            Ray::new(origin, target - origin)
        })
    }

    fn incoherent_rays(rng: &mut SmallRng) -> [Ray; PACKET_SIZE] {
        let center = WorldPoint::new(0.75, 0.5, 0.5);
        std::array::from_fn(|_| {
            let direction = WorldVector::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            );
            let direction = if direction.norm() < 0.1 { WorldVector::new(0.3, -0.2, 0.9) } else { direction };
            Ray::new(center - direction.normalize() * 4.0, direction)
        })
    }

    #[test_case(FULL_PACKET_MASK)]
    #[test_case(0x00FF)]
    #[test_case(0x8001)]
    fn coherent_packet_matches_single(mask: PacketMask) {
        let scene = soup_scene();
        let mut tracer = Tracer::new(&scene);
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..8 {
            let rays = coherent_rays(&mut rng);
            check_against_single(&mut tracer, &rays, mask);
        }
    }

    #[proptest(cases = 32)]
    fn incoherent_packet_matches_single(seed: u64, mask: u16) {
        let scene = soup_scene();
        let mut tracer = Tracer::new(&scene);
        let mut rng = SmallRng::seed_from_u64(seed);
        let rays = incoherent_rays(&mut rng);
        check_against_single(&mut tracer, &rays, mask);
    }

    #[test]
    fn empty_mask_has_no_hits() {
        let scene = soup_scene();
        let mut tracer = Tracer::new(&scene);
        let mut rng = SmallRng::seed_from_u64(1);
        let mut packet = RayPacket::from_rays(&coherent_rays(&mut rng));
        packet.mask = 0;
        assert!(tracer.closest_hit_packet(&packet).hit_mask() == 0);
        assert!(tracer.counters().instance_leaves == 0);
    }

    #[test]
    fn packet_missing_the_scene() {
        let scene = soup_scene();
        let mut tracer = Tracer::new(&scene);
        let rays: [Ray; PACKET_SIZE] = std::array::from_fn(|i| {
            Ray::new(WorldPoint::new(i as f32, 10.0, 10.0), WorldVector::new(0.0, 1.0, 0.5))
        });
        let hits = tracer.closest_hit_packet(&RayPacket::from_rays(&rays));
        assert!(hits.hit_mask() == 0);
        assert!(tracer.counters().geometry_traversals == 0);
    }
}
