use crate::{
    geometry::{Ray, TriangleHit},
    kd_tree::KdTree,
    scene::{GeometryIdx, InstanceIdx},
    shading::RayState,
};

use super::{Hit, StackEntry, Tracer, push};

/// Descends from `node` to the first leaf along the ray's interval.
///
/// The part of the interval behind each visited plane is pushed to the stack,
/// the ray's `tfar` is shortened to the part in front of it.
fn find_leaf(tree: &KdTree, mut node_index: usize, ray: &mut Ray, stack: &mut Vec<StackEntry>) -> usize {
    loop {
        let node = tree.node(node_index);
        if node.is_leaf() {
            return node_index;
        }

        let axis = node.axis();
        let sign = ray.dir_signs[axis];
        let left = node.left_child();
        let front = left + sign;
        let back = left + (1 - sign);

        let d = (node.split() - ray.origin[axis]) * ray.inv_direction[axis];

        if d < ray.tnear {
            node_index = back;
        } else if d > ray.tfar {
            node_index = front;
        } else {
            push(
                stack,
                StackEntry {
                    node: back,
                    tnear: d.max(ray.tnear),
                    tfar: ray.tfar,
                },
            );
            ray.tfar = d.min(ray.tfar);
            node_index = front;
        }
    }
}

/// Pops the next cell of a traversal, restoring the ray interval.
fn pop(stack: &mut Vec<StackEntry>, ray: &mut Ray) -> Option<usize> {
    let entry = stack.pop()?;
    ray.tnear = entry.tnear;
    ray.tfar = entry.tfar;
    Some(entry.node)
}

impl Tracer<'_> {
    /// Closest hit along the ray's `[tnear, tfar]` interval.
    pub fn closest_hit(&mut self, ray: &Ray) -> Option<Hit> {
        let scene = self.scene;
        let tree = scene.instance_tree();

        let mut ray = *ray;
        if !tree.bounds().clip_ray(&mut ray) {
            return None;
        }

        let mut best = TriangleHit::default();
        let mut best_instance = None;

        self.stacks.instance.clear();
        let mut node_index = tree.root();
        loop {
            node_index = find_leaf(tree, node_index, &mut ray, &mut self.stacks.instance);
            self.counters.instance_leaves += 1;

            // Every instance starts from the interval of the cell
            for &instance_id in tree.leaf_elements(tree.node(node_index)) {
                let instance_idx = InstanceIdx::from_raw(instance_id);
                let instance = scene.instance(instance_idx);
                let local = instance.transform().inverse_transform_ray(&ray);
                if self.trace_geometry_single(instance.geometry(), &local, &mut best) {
                    best_instance = Some(instance_idx);
                }
            }

            if let Some(instance_idx) = best_instance {
                return Some(Hit::new(&best, instance_idx, scene.instance(instance_idx).geometry()));
            }

            node_index = pop(&mut self.stacks.instance, &mut ray)?;
        }
    }

    /// Closest hit of a ray with a single geometry, in its object space.
    ///
    /// Only hits closer than `best.distance` count. Stops after the first leaf that
    /// improved `best`, returns true if it did.
    pub fn trace_geometry_single(&mut self, geometry_idx: GeometryIdx, ray: &Ray, best: &mut TriangleHit) -> bool {
        let geometry = self.scene.geometry(geometry_idx);
        let tree = geometry.kd_tree();

        let mut ray = *ray;
        if !tree.bounds().clip_ray(&mut ray) {
            return false;
        }
        self.counters.geometry_traversals += 1;

        let stack = &mut self.stacks.geometry;
        stack.clear();
        let mut node_index = tree.root();
        loop {
            node_index = find_leaf(tree, node_index, &mut ray, stack);
            self.counters.geometry_leaves += 1;

            let mut found = false;
            for &triangle in tree.leaf_elements(tree.node(node_index)) {
                self.counters.triangle_tests += 1;
                found |= geometry.tri_accel[triangle as usize].intersect(&ray, best);
            }
            if found {
                return true;
            }

            let Some(next) = pop(stack, &mut ray) else {
                return false;
            };
            node_index = next;
        }
    }

    /// Traces a primary or secondary ray and shades its result into `state.color`.
    pub fn trace_single(&mut self, state: &mut RayState) {
        state.ray.tnear = self.scene.settings.ray_epsilon;
        state.ray.tfar = f32::MAX;
        state.hit = self.closest_hit(&state.ray);
        self.shade(state);
    }

    /// Shadow ray query: is anything hit within `[ray_epsilon, state.ray.tfar]`?
    pub fn trace_hit_single(&mut self, state: &mut RayState) -> bool {
        state.ray.tnear = self.scene.settings.ray_epsilon;
        self.any_hit(&state.ray)
    }

    /// True if any triangle is hit within the ray's interval.
    pub fn any_hit(&mut self, ray: &Ray) -> bool {
        let scene = self.scene;
        let tree = scene.instance_tree();

        let mut ray = *ray;
        if !tree.bounds().clip_ray(&mut ray) {
            return false;
        }

        self.stacks.instance.clear();
        let mut node_index = tree.root();
        loop {
            node_index = find_leaf(tree, node_index, &mut ray, &mut self.stacks.instance);
            self.counters.instance_leaves += 1;

            for &instance_id in tree.leaf_elements(tree.node(node_index)) {
                let instance = scene.instance(InstanceIdx::from_raw(instance_id));
                let local = instance.transform().inverse_transform_ray(&ray);
                if self.any_hit_geometry(instance.geometry(), &local) {
                    return true;
                }
            }

            match pop(&mut self.stacks.instance, &mut ray) {
                Some(next) => node_index = next,
                None => return false,
            }
        }
    }

    fn any_hit_geometry(&mut self, geometry_idx: GeometryIdx, ray: &Ray) -> bool {
        let geometry = self.scene.geometry(geometry_idx);
        let tree = geometry.kd_tree();

        let mut ray = *ray;
        if !tree.bounds().clip_ray(&mut ray) {
            return false;
        }
        self.counters.geometry_traversals += 1;

        let stack = &mut self.stacks.geometry;
        stack.clear();
        let mut node_index = tree.root();
        loop {
            node_index = find_leaf(tree, node_index, &mut ray, stack);
            self.counters.geometry_leaves += 1;

            for &triangle in tree.leaf_elements(tree.node(node_index)) {
                self.counters.triangle_tests += 1;
                let mut hit = TriangleHit::default();
                if geometry.tri_accel[triangle as usize].intersect(&ray, &mut hit) {
                    return true;
                }
            }

            match pop(stack, &mut ray) {
                Some(next) => node_index = next,
                None => return false,
            }
        }
    }
}
