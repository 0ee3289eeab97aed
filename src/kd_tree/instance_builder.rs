use super::{BuildSettings, RawKdTree, RawNodeIdx};
use crate::geometry::{SplitPlane, WorldBox};

/// Builds the scene level tree over instance bounding boxes.
///
/// Instead of a full SAH sweep, every node is split at the box boundary closest to
/// the cell center, taken from the side of the center with more boundaries.
/// Element ids are indices into `boxes`, instances with degenerate boxes are left out.
#[tracing::instrument(skip_all, fields(instance_count = boxes.len()))]
pub fn build_instance_tree(boxes: &[WorldBox], settings: &BuildSettings) -> RawKdTree {
    let instances: Vec<u32> = (0..boxes.len() as u32)
        .filter(|i| !boxes[*i as usize].is_degenerate())
        .collect();

    if instances.is_empty() {
        return RawKdTree::single_leaf(WorldBox::degenerate(), Vec::new());
    }

    let mut bounds = WorldBox::degenerate();
    for i in &instances {
        bounds.expand_by_box(&boxes[*i as usize]);
    }

    let mut builder = InstanceTreeBuilder {
        boxes,
        depth_limit: settings.depth_limit(),
        tree: RawKdTree::new(bounds.clone()),
    };
    let root = builder.build_recursive(instances, &bounds, 0);
    builder.tree.set_root(root);

    let stats = &builder.tree.stats;
    tracing::debug!(
        "Instance tree: {} nodes, {} leaves, depth {}, {} instance references",
        stats.node_count,
        stats.leaf_count,
        stats.max_depth,
        stats.element_count
    );

    builder.tree
}

struct InstanceTreeBuilder<'a> {
    boxes: &'a [WorldBox],
    depth_limit: usize,
    tree: RawKdTree,
}

/// Box boundaries on one side of the cell center.
#[derive(Debug)]
struct SideCandidates {
    count: usize,
    distance: f32,
    position: f32,
}

impl SideCandidates {
    fn new() -> Self {
        SideCandidates {
            count: 0,
            distance: f32::MAX,
            position: 0.0,
        }
    }

    fn add(&mut self, position: f32, distance: f32) {
        self.count += 1;
        if distance < self.distance {
            self.distance = distance;
            self.position = position;
        }
    }
}

impl InstanceTreeBuilder<'_> {
    fn build_recursive(&mut self, instances: Vec<u32>, bounds: &WorldBox, depth: usize) -> RawNodeIdx {
        if instances.len() <= 1 || depth >= self.depth_limit {
            return self.tree.push_leaf(instances, depth);
        }

        let center = bounds.center();

        for axis in bounds.axes_by_extent() {
            let mut left = SideCandidates::new();
            let mut right = SideCandidates::new();

            for i in &instances {
                let instance_box = &self.boxes[*i as usize];
                for position in [instance_box.min[axis], instance_box.max[axis]] {
                    let distance = position - center[axis];
                    if distance <= 0.0 {
                        left.add(position, -distance);
                    } else {
                        right.add(position, distance);
                    }
                }
            }

            let position = if left.count > right.count {
                left.position
            } else {
                right.position
            };
            let plane = SplitPlane::new(axis, position);

            let (left_instances, right_instances) = self.partition(&instances, &plane);
            if left_instances.len() >= instances.len() || right_instances.len() >= instances.len()
            {
                continue;
            }

            let (left_box, right_box) = bounds.split(&plane);

            let node = self.tree.push_placeholder();
            let left = self.build_recursive(left_instances, &left_box, depth + 1);
            let right = self.build_recursive(right_instances, &right_box, depth + 1);
            self.tree.set_internal(node, plane, left, right);
            return node;
        }

        self.tree.push_leaf(instances, depth)
    }

    fn partition(&self, instances: &[u32], plane: &SplitPlane) -> (Vec<u32>, Vec<u32>) {
        let mut left = Vec::new();
        let mut right = Vec::new();
        for &i in instances {
            let instance_box = &self.boxes[i as usize];
            let min = instance_box.min[plane.axis];
            let max = instance_box.max[plane.axis];

            if max <= plane.position {
                left.push(i);
            } else if min >= plane.position {
                right.push(i);
            } else {
                left.push(i);
                right.push(i);
            }
        }
        (left, right)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::{WorldPoint, WorldVector};
    use crate::kd_tree::{KdTree, Node, RawNode};

    use assert2::{assert, let_assert};
    use test_case::test_case;

    fn unit_box_at(x: f32, y: f32, z: f32) -> WorldBox {
        let min = WorldPoint::new(x, y, z);
        WorldBox::new(min, min + WorldVector::repeat(1.0))
    }

    fn build(boxes: &[WorldBox]) -> RawKdTree {
        build_instance_tree(boxes, &BuildSettings::default())
    }

    #[test]
    fn empty_scene() {
        let raw = build(&[]);
        assert!(raw.bounds.is_degenerate());
        assert!(raw.node(raw.root()) == &RawNode::Leaf { elements: vec![] });
    }

    #[test]
    fn degenerate_boxes_are_skipped() {
        let raw = build(&[WorldBox::degenerate(), unit_box_at(0.0, 0.0, 0.0)]);
        assert!(raw.bounds == unit_box_at(0.0, 0.0, 0.0));
        assert!(raw.node(raw.root()) == &RawNode::Leaf { elements: vec![1] });
    }

    #[test]
    fn two_separated_instances() {
        let raw = build(&[unit_box_at(-3.0, 0.0, 0.0), unit_box_at(2.0, 0.0, 0.0)]);
        assert!(raw.stats.node_count == 3);
        assert!(raw.stats.leaf_count == 2);

        let tree = KdTree::from_raw(raw);
        let_assert!(Node::Internal { plane, left } = tree.node(tree.root()).decode());
        assert!(plane.axis == 0);
        // Tie between sides picks the nearest boundary right of the center
        assert!(plane.position == 2.0);
        assert!(tree.leaf_elements(tree.node(left.index())) == [0]);
        assert!(tree.leaf_elements(tree.node(left.index() + 1)) == [1]);
    }

    #[test]
    fn overlapping_instances_stay_in_one_leaf() {
        let boxes = [unit_box_at(0.0, 0.0, 0.0), unit_box_at(0.0, 0.0, 0.0)];
        let raw = build(&boxes);
        assert!(raw.stats.leaf_count == 1);
        assert!(raw.stats.element_count == 2);
    }

    #[test_case(0 ; "x")]
    #[test_case(1 ; "y")]
    #[test_case(2 ; "z")]
    fn row_of_instances(axis: usize) {
        let boxes: Vec<_> = (0..16)
            .map(|i| {
                let mut offset = [0.0; 3];
                offset[axis] = 2.0 * i as f32;
                unit_box_at(offset[0], offset[1], offset[2])
            })
            .collect();
        let raw = build(&boxes);

        // Disjoint boxes end up alone in their leaves
        assert!(raw.stats.leaf_count == 16);
        assert!(raw.stats.element_count == 16);
        assert!(raw.stats.max_depth <= 8);
    }

    #[test]
    fn depth_is_limited() {
        let boxes: Vec<_> = (0..64)
            .map(|i| unit_box_at(2.0 * i as f32, 0.0, 0.0))
            .collect();
        let settings = BuildSettings::builder().max_depth(2).build();
        let raw = build_instance_tree(&boxes, &settings);
        assert!(raw.stats.max_depth <= 2);
        assert!(raw.stats.element_count == 64);
    }
}
