use ordered_float::OrderedFloat;

use super::{BuildSettings, RawKdTree, RawNodeIdx};
use crate::geometry::{SplitPlane, WorldBox, WorldPoint};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
    Both,
    /// Nothing of the triangle is left inside the current cell
    Invalid,
}

/// Order matters, events at the same position are sorted by kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    End,
    Planar,
    Start,
}

#[derive(Copy, Clone, Debug)]
struct Event {
    position: f32,
    kind: EventKind,
    triangle: u32,
}

#[derive(Copy, Clone, Debug)]
struct SplitCandidate {
    plane: SplitPlane,
    cost: f32,
    /// Where triangles lying exactly in the plane go
    planar_side: Side,
}

/// Surface area heuristic kd-tree builder over the triangles of one geometry.
///
/// Triangles are clipped to each cell before evaluating split candidates, so
/// that candidate planes come from the actual overlap of the triangle with the cell.
pub struct TriangleTreeBuilder<'a> {
    vertices: &'a [WorldPoint],
    triangles: &'a [[u32; 3]],
    settings: &'a BuildSettings,
    depth_limit: usize,

    // Scratch state indexed by triangle id, reused by every node of the build
    sides: Vec<Side>,
    clipped_boxes: Vec<WorldBox>,
    events: [Vec<Event>; 3],

    tree: RawKdTree,
}

impl<'a> TriangleTreeBuilder<'a> {
    /// Builds the tree over `triangles`, given as vertex index triples.
    /// The tree's bounds cover all `vertices`.
    #[tracing::instrument(skip_all, fields(triangle_count = triangles.len()))]
    pub fn build(
        vertices: &'a [WorldPoint],
        triangles: &'a [[u32; 3]],
        settings: &'a BuildSettings,
    ) -> RawKdTree {
        let bounds = WorldBox::build_from(vertices);
        let mut builder = TriangleTreeBuilder {
            vertices,
            triangles,
            settings,
            depth_limit: settings.depth_limit(),

            sides: vec![Side::Invalid; triangles.len()],
            clipped_boxes: vec![WorldBox::degenerate(); triangles.len()],
            events: std::array::from_fn(|_| Vec::with_capacity(2 * triangles.len())),

            tree: RawKdTree::new(bounds.clone()),
        };

        let all = (0..triangles.len() as u32).collect();
        let root = builder.build_recursive(all, &bounds, 0);
        builder.tree.set_root(root);

        let stats = &builder.tree.stats;
        tracing::debug!(
            "Triangle tree: {} nodes, {} leaves, depth {}, {} triangle references",
            stats.node_count,
            stats.leaf_count,
            stats.max_depth,
            stats.element_count
        );

        builder.tree
    }

    fn build_recursive(&mut self, triangles: Vec<u32>, bounds: &WorldBox, depth: usize) -> RawNodeIdx {
        let valid_count = self.clip_triangles(&triangles, bounds);

        if depth >= self.depth_limit {
            return self.build_leaf(&triangles, depth);
        }

        let Some(best) = self.find_plane(&triangles, bounds, valid_count) else {
            return self.build_leaf(&triangles, depth);
        };
        if self.terminate(best.cost, valid_count) {
            return self.build_leaf(&triangles, depth);
        }

        let (left_box, right_box) = bounds.split(&best.plane);
        let (left_triangles, right_triangles) = self.partition(&best, &triangles);
        drop(triangles);

        // Placeholder that gets replaced once both children are built
        let node = self.tree.push_placeholder();
        let left = self.build_recursive(left_triangles, &left_box, depth + 1);
        let right = self.build_recursive(right_triangles, &right_box, depth + 1);
        self.tree.set_internal(node, best.plane, left, right);

        node
    }

    fn build_leaf(&mut self, triangles: &[u32], depth: usize) -> RawNodeIdx {
        let elements = triangles
            .iter()
            .copied()
            .filter(|t| self.sides[*t as usize] != Side::Invalid)
            .collect();
        self.tree.push_leaf(elements, depth)
    }

    /// Splitting doesn't pay off if it's not cheaper than intersecting everything.
    fn terminate(&self, best_cost: f32, triangle_count: usize) -> bool {
        best_cost >= self.settings.intersection_cost * triangle_count as f32
    }

    /// Clips the triangles to the cell and resets their sides.
    /// Returns the number of triangles that overlap the cell.
    fn clip_triangles(&mut self, triangles: &[u32], bounds: &WorldBox) -> usize {
        let mut valid_count = 0;
        for &t in triangles {
            let [a, b, c] = self.triangles[t as usize];
            let vertices = [
                self.vertices[a as usize],
                self.vertices[b as usize],
                self.vertices[c as usize],
            ];
            let clipped = bounds.clip_triangle(&vertices);

            self.sides[t as usize] = if clipped.is_degenerate() {
                Side::Invalid
            } else {
                valid_count += 1;
                Side::Both
            };
            self.clipped_boxes[t as usize] = clipped;
        }
        valid_count
    }

    /// Finds the cheapest split plane by sweeping sorted events along every axis.
    /// Returns None if no candidate has a finite cost.
    fn find_plane(
        &mut self,
        triangles: &[u32],
        bounds: &WorldBox,
        valid_count: usize,
    ) -> Option<SplitCandidate> {
        self.fill_events(triangles);

        let mut best: Option<SplitCandidate> = None;

        for (axis, events) in self.events.iter().enumerate() {
            let mut n_left = 0;
            let mut n_right = valid_count;

            let mut i = 0;
            while i < events.len() {
                let position = events[i].position;
                let count_kind = |i: &mut usize, kind: EventKind| {
                    let mut count = 0;
                    while *i < events.len()
                        && events[*i].position == position
                        && events[*i].kind == kind
                    {
                        count += 1;
                        *i += 1;
                    }
                    count
                };
                let ending = count_kind(&mut i, EventKind::End);
                let planar = count_kind(&mut i, EventKind::Planar);
                let starting = count_kind(&mut i, EventKind::Start);

                n_right -= planar + ending;

                let plane = SplitPlane::new(axis, position);
                let candidate = self.evaluate(&plane, bounds, n_left, planar, n_right);
                // NaN costs (flat cells) never win
                if candidate.cost < best.map_or(f32::MAX, |b| b.cost) {
                    best = Some(candidate);
                }

                n_left += starting + planar;
            }
        }

        best
    }

    /// Creates sorted event lists for all valid triangles of the current cell.
    fn fill_events(&mut self, triangles: &[u32]) {
        for events in self.events.iter_mut() {
            events.clear();
        }

        for &triangle in triangles {
            if self.sides[triangle as usize] == Side::Invalid {
                continue;
            }
            let clipped = &self.clipped_boxes[triangle as usize];
            for (axis, events) in self.events.iter_mut().enumerate() {
                if clipped.is_planar(axis) {
                    events.push(Event {
                        position: clipped.min[axis],
                        kind: EventKind::Planar,
                        triangle,
                    });
                } else {
                    events.push(Event {
                        position: clipped.min[axis],
                        kind: EventKind::Start,
                        triangle,
                    });
                    events.push(Event {
                        position: clipped.max[axis],
                        kind: EventKind::End,
                        triangle,
                    });
                }
            }
        }

        for events in self.events.iter_mut() {
            events.sort_unstable_by_key(|e| (OrderedFloat(e.position), e.kind));
        }
    }

    /// SAH cost of the plane, with the planar triangles put on the cheaper side.
    fn evaluate(
        &self,
        plane: &SplitPlane,
        bounds: &WorldBox,
        n_left: usize,
        n_planar: usize,
        n_right: usize,
    ) -> SplitCandidate {
        let (left, right) = bounds.split(plane);
        let axis = plane.axis;

        let inv_area = 1.0 / bounds.surface_area();
        let p_left = left.surface_area() * inv_area;
        let p_right = right.surface_area() * inv_area;

        let inv_extent = 1.0 / (bounds.max[axis] - bounds.min[axis]);
        let left_extent = (left.max[axis] - left.min[axis]) * inv_extent;
        let right_extent = (right.max[axis] - right.min[axis]) * inv_extent;

        let cost = |count_left: usize, count_right: usize| {
            let cost = self.settings.traversal_cost
                + self.settings.intersection_cost
                    * (p_left * count_left as f32 + p_right * count_right as f32);
            // Bias towards cutting off empty space
            if count_left == 0 {
                cost * (0.8 + 0.2 * right_extent)
            } else if count_right == 0 {
                cost * (0.8 + 0.2 * left_extent)
            } else {
                cost
            }
        };

        let planar_left = cost(n_left + n_planar, n_right);
        let planar_right = cost(n_left, n_planar + n_right);

        if planar_left <= planar_right {
            SplitCandidate {
                plane: *plane,
                cost: planar_left,
                planar_side: Side::Left,
            }
        } else {
            SplitCandidate {
                plane: *plane,
                cost: planar_right,
                planar_side: Side::Right,
            }
        }
    }

    /// Distributes the triangles of the cell into the two children.
    /// Triangles crossing the plane go to both, clipped away triangles to neither.
    fn partition(&mut self, best: &SplitCandidate, triangles: &[u32]) -> (Vec<u32>, Vec<u32>) {
        let split = best.plane.position;

        for event in &self.events[best.plane.axis] {
            let side = &mut self.sides[event.triangle as usize];
            match event.kind {
                EventKind::End if event.position <= split => *side = Side::Left,
                EventKind::Start if event.position >= split => *side = Side::Right,
                EventKind::Planar => {
                    *side = if event.position < split
                        || (event.position == split && best.planar_side == Side::Left)
                    {
                        Side::Left
                    } else {
                        Side::Right
                    }
                }
                _ => {}
            }
        }

        let mut left = Vec::new();
        let mut right = Vec::new();
        for &t in triangles {
            match self.sides[t as usize] {
                Side::Left => left.push(t),
                Side::Right => right.push(t),
                Side::Both => {
                    left.push(t);
                    right.push(t);
                }
                Side::Invalid => {}
            }
        }
        (left, right)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::kd_tree::{KdTree, Node, RawNode};
    use crate::test_fixtures;

    use assert2::{assert, let_assert};
    use std::collections::HashSet;

    fn build(vertices: &[WorldPoint], triangles: &[[u32; 3]]) -> RawKdTree {
        TriangleTreeBuilder::build(vertices, triangles, &BuildSettings::default())
    }

    /// Every triangle that overlaps a leaf's cell must be referenced by it
    fn referenced_triangles(tree: &KdTree) -> HashSet<u32> {
        (0..tree.node_count())
            .map(|i| tree.node(i))
            .filter(|node| node.is_leaf())
            .flat_map(|node| tree.leaf_elements(node).iter().copied())
            .collect()
    }

    #[test]
    fn no_triangles() {
        let raw = build(&[], &[]);
        assert!(raw.bounds.is_degenerate());
        assert!(raw.stats.node_count == 1);
        assert!(raw.node(raw.root()) == &RawNode::Leaf { elements: vec![] });
    }

    #[test]
    fn single_triangle_is_a_leaf() {
        let vertices = [
            WorldPoint::new(0.0, 0.0, 0.0),
            WorldPoint::new(1.0, 0.0, 0.0),
            WorldPoint::new(0.0, 1.0, 0.0),
        ];
        let raw = build(&vertices, &[[0, 1, 2]]);
        assert!(raw.stats.leaf_count == 1);
        assert!(raw.node(raw.root()) == &RawNode::Leaf { elements: vec![0] });
    }

    #[test]
    fn separated_clusters_are_split() {
        let (vertices, triangles) = test_fixtures::two_separated_clusters();
        let raw = build(&vertices, &triangles);
        let_assert!(RawNode::Internal { plane, .. } = raw.node(raw.root()));
        assert!(plane.axis == 0);
        // The empty space between the clusters is cut off
        assert!(plane.position >= 1.0);
        assert!(plane.position <= 9.0);

        let tree = KdTree::from_raw(raw);
        assert!(referenced_triangles(&tree).len() == triangles.len());
    }

    #[test]
    fn straddling_triangles_are_duplicated() {
        let (vertices, triangles) = test_fixtures::cube_mesh();
        let raw = build(&vertices, &triangles);
        assert!(raw.stats.element_count >= triangles.len());

        let tree = KdTree::from_raw(raw);
        assert!(referenced_triangles(&tree).len() == triangles.len());
    }

    #[test]
    fn degenerate_cell_costs_are_ignored() {
        // All triangles in a single plane, the cell is flat along z
        let vertices: Vec<_> = (0..20)
            .flat_map(|i| {
                let x = i as f32;
                [
                    WorldPoint::new(x, 0.0, 0.0),
                    WorldPoint::new(x + 0.5, 0.0, 0.0),
                    WorldPoint::new(x, 0.5, 0.0),
                ]
            })
            .collect();
        let triangles: Vec<_> = (0..20u32).map(|i| [3 * i, 3 * i + 1, 3 * i + 2]).collect();
        let raw = build(&vertices, &triangles);
        let tree = KdTree::from_raw(raw);
        assert!(referenced_triangles(&tree).len() == triangles.len());

        // Every split is along x or y
        for i in 0..tree.node_count() {
            if let Node::Internal { plane, .. } = tree.node(i).decode() {
                assert!(plane.axis != 2);
            }
        }
    }

    #[test]
    fn random_soup_terminates_within_depth_limit() {
        let (vertices, triangles) = test_fixtures::random_soup(10_000, 0.05, 1234);
        let settings = BuildSettings::builder().max_depth(24).build();
        let raw = TriangleTreeBuilder::build(&vertices, &triangles, &settings);

        assert!(raw.stats.max_depth <= 24);
        assert!(raw.stats.leaf_count * 2 - 1 == raw.stats.node_count);

        let tree = KdTree::from_raw(raw);
        assert!(referenced_triangles(&tree).len() == triangles.len());
        // Leaves are much smaller than the whole soup
        assert!(tree.leaf_count() > 100);
    }
}
