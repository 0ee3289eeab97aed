mod instance_builder;
mod printing;
mod raw;
mod triangle_builder;

use std::collections::VecDeque;

use index_vec::IndexVec;

use crate::geometry::{SplitPlane, WorldBox};

pub use instance_builder::build_instance_tree;
pub use raw::{BuildStatistics, RawKdTree, RawNode, RawNodeIdx};
pub use triangle_builder::TriangleTreeBuilder;

/// Deepest node the builders may create, keeps traversal stacks bounded.
pub const MAX_DEPTH: usize = 127;

/// Tuning of the kd-tree builders.
#[derive(Clone, Debug, PartialEq, bon::Builder)]
pub struct BuildSettings {
    /// Cost of one traversal step relative to the triangle intersection cost.
    #[builder(default = 1.0)]
    pub traversal_cost: f32,
    #[builder(default = 1.4)]
    pub intersection_cost: f32,
    /// Clamped to `MAX_DEPTH`.
    #[builder(default = 64)]
    pub max_depth: usize,
}

impl Default for BuildSettings {
    fn default() -> Self {
        BuildSettings::builder().build()
    }
}

impl BuildSettings {
    pub(crate) fn depth_limit(&self) -> usize {
        self.max_depth.min(MAX_DEPTH)
    }
}

/// Flattened kd-tree used for traversal.
///
/// Nodes are stored breadth first, so the two children of an internal node are always
/// next to each other. Element ids of every leaf form a contiguous run in `elements`.
#[derive(Clone, Debug)]
pub struct KdTree {
    bounds: WorldBox,
    nodes: IndexVec<NodeIdx, CompactNode>,
    elements: Vec<u32>,
}

/// Node packed into two words.
///
/// The first word has the leaf flag in bit 31. Internal nodes keep the split axis in
/// bits 0-1 and the index of the left child in bits 2-30, the right child directly
/// follows the left one; the second word is the split position.
/// Leaves keep their element count in bits 0-30 and the start offset into the element
/// array in the second word.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CompactNode {
    data: u32,
    payload: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Internal {
        plane: SplitPlane,
        left: NodeIdx,
    },
    Leaf {
        elements: std::ops::Range<usize>,
    },
}

impl CompactNode {
    const LEAF_FLAG: u32 = 1 << 31;
    const AXIS_BITS: u32 = 2;
    const AXIS_MASK: u32 = (1 << Self::AXIS_BITS) - 1;

    pub const MAX_INDEX: u32 = !Self::LEAF_FLAG >> Self::AXIS_BITS;
    pub const MAX_COUNT: u32 = !Self::LEAF_FLAG;

    /// Create an internal node, panics if the axis or index are out of range
    pub fn new_internal(plane: &SplitPlane, left: NodeIdx) -> Self {
        assert!(plane.axis < 3);
        assert!(left.raw() <= Self::MAX_INDEX);
        CompactNode {
            data: (left.raw() << Self::AXIS_BITS) | plane.axis as u32,
            payload: plane.position.to_bits(),
        }
    }

    /// Create a leaf node, panics if the count is out of range
    pub fn new_leaf(start: u32, count: u32) -> Self {
        assert!(count <= Self::MAX_COUNT);
        CompactNode {
            data: Self::LEAF_FLAG | count,
            payload: start,
        }
    }

    #[inline(always)]
    pub fn is_leaf(&self) -> bool {
        self.data & Self::LEAF_FLAG != 0
    }

    #[inline(always)]
    pub fn axis(&self) -> usize {
        (self.data & Self::AXIS_MASK) as usize
    }

    #[inline(always)]
    pub fn split(&self) -> f32 {
        f32::from_bits(self.payload)
    }

    /// Index of the left child, the right child is at `left + 1`.
    #[inline(always)]
    pub fn left_child(&self) -> usize {
        ((self.data & !Self::LEAF_FLAG) >> Self::AXIS_BITS) as usize
    }

    #[inline(always)]
    pub fn element_range(&self) -> std::ops::Range<usize> {
        let start = self.payload as usize;
        start..start + (self.data & !Self::LEAF_FLAG) as usize
    }

    pub fn decode(&self) -> Node {
        if self.is_leaf() {
            Node::Leaf {
                elements: self.element_range(),
            }
        } else {
            Node::Internal {
                plane: SplitPlane::new(self.axis(), self.split()),
                left: NodeIdx::from_usize(self.left_child()),
            }
        }
    }
}

impl std::fmt::Debug for CompactNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactNode")
            .field("data", &self.data)
            .field("payload", &self.payload)
            .field("<decoded>", &self.decode())
            .finish()
    }
}

index_vec::define_index_type! {
    pub struct NodeIdx = u32;
    MAX_INDEX = CompactNode::MAX_INDEX as usize;
    IMPL_RAW_CONVERSIONS = true;
}

impl KdTree {
    /// Tree without any elements, every ray misses its bounds.
    pub fn empty() -> KdTree {
        KdTree::from_raw(RawKdTree::single_leaf(WorldBox::degenerate(), Vec::new()))
    }

    /// Flattens the raw tree breadth first.
    pub fn from_raw(mut raw: RawKdTree) -> KdTree {
        let mut nodes = IndexVec::with_capacity(raw.stats.node_count.max(1));
        let mut elements = Vec::with_capacity(raw.stats.element_count);

        if raw.nodes.is_empty() {
            nodes.push(CompactNode::new_leaf(0, 0));
        } else {
            let mut queue = VecDeque::new();
            queue.push_back(raw.root());
            let mut next_child = NodeIdx::from_raw(1);

            while let Some(index) = queue.pop_front() {
                match raw.take_node(index) {
                    RawNode::Internal { plane, left, right } => {
                        nodes.push(CompactNode::new_internal(&plane, next_child));
                        queue.push_back(left);
                        queue.push_back(right);
                        next_child += 2;
                    }
                    RawNode::Leaf { elements: ids } => {
                        nodes.push(CompactNode::new_leaf(elements.len() as u32, ids.len() as u32));
                        elements.extend(ids);
                    }
                }
            }
        }
        debug_assert!(raw.nodes.is_empty() || nodes.len() == raw.stats.node_count);

        KdTree {
            bounds: raw.bounds,
            nodes,
            elements,
        }
    }

    pub fn bounds(&self) -> &WorldBox {
        &self.bounds
    }

    pub fn root(&self) -> usize {
        0
    }

    #[inline(always)]
    pub fn node(&self, index: usize) -> &CompactNode {
        &self.nodes.raw[index]
    }

    /// Element ids stored in a leaf node.
    #[inline(always)]
    pub fn leaf_elements(&self, node: &CompactNode) -> &[u32] {
        &self.elements[node.element_range()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).count()
    }

    /// Number of element references in all leaves, duplicates included.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

impl Default for KdTree {
    fn default() -> Self {
        KdTree::empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::WorldPoint;

    use assert2::{assert, let_assert};
    use test_strategy::proptest;

    #[proptest]
    fn internal_node_round_trip(
        #[strategy(0u32..=CompactNode::MAX_INDEX)] index: u32,
        #[strategy(0usize..3)] axis: usize,
        #[strategy(-1e6f32..1e6)] position: f32,
    ) {
        let node = CompactNode::new_internal(&SplitPlane::new(axis, position), index.into());
        assert!(!node.is_leaf());
        let_assert!(Node::Internal { plane, left } = node.decode());
        assert!(left.raw() == index);
        assert!(plane == SplitPlane::new(axis, position));
    }

    #[proptest]
    fn leaf_node_round_trip(start: u32, #[strategy(0u32..=CompactNode::MAX_COUNT)] count: u32) {
        let node = CompactNode::new_leaf(start, count);
        assert!(node.is_leaf());
        let_assert!(Node::Leaf { elements } = node.decode());
        assert!(elements.start == start as usize);
        assert!(elements.len() == count as usize);
    }

    #[test]
    fn negative_split_survives_packing() {
        let node = CompactNode::new_internal(&SplitPlane::new(2, -0.0), 5u32.into());
        assert!(node.split().is_sign_negative());
        assert!(node.axis() == 2);
    }

    #[test]
    #[should_panic]
    fn internal_index_out_of_range() {
        CompactNode::new_internal(
            &SplitPlane::new(0, 0.0),
            NodeIdx::from_raw_unchecked(CompactNode::MAX_INDEX + 1),
        );
    }

    #[test]
    #[should_panic]
    fn leaf_count_out_of_range() {
        CompactNode::new_leaf(0, CompactNode::MAX_COUNT + 1);
    }

    /// Root splits x, its left child splits y, three leaves.
    fn small_raw_tree() -> RawKdTree {
        let bounds = WorldBox::new(WorldPoint::new(0.0, 0.0, 0.0), WorldPoint::new(2.0, 2.0, 2.0));
        let mut raw = RawKdTree::new(bounds);
        let root = raw.push_placeholder();
        let inner = raw.push_placeholder();
        let a = raw.push_leaf(vec![0, 1], 2);
        let b = raw.push_leaf(vec![2], 2);
        let c = raw.push_leaf(vec![1, 3, 4], 1);
        raw.set_internal(inner, SplitPlane::new(1, 1.0), a, b);
        raw.set_internal(root, SplitPlane::new(0, 1.5), inner, c);
        raw.set_root(root);
        raw
    }

    #[test]
    fn conversion_is_breadth_first() {
        let tree = KdTree::from_raw(small_raw_tree());

        assert!(tree.node_count() == 5);
        assert!(tree.leaf_count() == 3);
        assert!(tree.element_count() == 6);

        let_assert!(Node::Internal { plane, left } = tree.node(0).decode());
        assert!(plane == SplitPlane::new(0, 1.5));
        assert!(left.index() == 1);

        let_assert!(Node::Internal { plane, left } = tree.node(1).decode());
        assert!(plane == SplitPlane::new(1, 1.0));
        assert!(left.index() == 3);

        assert!(tree.leaf_elements(tree.node(2)) == [1, 3, 4]);
        assert!(tree.leaf_elements(tree.node(3)) == [0, 1]);
        assert!(tree.leaf_elements(tree.node(4)) == [2]);
    }

    #[test]
    fn empty_tree() {
        let tree = KdTree::empty();
        assert!(tree.bounds().is_degenerate());
        assert!(tree.node_count() == 1);
        assert!(tree.node(tree.root()).is_leaf());
        assert!(tree.leaf_elements(tree.node(tree.root())).is_empty());
    }

    #[test]
    fn build_settings_defaults() {
        let settings = BuildSettings::default();
        assert!(settings.traversal_cost == 1.0);
        assert!(settings.intersection_cost == 1.4);
        assert!(settings.depth_limit() <= MAX_DEPTH);

        let deep = BuildSettings::builder().max_depth(1000).build();
        assert!(deep.depth_limit() == MAX_DEPTH);
    }
}
