use index_vec::IndexVec;

use crate::geometry::{SplitPlane, WorldBox};

index_vec::define_index_type! {
    pub struct RawNodeIdx = u32;
}

/// Builder-time node, children are indices into the same arena.
#[derive(Clone, Debug, PartialEq)]
pub enum RawNode {
    Internal {
        plane: SplitPlane,
        left: RawNodeIdx,
        right: RawNodeIdx,
    },
    Leaf {
        elements: Vec<u32>,
    },
}

/// Counters collected while building, used to size the compact tree.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildStatistics {
    pub node_count: usize,
    pub leaf_count: usize,
    /// Depth of the deepest leaf, root has depth 0.
    pub max_depth: usize,
    /// Total element references over all leaves, duplicates included.
    pub element_count: usize,
}

/// Tree produced by the builders, consumed by `KdTree::from_raw`.
#[derive(Clone, Debug)]
pub struct RawKdTree {
    pub bounds: WorldBox,
    pub(super) nodes: IndexVec<RawNodeIdx, RawNode>,
    pub(super) root: RawNodeIdx,
    pub stats: BuildStatistics,
}

impl RawKdTree {
    /// Tree with no nodes yet, the root has to be set with `set_root`.
    pub fn new(bounds: WorldBox) -> RawKdTree {
        RawKdTree {
            bounds,
            nodes: IndexVec::new(),
            root: RawNodeIdx::from_raw(0),
            stats: BuildStatistics::default(),
        }
    }

    /// Tree consisting of a single leaf.
    pub fn single_leaf(bounds: WorldBox, elements: Vec<u32>) -> RawKdTree {
        let mut tree = RawKdTree::new(bounds);
        let root = tree.push_leaf(elements, 0);
        tree.set_root(root);
        tree
    }

    pub fn set_root(&mut self, root: RawNodeIdx) {
        self.root = root;
    }

    pub fn root(&self) -> RawNodeIdx {
        self.root
    }

    pub fn node(&self, index: RawNodeIdx) -> &RawNode {
        &self.nodes[index]
    }

    pub fn push_leaf(&mut self, elements: Vec<u32>, depth: usize) -> RawNodeIdx {
        self.stats.node_count += 1;
        self.stats.leaf_count += 1;
        self.stats.max_depth = self.stats.max_depth.max(depth);
        self.stats.element_count += elements.len();
        self.nodes.push(RawNode::Leaf { elements })
    }

    /// Reserves a slot for an internal node whose children are not built yet.
    /// Must be overwritten with `set_internal`.
    pub fn push_placeholder(&mut self) -> RawNodeIdx {
        self.stats.node_count += 1;
        self.nodes.push(RawNode::Leaf {
            elements: Vec::new(),
        })
    }

    pub fn set_internal(
        &mut self,
        index: RawNodeIdx,
        plane: SplitPlane,
        left: RawNodeIdx,
        right: RawNodeIdx,
    ) {
        self.nodes[index] = RawNode::Internal { plane, left, right };
    }

    /// Takes the node out of the arena, leaving an empty leaf behind.
    pub(super) fn take_node(&mut self, index: RawNodeIdx) -> RawNode {
        std::mem::replace(
            &mut self.nodes[index],
            RawNode::Leaf {
                elements: Vec::new(),
            },
        )
    }
}
