use crate::{geometry::WorldBox, util::Distribution};

use super::{KdTree, Node};

impl KdTree {
    pub fn print_tree(&self) {
        self.print_recursive(0, self.root(), &self.bounds);
    }

    pub fn print_statistics(&self) {
        let depth = self.depth_statistics();
        let fill = self.leaf_fill_statistics();
        println!("Nodes: {}, leaves: {}", self.node_count(), self.leaf_count());
        println!("Element references: {}", self.element_count());
        println!("Leaf depth: {}", depth);
        println!("Leaf fill: {}", fill);
        println!("Empty leaves: {:.1}%", fill.fraction(0) * 100.0);
    }

    /// Depth of every leaf, root has depth 0.
    pub fn depth_statistics(&self) -> Distribution {
        let mut depths = Distribution::default();
        let mut stack = vec![(self.root(), 0)];
        while let Some((index, depth)) = stack.pop() {
            match self.node(index).decode() {
                Node::Leaf { .. } => depths.add(depth),
                Node::Internal { left, .. } => {
                    stack.push((left.index(), depth + 1));
                    stack.push((left.index() + 1, depth + 1));
                }
            }
        }
        depths
    }

    /// Number of elements of every leaf.
    pub fn leaf_fill_statistics(&self) -> Distribution {
        (0..self.node_count())
            .map(|i| self.node(i))
            .filter(|node| node.is_leaf())
            .map(|node| node.element_range().len())
            .collect()
    }

    fn print_recursive(&self, indent: usize, index: usize, cell: &WorldBox) {
        let node = self.node(index);
        print!(
            "{}- {}{}: {:?}-{:?}",
            "  ".repeat(indent),
            if node.is_leaf() { "L" } else { "I" },
            index,
            cell.min,
            cell.max,
        );

        match node.decode() {
            Node::Leaf { elements } => {
                println!(" {:?}", &self.elements[elements]);
            }
            Node::Internal { plane, left } => {
                println!(" split {} at {}", ["x", "y", "z"][plane.axis], plane.position);
                let (left_cell, right_cell) = cell.split(&plane);
                self.print_recursive(indent + 1, left.index(), &left_cell);
                self.print_recursive(indent + 1, left.index() + 1, &right_cell);
            }
        }
    }
}
