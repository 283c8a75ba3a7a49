//! Dominator and post-dominator trees.
//!
//! The "simple, fast" iterative scheme: a post-order of the (possibly
//! reversed) block graph, reverse-post-order numbers, and repeated
//! intersection of predecessor dominators until the idom assignment
//! reaches its fixpoint. Reducible flow converges after one round.
//!
//! On top of the idom pointers a pre-order numbering (`pre_number`,
//! `pre_max` per node) gives constant-time `dominates` queries, and the
//! dominance frontiers fall out of the idom chains.

use crate::ana::cfg::BlockGraph;
use crate::ir::{Graph, Node};
use crate::timing;
use firm_arena::{PackedOption, SecondaryMap};

#[derive(Clone, Default)]
struct DomNode {
    /// Reverse post-order number; 0 means unreachable.
    rpo_number: u32,
    /// The immediate dominator; none for the root and unreachable blocks.
    idom: PackedOption<Node>,
    /// Dominator-tree pre-order number; 0 means unreachable.
    pre_number: u32,
    /// Largest pre-order number in this node's subtree.
    pre_max: u32,
}

/// Which direction the tree covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomDirection {
    /// Dominators: rooted at the entry block, following forward edges.
    Dom,
    /// Post-dominators: rooted at the exit block, following reversed edges.
    PostDom,
}

/// An (immediate-)dominator tree over the blocks of one graph.
pub struct DomTree {
    direction: DomDirection,
    nodes: SecondaryMap<Node, DomNode>,
    /// Post-order of the traversal used to build the tree.
    postorder: Vec<Node>,
    children: SecondaryMap<Node, Vec<Node>>,
    root: Node,
    version: u64,
}

impl DomTree {
    /// Compute the dominator tree of `g`.
    pub fn compute(g: &Graph, bg: &BlockGraph) -> Self {
        let _tt = timing::domtree();
        Self::compute_dir(g, bg, DomDirection::Dom)
    }

    /// Compute the post-dominator tree of `g`.
    pub fn compute_postdom(g: &Graph, bg: &BlockGraph) -> Self {
        let _tt = timing::postdomtree();
        Self::compute_dir(g, bg, DomDirection::PostDom)
    }

    // Edges in the traversal direction of the tree.
    fn fwd<'a>(bg: &'a BlockGraph, direction: DomDirection, b: Node) -> &'a [Node] {
        match direction {
            DomDirection::Dom => bg.succs(b),
            DomDirection::PostDom => bg.preds(b),
        }
    }

    // Edges against the traversal direction.
    fn back<'a>(bg: &'a BlockGraph, direction: DomDirection, b: Node) -> &'a [Node] {
        match direction {
            DomDirection::Dom => bg.preds(b),
            DomDirection::PostDom => bg.succs(b),
        }
    }

    fn compute_dir(g: &Graph, bg: &BlockGraph, direction: DomDirection) -> Self {
        let root = match direction {
            DomDirection::Dom => bg.entry,
            DomDirection::PostDom => bg.exit,
        };

        let mut tree = DomTree {
            direction,
            nodes: SecondaryMap::new(),
            postorder: Vec::new(),
            children: SecondaryMap::new(),
            root,
            version: g.version(),
        };

        // Iterative DFS post-order from the root.
        {
            let mut seen: SecondaryMap<Node, bool> = SecondaryMap::new();
            let mut stack: Vec<(Node, usize)> = vec![(root, 0)];
            seen[root] = true;
            while let Some(top) = stack.last_mut() {
                let (b, pos) = (top.0, top.1);
                let succs = Self::fwd(bg, direction, b);
                if pos < succs.len() {
                    top.1 += 1;
                    let s = succs[pos];
                    if !seen[s] {
                        seen[s] = true;
                        stack.push((s, 0));
                    }
                } else {
                    stack.pop();
                    tree.postorder.push(b);
                }
            }
        }

        // RPO numbers, root first.
        for (i, &b) in tree.postorder.iter().rev().enumerate() {
            tree.nodes[b].rpo_number = i as u32 + 1;
        }

        // Idom estimates in reverse post-order, iterated to the fixpoint.
        // Only predecessors that already carry an estimate take part; the
        // RPO guarantees at least one per block in the first round.
        // Reducible flow converges after one iteration.
        let rpo: Vec<Node> = tree.postorder.iter().rev().copied().collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom: Option<Node> = None;
                for &p in Self::back(bg, direction, b) {
                    if tree.nodes[p].rpo_number == 0 {
                        continue; // unreachable in this direction
                    }
                    if p != root && tree.nodes[p].idom.is_none() {
                        continue; // no estimate yet
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => tree.intersect(cur, p),
                    });
                }
                let new_idom: PackedOption<Node> = new_idom.into();
                if tree.nodes[b].idom != new_idom {
                    tree.nodes[b].idom = new_idom;
                    changed = true;
                }
            }
        }

        // Child lists ordered by RPO, then pre-order numbering for O(1)
        // dominance tests.
        for &b in &rpo {
            if let Some(idom) = tree.nodes[b].idom.expand() {
                tree.children[idom].push(b);
            }
        }
        let mut counter = 0u32;
        let mut stack: Vec<(Node, usize)> = vec![(root, 0)];
        counter += 1;
        tree.nodes[root].pre_number = counter;
        while let Some(top) = stack.last_mut() {
            let (b, pos) = (top.0, top.1);
            if pos < tree.children[b].len() {
                top.1 += 1;
                let c = tree.children[b][pos];
                counter += 1;
                tree.nodes[c].pre_number = counter;
                stack.push((c, 0));
            } else {
                tree.nodes[b].pre_max = counter;
                stack.pop();
            }
        }

        tree
    }

    // Walk two dominator chains towards the root until they meet.
    fn intersect(&self, mut a: Node, mut b: Node) -> Node {
        while a != b {
            while self.nodes[a].rpo_number > self.nodes[b].rpo_number {
                a = match self.nodes[a].idom.expand() {
                    Some(i) => i,
                    None => return b,
                };
            }
            while self.nodes[b].rpo_number > self.nodes[a].rpo_number {
                b = match self.nodes[b].idom.expand() {
                    Some(i) => i,
                    None => return a,
                };
            }
        }
        a
    }

    /// The direction this tree was computed for.
    pub fn direction(&self) -> DomDirection {
        self.direction
    }

    /// The tree root (entry block for dominators, exit for post-dominators).
    pub fn root(&self) -> Node {
        self.root
    }

    /// Is `b` reachable in the direction of this tree?
    pub fn is_reachable(&self, b: Node) -> bool {
        self.nodes[b].rpo_number != 0
    }

    /// The immediate (post-)dominator of `b`.
    pub fn idom(&self, b: Node) -> Option<Node> {
        self.nodes[b].idom.expand()
    }

    /// Does `a` (post-)dominate `b`? A block dominates itself.
    pub fn dominates(&self, a: Node, b: Node) -> bool {
        let (na, nb) = (&self.nodes[a], &self.nodes[b]);
        na.pre_number != 0
            && nb.pre_number != 0
            && na.pre_number <= nb.pre_number
            && na.pre_max >= nb.pre_number
    }

    /// Does `a` strictly (post-)dominate `b`?
    pub fn strictly_dominates(&self, a: Node, b: Node) -> bool {
        a != b && self.dominates(a, b)
    }

    /// The blocks immediately dominated by `b`, in RPO.
    pub fn children(&self, b: Node) -> &[Node] {
        &self.children[b]
    }

    /// The post-order this tree was computed from.
    pub fn postorder(&self) -> &[Node] {
        &self.postorder
    }

    /// Dominator-tree pre-order over all reachable blocks, root first.
    pub fn preorder(&self) -> Vec<Node> {
        let mut out = Vec::with_capacity(self.postorder.len());
        let mut stack = vec![self.root];
        while let Some(b) = stack.pop() {
            out.push(b);
            for &c in self.children(b).iter().rev() {
                stack.push(c);
            }
        }
        out
    }

    /// Compute the dominance frontier of every block.
    ///
    /// `DF(b)` contains each block `f` with a predecessor dominated by `b`
    /// while `f` itself is not strictly dominated by `b`.
    pub fn frontiers(&self, bg: &BlockGraph) -> SecondaryMap<Node, Vec<Node>> {
        let mut df: SecondaryMap<Node, Vec<Node>> = SecondaryMap::new();
        for &b in &self.postorder {
            let preds = Self::back(bg, self.direction, b);
            if preds.len() < 2 {
                continue;
            }
            let stop = self.idom(b);
            for &p in preds {
                if !self.is_reachable(p) {
                    continue;
                }
                let mut runner = p;
                while Some(runner) != stop {
                    if !df[runner].contains(&b) {
                        df[runner].push(b);
                    }
                    runner = match self.idom(runner) {
                        Some(r) => r,
                        None => break,
                    };
                }
            }
        }
        df
    }

    /// Is this information still consistent with the graph?
    pub fn is_consistent(&self, g: &Graph) -> bool {
        self.version == g.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ana::testutil::diamond;
    use crate::mode::ModeRegistry;

    #[test]
    fn diamond_dominators() {
        let modes = ModeRegistry::new();
        let (mut g, [header, then_b, else_b, join]) = diamond(&modes);
        let bg = BlockGraph::compute(&mut g);
        let dt = DomTree::compute(&g, &bg);

        assert_eq!(dt.idom(join), Some(header));
        assert_eq!(dt.idom(then_b), Some(header));
        assert_eq!(dt.idom(else_b), Some(header));
        assert!(dt.dominates(header, join));
        assert!(dt.dominates(header, header));
        assert!(!dt.dominates(then_b, join));
        assert!(dt.strictly_dominates(header, then_b));
        assert!(!dt.strictly_dominates(header, header));
        // The dominator relation is a tree rooted at the entry.
        assert_eq!(dt.root(), g.anchors.start_block);
        assert!(dt.dominates(g.anchors.start_block, join));
    }

    #[test]
    fn diamond_postdominators() {
        let modes = ModeRegistry::new();
        let (mut g, [header, then_b, else_b, join]) = diamond(&modes);
        let bg = BlockGraph::compute(&mut g);
        let pdt = DomTree::compute_postdom(&g, &bg);

        assert_eq!(pdt.idom(header), Some(join));
        assert_eq!(pdt.idom(then_b), Some(join));
        assert_eq!(pdt.idom(else_b), Some(join));
        assert!(pdt.dominates(join, header));
    }

    #[test]
    fn frontiers_of_diamond() {
        let modes = ModeRegistry::new();
        let (mut g, [header, then_b, else_b, join]) = diamond(&modes);
        let bg = BlockGraph::compute(&mut g);
        let dt = DomTree::compute(&g, &bg);
        let df = dt.frontiers(&bg);
        assert!(df[then_b].contains(&join));
        assert!(df[else_b].contains(&join));
        assert!(!df[header].contains(&join));
    }

    #[test]
    fn recomputation_is_identical() {
        let modes = ModeRegistry::new();
        let (mut g, blocks) = diamond(&modes);
        let bg = BlockGraph::compute(&mut g);
        let dt1 = DomTree::compute(&g, &bg);
        let dt2 = DomTree::compute(&g, &bg);
        for &b in &blocks {
            assert_eq!(dt1.idom(b), dt2.idom(b));
        }
        assert!(dt1.is_consistent(&g));
    }
}
