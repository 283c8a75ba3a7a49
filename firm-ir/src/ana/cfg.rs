//! The block-level control flow graph.
//!
//! Block predecessors are implicit in the IR (a block's inputs are the
//! jumps targeting it); this service materialises the successor direction
//! and a reverse post-order so the iterative analyses have something to
//! index. `Bad` predecessors (dead entries) are skipped.

use crate::ir::{walk, Graph, Node};
use crate::timing;
use firm_arena::SecondaryMap;

/// Block predecessor/successor lists plus a reverse post-order.
pub struct BlockGraph {
    /// All blocks, in reverse post-order from the entry; blocks that are
    /// not forward-reachable follow at the end.
    pub blocks: Vec<Node>,
    /// The entry (start) block.
    pub entry: Node,
    /// The exit (end) block.
    pub exit: Node,
    preds: SecondaryMap<Node, Vec<Node>>,
    succs: SecondaryMap<Node, Vec<Node>>,
    version: u64,
}

impl BlockGraph {
    /// Compute the block graph of `g`.
    pub fn compute(g: &mut Graph) -> Self {
        let _tt = timing::blockgraph();
        let all = walk::collect_blocks(g);
        let mut preds: SecondaryMap<Node, Vec<Node>> = SecondaryMap::new();
        let mut succs: SecondaryMap<Node, Vec<Node>> = SecondaryMap::new();
        for &b in &all {
            for i in 0..g.n_block_preds(b) {
                if let Some(p) = g.block_pred_block(b, i) {
                    preds[b].push(p);
                    succs[p].push(b);
                }
            }
        }

        // Reverse post-order of the forward graph from the entry.
        let entry = g.anchors.start_block;
        let exit = g.anchors.end_block;
        let mut post: Vec<Node> = Vec::new();
        let mut seen: SecondaryMap<Node, bool> = SecondaryMap::new();
        let mut stack: Vec<(Node, usize)> = vec![(entry, 0)];
        seen[entry] = true;
        while let Some(top) = stack.last_mut() {
            let (b, pos) = (top.0, top.1);
            if pos < succs[b].len() {
                top.1 += 1;
                let s = succs[b][pos];
                if !seen[s] {
                    seen[s] = true;
                    stack.push((s, 0));
                }
            } else {
                stack.pop();
                post.push(b);
            }
        }
        let mut blocks: Vec<Node> = post.into_iter().rev().collect();
        for &b in &all {
            if !seen[b] {
                blocks.push(b);
            }
        }

        BlockGraph {
            blocks,
            entry,
            exit,
            preds,
            succs,
            version: g.version(),
        }
    }

    /// Block-level predecessors of `b` (dead entries already dropped).
    pub fn preds(&self, b: Node) -> &[Node] {
        &self.preds[b]
    }

    /// Block-level successors of `b`.
    pub fn succs(&self, b: Node) -> &[Node] {
        &self.succs[b]
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
    fn diamond_edges() {
        let modes = ModeRegistry::new();
        let (mut g, [header, then_b, else_b, join]) = diamond(&modes);
        let bg = BlockGraph::compute(&mut g);
        assert_eq!(bg.preds(join).len(), 2);
        assert!(bg.succs(header).contains(&then_b));
        assert!(bg.succs(header).contains(&else_b));
        assert_eq!(bg.preds(then_b), &[header]);
        assert_eq!(bg.succs(join), &[g.anchors.end_block]);
        assert!(bg.is_consistent(&g));
        // RPO starts at the entry.
        assert_eq!(bg.blocks[0], bg.entry);
    }
}
