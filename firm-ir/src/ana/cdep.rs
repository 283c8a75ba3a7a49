//! Control dependence.
//!
//! A block `B` is control dependent on a predecessor block `P` of some
//! block when `P` decides whether `B` executes: walking from a block up
//! the post-dominator tree until `P`'s immediate post-dominator collects
//! exactly the dependent blocks. The start and end block depend on
//! nothing.
//!
//! The graph carries no edge from `Start` to `End`, so for the duration
//! of the computation the start block's immediate post-dominator is taken
//! to be the end block, as if that virtual edge existed.

use crate::ana::cfg::BlockGraph;
use crate::ana::domtree::DomTree;
use crate::ir::{Graph, Node};
use crate::timing;
use firm_arena::SecondaryMap;

/// Control-dependence lists per block.
pub struct Cdep {
    deps: SecondaryMap<Node, Vec<Node>>,
    version: u64,
}

impl Cdep {
    /// Compute control dependence for `g`. `postdom` must be the
    /// post-dominator tree of `g`.
    pub fn compute(g: &Graph, bg: &BlockGraph, postdom: &DomTree) -> Self {
        let _tt = timing::cdep();
        debug_assert_eq!(
            postdom.direction(),
            crate::ana::domtree::DomDirection::PostDom
        );
        let start = g.anchors.start_block;
        let end = g.anchors.end_block;
        // The temporary virtual Start -> End edge.
        let ipdom = |b: Node| -> Option<Node> {
            if b == start {
                Some(end)
            } else {
                postdom.idom(b)
            }
        };

        let mut deps: SecondaryMap<Node, Vec<Node>> = SecondaryMap::new();
        for &b in &bg.blocks {
            if b == start || b == end {
                continue;
            }
            for &p in bg.preds(b) {
                let pdom = ipdom(p);
                let mut dependee = b;
                loop {
                    if Some(dependee) == pdom {
                        break;
                    }
                    if !deps[dependee].contains(&p) {
                        deps[dependee].push(p);
                    }
                    dependee = match ipdom(dependee) {
                        Some(d) => d,
                        None => break,
                    };
                }
            }
        }
        Cdep {
            deps,
            version: g.version(),
        }
    }

    /// All blocks `b` directly depends on.
    pub fn find_cdep(&self, b: Node) -> &[Node] {
        &self.deps[b]
    }

    /// Is `dependee` directly control dependent on `candidate`?
    pub fn is_cdep_on(&self, dependee: Node, candidate: Node) -> bool {
        self.deps[dependee].contains(&candidate)
    }

    /// Is `dependee` transitively control dependent on `candidate`,
    /// through blocks with a unique dependence each?
    pub fn is_iterated_cdep_on(&self, mut dependee: Node, candidate: Node) -> bool {
        loop {
            let deps = &self.deps[dependee];
            if deps.len() != 1 {
                return false;
            }
            if deps[0] == candidate {
                return true;
            }
            dependee = deps[0];
        }
    }

    /// The unique block `b` depends on, if there is exactly one.
    pub fn unique_cdep(&self, b: Node) -> Option<Node> {
        match self.deps[b].as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// Does `b` depend on more than one block?
    pub fn has_multiple_cdep(&self, b: Node) -> bool {
        self.deps[b].len() > 1
    }

    /// Carry the dependence info of `from` over to `to` (used when a block
    /// is exchanged for another).
    pub fn exchange_cdep(&mut self, to: Node, from: Node) {
        let copied = self.deps[from].clone();
        self.deps[to] = copied;
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
    fn diamond_dependences() {
        let modes = ModeRegistry::new();
        let (mut g, [header, then_b, else_b, join]) = diamond(&modes);
        let bg = BlockGraph::compute(&mut g);
        let pdt = DomTree::compute_postdom(&g, &bg);
        let cdep = Cdep::compute(&g, &bg, &pdt);

        // The two arms depend on the branching header; the join does not.
        assert!(cdep.is_cdep_on(then_b, header));
        assert!(cdep.is_cdep_on(else_b, header));
        assert!(!cdep.is_cdep_on(join, header));
        assert_eq!(cdep.unique_cdep(then_b), Some(header));
        assert!(!cdep.has_multiple_cdep(then_b));
        // Start and end depend on nothing.
        assert!(cdep.find_cdep(g.anchors.start_block).is_empty());
        assert!(cdep.find_cdep(g.anchors.end_block).is_empty());
    }

    #[test]
    fn exchange_copies_dependences() {
        let modes = ModeRegistry::new();
        let (mut g, [header, then_b, ..]) = diamond(&modes);
        let bg = BlockGraph::compute(&mut g);
        let pdt = DomTree::compute_postdom(&g, &bg);
        let mut cdep = Cdep::compute(&g, &bg, &pdt);
        let fresh = g.new_block(&[]);
        cdep.exchange_cdep(fresh, then_b);
        assert!(cdep.is_cdep_on(fresh, header));
    }
}
