//! Loop trees.
//!
//! Two distinct entry points survive from the ancestry of this analysis
//! and are kept apart deliberately, because they disagree about what may
//! head a loop and how degenerate loops are treated:
//!
//! - [`LoopTree::compute_cf`] walks blocks only; every loop is headed by a
//!   block, and degenerate loops (no own members, a single son) are
//!   collapsed into their parent.
//! - [`LoopTree::compute_data`] walks all nodes; loops are materialised
//!   only around a legal head (a block or a phi), everything else stays
//!   attached to the enclosing loop.
//!
//! Both share the iterative SCC machinery and both mark the loop-carried
//! inputs of every head in the node's back-edge bits: afterwards, an input
//! `u -> v` is marked iff it closes a cycle of its loop.

use crate::ana::cfg::BlockGraph;
use crate::ana::scc;
use crate::ir::{walk, Graph, Node, Opcode};
use crate::mode::ModeRegistry;
use crate::tarval::Tarval;
use crate::timing;
use firm_arena::{idx_impl, PackedOption, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

/// A loop handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loop(u32);
idx_impl!(Loop, "loop");

/// One loop of the tree.
#[derive(Debug, Clone)]
pub struct LoopData {
    /// The enclosing loop; none for the root pseudo-loop.
    pub parent: PackedOption<Loop>,
    /// Nesting depth; the root has depth 0.
    pub depth: u32,
    /// The loop head (a block, or a phi in the data variant); none for the
    /// root.
    pub head: PackedOption<Node>,
    /// Directly nested loops.
    pub sons: Vec<Loop>,
    /// Elements belonging to this loop and no son.
    pub nodes: Vec<Node>,
}

/// A loop forest over one graph.
pub struct LoopTree {
    /// All loops; the root pseudo-loop holds everything outside any cycle.
    pub loops: PrimaryMap<Loop, LoopData>,
    /// The root pseudo-loop.
    pub root: Loop,
    loop_of: SecondaryMap<Node, PackedOption<Loop>>,
    version: u64,
}

impl LoopTree {
    /// The innermost loop containing `n`, or the root.
    pub fn loop_of(&self, n: Node) -> Loop {
        self.loop_of[n].expand().unwrap_or(self.root)
    }

    /// Nesting depth of `n`'s innermost loop.
    pub fn depth_of(&self, n: Node) -> u32 {
        self.loops[self.loop_of(n)].depth
    }

    /// Is this information still consistent with the graph?
    pub fn is_consistent(&self, g: &Graph) -> bool {
        self.version == g.version()
    }

    /// Compute the control-flow loop tree (blocks only).
    pub fn compute_cf(g: &mut Graph, bg: &BlockGraph) -> Self {
        let _tt = timing::looptree();
        let elements: Vec<Node> = bg.blocks.clone();
        let mut tree = Self::build(
            g,
            elements,
            |g, bg, b| {
                let _ = g;
                bg.preds(b).iter().copied().collect()
            },
            bg,
            |_g, n| n, // any block is a legal head
        );
        tree.collapse_degenerate();
        tree.version = g.version();
        tree
    }

    /// Compute the whole-graph loop tree (all nodes; heads are blocks or
    /// phis).
    pub fn compute_data(g: &mut Graph, bg: &BlockGraph) -> Self {
        let _tt = timing::looptree();
        let (_, elements) = walk::node_orders(g);
        let mut tree = Self::build(
            g,
            elements,
            |g, _bg, n| {
                // Dependency edges: the inputs, plus the block edge so that
                // every node partakes in its block's cycle.
                let mut out: SmallVec<[Node; 4]> = SmallVec::new();
                for i in 0..g.arity(n) {
                    let p = g.input(n, i);
                    if !g.is_bad(p) {
                        out.push(p);
                    }
                }
                if let Some(b) = g.try_block_of(n) {
                    out.push(b);
                }
                out
            },
            bg,
            |g, n| {
                let _ = g;
                n
            },
        );
        tree.version = g.version();
        tree
    }

    fn build<E>(
        g: &mut Graph,
        elements: Vec<Node>,
        edges: E,
        bg: &BlockGraph,
        _head_filter: fn(&Graph, Node) -> Node,
    ) -> Self
    where
        E: Fn(&Graph, &BlockGraph, Node) -> SmallVec<[Node; 4]>,
    {
        let mut loops: PrimaryMap<Loop, LoopData> = PrimaryMap::new();
        let root = loops.push(LoopData {
            parent: None.into(),
            depth: 0,
            head: None.into(),
            sons: Vec::new(),
            nodes: Vec::new(),
        });
        let mut loop_of: SecondaryMap<Node, PackedOption<Loop>> = SecondaryMap::new();

        // Region worklist: refine each cyclic component with its head
        // removed, nesting one level per refinement.
        let mut regions: Vec<(Vec<Node>, Loop)> = vec![(elements, root)];
        while let Some((region, parent)) = regions.pop() {
            let in_region: crate::fx::FxHashSet<Node> = region.iter().copied().collect();
            let comps = scc::strongly_connected_components(&region, |n| {
                edges(g, bg, n)
                    .into_iter()
                    .filter(|s| in_region.contains(s))
                    .collect::<SmallVec<[Node; 4]>>()
            });
            for comp in comps {
                let cyclic = scc::is_cyclic(&comp, |n| {
                    edges(g, bg, n)
                        .into_iter()
                        .filter(|s| in_region.contains(s))
                        .collect::<SmallVec<[Node; 4]>>()
                });
                if !cyclic {
                    loop_of[comp[0]] = Some(parent).into();
                    continue;
                }
                let in_comp: crate::fx::FxHashSet<Node> = comp.iter().copied().collect();
                let head = Self::pick_head(g, bg, &comp, &in_comp, &in_region, &edges);
                let head = match head {
                    Some(h) => h,
                    None => {
                        // No legal head: the members stay in the parent.
                        for &m in &comp {
                            loop_of[m] = Some(parent).into();
                        }
                        continue;
                    }
                };
                let depth = loops[parent].depth + 1;
                let lp = loops.push(LoopData {
                    parent: Some(parent).into(),
                    depth,
                    head: Some(head).into(),
                    sons: Vec::new(),
                    nodes: Vec::new(),
                });
                loops[parent].sons.push(lp);
                for &m in &comp {
                    loop_of[m] = Some(lp).into();
                }
                Self::mark_backedges(g, head, &in_comp);
                let inner: Vec<Node> = comp.iter().copied().filter(|&m| m != head).collect();
                if !inner.is_empty() {
                    regions.push((inner, lp));
                }
            }
        }

        // Materialise the member lists.
        let mut tree = LoopTree {
            loops,
            root,
            loop_of,
            version: 0,
        };
        let keys: Vec<Node> = tree
            .loop_of
            .keys()
            .filter(|&n| tree.loop_of[n].is_some())
            .collect();
        for n in keys {
            let lp = tree.loop_of(n);
            tree.loops[lp].nodes.push(n);
        }
        tree
    }

    // A head is a legal member with an entry edge from outside the region
    // (in the walk direction: an edge leaving the component).
    fn pick_head<E>(
        g: &Graph,
        bg: &BlockGraph,
        comp: &[Node],
        in_comp: &crate::fx::FxHashSet<Node>,
        _in_region: &crate::fx::FxHashSet<Node>,
        edges: &E,
    ) -> Option<Node>
    where
        E: Fn(&Graph, &BlockGraph, Node) -> SmallVec<[Node; 4]>,
    {
        let legal = |n: Node| {
            g.is_block(n) || g.opcode(n) == Opcode::Phi
        };
        let mut fallback = None;
        for &m in comp {
            if !legal(m) {
                continue;
            }
            if fallback.is_none() {
                fallback = Some(m);
            }
            if edges(g, bg, m).into_iter().any(|s| !in_comp.contains(&s)) {
                return Some(m);
            }
        }
        fallback
    }

    // Mark the head's loop-carried inputs in its back-edge bits.
    fn mark_backedges(g: &mut Graph, head: Node, in_comp: &crate::fx::FxHashSet<Node>) {
        let arity = g.arity(head);
        let mut marks: SmallVec<[usize; 4]> = SmallVec::new();
        for i in 0..arity {
            let carried = if g.is_block(head) {
                g.block_pred_block(head, i)
                    .map(|p| in_comp.contains(&p))
                    .unwrap_or(false)
            } else {
                let p = g.input(head, i);
                in_comp.contains(&p)
            };
            if carried {
                marks.push(i);
            }
        }
        for i in marks {
            g.nodes[head].backedges.set(i);
        }
    }

    // Splice out loops with no node elements of their own and a single
    // son loop: such wrappers say nothing that the son does not.
    fn collapse_degenerate(&mut self) {
        let keys: Vec<Loop> = self.loops.keys().collect();
        for lp in keys {
            if lp == self.root {
                continue;
            }
            let degenerate = self.loops[lp].nodes.is_empty() && self.loops[lp].sons.len() == 1;
            if !degenerate {
                continue;
            }
            let son = self.loops[lp].sons[0];
            let parent = self.loops[lp].parent.expand().expect("non-root has a parent");
            self.loops[son].parent = Some(parent).into();
            if let Some(pos) = self.loops[parent].sons.iter().position(|&s| s == lp) {
                self.loops[parent].sons[pos] = son;
            }
            self.loops[lp].sons.clear();
            self.loops[lp].parent = None.into();
        }
        // Recompute depths along the surviving tree.
        let root = self.root;
        let mut stack = vec![(root, 0u32)];
        while let Some((lp, depth)) = stack.pop() {
            self.loops[lp].depth = depth;
            for &s in &self.loops[lp].sons {
                stack.push((s, depth + 1));
            }
        }
    }
}

/// A recognised counting-loop variable.
#[derive(Debug, Clone, Copy)]
pub struct InductionVar {
    /// The loop it belongs to.
    pub lp: Loop,
    /// The loop-carried phi (the variable).
    pub phi: Node,
    /// The value entering the loop.
    pub start: Node,
    /// The per-iteration step constant.
    pub step: Tarval,
    /// The node computing the next value.
    pub increment: Node,
    /// The bound the variable is compared against, if the loop test is a
    /// comparison in the header.
    pub stop: Option<Node>,
}

/// Recognise induction variables of counting loops.
///
/// A candidate is a two-input header phi whose loop-carried input adds (or
/// subtracts) a constant to the phi itself.
pub fn find_induction_variables(
    g: &mut Graph,
    tree: &LoopTree,
    modes: &ModeRegistry,
) -> Vec<InductionVar> {
    let per_block = walk::nodes_per_block(g);
    let mut out = Vec::new();
    for lp in tree.loops.keys() {
        let head = match tree.loops[lp].head.expand() {
            Some(h) if g.is_block(h) => h,
            _ => continue,
        };
        for &n in &per_block[head] {
            if g.opcode(n) != Opcode::Phi || g.arity(n) != 2 {
                continue;
            }
            // One input enters the loop, the other is carried around it.
            let (entry_idx, back_idx) = match (
                g.nodes[head].backedges.get(0),
                g.nodes[head].backedges.get(1),
            ) {
                (false, true) => (0, 1),
                (true, false) => (1, 0),
                _ => continue,
            };
            let start = g.input(n, entry_idx);
            let incr = g.input(n, back_idx);
            let step = match g.opcode(incr) {
                Opcode::Add | Opcode::Sub => {
                    let (a, b) = (g.input(incr, 0), g.input(incr, 1));
                    let konst = if a == n {
                        b
                    } else if b == n && g.opcode(incr) == Opcode::Add {
                        a
                    } else {
                        continue;
                    };
                    if g.opcode(konst) != Opcode::Const {
                        continue;
                    }
                    let tv = g.const_value(konst);
                    if g.opcode(incr) == Opcode::Sub {
                        tv.neg(modes)
                    } else {
                        tv
                    }
                }
                _ => continue,
            };
            // The loop test, when present, is a header comparison against
            // the variable or its increment.
            let mut stop = None;
            for &m in &per_block[head] {
                if g.opcode(m) == Opcode::Cmp {
                    let (l, r) = (g.input(m, 0), g.input(m, 1));
                    if l == n || l == incr {
                        stop = Some(r);
                    } else if r == n || r == incr {
                        stop = Some(l);
                    }
                }
            }
            out.push(InductionVar {
                lp,
                phi: n,
                start,
                step,
                increment: incr,
                stop,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ana::testutil::{counted_loop, diamond};
    use crate::mode::ModeRegistry;

    #[test]
    fn diamond_has_no_loops() {
        let modes = ModeRegistry::new();
        let (mut g, blocks) = diamond(&modes);
        let bg = BlockGraph::compute(&mut g);
        let tree = LoopTree::compute_cf(&mut g, &bg);
        for &b in &blocks {
            assert_eq!(tree.loop_of(b), tree.root);
            assert_eq!(tree.depth_of(b), 0);
        }
    }

    #[test]
    fn counted_loop_blocks_nest_once() {
        let modes = ModeRegistry::new();
        let (mut g, [header, body, exit], _phi) = counted_loop(&modes);
        let bg = BlockGraph::compute(&mut g);
        let tree = LoopTree::compute_cf(&mut g, &bg);
        assert_eq!(tree.depth_of(header), 1);
        assert_eq!(tree.depth_of(body), 1);
        assert_eq!(tree.depth_of(exit), 0);
        assert_eq!(tree.loop_of(header), tree.loop_of(body));
        let lp = tree.loop_of(header);
        assert_eq!(tree.loops[lp].head.expand(), Some(header));
        // The loop-carried entry of the header is marked as a back-edge.
        assert!(g.nodes[header].backedges.any());
        assert!(!g.nodes[header].backedges.get(0));
        assert!(g.nodes[header].backedges.get(1));
    }

    #[test]
    fn data_loop_tree_finds_the_phi_cycle() {
        let modes = ModeRegistry::new();
        let (mut g, [header, _body, _exit], phi) = counted_loop(&modes);
        let bg = BlockGraph::compute(&mut g);
        let tree = LoopTree::compute_data(&mut g, &bg);
        let lp = tree.loop_of(phi);
        assert_ne!(lp, tree.root, "the carried phi is inside a loop");
        let head = tree.loops[lp].head.expand().unwrap();
        assert!(
            g.is_block(head) || g.opcode(head) == Opcode::Phi,
            "loop heads are blocks or phis"
        );
        assert_ne!(tree.loop_of(header), tree.root);
    }

    #[test]
    fn induction_variable_is_recognised() {
        let modes = ModeRegistry::new();
        let (mut g, [_header, _body, _exit], phi) = counted_loop(&modes);
        let bg = BlockGraph::compute(&mut g);
        let tree = LoopTree::compute_cf(&mut g, &bg);
        let ivs = find_induction_variables(&mut g, &tree, &modes);
        let iv = ivs.iter().find(|iv| iv.phi == phi).expect("found the counter");
        assert_eq!(iv.step.as_i64(&modes), Some(1));
        assert_eq!(g.opcode(iv.start), Opcode::Const);
        assert!(iv.stop.is_some());
    }
}
