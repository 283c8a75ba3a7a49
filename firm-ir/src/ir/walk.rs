//! Graph walkers.
//!
//! All walkers are iterative (explicit stacks) and snapshot their
//! traversal before invoking callbacks, so a callback may mutate the graph
//! (`exchange`, new nodes) without upsetting the walk. Nodes created
//! during a walk are not visited by it; logically deleted nodes still
//! appear under their old identity.
//!
//! The reliable root is `End`: keep-alive edges make every intentionally
//! live node reachable from it against the use direction.

use crate::ir::opcode::Opcode;
use crate::ir::{Graph, Node};
use firm_arena::SecondaryMap;
use smallvec::SmallVec;

/// Compute a DFS pre/post order over all nodes reachable from `End`.
///
/// Traversal follows the block edge first, then the inputs in order.
/// Returns `(pre, post)` sequences.
pub fn node_orders(g: &mut Graph) -> (Vec<Node>, Vec<Node>) {
    let epoch = g.reserve_epoch();
    let mut pre = Vec::new();
    let mut post = Vec::new();
    // (node, next edge index); edge 0 is the block edge.
    let mut stack: Vec<(Node, usize)> = Vec::new();

    let root = g.anchors.end;
    g.mark_visited(root, epoch);
    pre.push(root);
    stack.push((root, 0));

    while let Some(&mut (n, ref mut edge)) = stack.last_mut() {
        let arity = g.arity(n);
        if *edge > arity {
            post.push(n);
            stack.pop();
            continue;
        }
        let next = if *edge == 0 {
            *edge += 1;
            match g.try_block_of(n) {
                Some(b) => b,
                None => continue,
            }
        } else {
            let i = *edge - 1;
            *edge += 1;
            g.raw_input(n, i)
        };
        let next = g.skip_id(next);
        if !g.is_visited(next, epoch) {
            g.mark_visited(next, epoch);
            pre.push(next);
            stack.push((next, 0));
        }
    }
    (pre, post)
}

/// Walk all reachable nodes, calling `pre` in DFS pre-order and `post` in
/// post-order. Either callback may be a no-op closure.
pub fn walk_graph<Pre, Post>(g: &mut Graph, mut pre: Pre, mut post: Post)
where
    Pre: FnMut(&mut Graph, Node),
    Post: FnMut(&mut Graph, Node),
{
    let (pre_order, post_order) = node_orders(g);
    for n in pre_order {
        pre(g, n);
    }
    for n in post_order {
        post(g, n);
    }
}

/// Walk all reachable nodes in post-order.
pub fn walk_post<F: FnMut(&mut Graph, Node)>(g: &mut Graph, mut f: F) {
    let (_, post_order) = node_orders(g);
    for n in post_order {
        f(g, n);
    }
}

/// The number of nodes reachable from `End`.
pub fn count_reachable_nodes(g: &mut Graph) -> usize {
    node_orders(g).1.len()
}

/// Collect all blocks reachable against control flow from the end block.
///
/// The start block is always included. The result is in discovery order.
pub fn collect_blocks(g: &mut Graph) -> Vec<Node> {
    let epoch = g.reserve_epoch();
    let mut blocks = Vec::new();
    let mut stack: Vec<Node> = Vec::new();

    for root in [g.anchors.end_block, g.anchors.start_block].iter() {
        if !g.is_visited(*root, epoch) {
            g.mark_visited(*root, epoch);
            stack.push(*root);
        }
    }
    while let Some(b) = stack.pop() {
        blocks.push(b);
        for i in 0..g.n_block_preds(b) {
            if let Some(pred) = g.block_pred_block(b, i) {
                if !g.is_visited(pred, epoch) {
                    g.mark_visited(pred, epoch);
                    stack.push(pred);
                }
            }
        }
    }
    blocks
}

/// Walk the block graph, calling `f` once per reachable block.
pub fn walk_blocks<F: FnMut(&mut Graph, Node)>(g: &mut Graph, mut f: F) {
    for b in collect_blocks(g) {
        f(g, b);
    }
}

/// Bucket every reachable non-Block node by its containing block.
pub fn nodes_per_block(g: &mut Graph) -> SecondaryMap<Node, Vec<Node>> {
    let (_, post) = node_orders(g);
    let mut map: SecondaryMap<Node, Vec<Node>> = SecondaryMap::new();
    for n in post {
        if !g.is_block(n) {
            if let Some(b) = g.try_block_of(n) {
                map[b].push(n);
            }
        }
    }
    map
}

/// Group blocks into extended blocks: maximal single-entry chains without
/// side entries. Each group starts with its leader.
pub fn extended_blocks(g: &mut Graph) -> Vec<Vec<Node>> {
    let blocks = collect_blocks(g);

    // Count control-flow successors per block to find forks.
    let mut n_succs: SecondaryMap<Node, u32> = SecondaryMap::new();
    for &b in &blocks {
        let mut seen: SmallVec<[Node; 4]> = SmallVec::new();
        for i in 0..g.n_block_preds(b) {
            if let Some(p) = g.block_pred_block(b, i) {
                if !seen.contains(&p) {
                    seen.push(p);
                    n_succs[p] += 1;
                }
            }
        }
    }

    // A block belongs to its predecessor's group when it is that
    // predecessor's only successor and has no other entries.
    let mut leader: SecondaryMap<Node, Option<Node>> = SecondaryMap::with_default(None);
    for &b in &blocks {
        let single_pred = if g.n_block_preds(b) == 1 {
            g.block_pred_block(b, 0)
        } else {
            None
        };
        match single_pred {
            Some(p) if n_succs[p] == 1 && p != b => leader[b] = Some(p),
            _ => {}
        }
    }

    let mut groups: Vec<Vec<Node>> = Vec::new();
    let mut group_of: SecondaryMap<Node, Option<usize>> = SecondaryMap::with_default(None);
    for &b in blocks.iter().rev() {
        // Resolve the chain of leaders up to the extended block's head.
        let mut head = b;
        while let Some(l) = leader[head] {
            head = l;
        }
        let idx = match group_of[head] {
            Some(idx) => idx,
            None => {
                groups.push(vec![head]);
                group_of[head] = Some(groups.len() - 1);
                groups.len() - 1
            }
        };
        if b != head {
            groups[idx].push(b);
            group_of[b] = Some(idx);
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::{self, ModeRegistry};

    // start -> a -> b -> end, with a return in b.
    fn linear_graph(modes: &ModeRegistry) -> (Graph, Node, Node) {
        let mut g = Graph::new(modes);
        let start_jmp = g.new_jmp(modes, g.anchors.start_block);
        let a = g.new_block(&[start_jmp]);
        let jmp_a = g.new_jmp(modes, a);
        let b = g.new_block(&[jmp_a]);
        let mem = g.anchors.initial_mem;
        let ret = g.new_return(modes, b, mem, &[]);
        let end_block = g.anchors.end_block;
        g.add_in_edge(end_block, ret);
        g.set_matured(end_block);
        (g, a, b)
    }

    #[test]
    fn walk_visits_each_reachable_node_once() {
        let modes = ModeRegistry::new();
        let (mut g, _, _) = linear_graph(&modes);
        let mut count = std::collections::HashMap::new();
        walk_post(&mut g, |_, n| {
            *count.entry(n).or_insert(0) += 1;
        });
        assert!(count.values().all(|&c| c == 1));
        assert!(count.contains_key(&g.anchors.end));
        assert!(count.contains_key(&g.anchors.start));
    }

    #[test]
    fn blocks_reachable_backwards() {
        let modes = ModeRegistry::new();
        let (mut g, a, b) = linear_graph(&modes);
        let blocks = collect_blocks(&mut g);
        assert!(blocks.contains(&g.anchors.start_block));
        assert!(blocks.contains(&g.anchors.end_block));
        assert!(blocks.contains(&a));
        assert!(blocks.contains(&b));
    }

    #[test]
    fn straight_line_is_one_extended_block() {
        let modes = ModeRegistry::new();
        let (mut g, a, b) = linear_graph(&modes);
        let groups = extended_blocks(&mut g);
        let with_a = groups.iter().find(|grp| grp.contains(&a)).unwrap();
        assert!(with_a.contains(&b), "a and b share one extended block");
    }
}
