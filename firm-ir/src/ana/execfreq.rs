//! Block execution frequencies.
//!
//! A static estimate scaled from loop depth: each nesting level multiplies
//! the expected execution count by a constant factor. Spill and copy costs
//! are weighted with these numbers, so only the relative magnitudes
//! matter.

use crate::ana::loops::LoopTree;
use crate::ir::{Graph, Node};
use firm_arena::SecondaryMap;

/// Expected executions per loop iteration level.
const LOOP_WEIGHT: f64 = 10.0;

/// Per-block execution frequency estimates.
pub struct ExecFreq {
    freq: SecondaryMap<Node, f64>,
    version: u64,
}

impl ExecFreq {
    /// Estimate frequencies from the control-flow loop tree.
    pub fn compute(g: &Graph, blocks: &[Node], cf_loops: &LoopTree) -> Self {
        let mut freq: SecondaryMap<Node, f64> = SecondaryMap::with_default(1.0);
        for &b in blocks {
            freq[b] = LOOP_WEIGHT.powi(cf_loops.depth_of(b) as i32);
        }
        ExecFreq {
            freq,
            version: g.version(),
        }
    }

    /// The estimated execution frequency of `b`.
    pub fn get(&self, b: Node) -> f64 {
        self.freq[b]
    }

    /// Is this information still consistent with the graph?
    pub fn is_consistent(&self, g: &Graph) -> bool {
        self.version == g.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ana::cfg::BlockGraph;
    use crate::ana::testutil::counted_loop;
    use crate::mode::ModeRegistry;

    #[test]
    fn loop_bodies_run_hotter() {
        let modes = ModeRegistry::new();
        let (mut g, [header, body, exit], _) = counted_loop(&modes);
        let bg = BlockGraph::compute(&mut g);
        let loops = LoopTree::compute_cf(&mut g, &bg);
        let freq = ExecFreq::compute(&g, &bg.blocks, &loops);
        assert!(freq.get(body) > freq.get(exit));
        assert_eq!(freq.get(header), freq.get(body));
        assert_eq!(freq.get(exit), 1.0);
    }
}
