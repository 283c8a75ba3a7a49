//! The graph builder.

use crate::variable::Variable;
use firm_ir::ir::{Graph, Node, NodeAttr, Opcode};
use firm_ir::mode::{Mode, ModeRegistry};
use firm_ir::tarval::Tarval;
use firm_ir::tr::{Entity, Type};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Builds one graph, maintaining SSA form on the fly.
pub struct GraphBuilder<'a> {
    /// The graph under construction; public so callers can query it
    /// mid-build.
    pub graph: &'a mut Graph,
    modes: &'a ModeRegistry,
    /// Current definition per (block, variable).
    defs: FxHashMap<(Node, Variable), Node>,
    /// Placeholder phis of immature blocks.
    incomplete: FxHashMap<Node, Vec<(Variable, Node)>>,
    /// Blocks created here that have not matured yet.
    open_blocks: Vec<Node>,
    /// Every phi this builder created, for trivial-phi propagation.
    created_phis: Vec<Node>,
}

impl<'a> GraphBuilder<'a> {
    /// Start building into `graph`. Construction begins in the start
    /// block.
    pub fn new(graph: &'a mut Graph, modes: &'a ModeRegistry) -> Self {
        Self {
            graph,
            modes,
            defs: FxHashMap::default(),
            incomplete: FxHashMap::default(),
            open_blocks: Vec::new(),
            created_phis: Vec::new(),
        }
    }

    // ---- blocks -----------------------------------------------------------

    /// Create a new block with an open predecessor list.
    pub fn new_block(&mut self) -> Node {
        let b = self.graph.new_immature_block();
        self.open_blocks.push(b);
        b
    }

    /// Add the control-flow edge `cf` to the open block `block`.
    pub fn add_in_edge(&mut self, block: Node, cf: Node) {
        self.graph.add_in_edge(block, cf);
    }

    /// The block new nodes go to.
    pub fn current_block(&self) -> Node {
        self.graph
            .current_block()
            .expect("construction has a current block")
    }

    /// Direct new nodes to `block`.
    pub fn set_current_block(&mut self, block: Node) {
        self.graph.set_current_block(block);
    }

    /// Declare the predecessor list of `block` final, fill its placeholder
    /// phis, and fold the trivial ones.
    pub fn mature_block(&mut self, block: Node) {
        if self.graph.is_matured(block) {
            return;
        }
        self.graph.set_matured(block);
        self.open_blocks.retain(|&b| b != block);
        let placeholders = self.incomplete.remove(&block).unwrap_or_default();
        for (var, phi) in placeholders {
            let mode = self.graph.mode(phi);
            let inputs = self.phi_inputs(block, var, mode);
            self.graph.set_inputs(phi, &inputs);
            self.fold_trivial_phis();
        }
    }

    // ---- variables --------------------------------------------------------

    /// Write `node` as the current value of `var`.
    pub fn set_value(&mut self, var: Variable, node: Node) {
        let block = self.current_block();
        self.defs.insert((block, var), node);
    }

    /// Read the current value of `var` as a `mode` value, placing phis
    /// where control flow merges.
    pub fn get_value(&mut self, var: Variable, mode: Mode) -> Node {
        let block = self.current_block();
        let def = self.read_var(block, var, mode);
        let def = self.graph.skip_id(def);
        debug_assert_eq!(
            self.graph.mode(def),
            mode,
            "variable {} read with mode {} but defined with {}",
            var,
            mode,
            self.graph.mode(def),
        );
        def
    }

    // Find (or lazily create) the definition of `var` visible in `block`.
    // Iterative: single-predecessor chains are walked directly, joins get
    // a phi whose inputs are resolved through a work queue.
    fn read_var(&mut self, block: Node, var: Variable, mode: Mode) -> Node {
        let mut pending: Vec<(Node, Node)> = Vec::new(); // (phi, its block)
        let def = self.find_def(block, var, mode, &mut pending);
        while let Some((phi, b)) = pending.pop() {
            let inputs = {
                let mut inputs: SmallVec<[Node; 4]> = SmallVec::new();
                for i in 0..self.graph.n_block_preds(b) {
                    let input = match self.graph.block_pred_block(b, i) {
                        Some(p) => self.find_def(p, var, mode, &mut pending),
                        None => self.graph.anchors.bad,
                    };
                    inputs.push(input);
                }
                inputs
            };
            self.graph.set_inputs(phi, &inputs);
        }
        self.fold_trivial_phis();
        def
    }

    // The definition search proper. Fills `pending` with phis whose
    // inputs still need resolving.
    fn find_def(
        &mut self,
        block: Node,
        var: Variable,
        mode: Mode,
        pending: &mut Vec<(Node, Node)>,
    ) -> Node {
        let mut chain: SmallVec<[Node; 4]> = SmallVec::new();
        let mut b = block;
        let def = loop {
            if let Some(&d) = self.defs.get(&(b, var)) {
                break self.graph.skip_id(d);
            }
            if !self.graph.is_matured(b) {
                // The predecessors are unknown; a placeholder phi stands
                // in until the block matures.
                let phi = self.new_phi_shell(b, mode);
                self.incomplete.entry(b).or_insert_with(Vec::new).push((var, phi));
                self.defs.insert((b, var), phi);
                break phi;
            }
            match self.graph.n_block_preds(b) {
                0 => {
                    // No path defines the slot: a well-defined unknown.
                    break self.graph.new_unknown(mode);
                }
                1 => match self.graph.block_pred_block(b, 0) {
                    Some(p) => {
                        chain.push(b);
                        b = p;
                    }
                    None => break self.graph.new_unknown(mode),
                },
                _ => {
                    // A join: the phi exists before its inputs do, so a
                    // cyclic read (loop headers) finds it instead of
                    // recursing forever.
                    let phi = self.new_phi_shell(b, mode);
                    self.defs.insert((b, var), phi);
                    pending.push((phi, b));
                    break phi;
                }
            }
        };
        for c in chain {
            self.defs.insert((c, var), def);
        }
        def
    }

    fn new_phi_shell(&mut self, block: Node, mode: Mode) -> Node {
        let phi = self
            .graph
            .add_node(Opcode::Phi, mode, Some(block), &[], NodeAttr::None);
        self.created_phis.push(phi);
        phi
    }

    fn phi_inputs(&mut self, block: Node, var: Variable, mode: Mode) -> SmallVec<[Node; 4]> {
        let mut pending: Vec<(Node, Node)> = Vec::new();
        let mut inputs: SmallVec<[Node; 4]> = SmallVec::new();
        for i in 0..self.graph.n_block_preds(block) {
            let input = match self.graph.block_pred_block(block, i) {
                Some(p) => self.find_def(p, var, mode, &mut pending),
                None => self.graph.anchors.bad,
            };
            inputs.push(input);
        }
        while let Some((phi, b)) = pending.pop() {
            let mut phi_ins: SmallVec<[Node; 4]> = SmallVec::new();
            for i in 0..self.graph.n_block_preds(b) {
                let input = match self.graph.block_pred_block(b, i) {
                    Some(p) => self.find_def(p, var, mode, &mut pending),
                    None => self.graph.anchors.bad,
                };
                phi_ins.push(input);
            }
            self.graph.set_inputs(phi, &phi_ins);
        }
        inputs
    }

    // Fold phis whose inputs all agree (or refer to the phi itself), and
    // keep folding: removing one phi can make its users trivial in turn.
    fn fold_trivial_phis(&mut self) {
        loop {
            let mut changed = false;
            for idx in 0..self.created_phis.len() {
                let phi = self.created_phis[idx];
                if self.graph.opcode(phi) != Opcode::Phi {
                    continue; // already folded away
                }
                if self.graph.arity(phi) == 0 {
                    continue; // placeholder, not filled yet
                }
                let mut unique: Option<Node> = None;
                let mut trivial = true;
                for i in 0..self.graph.arity(phi) {
                    let input = self.graph.input(phi, i);
                    if input == phi || self.graph.is_bad(input) {
                        continue;
                    }
                    match unique {
                        None => unique = Some(input),
                        Some(u) if u == input => {}
                        Some(_) => {
                            trivial = false;
                            break;
                        }
                    }
                }
                if !trivial {
                    continue;
                }
                let replacement = match unique {
                    Some(v) => v,
                    // Only self references and dead entries: unreachable.
                    None => self.graph.anchors.bad,
                };
                log::trace!("phi {} is trivial, becomes {}", phi, replacement);
                self.graph.exchange(phi, replacement);
                changed = true;
            }
            if !changed {
                break;
            }
        }
    }

    // ---- node conveniences ------------------------------------------------

    /// A constant in the current graph.
    pub fn ins_const(&mut self, tv: Tarval) -> Node {
        self.graph.new_const(self.modes, tv)
    }

    /// `l + r` in the current block.
    pub fn ins_add(&mut self, l: Node, r: Node) -> Node {
        let b = self.current_block();
        self.graph.new_add(self.modes, b, l, r)
    }

    /// `l - r` in the current block.
    pub fn ins_sub(&mut self, l: Node, r: Node) -> Node {
        let b = self.current_block();
        self.graph.new_sub(self.modes, b, l, r)
    }

    /// `l * r` in the current block.
    pub fn ins_mul(&mut self, l: Node, r: Node) -> Node {
        let b = self.current_block();
        self.graph.new_mul(self.modes, b, l, r)
    }

    /// Compare `l` and `r` in the current block.
    pub fn ins_cmp(&mut self, l: Node, r: Node) -> Node {
        let b = self.current_block();
        self.graph.new_cmp(self.modes, b, l, r)
    }

    /// Project result `num` of `pred` as a `mode` value.
    pub fn ins_proj(&mut self, pred: Node, mode: Mode, num: u32) -> Node {
        self.graph.new_proj(self.modes, pred, mode, num)
    }

    /// Branch on `selector` out of the current block.
    pub fn ins_cond(&mut self, selector: Node) -> Node {
        let b = self.current_block();
        self.graph.new_cond(self.modes, b, selector)
    }

    /// Jump out of the current block.
    pub fn ins_jmp(&mut self) -> Node {
        let b = self.current_block();
        self.graph.new_jmp(self.modes, b)
    }

    /// Return from the current block; the end block learns the new
    /// predecessor.
    pub fn ins_return(&mut self, mem: Node, results: &[Node]) -> Node {
        let b = self.current_block();
        let ret = self.graph.new_return(self.modes, b, mem, results);
        let end_block = self.graph.anchors.end_block;
        self.graph.add_in_edge(end_block, ret);
        ret
    }

    /// Call through `ptr` in the current block.
    pub fn ins_call(&mut self, mem: Node, ptr: Node, args: &[Node], ty: Type) -> Node {
        let b = self.current_block();
        self.graph.new_call(self.modes, b, mem, ptr, args, ty)
    }

    /// Load a `mode` value in the current block.
    pub fn ins_load(&mut self, mem: Node, ptr: Node, mode: Mode) -> Node {
        let b = self.current_block();
        self.graph.new_load(self.modes, b, mem, ptr, mode)
    }

    /// Store `val` in the current block.
    pub fn ins_store(&mut self, mem: Node, ptr: Node, val: Node) -> Node {
        let b = self.current_block();
        self.graph.new_store(self.modes, b, mem, ptr, val)
    }

    /// Select member `entity` relative to `ptr` in the current block.
    pub fn ins_sel(&mut self, mem: Node, ptr: Node, entity: Entity) -> Node {
        let b = self.current_block();
        self.graph.new_sel(self.modes, b, mem, ptr, entity)
    }

    // ---- finish -----------------------------------------------------------

    /// Mature every block still open (the end block included) and seal
    /// the graph. The builder is spent afterwards.
    pub fn finalize(mut self) {
        let open: Vec<Node> = self.open_blocks.clone();
        for b in open {
            self.mature_block(b);
        }
        let end_block = self.graph.anchors.end_block;
        if !self.graph.is_matured(end_block) {
            self.graph.set_matured(end_block);
        }
        debug_assert!(self.incomplete.is_empty(), "placeholder phis left behind");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use firm_ir::ir::{pn, walk};
    use firm_ir::mode;
    use firm_ir::tarval::Relation;

    fn count_ops(g: &mut Graph) -> FxHashMap<Opcode, usize> {
        let (_, nodes) = walk::node_orders(g);
        let mut counts = FxHashMap::default();
        for n in nodes {
            *counts.entry(g.opcode(n)).or_insert(0) += 1;
        }
        counts
    }

    // Scenario: one block computing (x + 1) * 2 from parameter 0.
    #[test]
    fn straight_line_has_no_phis() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        {
            let mut b = GraphBuilder::new(&mut g, &modes);
            let args = b.graph.anchors.args;
            let x = b.ins_proj(args, mode::IS, 0);
            let one = b.ins_const(Tarval::from_i64(1, mode::IS, &modes));
            let two = b.ins_const(Tarval::from_i64(2, mode::IS, &modes));
            let sum = b.ins_add(x, one);
            let result = b.ins_mul(sum, two);
            let mem = b.graph.anchors.initial_mem;
            b.ins_return(mem, &[result]);
            b.finalize();
        }
        let counts = count_ops(&mut g);
        assert_eq!(counts.get(&Opcode::Add), Some(&1));
        assert_eq!(counts.get(&Opcode::Mul), Some(&1));
        assert_eq!(counts.get(&Opcode::Return), Some(&1));
        assert_eq!(counts.get(&Opcode::Const), Some(&2));
        assert_eq!(counts.get(&Opcode::Phi), None);
    }

    // Scenario: if (x < 0) y = 1; else y = 2; return y.
    #[test]
    fn diamond_places_one_phi() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let y = Variable::with_index(0);
        {
            let mut b = GraphBuilder::new(&mut g, &modes);
            let args = b.graph.anchors.args;
            let x = b.ins_proj(args, mode::IS, 0);
            let zero = b.ins_const(Tarval::from_i64(0, mode::IS, &modes));
            let cmp = b.ins_cmp(x, zero);
            let lt = b.ins_proj(cmp, mode::B, Relation::LESS.0 as u32);
            let cond = b.ins_cond(lt);
            let t = b.ins_proj(cond, mode::X, pn::cond::TRUE);
            let f = b.ins_proj(cond, mode::X, pn::cond::FALSE);

            let then_block = b.new_block();
            b.add_in_edge(then_block, t);
            b.mature_block(then_block);
            b.set_current_block(then_block);
            let one = b.ins_const(Tarval::from_i64(1, mode::IS, &modes));
            b.set_value(y, one);
            let jmp_t = b.ins_jmp();

            let else_block = b.new_block();
            b.add_in_edge(else_block, f);
            b.mature_block(else_block);
            b.set_current_block(else_block);
            let two = b.ins_const(Tarval::from_i64(2, mode::IS, &modes));
            b.set_value(y, two);
            let jmp_f = b.ins_jmp();

            let join = b.new_block();
            b.add_in_edge(join, jmp_t);
            b.add_in_edge(join, jmp_f);
            b.mature_block(join);
            b.set_current_block(join);
            let merged = b.get_value(y, mode::IS);
            assert_eq!(b.graph.opcode(merged), Opcode::Phi);
            assert_eq!(b.graph.arity(merged), 2);
            assert_eq!(b.graph.input(merged, 0), one);
            assert_eq!(b.graph.input(merged, 1), two);
            let mem = b.graph.anchors.initial_mem;
            b.ins_return(mem, &[merged]);
            b.finalize();
        }
        let counts = count_ops(&mut g);
        assert_eq!(counts.get(&Opcode::Phi), Some(&1));
        assert_eq!(counts.get(&Opcode::Cond), Some(&1));
        assert_eq!(counts.get(&Opcode::Cmp), Some(&1));
        assert_eq!(counts.get(&Opcode::Jmp), Some(&2));
    }

    // Scenario: a loop whose carried value is never changed inside the
    // body; the header phi must fold to the initial value at maturation.
    #[test]
    fn loop_invariant_phi_folds_to_init() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let v = Variable::with_index(0);
        {
            let mut b = GraphBuilder::new(&mut g, &modes);
            let init = b.ins_const(Tarval::from_i64(7, mode::IS, &modes));
            b.set_value(v, init);
            let entry_jmp = b.ins_jmp();

            let header = b.new_block();
            b.add_in_edge(header, entry_jmp);
            b.set_current_block(header);
            // Reading inside the immature header creates a placeholder.
            let carried = b.get_value(v, mode::IS);
            assert_eq!(b.graph.opcode(carried), Opcode::Phi);

            // The "body" writes nothing; it jumps straight back.
            let body = b.new_block();
            let zero = b.ins_const(Tarval::from_i64(0, mode::IS, &modes));
            let cmp = b.ins_cmp(carried, zero);
            let ne = b.ins_proj(cmp, mode::B, Relation::LESS_GREATER.0 as u32);
            let cond = b.ins_cond(ne);
            let stay = b.ins_proj(cond, mode::X, pn::cond::TRUE);
            let leave = b.ins_proj(cond, mode::X, pn::cond::FALSE);
            b.add_in_edge(body, stay);
            b.mature_block(body);
            b.set_current_block(body);
            let back = b.ins_jmp();
            b.add_in_edge(header, back);
            b.mature_block(header);

            let exit = b.new_block();
            b.add_in_edge(exit, leave);
            b.mature_block(exit);
            b.set_current_block(exit);
            let out = b.get_value(v, mode::IS);
            // The carried value never changed: the phi folded to init.
            assert_eq!(out, init);
            let mem = b.graph.anchors.initial_mem;
            b.ins_return(mem, &[out]);
            b.finalize();
        }
        let counts = count_ops(&mut g);
        assert_eq!(counts.get(&Opcode::Phi), None, "the trivial phi is gone");
    }

    #[test]
    fn unwritten_variable_reads_unknown() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        {
            let mut b = GraphBuilder::new(&mut g, &modes);
            let w = Variable::with_index(3);
            let val = b.get_value(w, mode::IS);
            assert_eq!(b.graph.opcode(val), Opcode::Unknown);
            let mem = b.graph.anchors.initial_mem;
            b.ins_return(mem, &[val]);
            b.finalize();
        }
    }

    #[test]
    fn values_flow_through_block_chains() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let v = Variable::with_index(0);
        {
            let mut b = GraphBuilder::new(&mut g, &modes);
            let c = b.ins_const(Tarval::from_i64(11, mode::IS, &modes));
            b.set_value(v, c);
            let j0 = b.ins_jmp();
            let b1 = b.new_block();
            b.add_in_edge(b1, j0);
            b.mature_block(b1);
            b.set_current_block(b1);
            let j1 = b.ins_jmp();
            let b2 = b.new_block();
            b.add_in_edge(b2, j1);
            b.mature_block(b2);
            b.set_current_block(b2);
            // No phi needed: the single-pred chain forwards the def.
            assert_eq!(b.get_value(v, mode::IS), c);
            let mem = b.graph.anchors.initial_mem;
            b.ins_return(mem, &[c]);
            b.finalize();
        }
    }
}
