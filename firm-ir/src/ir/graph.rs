//! Per-procedure graphs.
//!
//! A [`Graph`] owns the node arena of one procedure: every node lives in
//! the graph's `PrimaryMap`, input lists live in its shared pool, and
//! releasing the graph releases everything at once. Deletion is logical:
//! [`Graph::exchange`] redirects all users and leaves the old record dead
//! on the arena.
//!
//! The distinguished [`Anchors`] are reachable without any traversal:
//! start/end blocks, `Start`/`End`, the singletons `Bad` and `NoMem`, and
//! the `Start` projections (initial memory and control, frame base,
//! globals, thread-local base, argument tuple).
//!
//! Node constructors perform folding, identity rewrites and value
//! numbering on the fly (see the `opt` module); `new_add(x, const 0)`
//! simply hands back `x`.

use crate::ir::cse;
use crate::ir::node::{
    AllocAttr, AllocKind, BlockAttr, CallAttr, NodeAttr, NodeData, SymConstKind,
};
use crate::ir::opcode::Opcode;
use crate::ir::opt;
use crate::ir::Node;
use crate::mode::{self, Mode, ModeRegistry};
use crate::tarval::Tarval;
use crate::tr::{Entity, Type};
use firm_arena::{Idx, IdxList, ListPool, PackedOption, PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

/// Projection numbers of the multi-result operations.
pub mod pn {
    /// `Start` projections.
    pub mod start {
        /// Initial control flow.
        pub const X_INITIAL_EXEC: u32 = 0;
        /// Initial memory state.
        pub const M: u32 = 1;
        /// Frame base pointer.
        pub const P_FRAME_BASE: u32 = 2;
        /// Address of the global segment.
        pub const P_GLOBALS: u32 = 3;
        /// Address of the thread-local segment.
        pub const P_TLS: u32 = 4;
        /// The argument tuple.
        pub const T_ARGS: u32 = 5;
    }
    /// `Cond` projections.
    pub mod cond {
        /// Control flow if the selector is false.
        pub const FALSE: u32 = 0;
        /// Control flow if the selector is true.
        pub const TRUE: u32 = 1;
    }
    /// `Call` projections.
    pub mod call {
        /// Memory result.
        pub const M: u32 = 0;
        /// The result tuple.
        pub const T_RESULT: u32 = 1;
        /// Control flow on exception.
        pub const X_EXCEPT: u32 = 2;
    }
    /// `Load` projections.
    pub mod load {
        /// Memory result.
        pub const M: u32 = 0;
        /// The loaded value.
        pub const RES: u32 = 1;
        /// Control flow on exception.
        pub const X_EXCEPT: u32 = 2;
    }
    /// `Store` projections.
    pub mod store {
        /// Memory result.
        pub const M: u32 = 0;
        /// Control flow on exception.
        pub const X_EXCEPT: u32 = 1;
    }
    /// `Div`/`Mod` projections.
    pub mod div {
        /// Memory result.
        pub const M: u32 = 0;
        /// The quotient/remainder.
        pub const RES: u32 = 1;
        /// Control flow on exception.
        pub const X_EXCEPT: u32 = 2;
    }
    /// `Alloc` projections.
    pub mod alloc {
        /// Memory result.
        pub const M: u32 = 0;
        /// Address of the allocated storage.
        pub const RES: u32 = 1;
        /// Control flow on exception.
        pub const X_EXCEPT: u32 = 2;
    }
    /// `CopyB` projections.
    pub mod copyb {
        /// Memory result.
        pub const M: u32 = 0;
        /// Control flow on exception.
        pub const X_EXCEPT: u32 = 1;
    }
}

/// State of a maintained piece of graph information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoState {
    /// Never computed.
    None,
    /// Computed and up to date.
    Consistent,
    /// Computed, then invalidated by a structural change.
    Inconsistent,
}

/// The distinguished nodes of a graph.
#[derive(Debug, Clone, Copy)]
pub struct Anchors {
    /// The start block.
    pub start_block: Node,
    /// The `Start` node.
    pub start: Node,
    /// The end block; its predecessors are the `Return`s.
    pub end_block: Node,
    /// The `End` node; its inputs are the keep-alive edges.
    pub end: Node,
    /// The unique `Bad` node.
    pub bad: Node,
    /// The unique `NoMem` node.
    pub no_mem: Node,
    /// `Proj(Start)`: initial control.
    pub initial_exec: Node,
    /// `Proj(Start)`: initial memory.
    pub initial_mem: Node,
    /// `Proj(Start)`: frame base.
    pub frame: Node,
    /// `Proj(Start)`: globals segment.
    pub globals: Node,
    /// `Proj(Start)`: thread-local segment.
    pub tls: Node,
    /// `Proj(Start)`: argument tuple.
    pub args: Node,
}

/// A per-procedure SSA graph.
pub struct Graph {
    /// The method entity this graph implements.
    pub entity: PackedOption<Entity>,
    /// The frame type holding spill slots and local compounds.
    pub frame_type: PackedOption<Type>,
    /// The distinguished nodes.
    pub anchors: Anchors,
    pub(crate) nodes: PrimaryMap<Node, NodeData>,
    pub(crate) pool: ListPool<Node>,
    pub(crate) cse: crate::fx::FxHashMap<u64, SmallVec<[Node; 2]>>,
    current_block: PackedOption<Node>,
    visited: SecondaryMap<Node, u64>,
    visit_epoch: u64,
    version: u64,
    outs: Option<SecondaryMap<Node, Vec<Node>>>,
    outs_state: InfoState,
}

impl Graph {
    /// Create a graph with its anchor set in place.
    pub fn new(modes: &ModeRegistry) -> Self {
        let _ = modes;
        let mut g = Graph {
            entity: None.into(),
            frame_type: None.into(),
            anchors: Anchors {
                start_block: Node::from_u32(0),
                start: Node::from_u32(0),
                end_block: Node::from_u32(0),
                end: Node::from_u32(0),
                bad: Node::from_u32(0),
                no_mem: Node::from_u32(0),
                initial_exec: Node::from_u32(0),
                initial_mem: Node::from_u32(0),
                frame: Node::from_u32(0),
                globals: Node::from_u32(0),
                tls: Node::from_u32(0),
                args: Node::from_u32(0),
            },
            nodes: PrimaryMap::new(),
            pool: ListPool::new(),
            cse: Default::default(),
            current_block: None.into(),
            visited: SecondaryMap::new(),
            visit_epoch: 0,
            version: 0,
            outs: None,
            outs_state: InfoState::None,
        };

        let start_block = g.add_node(
            Opcode::Block,
            mode::BB,
            None,
            &[],
            NodeAttr::Block(BlockAttr { matured: true }),
        );
        let start = g.add_node(Opcode::Start, mode::T, Some(start_block), &[], NodeAttr::None);
        let mk_proj = |g: &mut Graph, m: Mode, num: u32| {
            g.add_node(
                Opcode::Proj,
                m,
                Some(start_block),
                &[start],
                NodeAttr::Proj(num),
            )
        };
        let initial_exec = mk_proj(&mut g, mode::X, pn::start::X_INITIAL_EXEC);
        let initial_mem = mk_proj(&mut g, mode::M, pn::start::M);
        let frame = mk_proj(&mut g, mode::P, pn::start::P_FRAME_BASE);
        let globals = mk_proj(&mut g, mode::P, pn::start::P_GLOBALS);
        let tls = mk_proj(&mut g, mode::P, pn::start::P_TLS);
        let args = mk_proj(&mut g, mode::T, pn::start::T_ARGS);

        let end_block = g.add_node(
            Opcode::Block,
            mode::BB,
            None,
            &[],
            NodeAttr::Block(BlockAttr { matured: false }),
        );
        let end = g.add_node(Opcode::End, mode::X, Some(end_block), &[], NodeAttr::None);
        let bad = g.add_node(Opcode::Bad, mode::BAD, Some(start_block), &[], NodeAttr::None);
        let no_mem = g.add_node(Opcode::NoMem, mode::M, Some(start_block), &[], NodeAttr::None);

        g.anchors = Anchors {
            start_block,
            start,
            end_block,
            end,
            bad,
            no_mem,
            initial_exec,
            initial_mem,
            frame,
            globals,
            tls,
            args,
        };
        g.current_block = Some(start_block).into();
        g
    }

    // ---- raw node management ----------------------------------------------

    /// Create a node without any on-the-fly optimization. The workhorse of
    /// the typed constructors; also used directly by passes that must not
    /// have their nodes folded away (backend ops).
    pub fn add_node(
        &mut self,
        opcode: Opcode,
        mode: Mode,
        block: Option<Node>,
        inputs: &[Node],
        attr: NodeAttr,
    ) -> Node {
        debug_assert!(
            (opcode == Opcode::Block) == block.is_none(),
            "exactly the Block nodes live outside a block"
        );
        let inputs = IdxList::from_slice(inputs, &mut self.pool);
        let n = self.nodes.push(NodeData {
            opcode,
            mode,
            block: block.into(),
            inputs,
            attr,
            backedges: Default::default(),
        });
        if self.outs_state == InfoState::Consistent {
            self.record_new_edges(n);
        }
        self.version += 1;
        n
    }

    fn record_new_edges(&mut self, n: Node) {
        let inputs = self.nodes[n].inputs.to_vec(&self.pool);
        let block = self.nodes[n].block.expand();
        if let Some(outs) = self.outs.as_mut() {
            for input in inputs {
                outs[input].push(n);
            }
            if let Some(b) = block {
                outs[b].push(n);
            }
        }
    }

    /// Number of nodes ever created (dead ones included).
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Iterate over every node key, dead ones included.
    pub fn node_keys(&self) -> impl Iterator<Item = Node> {
        firm_arena::Keys::with_len(self.nodes.len())
    }

    /// The structural version; bumped by every mutation. Analyses stamp
    /// themselves with it to implement the consistent/inconsistent
    /// protocol.
    pub fn version(&self) -> u64 {
        self.version
    }

    // ---- queries ----------------------------------------------------------

    /// The node's opcode.
    pub fn opcode(&self, n: Node) -> Opcode {
        self.nodes[n].opcode
    }

    /// The node's mode.
    pub fn mode(&self, n: Node) -> Mode {
        self.nodes[n].mode
    }

    /// The node's attribute payload.
    pub fn attr(&self, n: Node) -> &NodeAttr {
        &self.nodes[n].attr
    }

    /// The node's attribute payload, mutable edition.
    pub fn attr_mut(&mut self, n: Node) -> &mut NodeAttr {
        &mut self.nodes[n].attr
    }

    /// Is `n` a Block?
    pub fn is_block(&self, n: Node) -> bool {
        self.nodes[n].opcode == Opcode::Block
    }

    /// Is `n` the Bad node (or of Bad mode)?
    pub fn is_bad(&self, n: Node) -> bool {
        self.nodes[n].opcode == Opcode::Bad
    }

    /// The block containing `n`. Contract violation for Block nodes.
    pub fn block_of(&self, n: Node) -> Node {
        self.nodes[n]
            .block
            .expand()
            .unwrap_or_else(|| panic!("{} is a Block and has no containing block", n))
    }

    /// The block containing `n`, or `None` for Block nodes.
    pub fn try_block_of(&self, n: Node) -> Option<Node> {
        self.nodes[n].block.expand()
    }

    /// Number of inputs of `n` (the block edge not counted).
    pub fn arity(&self, n: Node) -> usize {
        self.nodes[n].inputs.len(&self.pool)
    }

    /// The `i`-th input, with `Id` forwarders resolved.
    pub fn input(&self, n: Node, i: usize) -> Node {
        let raw = self
            .nodes[n]
            .inputs
            .get(i, &self.pool)
            .unwrap_or_else(|| panic!("{} has no input {}", n, i));
        self.skip_id(raw)
    }

    /// The `i`-th input as stored, without `Id` resolution.
    pub fn raw_input(&self, n: Node, i: usize) -> Node {
        self.nodes[n]
            .inputs
            .get(i, &self.pool)
            .unwrap_or_else(|| panic!("{} has no input {}", n, i))
    }

    /// All inputs of `n`, with `Id` forwarders resolved.
    pub fn inputs(&self, n: Node) -> SmallVec<[Node; 4]> {
        self.nodes[n]
            .inputs
            .iter(&self.pool)
            .map(|p| self.skip_id(p))
            .collect()
    }

    /// Follow `Id` chains to the real node.
    pub fn skip_id(&self, mut n: Node) -> Node {
        while self.nodes[n].opcode == Opcode::Id {
            n = self.nodes[n]
                .inputs
                .get(0, &self.pool)
                .expect("Id node has a predecessor");
        }
        n
    }

    /// Skip over `Proj` and `Id` nodes.
    pub fn skip_proj(&self, n: Node) -> Node {
        let mut n = self.skip_id(n);
        while self.nodes[n].opcode == Opcode::Proj {
            n = self.input(n, 0);
        }
        n
    }

    // ---- mutators ---------------------------------------------------------

    /// Replace input `i` of `n` by `new`.
    pub fn set_input(&mut self, n: Node, i: usize, new: Node) {
        let old = self.nodes[n].inputs.get(i, &self.pool).expect("input exists");
        if old == new {
            return;
        }
        self.nodes[n].inputs.set(i, new, &mut self.pool);
        if self.outs_state == InfoState::Consistent {
            if let Some(outs) = self.outs.as_mut() {
                if let Some(pos) = outs[old].iter().position(|&u| u == n) {
                    outs[old].swap_remove(pos);
                }
                outs[new].push(n);
            }
        }
        self.version += 1;
    }

    /// Replace the whole input list of `n`.
    pub fn set_inputs(&mut self, n: Node, new: &[Node]) {
        let old = self.nodes[n].inputs.to_vec(&self.pool);
        self.nodes[n].inputs = IdxList::from_slice(new, &mut self.pool);
        if self.outs_state == InfoState::Consistent {
            if let Some(outs) = self.outs.as_mut() {
                for o in old {
                    if let Some(pos) = outs[o].iter().position(|&u| u == n) {
                        outs[o].swap_remove(pos);
                    }
                }
                for &i in new {
                    outs[i].push(n);
                }
            }
        }
        self.version += 1;
    }

    /// Move `n` into `block`.
    pub fn set_block(&mut self, n: Node, block: Node) {
        debug_assert!(self.is_block(block), "{} is not a Block", block);
        let old = self.nodes[n].block.expand();
        if old == Some(block) {
            return;
        }
        self.nodes[n].block = Some(block).into();
        if self.outs_state == InfoState::Consistent {
            if let Some(outs) = self.outs.as_mut() {
                if let Some(old) = old {
                    if let Some(pos) = outs[old].iter().position(|&u| u == n) {
                        outs[old].swap_remove(pos);
                    }
                }
                outs[block].push(n);
            }
        }
        self.version += 1;
    }

    /// Append a control-flow predecessor to an immature block (or to the
    /// end block, which stays open until construction finishes).
    pub fn add_in_edge(&mut self, block: Node, cf: Node) {
        debug_assert!(self.is_block(block));
        debug_assert!(
            !self.is_matured(block) || block == self.anchors.end_block,
            "cannot add predecessors to matured {}",
            block
        );
        let mut inputs = self.nodes[block].inputs;
        inputs.push(cf, &mut self.pool);
        self.nodes[block].inputs = inputs;
        if self.outs_state == InfoState::Consistent {
            if let Some(outs) = self.outs.as_mut() {
                outs[cf].push(block);
            }
        }
        self.version += 1;
    }

    /// Is the block's predecessor list final?
    pub fn is_matured(&self, block: Node) -> bool {
        match &self.nodes[block].attr {
            NodeAttr::Block(attr) => attr.matured,
            _ => panic!("{} is not a Block", block),
        }
    }

    /// Freeze the block's predecessor list. Phi bookkeeping is the
    /// construction engine's business; this only flips the flag.
    pub fn set_matured(&mut self, block: Node) {
        match &mut self.nodes[block].attr {
            NodeAttr::Block(attr) => attr.matured = true,
            _ => panic!("{} is not a Block", block),
        }
    }

    /// Replace `old` by `new` everywhere. A no-op when `old == new`.
    ///
    /// With out-edges consistent the users are rewritten in place and the
    /// edge index stays exact; otherwise `old` is turned into an `Id`
    /// forwarder that every input read resolves through.
    pub fn exchange(&mut self, old: Node, new: Node) {
        if old == new {
            return;
        }
        debug_assert!(
            !self.is_block(old) || self.is_block(new) || self.is_bad(new),
            "a Block can only be exchanged for a Block or Bad"
        );
        if self.outs_state == InfoState::Consistent {
            let users = self.outs.as_ref().map(|o| o[old].clone()).unwrap_or_default();
            for u in users {
                if self.nodes[u].block.expand() == Some(old) {
                    self.set_block(u, new);
                }
                let arity = self.arity(u);
                for i in 0..arity {
                    if self.raw_input(u, i) == old {
                        self.set_input(u, i, new);
                    }
                }
            }
            if let Some(outs) = self.outs.as_mut() {
                outs[old].clear();
            }
        } else {
            let mode = self.nodes[old].mode;
            let inputs = IdxList::from_slice(&[new], &mut self.pool);
            let data = &mut self.nodes[old];
            data.opcode = Opcode::Id;
            data.mode = mode;
            data.inputs = inputs;
            data.attr = NodeAttr::None;
        }
        self.version += 1;
    }

    /// Logically delete `n` by exchanging it for `Bad`.
    pub fn kill(&mut self, n: Node) {
        let bad = self.anchors.bad;
        self.exchange(n, bad);
    }

    /// Attach a keep-alive edge for `n` to `End`.
    pub fn keep_alive(&mut self, n: Node) {
        let end = self.anchors.end;
        let already = self.nodes[end]
            .inputs
            .iter(&self.pool)
            .any(|k| k == n);
        if already {
            return;
        }
        let mut inputs = self.nodes[end].inputs;
        inputs.push(n, &mut self.pool);
        self.nodes[end].inputs = inputs;
        if self.outs_state == InfoState::Consistent {
            if let Some(outs) = self.outs.as_mut() {
                outs[n].push(end);
            }
        }
        self.version += 1;
    }

    // ---- construction cursor ----------------------------------------------

    /// The block construction currently targets.
    pub fn current_block(&self) -> Option<Node> {
        self.current_block.expand()
    }

    /// Retarget construction to `block`.
    pub fn set_current_block(&mut self, block: Node) {
        debug_assert!(self.is_block(block));
        self.current_block = Some(block).into();
    }

    // ---- visited epochs ---------------------------------------------------

    /// Reserve a fresh visit epoch. Marks from older epochs read as
    /// unvisited, so passes never need to clear anything.
    pub fn reserve_epoch(&mut self) -> u64 {
        self.visit_epoch += 1;
        self.visit_epoch
    }

    /// Mark `n` visited in `epoch`.
    pub fn mark_visited(&mut self, n: Node, epoch: u64) {
        self.visited[n] = epoch;
    }

    /// Was `n` marked in `epoch`?
    pub fn is_visited(&self, n: Node, epoch: u64) -> bool {
        self.visited[n] == epoch
    }

    // ---- out-edges --------------------------------------------------------

    /// State of the out-edge index.
    pub fn outs_state(&self) -> InfoState {
        self.outs_state
    }

    /// Build (or rebuild) the out-edge index. Afterwards every mutation
    /// keeps it exact until [`Graph::free_outs`] is called.
    pub fn assure_outs(&mut self) {
        if self.outs_state == InfoState::Consistent {
            return;
        }
        let mut outs: SecondaryMap<Node, Vec<Node>> = SecondaryMap::new();
        outs.resize(self.nodes.len());
        for n in self.node_keys() {
            for input in self.nodes[n].inputs.iter(&self.pool) {
                outs[input].push(n);
            }
            if let Some(b) = self.nodes[n].block.expand() {
                outs[b].push(n);
            }
        }
        self.outs = Some(outs);
        self.outs_state = InfoState::Consistent;
    }

    /// Drop the out-edge index.
    pub fn free_outs(&mut self) {
        self.outs = None;
        self.outs_state = InfoState::None;
    }

    /// Declare the out-edge index stale without dropping its storage.
    ///
    /// Mutations through the graph API keep the index exact; a pass that
    /// edits node internals wholesale calls this instead of paying for
    /// incremental maintenance, and the next [`Graph::assure_outs`]
    /// rebuilds.
    pub fn invalidate_outs(&mut self) {
        if self.outs_state == InfoState::Consistent {
            self.outs_state = InfoState::Inconsistent;
        }
    }

    /// The users of `n` (nodes having `n` as an input or as their block).
    /// Requires a consistent out-edge index.
    pub fn outs(&self, n: Node) -> &[Node] {
        debug_assert_eq!(self.outs_state, InfoState::Consistent, "out-edges not computed");
        self.outs
            .as_ref()
            .and_then(|o| o.get(n).map(|v| v.as_slice()))
            .unwrap_or(&[])
    }

    // ---- block helpers ----------------------------------------------------

    /// Control-flow predecessor `i` of `block` (a Jmp/Proj/Return/Bad node).
    pub fn block_pred(&self, block: Node, i: usize) -> Node {
        debug_assert!(self.is_block(block));
        self.input(block, i)
    }

    /// Number of control-flow predecessors of `block`.
    pub fn n_block_preds(&self, block: Node) -> usize {
        debug_assert!(self.is_block(block));
        self.arity(block)
    }

    /// The block containing predecessor `i`'s jump, or `None` when that
    /// predecessor is `Bad` (a dead entry).
    pub fn block_pred_block(&self, block: Node, i: usize) -> Option<Node> {
        let cf = self.block_pred(block, i);
        if self.is_bad(cf) {
            None
        } else {
            Some(self.block_of(cf))
        }
    }

    // ---- typed constructors (with on-the-fly optimization) ---------------

    pub(crate) fn new_node(
        &mut self,
        modes: &ModeRegistry,
        opcode: Opcode,
        m: Mode,
        block: Option<Node>,
        inputs: &[Node],
        attr: NodeAttr,
    ) -> Node {
        // Fold to a constant if the inputs allow it.
        if let Some(tv) = opt::computed_value(self, modes, opcode, m, inputs, &attr) {
            if tv.is_constant() {
                return self.new_const(modes, tv);
            }
        }
        // An existing node may already be this value.
        if let Some(n) = opt::equivalent_node(self, modes, opcode, m, inputs, &attr) {
            return n;
        }
        let n = self.add_node(opcode, m, block, inputs, attr);
        // A rewrite may produce a cheaper node; the original stays dead on
        // the arena.
        let n = opt::transform_node(self, modes, n);
        cse::identify(self, n)
    }

    /// Create a matured block with the given control-flow predecessors.
    pub fn new_block(&mut self, preds: &[Node]) -> Node {
        self.add_node(
            Opcode::Block,
            mode::BB,
            None,
            preds,
            NodeAttr::Block(BlockAttr { matured: true }),
        )
    }

    /// Create an immature block; predecessors arrive via
    /// [`Graph::add_in_edge`] and the engine matures it later.
    pub fn new_immature_block(&mut self) -> Node {
        self.add_node(
            Opcode::Block,
            mode::BB,
            None,
            &[],
            NodeAttr::Block(BlockAttr { matured: false }),
        )
    }

    /// Create (or reuse) a constant. Constants live in the start block.
    pub fn new_const(&mut self, modes: &ModeRegistry, tv: Tarval) -> Node {
        let block = self.anchors.start_block;
        let n = self.add_node(Opcode::Const, tv.mode(), Some(block), &[], NodeAttr::Const(tv));
        let _ = modes;
        cse::identify(self, n)
    }

    /// Create (or reuse) a symbolic constant.
    pub fn new_symconst(&mut self, m: Mode, kind: SymConstKind) -> Node {
        let block = self.anchors.start_block;
        let n = self.add_node(
            Opcode::SymConst,
            m,
            Some(block),
            &[],
            NodeAttr::SymConst(kind),
        );
        cse::identify(self, n)
    }

    /// Create an `Unknown` of mode `m`.
    pub fn new_unknown(&mut self, m: Mode) -> Node {
        let block = self.anchors.start_block;
        let n = self.add_node(Opcode::Unknown, m, Some(block), &[], NodeAttr::None);
        cse::identify(self, n)
    }

    /// Project result `num` of mode `m` out of `pred`, bypassing folding
    /// and value numbering. Backend passes use this for `Perm` results,
    /// which must stay exactly where they were put.
    pub fn new_proj_raw(&mut self, pred: Node, m: Mode, num: u32) -> Node {
        let block = self.try_block_of(pred).unwrap_or(self.anchors.start_block);
        self.add_node(Opcode::Proj, m, Some(block), &[pred], NodeAttr::Proj(num))
    }

    /// Project result `num` of mode `m` out of `pred`.
    pub fn new_proj(&mut self, modes: &ModeRegistry, pred: Node, m: Mode, num: u32) -> Node {
        let block = self.try_block_of(pred).unwrap_or(self.anchors.start_block);
        self.new_node(
            modes,
            Opcode::Proj,
            m,
            Some(block),
            &[pred],
            NodeAttr::Proj(num),
        )
    }

    fn new_binop(
        &mut self,
        modes: &ModeRegistry,
        opcode: Opcode,
        block: Node,
        l: Node,
        r: Node,
    ) -> Node {
        let m = self.mode(l);
        debug_assert_eq!(
            m,
            self.mode(r),
            "{}: operand modes differ ({} vs {})",
            opcode,
            l,
            r
        );
        // Normalise commutative operands so value numbering sees one shape.
        let (l, r) = if opcode.is_commutative() && l.index() > r.index() {
            (r, l)
        } else {
            (l, r)
        };
        self.new_node(modes, opcode, m, Some(block), &[l, r], NodeAttr::None)
    }

    /// `l + r`.
    pub fn new_add(&mut self, modes: &ModeRegistry, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(modes, Opcode::Add, block, l, r)
    }

    /// `l - r`.
    pub fn new_sub(&mut self, modes: &ModeRegistry, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(modes, Opcode::Sub, block, l, r)
    }

    /// `l * r`.
    pub fn new_mul(&mut self, modes: &ModeRegistry, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(modes, Opcode::Mul, block, l, r)
    }

    /// `l & r`.
    pub fn new_and(&mut self, modes: &ModeRegistry, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(modes, Opcode::And, block, l, r)
    }

    /// `l | r`.
    pub fn new_or(&mut self, modes: &ModeRegistry, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(modes, Opcode::Or, block, l, r)
    }

    /// `l ^ r`.
    pub fn new_eor(&mut self, modes: &ModeRegistry, block: Node, l: Node, r: Node) -> Node {
        self.new_binop(modes, Opcode::Eor, block, l, r)
    }

    fn new_shiftop(
        &mut self,
        modes: &ModeRegistry,
        opcode: Opcode,
        block: Node,
        l: Node,
        amount: Node,
    ) -> Node {
        let m = self.mode(l);
        self.new_node(modes, opcode, m, Some(block), &[l, amount], NodeAttr::None)
    }

    /// `l << amount`.
    pub fn new_shl(&mut self, modes: &ModeRegistry, block: Node, l: Node, amount: Node) -> Node {
        self.new_shiftop(modes, Opcode::Shl, block, l, amount)
    }

    /// `l >> amount` (logical).
    pub fn new_shr(&mut self, modes: &ModeRegistry, block: Node, l: Node, amount: Node) -> Node {
        self.new_shiftop(modes, Opcode::Shr, block, l, amount)
    }

    /// `l >> amount` (arithmetic).
    pub fn new_shrs(&mut self, modes: &ModeRegistry, block: Node, l: Node, amount: Node) -> Node {
        self.new_shiftop(modes, Opcode::Shrs, block, l, amount)
    }

    /// Rotate `l` left by `amount`.
    pub fn new_rotl(&mut self, modes: &ModeRegistry, block: Node, l: Node, amount: Node) -> Node {
        self.new_shiftop(modes, Opcode::Rotl, block, l, amount)
    }

    /// `-x`.
    pub fn new_minus(&mut self, modes: &ModeRegistry, block: Node, x: Node) -> Node {
        let m = self.mode(x);
        self.new_node(modes, Opcode::Minus, m, Some(block), &[x], NodeAttr::None)
    }

    /// `!x` (bitwise).
    pub fn new_not(&mut self, modes: &ModeRegistry, block: Node, x: Node) -> Node {
        let m = self.mode(x);
        self.new_node(modes, Opcode::Not, m, Some(block), &[x], NodeAttr::None)
    }

    /// `|x|`.
    pub fn new_abs(&mut self, modes: &ModeRegistry, block: Node, x: Node) -> Node {
        let m = self.mode(x);
        self.new_node(modes, Opcode::Abs, m, Some(block), &[x], NodeAttr::None)
    }

    /// Convert `x` to mode `target`.
    pub fn new_conv(&mut self, modes: &ModeRegistry, block: Node, x: Node, target: Mode) -> Node {
        self.new_node(modes, Opcode::Conv, target, Some(block), &[x], NodeAttr::None)
    }

    /// Compare `l` and `r`; project the relation bits off the result.
    pub fn new_cmp(&mut self, modes: &ModeRegistry, block: Node, l: Node, r: Node) -> Node {
        debug_assert_eq!(self.mode(l), self.mode(r), "Cmp operand modes differ");
        self.new_node(modes, Opcode::Cmp, mode::T, Some(block), &[l, r], NodeAttr::None)
    }

    /// `sel ? t : f`.
    pub fn new_mux(
        &mut self,
        modes: &ModeRegistry,
        block: Node,
        sel: Node,
        f: Node,
        t: Node,
    ) -> Node {
        let m = self.mode(t);
        self.new_node(modes, Opcode::Mux, m, Some(block), &[sel, f, t], NodeAttr::None)
    }

    /// Signed/unsigned division as a memory-using, fragile operation.
    pub fn new_div(
        &mut self,
        modes: &ModeRegistry,
        block: Node,
        mem: Node,
        l: Node,
        r: Node,
    ) -> Node {
        self.new_node(
            modes,
            Opcode::Div,
            mode::T,
            Some(block),
            &[mem, l, r],
            NodeAttr::None,
        )
    }

    /// Remainder; see [`Graph::new_div`].
    pub fn new_mod(
        &mut self,
        modes: &ModeRegistry,
        block: Node,
        mem: Node,
        l: Node,
        r: Node,
    ) -> Node {
        self.new_node(
            modes,
            Opcode::Mod,
            mode::T,
            Some(block),
            &[mem, l, r],
            NodeAttr::None,
        )
    }

    /// Load a value of mode `m` from `ptr`.
    pub fn new_load(
        &mut self,
        modes: &ModeRegistry,
        block: Node,
        mem: Node,
        ptr: Node,
        m: Mode,
    ) -> Node {
        self.new_node(
            modes,
            Opcode::Load,
            mode::T,
            Some(block),
            &[mem, ptr],
            NodeAttr::Load(m),
        )
    }

    /// Store `val` to `ptr`.
    pub fn new_store(
        &mut self,
        modes: &ModeRegistry,
        block: Node,
        mem: Node,
        ptr: Node,
        val: Node,
    ) -> Node {
        self.new_node(
            modes,
            Opcode::Store,
            mode::T,
            Some(block),
            &[mem, ptr, val],
            NodeAttr::None,
        )
    }

    /// Allocate storage for `count` objects of `ty`.
    pub fn new_alloc(
        &mut self,
        modes: &ModeRegistry,
        block: Node,
        mem: Node,
        count: Node,
        ty: Type,
        kind: AllocKind,
    ) -> Node {
        self.new_node(
            modes,
            Opcode::Alloc,
            mode::T,
            Some(block),
            &[mem, count],
            NodeAttr::Alloc(AllocAttr { ty, kind }),
        )
    }

    /// Release storage previously obtained from `Alloc`.
    pub fn new_free(
        &mut self,
        modes: &ModeRegistry,
        block: Node,
        mem: Node,
        ptr: Node,
        count: Node,
        ty: Type,
    ) -> Node {
        self.new_node(
            modes,
            Opcode::Free,
            mode::M,
            Some(block),
            &[mem, ptr, count],
            NodeAttr::Free(ty),
        )
    }

    /// Select member `entity` relative to `ptr`.
    pub fn new_sel(
        &mut self,
        modes: &ModeRegistry,
        block: Node,
        mem: Node,
        ptr: Node,
        entity: Entity,
    ) -> Node {
        self.new_node(
            modes,
            Opcode::Sel,
            mode::P,
            Some(block),
            &[mem, ptr],
            NodeAttr::Sel(entity),
        )
    }

    /// Call the method behind `ptr` with signature `ty`.
    pub fn new_call(
        &mut self,
        modes: &ModeRegistry,
        block: Node,
        mem: Node,
        ptr: Node,
        args: &[Node],
        ty: Type,
    ) -> Node {
        let mut inputs: SmallVec<[Node; 8]> = SmallVec::new();
        inputs.push(mem);
        inputs.push(ptr);
        inputs.extend_from_slice(args);
        self.new_node(
            modes,
            Opcode::Call,
            mode::T,
            Some(block),
            &inputs,
            NodeAttr::Call(CallAttr { ty, callees: None }),
        )
    }

    /// Return to the caller with `results`.
    pub fn new_return(
        &mut self,
        modes: &ModeRegistry,
        block: Node,
        mem: Node,
        results: &[Node],
    ) -> Node {
        let mut inputs: SmallVec<[Node; 4]> = SmallVec::new();
        inputs.push(mem);
        inputs.extend_from_slice(results);
        self.new_node(modes, Opcode::Return, mode::X, Some(block), &inputs, NodeAttr::None)
    }

    /// Unconditional jump out of `block`.
    pub fn new_jmp(&mut self, modes: &ModeRegistry, block: Node) -> Node {
        self.new_node(modes, Opcode::Jmp, mode::X, Some(block), &[], NodeAttr::None)
    }

    /// Two-way branch on the boolean `selector`.
    pub fn new_cond(&mut self, modes: &ModeRegistry, block: Node, selector: Node) -> Node {
        self.new_node(
            modes,
            Opcode::Cond,
            mode::T,
            Some(block),
            &[selector],
            NodeAttr::None,
        )
    }

    /// An SSA join of mode `m` in `block`, one input per block predecessor.
    pub fn new_phi(&mut self, modes: &ModeRegistry, block: Node, preds: &[Node], m: Mode) -> Node {
        self.new_node(modes, Opcode::Phi, m, Some(block), preds, NodeAttr::None)
    }

    /// A tuple of values.
    pub fn new_tuple(&mut self, modes: &ModeRegistry, block: Node, elems: &[Node]) -> Node {
        self.new_node(modes, Opcode::Tuple, mode::T, Some(block), elems, NodeAttr::None)
    }

    /// A memory join.
    pub fn new_sync(&mut self, modes: &ModeRegistry, block: Node, mems: &[Node]) -> Node {
        self.new_node(modes, Opcode::Sync, mode::M, Some(block), mems, NodeAttr::None)
    }

    /// Copy the compound of type `ty` from `src` to `dst`.
    pub fn new_copyb(
        &mut self,
        modes: &ModeRegistry,
        block: Node,
        mem: Node,
        dst: Node,
        src: Node,
        ty: Type,
    ) -> Node {
        self.new_node(
            modes,
            Opcode::CopyB,
            mode::T,
            Some(block),
            &[mem, dst, src],
            NodeAttr::CopyB(ty),
        )
    }

    /// An artificial liveness anchor for `vals` inside `block`.
    pub fn new_keep(&mut self, block: Node, vals: &[Node]) -> Node {
        self.add_node(Opcode::Keep, mode::ANY, Some(block), vals, NodeAttr::None)
    }

    // ---- backend ops (never folded) ---------------------------------------

    /// Store `val` into its spill slot.
    pub fn new_spill(&mut self, block: Node, val: Node) -> Node {
        self.add_node(
            Opcode::Spill,
            mode::M,
            Some(block),
            &[val],
            NodeAttr::SpillSlot(None.into()),
        )
    }

    /// Reload the value spilled by `spill`.
    pub fn new_reload(&mut self, block: Node, spill: Node, m: Mode) -> Node {
        self.add_node(
            Opcode::Reload,
            m,
            Some(block),
            &[spill],
            NodeAttr::SpillSlot(None.into()),
        )
    }

    /// Permute `vals` over their registers; project the results.
    pub fn new_perm(&mut self, block: Node, vals: &[Node]) -> Node {
        self.add_node(Opcode::Perm, mode::T, Some(block), vals, NodeAttr::None)
    }

    /// A register-to-register copy of `val`.
    pub fn new_copy(&mut self, block: Node, val: Node) -> Node {
        let m = self.mode(val);
        self.add_node(Opcode::Copy, m, Some(block), &[val], NodeAttr::None)
    }

    // ---- typed accessors --------------------------------------------------

    /// The tarval of a `Const`.
    pub fn const_value(&self, n: Node) -> Tarval {
        match self.attr(n) {
            NodeAttr::Const(tv) => *tv,
            _ => panic!("{} is not a Const", n),
        }
    }

    /// The projection number of a `Proj`.
    pub fn proj_num(&self, n: Node) -> u32 {
        match self.attr(n) {
            NodeAttr::Proj(num) => *num,
            _ => panic!("{} is not a Proj", n),
        }
    }

    /// The projected node of a `Proj`.
    pub fn proj_pred(&self, n: Node) -> Node {
        debug_assert_eq!(self.opcode(n), Opcode::Proj);
        self.input(n, 0)
    }

    /// The selected entity of a `Sel`.
    pub fn sel_entity(&self, n: Node) -> Entity {
        match self.attr(n) {
            NodeAttr::Sel(e) => *e,
            _ => panic!("{} is not a Sel", n),
        }
    }

    /// The function-pointer operand of a `Call`.
    pub fn call_ptr(&self, n: Node) -> Node {
        debug_assert_eq!(self.opcode(n), Opcode::Call);
        self.input(n, 1)
    }

    /// The argument operands of a `Call`.
    pub fn call_args(&self, n: Node) -> SmallVec<[Node; 4]> {
        debug_assert_eq!(self.opcode(n), Opcode::Call);
        (2..self.arity(n)).map(|i| self.input(n, i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode;

    #[test]
    fn anchors_are_in_place() {
        let modes = ModeRegistry::new();
        let g = Graph::new(&modes);
        assert!(g.is_block(g.anchors.start_block));
        assert!(g.is_block(g.anchors.end_block));
        assert_eq!(g.opcode(g.anchors.start), Opcode::Start);
        assert_eq!(g.opcode(g.anchors.end), Opcode::End);
        assert_eq!(g.opcode(g.anchors.bad), Opcode::Bad);
        assert_eq!(g.opcode(g.anchors.no_mem), Opcode::NoMem);
        assert_eq!(g.mode(g.anchors.initial_mem), mode::M);
        assert_eq!(g.mode(g.anchors.args), mode::T);
        assert_eq!(g.block_of(g.anchors.start), g.anchors.start_block);
        assert!(!g.is_matured(g.anchors.end_block));
    }

    #[test]
    fn exchange_without_outs_leaves_forwarder() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let args = g.anchors.args;
        let x = g.new_proj(&modes, args, mode::IS, 0);
        let y = g.new_proj(&modes, args, mode::IS, 1);
        let block = g.anchors.start_block;
        let neg = g.new_minus(&modes, block, x);
        g.exchange(x, y);
        assert_eq!(g.skip_id(x), y);
        // Input reads resolve through the forwarder.
        assert_eq!(g.input(neg, 0), y);
    }

    #[test]
    fn exchange_with_outs_rewrites_users() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let block = g.anchors.start_block;
        let x = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let neg = g.new_minus(&modes, block, x);
        g.assure_outs();
        let c = g.new_const(&modes, Tarval::from_i64(3, mode::IS, &modes));
        g.exchange(x, c);
        assert_eq!(g.input(neg, 0), c);
        assert!(g.outs(c).contains(&neg));
        assert!(g.outs(x).is_empty());
    }

    #[test]
    fn outs_are_exact_inverse() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let block = g.anchors.start_block;
        let x = g.new_proj(&modes, g.anchors.args, mode::IS, 0);
        let y = g.new_proj(&modes, g.anchors.args, mode::IS, 1);
        let sum = g.new_add(&modes, block, x, y);
        g.assure_outs();
        for n in g.node_keys() {
            for u in g.outs(n) {
                let in_inputs = (0..g.arity(*u)).any(|i| g.raw_input(*u, i) == n)
                    || g.try_block_of(*u) == Some(n);
                assert!(in_inputs, "{} lists {} as user", n, u);
            }
        }
        assert!(g.outs(x).contains(&sum));
        // set_input keeps the index exact.
        let z = g.new_proj(&modes, g.anchors.args, mode::IS, 2);
        g.set_input(sum, 0, z);
        assert!(!g.outs(x).contains(&sum));
        assert!(g.outs(z).contains(&sum));
    }

    #[test]
    fn exchange_same_node_is_noop() {
        let modes = ModeRegistry::new();
        let mut g = Graph::new(&modes);
        let x = g.new_unknown(mode::IS);
        let before = g.version();
        g.exchange(x, x);
        assert_eq!(g.version(), before);
        assert_eq!(g.opcode(x), Opcode::Unknown);
    }
}
