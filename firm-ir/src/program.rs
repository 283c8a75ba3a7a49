//! The compilation unit: all graphs plus the shared universes.
//!
//! There is no process-global current graph; everything a pass needs is
//! reachable from the [`Program`] it is handed, and per-graph services take
//! the graph handle explicitly.

use crate::ident::Interner;
use crate::ir::{Graph, Irg, OpRegistry};
use crate::mode::ModeRegistry;
use crate::tr::{Entity, TypeUniverse};
use firm_arena::{PackedOption, PrimaryMap};

/// A whole program under compilation.
pub struct Program {
    /// All modes.
    pub modes: ModeRegistry,
    /// All interned identifiers.
    pub idents: Interner,
    /// All types and entities.
    pub universe: TypeUniverse,
    /// Run-time registered opcodes.
    pub ops: OpRegistry,
    /// All procedure graphs.
    pub graphs: PrimaryMap<Irg, Graph>,
    /// The program entry, if one exists.
    pub main_irg: PackedOption<Irg>,
}

impl Program {
    /// Create an empty program.
    pub fn new() -> Self {
        Self {
            modes: ModeRegistry::new(),
            idents: Interner::new(),
            universe: TypeUniverse::new(),
            ops: OpRegistry::new(),
            graphs: PrimaryMap::new(),
            main_irg: None.into(),
        }
    }

    /// Create a graph for the method entity `ent` and associate the two.
    pub fn new_graph(&mut self, ent: Entity) -> Irg {
        let mut g = Graph::new(&self.modes);
        g.entity = Some(ent).into();
        let irg = self.graphs.push(g);
        self.universe.set_entity_graph(ent, irg);
        irg
    }

    /// The graph of a method entity, if it has one.
    pub fn graph_of(&self, ent: Entity) -> Option<Irg> {
        self.universe.entity(ent).graph.expand()
    }

    /// Iterate over all graph handles.
    pub fn irgs(&self) -> impl Iterator<Item = Irg> {
        firm_arena::Keys::with_len(self.graphs.len())
    }

    /// Walk the nodes of every graph, in the chosen view.
    ///
    /// The two views differ in traversal order, not coverage. Backend
    /// passes must use [`WalkMode::Intraprocedural`]; the interprocedural
    /// view exists for whole-program analyses that want callees visited
    /// before their callers.
    pub fn walk_graphs<F>(&mut self, mode: WalkMode, mut f: F)
    where
        F: FnMut(&mut Graph, Irg, crate::ir::Node),
    {
        let order: Vec<Irg> = match mode {
            WalkMode::Intraprocedural => self.irgs().collect(),
            WalkMode::Interprocedural => {
                // Callee-first: graphs in reverse topological order of the
                // call graph, recursion cycles broken arbitrarily.
                let cg = crate::ana::cgana::build_callgraph(self);
                let irgs: Vec<Irg> = self.irgs().collect();
                let comps = crate::ana::scc::strongly_connected_components(&irgs, |g| {
                    cg.callees[g].clone()
                });
                comps.into_iter().flatten().collect()
            }
        };
        for irg in order {
            let (_, nodes) = crate::ir::walk::node_orders(&mut self.graphs[irg]);
            for n in nodes {
                f(&mut self.graphs[irg], irg, n);
            }
        }
    }
}

/// How [`Program::walk_graphs`] traverses the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    /// Each graph on its own, in graph order.
    Intraprocedural,
    /// Graphs in callee-before-caller order, following the call graph
    /// built by callee analysis. Not legal during backend passes, which
    /// rely on per-graph state.
    Interprocedural,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
