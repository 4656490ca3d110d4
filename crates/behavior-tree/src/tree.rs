//! The flattened, immutable-after-build tree and its per-instance runtime.
//!
//! Nodes live in a pre-order array; every structural relation (parent,
//! children, child order, post-order position, depth) is a precomputed table
//! indexed by node, so navigation during ticking is O(1) and allocation-free.

use crate::blackboard::Blackboard;
use crate::exec::{
    self, Exec, TickPolicy, MAIN_LINE, ROOT,
};
use crate::node::Node;
use crate::reevaluate::{self, ReevalTable};
use crate::status::Status;

/// Precomputed structural tables over the pre-order node array.
///
/// Invariant: `parent[i] < i` for every non-root `i`; pre-order position is
/// the node index itself.
pub(crate) struct Topology {
    pub parent: Vec<Option<usize>>,
    pub children: Vec<Vec<usize>>,
    /// Ordinal position among the parent's children; 0 for the root.
    pub child_order: Vec<usize>,
    /// Position of each node in a post-order walk.
    pub post_order: Vec<usize>,
    /// Depth below the root.
    pub level: Vec<usize>,
    pub height: usize,
    /// Nearest composite ancestor reached through the decorator chain, with
    /// the branch index under it. `None` when no composite is above.
    pub governing: Vec<Option<(usize, usize)>>,
}

impl Topology {
    /// Derives all tables from the parent/children relation.
    ///
    /// `is_composite[i]` marks composite nodes for the governing table.
    pub fn new(
        parent: Vec<Option<usize>>,
        children: Vec<Vec<usize>>,
        is_composite: &[bool],
    ) -> Self {
        let n = parent.len();

        let mut child_order = vec![0usize; n];
        for kids in &children {
            for (order, &child) in kids.iter().enumerate() {
                child_order[child] = order;
            }
        }

        let mut level = vec![0usize; n];
        for i in 1..n {
            if let Some(p) = parent[i] {
                level[i] = level[p] + 1;
            }
        }
        let height = level.iter().copied().max().unwrap_or(0);

        // Post-order positions via an explicit two-phase DFS.
        let mut post_order = vec![0usize; n];
        if n > 0 {
            let mut next = 0usize;
            let mut walk: Vec<(usize, bool)> = vec![(ROOT, false)];
            while let Some((node, expanded)) = walk.pop() {
                if expanded {
                    post_order[node] = next;
                    next += 1;
                } else {
                    walk.push((node, true));
                    for &child in children[node].iter().rev() {
                        walk.push((child, false));
                    }
                }
            }
        }

        let mut governing = vec![None; n];
        for i in 0..n {
            let mut branch = child_order[i];
            let mut cursor = parent[i];
            while let Some(p) = cursor {
                if is_composite[p] {
                    governing[i] = Some((p, branch));
                    break;
                }
                branch = child_order[p];
                cursor = parent[p];
            }
        }

        Self { parent, children, child_order, post_order, level, height, governing }
    }

    /// Strict descendant test via pre/post order comparison.
    pub fn is_descendant(&self, node: usize, ancestor: usize) -> bool {
        ancestor < node && self.post_order[ancestor] > self.post_order[node]
    }

    /// Subtree membership including the subtree root itself.
    pub fn is_within(&self, node: usize, scope: usize) -> bool {
        node == scope || self.is_descendant(node, scope)
    }

    /// Lowest common ancestor of two nodes.
    ///
    /// Panics when the nodes share no ancestor; a built tree always has a
    /// single root, so that is an internal invariant violation, not input.
    pub fn lca(&self, a: usize, b: usize) -> usize {
        let mut chain = Vec::with_capacity(self.height + 1);
        let mut cursor = Some(a);
        while let Some(node) = cursor {
            chain.push(node);
            cursor = self.parent[node];
        }

        let mut node = b;
        loop {
            if chain.contains(&node) {
                return node;
            }
            match self.parent[node] {
                Some(p) => node = p,
                None => panic!("tree topology corrupt: {a} and {b} share no ancestor"),
            }
        }
    }
}

/// Breakpoint/step hook for inspecting a tree mid-traversal.
///
/// Purely a debugging aid; a tree with no breakpoint set behaves as if this
/// did not exist.
#[derive(Debug, Default)]
pub struct TreeDebug {
    pub(crate) breakpoint: Option<usize>,
    pub(crate) paused: bool,
    pub(crate) step: bool,
    pub(crate) hit: Option<usize>,
}

impl TreeDebug {
    /// Pause the instance just before the given node first runs.
    pub fn set_breakpoint(&mut self, node: Option<usize>) {
        self.breakpoint = node;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Resume normal ticking.
    pub fn resume(&mut self) {
        self.paused = false;
        self.step = false;
    }

    /// Run a single update while paused.
    pub fn step(&mut self) {
        self.step = true;
    }

    /// The node the breakpoint last fired on.
    pub fn last_hit(&self) -> Option<usize> {
        self.hit
    }
}

/// A built, tickable behavior tree instance.
///
/// Structure is immutable after build; ticking mutates only node runtime
/// state, the execution lines, and the blackboard. Obtained from
/// [`TreeBuilder::build`](crate::builder::TreeBuilder::build).
pub struct BehaviorTree {
    pub(crate) nodes: Vec<Node>,
    pub(crate) topo: Topology,
    pub(crate) blackboard: Blackboard,
    pub(crate) exec: Exec,
    pub(crate) reeval: ReevalTable,
    pub(crate) policy: TickPolicy,
    pub(crate) debug: TreeDebug,
    started: bool,
    last_status: Option<Status>,
}

impl std::fmt::Debug for BehaviorTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorTree")
            .field("nodes", &self.nodes.len())
            .field("started", &self.started)
            .field("last_status", &self.last_status)
            .finish_non_exhaustive()
    }
}

impl BehaviorTree {
    pub(crate) fn new(
        nodes: Vec<Node>,
        topo: Topology,
        blackboard: Blackboard,
        policy: TickPolicy,
    ) -> Self {
        Self {
            nodes,
            topo,
            blackboard,
            exec: Exec::new(),
            reeval: ReevalTable::default(),
            policy,
            debug: TreeDebug::default(),
            started: false,
            last_status: None,
        }
    }

    /// Marks the instance ready to traverse. Idempotent.
    pub fn start(&mut self) {
        self.started = true;
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Pushes the root onto the main execution line.
    ///
    /// No-op while a traversal is already in flight or before
    /// [`start`](Self::start).
    pub fn begin_traversal(&mut self) {
        if !self.started || self.is_running() {
            return;
        }
        if let Some(line) = self.exec.lines[MAIN_LINE].as_mut() {
            line.stack.push(ROOT);
            line.requested.push_back(ROOT);
            self.last_status = None;
            tracing::trace!("traversal begun at root");
        }
    }

    /// Ticks the tree once: reevaluation pass, queued interrupt, then
    /// advance until a Running leaf or an empty stack.
    pub fn update(&mut self, delta: f32) {
        if !self.started {
            return;
        }
        let stepping = self.debug.paused && self.debug.step;
        if self.debug.paused && !stepping {
            return;
        }
        if stepping {
            self.debug.step = false;
            self.debug.paused = false;
        }
        self.update_inner(delta);
        if stepping {
            self.debug.paused = true;
        }
    }

    fn update_inner(&mut self, delta: f32) {
        self.exec.executions = 0;
        {
            let mut ctx = self.ctx(delta);
            reevaluate::run_reevaluation(&mut ctx);
        }

        if let Some(status) = self.exec.pending_interrupt.take() {
            self.interrupt(status);
            return;
        }

        let finished = {
            let mut ctx = self.ctx(delta);
            exec::advance_line(&mut ctx, MAIN_LINE)
        };
        if let Some(status) = finished {
            self.last_status = Some(status);
            tracing::debug!(status = ?status, "tree finished");
        }
    }

    /// Immediately unwinds every active branch, reporting `status` for the
    /// nodes forcibly closed. The tree does not resume by itself.
    pub fn interrupt(&mut self, status: Status) {
        if !self.is_running() {
            return;
        }
        {
            let mut ctx = self.ctx(0.0);
            exec::interrupt_line(&mut ctx, MAIN_LINE, status);
        }
        self.exec.pending_interrupt = None;
        self.reeval.clear();
        self.last_status = Some(status);
        tracing::debug!(status = ?status, "tree interrupted");
    }

    /// Queues an interrupt to be serviced at the start of the next update,
    /// after the reevaluation pass.
    pub fn request_interrupt(&mut self, status: Status) {
        self.exec.pending_interrupt = Some(status);
    }

    pub(crate) fn has_pending_interrupt(&self) -> bool {
        self.exec.pending_interrupt.is_some()
    }

    /// Unwinds only the branch rooted at `subtree`, notifying its parent
    /// with the forced status so the surrounding traversal stays consistent.
    pub fn interrupt_subtree(&mut self, subtree: usize, status: Status) {
        let mut ctx = self.ctx(0.0);
        exec::interrupt_subtree(&mut ctx, subtree, status);
    }

    pub fn is_running(&self) -> bool {
        self.exec.lines[MAIN_LINE]
            .as_ref()
            .is_some_and(|line| !line.stack.is_empty())
    }

    /// Final status of the last completed or interrupted traversal.
    pub fn last_status(&self) -> Option<Status> {
        self.last_status
    }

    pub fn blackboard(&self) -> &Blackboard {
        &self.blackboard
    }

    pub fn blackboard_mut(&mut self) -> &mut Blackboard {
        &mut self.blackboard
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn height(&self) -> usize {
        self.topo.height
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.topo.parent[index]
    }

    pub fn children(&self, index: usize) -> &[usize] {
        &self.topo.children[index]
    }

    pub fn child_count(&self, index: usize) -> usize {
        self.topo.children[index].len()
    }

    /// Ordinal position of `index` among its parent's children.
    pub fn child_order(&self, index: usize) -> usize {
        self.topo.child_order[index]
    }

    /// Depth of `index` below the root.
    pub fn level(&self, index: usize) -> usize {
        self.topo.level[index]
    }

    /// Whether `node` lies strictly below `ancestor`.
    pub fn is_descendant(&self, node: usize, ancestor: usize) -> bool {
        self.topo.is_descendant(node, ancestor)
    }

    /// The main execution line's current root-to-top path.
    pub fn active_path(&self) -> Vec<usize> {
        self.exec.lines[MAIN_LINE]
            .as_ref()
            .map(|line| line.stack.clone())
            .unwrap_or_default()
    }

    pub fn debug(&self) -> &TreeDebug {
        &self.debug
    }

    pub fn debug_mut(&mut self) -> &mut TreeDebug {
        &mut self.debug
    }

    fn ctx(&mut self, delta: f32) -> exec::Ctx<'_> {
        exec::Ctx {
            nodes: &mut self.nodes,
            topo: &self.topo,
            bb: &mut self.blackboard,
            reeval: &mut self.reeval,
            lines: &mut self.exec.lines,
            policy: &self.policy,
            executions: &mut self.exec.executions,
            delta,
            debug: &mut self.debug,
        }
    }
}
