//! Stack-based traversal engine.
//!
//! Each line of control is an execution line: a stack of node indices
//! forming the current path from the line's root to the leaf-most active
//! node, plus a queue of requested-but-not-yet-entered traversals. Entering
//! is two-phase (queue on push, flush before running) so a node's `on_enter`
//! never recursively re-enters the engine.
//!
//! One tick advances a line until its top returns Running or its stack
//! empties. Composites therefore pass through any number of instantaneous
//! children within a single tick; a non-instant leaf interposes a one-tick
//! boundary by caching its terminal status instead of popping immediately.
//!
//! Line 0 is the main line. Parallel composites allocate one line per child
//! branch from the same slot vector and advance them when they run.

use std::collections::VecDeque;

use crate::blackboard::Blackboard;
use crate::node::{BranchSlot, CompositePolicy, DecoratorPolicy, Node, NodeKind, ParallelPolicy};
use crate::reevaluate::ReevalTable;
use crate::status::Status;
use crate::task::TickContext;
use crate::tree::{Topology, TreeDebug};

/// Pre-order index of the root node.
pub(crate) const ROOT: usize = 0;

/// Slot index of the main execution line.
pub(crate) const MAIN_LINE: usize = 0;

/// Per-instance tick limits.
#[derive(Debug, Clone)]
pub struct TickPolicy {
    /// Ceiling on node executions within one update. Guards against cycles
    /// of instantaneous nodes (e.g. an unbounded repeater over an instant
    /// task) starving the host; `None` disables the guard.
    pub max_executions_per_tick: Option<usize>,
}

impl Default for TickPolicy {
    fn default() -> Self {
        Self { max_executions_per_tick: Some(100) }
    }
}

/// One line of control: stack, queued enters, and the cached terminal
/// status of a non-instant top.
#[derive(Default)]
pub(crate) struct Line {
    pub stack: Vec<usize>,
    pub requested: VecDeque<usize>,
    pub cached: Option<Status>,
}

impl Line {
    fn rooted_at(node: usize) -> Self {
        Self {
            stack: vec![node],
            requested: VecDeque::from([node]),
            cached: None,
        }
    }
}

/// Execution state of one tree instance.
pub(crate) struct Exec {
    pub lines: Vec<Option<Line>>,
    pub pending_interrupt: Option<Status>,
    pub executions: usize,
}

impl Exec {
    pub fn new() -> Self {
        Self {
            lines: vec![Some(Line::default())],
            pending_interrupt: None,
            executions: 0,
        }
    }
}

/// Borrowed view over everything one tick phase needs.
pub(crate) struct Ctx<'a> {
    pub nodes: &'a mut [Node],
    pub topo: &'a Topology,
    pub bb: &'a mut Blackboard,
    pub reeval: &'a mut ReevalTable,
    pub lines: &'a mut Vec<Option<Line>>,
    pub policy: &'a TickPolicy,
    pub executions: &'a mut usize,
    pub delta: f32,
    pub debug: &'a mut TreeDebug,
}

/// Why a node left its execution stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PopCause {
    /// Ran to a terminal status.
    Completed,
    /// Unwound by a conditional abort.
    Aborted,
    /// Unwound by an external interrupt.
    Interrupted,
}

/// Advances the line until its top returns Running or the stack empties.
///
/// Returns the final status when this call emptied the stack.
pub(crate) fn advance_line(ctx: &mut Ctx<'_>, line_id: usize) -> Option<Status> {
    let Some(mut line) = ctx.lines[line_id].take() else {
        return None;
    };
    let result = advance(ctx, &mut line);
    ctx.lines[line_id] = Some(line);
    result
}

fn advance(ctx: &mut Ctx<'_>, line: &mut Line) -> Option<Status> {
    loop {
        while let Some(next) = line.requested.pop_front() {
            enter_node(ctx, line, next);
        }
        if ctx.debug.paused {
            return None;
        }
        let Some(&top) = line.stack.last() else {
            return None;
        };

        // A non-instant leaf that finished last tick pops with its cached
        // status without running again.
        if let Some(cached) = line.cached.take() {
            pop_node(ctx, line, cached, PopCause::Completed, true);
            if line.stack.is_empty() {
                return Some(cached);
            }
            continue;
        }

        *ctx.executions += 1;
        if let Some(limit) = ctx.policy.max_executions_per_tick {
            if *ctx.executions > limit {
                tracing::warn!(
                    limit,
                    node = top,
                    "execution ceiling reached; yielding until next tick"
                );
                return None;
            }
        }

        let status = run_node(ctx, line, top);
        tracing::trace!(node = top, status = ?status, "run");

        if status == Status::Running {
            let descended =
                line.stack.last() != Some(&top) || !line.requested.is_empty();
            if descended {
                continue;
            }
            return None;
        }

        if !ctx.nodes[top].is_instant_leaf() {
            line.cached = Some(status);
            return None;
        }

        pop_node(ctx, line, status, PopCause::Completed, true);
        if line.stack.is_empty() {
            return Some(status);
        }
    }
}

fn enter_node(ctx: &mut Ctx<'_>, line: &mut Line, idx: usize) {
    tracing::trace!(node = idx, name = %ctx.nodes[idx].name, "enter");
    if ctx.debug.breakpoint == Some(idx) {
        ctx.debug.paused = true;
        ctx.debug.hit = Some(idx);
        tracing::debug!(node = idx, "breakpoint hit");
    }

    let mut utility_pick = false;
    match &mut ctx.nodes[idx].kind {
        NodeKind::Leaf(leaf) => leaf.task.on_enter(ctx.bb),
        NodeKind::Decorator(d) => {
            d.iterations = 0;
            d.child_status = None;
            let child = ctx.topo.children[idx][0];
            line.stack.push(child);
            line.requested.push_back(child);
        }
        NodeKind::Conditional(c) => {
            c.child_status = None;
            let open = c.condition.check(ctx.bb);
            c.gate_open = open;
            if c.abort.observes() {
                ctx.reeval
                    .register(idx, open, ctx.topo.governing[idx], c.abort);
            }
            if open {
                let child = ctx.topo.children[idx][0];
                line.stack.push(child);
                line.requested.push_back(child);
            }
        }
        NodeKind::Composite(c) => {
            c.last_child_exit = None;
            match c.policy {
                CompositePolicy::Sequence | CompositePolicy::Selector => {
                    c.cursor = Some(0);
                    let child = ctx.topo.children[idx][0];
                    line.stack.push(child);
                    line.requested.push_back(child);
                }
                CompositePolicy::Utility => {
                    c.cursor = None;
                    utility_pick = true;
                }
                CompositePolicy::Parallel(_) => {
                    c.cursor = Some(0);
                    c.branches.clear();
                    for &child in &ctx.topo.children[idx] {
                        let slot = alloc_line(ctx.lines, Line::rooted_at(child));
                        c.branches.push(BranchSlot { line: slot, status: None });
                    }
                }
            }
        }
    }

    if utility_pick {
        let children = &ctx.topo.children[idx];
        let mut best = 0usize;
        let mut best_utility = f32::MIN;
        for (order, &child) in children.iter().enumerate() {
            let utility = subtree_utility(ctx.nodes, ctx.topo, child, ctx.bb);
            if utility > best_utility {
                best_utility = utility;
                best = order;
            }
        }
        let chosen = ctx.topo.children[idx][best];
        if let NodeKind::Composite(c) = &mut ctx.nodes[idx].kind {
            c.cursor = Some(best);
        }
        line.stack.push(chosen);
        line.requested.push_back(chosen);
    }
}

fn run_node(ctx: &mut Ctx<'_>, line: &mut Line, idx: usize) -> Status {
    match &ctx.nodes[idx].kind {
        NodeKind::Leaf(_) => run_leaf(ctx, idx),
        NodeKind::Decorator(_) => run_decorator(ctx, line, idx),
        NodeKind::Conditional(_) => run_conditional(ctx, idx),
        NodeKind::Composite(_) => run_composite(ctx, line, idx),
    }
}

fn run_leaf(ctx: &mut Ctx<'_>, idx: usize) -> Status {
    let NodeKind::Leaf(leaf) = &mut ctx.nodes[idx].kind else {
        unreachable!("run_leaf on non-leaf")
    };
    let mut tick = TickContext { blackboard: ctx.bb, delta: ctx.delta };
    leaf.task.run(&mut tick)
}

fn run_decorator(ctx: &mut Ctx<'_>, line: &mut Line, idx: usize) -> Status {
    let child = ctx.topo.children[idx][0];
    let NodeKind::Decorator(d) = &mut ctx.nodes[idx].kind else {
        unreachable!("run_decorator on non-decorator")
    };
    let Some(exit) = d.child_status else {
        // Child not yet traversed this activation.
        line.stack.push(child);
        line.requested.push_back(child);
        return Status::Running;
    };
    match d.policy {
        DecoratorPolicy::Inverter => exit.invert(),
        DecoratorPolicy::Succeeder => Status::Success,
        DecoratorPolicy::Failer => Status::Failure,
        DecoratorPolicy::Repeat(limit) => {
            d.iterations += 1;
            if limit.is_none_or(|n| d.iterations < n) {
                d.child_status = None;
                line.stack.push(child);
                line.requested.push_back(child);
                Status::Running
            } else {
                exit
            }
        }
        DecoratorPolicy::UntilSuccess => {
            if exit.is_success() {
                exit
            } else {
                d.child_status = None;
                line.stack.push(child);
                line.requested.push_back(child);
                Status::Running
            }
        }
        DecoratorPolicy::UntilFailure => {
            if exit.is_failure() {
                exit
            } else {
                d.child_status = None;
                line.stack.push(child);
                line.requested.push_back(child);
                Status::Running
            }
        }
    }
}

fn run_conditional(ctx: &mut Ctx<'_>, idx: usize) -> Status {
    let NodeKind::Conditional(c) = &ctx.nodes[idx].kind else {
        unreachable!("run_conditional on non-conditional")
    };
    // A closed gate never traversed the child; an open gate reaches here
    // once the child has exited.
    c.child_status.unwrap_or(Status::Failure)
}

fn run_composite(ctx: &mut Ctx<'_>, line: &mut Line, idx: usize) -> Status {
    let (policy, cursor, last_exit) = {
        let NodeKind::Composite(c) = &ctx.nodes[idx].kind else {
            unreachable!("run_composite on non-composite")
        };
        (c.policy, c.cursor, c.last_child_exit)
    };
    let child_count = ctx.topo.children[idx].len();

    match policy {
        CompositePolicy::Sequence => {
            if last_exit == Some(Status::Failure) {
                return Status::Failure;
            }
            let next = cursor.unwrap_or(0);
            if next >= child_count {
                return Status::Success;
            }
            descend(ctx, line, idx, next);
            Status::Running
        }
        CompositePolicy::Selector => {
            if last_exit == Some(Status::Success) {
                return Status::Success;
            }
            let next = cursor.unwrap_or(0);
            if next >= child_count {
                return Status::Failure;
            }
            descend(ctx, line, idx, next);
            Status::Running
        }
        CompositePolicy::Utility => last_exit.unwrap_or(Status::Failure),
        CompositePolicy::Parallel(policy) => run_parallel(ctx, idx, policy),
    }
}

fn descend(ctx: &mut Ctx<'_>, line: &mut Line, idx: usize, order: usize) {
    let child = ctx.topo.children[idx][order];
    if let NodeKind::Composite(c) = &mut ctx.nodes[idx].kind {
        c.cursor = Some(order);
    }
    line.stack.push(child);
    line.requested.push_back(child);
}

fn run_parallel(ctx: &mut Ctx<'_>, idx: usize, policy: ParallelPolicy) -> Status {
    // Branch line ids are copied out so branch advancement does not hold a
    // borrow of the parallel node itself.
    let pending: Vec<usize> = {
        let NodeKind::Composite(c) = &ctx.nodes[idx].kind else {
            unreachable!("run_parallel on non-composite")
        };
        c.branches
            .iter()
            .filter(|b| b.status.is_none())
            .map(|b| b.line)
            .collect()
    };
    for line_id in pending {
        advance_line(ctx, line_id);
    }

    let NodeKind::Composite(c) = &ctx.nodes[idx].kind else {
        unreachable!("run_parallel on non-composite")
    };
    match policy {
        ParallelPolicy::RequireAll => {
            if c.branches.iter().any(|b| b.status == Some(Status::Failure)) {
                Status::Failure
            } else if c.branches.iter().all(|b| b.status == Some(Status::Success)) {
                Status::Success
            } else {
                Status::Running
            }
        }
        ParallelPolicy::RequireOne => {
            if c.branches.iter().any(|b| b.status == Some(Status::Success)) {
                Status::Success
            } else if c.branches.iter().all(|b| b.status == Some(Status::Failure)) {
                Status::Failure
            } else {
                Status::Running
            }
        }
    }
}

/// Pops the line's top node.
///
/// `notify_parent` feeds the exit status into the parent's runtime state
/// (cursor advance, recorded child status, parallel branch slot); abort and
/// interrupt unwinding skip notification because the restart or the
/// enclosing pop re-establishes that state explicitly.
pub(crate) fn pop_node(
    ctx: &mut Ctx<'_>,
    line: &mut Line,
    status: Status,
    cause: PopCause,
    notify_parent: bool,
) {
    let Some(idx) = line.stack.pop() else {
        return;
    };
    line.cached = None;
    tracing::trace!(
        node = idx,
        name = %ctx.nodes[idx].name,
        status = ?status,
        cause = ?cause,
        "pop"
    );

    let mut parallel_branches = Vec::new();
    match &mut ctx.nodes[idx].kind {
        NodeKind::Leaf(leaf) => {
            if cause != PopCause::Completed {
                leaf.task.on_abort(ctx.bb);
            }
            leaf.task.on_exit(ctx.bb);
        }
        NodeKind::Decorator(d) => {
            d.child_status = None;
        }
        NodeKind::Conditional(c) => {
            c.child_status = None;
            // LowerPriority observers outlive their own activation; they are
            // retired when the governing composite exits.
            if !c.abort.aborts_lower_priority() {
                ctx.reeval.remove(idx);
            }
        }
        NodeKind::Composite(c) => {
            if c.is_parallel() {
                parallel_branches = std::mem::take(&mut c.branches);
            }
            c.cursor = None;
            c.last_child_exit = None;
            ctx.reeval.remove_governed(idx);
        }
    }

    // A parallel exiting for any reason tears down its branch lines.
    for slot in parallel_branches {
        close_line(ctx, slot.line, Status::Failure);
    }

    if notify_parent {
        if let Some(parent) = ctx.topo.parent[idx] {
            let order = ctx.topo.child_order[idx];
            match &mut ctx.nodes[parent].kind {
                NodeKind::Decorator(d) => d.child_status = Some(status),
                NodeKind::Conditional(c) => c.child_status = Some(status),
                NodeKind::Composite(c) => {
                    if c.is_parallel() {
                        if let Some(branch) = c.branches.get_mut(order) {
                            branch.status = Some(status);
                        }
                    } else {
                        c.cursor = Some(order + 1);
                        c.last_child_exit = Some(status);
                    }
                }
                NodeKind::Leaf(_) => {}
            }
        }
    }
}

/// Unwinds the line down to (exclusive) `ancestor`, resets the ancestor's
/// cursor to `branch`, and re-traverses that child on the same line.
///
/// When `ancestor` is not on this line (a branch restarting under its own
/// parallel parent), the whole line unwinds and the child re-roots it.
pub(crate) fn abort_branch(ctx: &mut Ctx<'_>, line_id: usize, ancestor: usize, branch: usize) {
    let Some(mut line) = ctx.lines[line_id].take() else {
        return;
    };
    tracing::trace!(ancestor, branch, "aborting running branch");

    while let Some(&top) = line.stack.last() {
        if top == ancestor {
            break;
        }
        pop_node(ctx, &mut line, Status::Failure, PopCause::Aborted, false);
    }
    line.requested.clear();

    match &mut ctx.nodes[ancestor].kind {
        NodeKind::Composite(c) => {
            if c.is_parallel() {
                if let Some(slot) = c.branches.get_mut(branch) {
                    slot.status = None;
                }
            } else {
                c.cursor = Some(branch);
                c.last_child_exit = None;
            }
        }
        NodeKind::Decorator(d) => d.child_status = None,
        NodeKind::Conditional(c) => c.child_status = None,
        NodeKind::Leaf(_) => {}
    }

    let child = ctx.topo.children[ancestor][branch];
    line.stack.push(child);
    line.requested.push_back(child);
    ctx.lines[line_id] = Some(line);
}

/// Fully unwinds a line with the forced status, keeping its slot allocated.
pub(crate) fn interrupt_line(ctx: &mut Ctx<'_>, line_id: usize, status: Status) {
    let Some(mut line) = ctx.lines[line_id].take() else {
        return;
    };
    line.requested.clear();
    while !line.stack.is_empty() {
        pop_node(ctx, &mut line, status, PopCause::Interrupted, false);
    }
    ctx.lines[line_id] = Some(line);
}

/// Unwinds only the branch rooted at `subtree` on whichever line holds it.
/// The subtree root's own pop notifies its parent with the forced status.
pub(crate) fn interrupt_subtree(ctx: &mut Ctx<'_>, subtree: usize, status: Status) {
    let Some(line_id) = find_line_containing(ctx.lines, subtree) else {
        return;
    };
    let Some(mut line) = ctx.lines[line_id].take() else {
        return;
    };
    line.requested.clear();
    while let Some(&top) = line.stack.last() {
        if top == subtree {
            pop_node(ctx, &mut line, status, PopCause::Interrupted, true);
            break;
        }
        pop_node(ctx, &mut line, status, PopCause::Interrupted, false);
    }
    ctx.lines[line_id] = Some(line);
}

/// Unwinds a line and frees its slot for reuse.
fn close_line(ctx: &mut Ctx<'_>, line_id: usize, status: Status) {
    interrupt_line(ctx, line_id, status);
    ctx.lines[line_id] = None;
}

fn alloc_line(lines: &mut Vec<Option<Line>>, line: Line) -> usize {
    let free = lines
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, slot)| slot.is_none())
        .map(|(id, _)| id);
    match free {
        Some(id) => {
            lines[id] = Some(line);
            id
        }
        None => {
            lines.push(Some(line));
            lines.len() - 1
        }
    }
}

pub(crate) fn find_line_containing(lines: &[Option<Line>], node: usize) -> Option<usize> {
    lines.iter().enumerate().find_map(|(id, slot)| {
        slot.as_ref()
            .filter(|line| line.stack.contains(&node))
            .map(|_| id)
    })
}

pub(crate) fn is_active(lines: &[Option<Line>], node: usize) -> bool {
    find_line_containing(lines, node).is_some()
}

fn subtree_utility(nodes: &[Node], topo: &Topology, root: usize, bb: &Blackboard) -> f32 {
    let mut best = f32::MIN;
    let mut walk = vec![root];
    while let Some(node) = walk.pop() {
        if let NodeKind::Leaf(leaf) = &nodes[node].kind {
            best = best.max(leaf.task.utility(bb));
        }
        walk.extend(topo.children[node].iter().copied());
    }
    best
}
