//! Conditional-abort observer records and the per-tick reevaluation pass.
//!
//! An observing conditional (abort type other than `None`) registers a
//! record when it is entered. Every tick, before any node runs, the records
//! are re-polled in stable insertion order; aborts are edge-triggered on the
//! flip between the recorded result and the fresh one, so a condition that
//! merely stays true does not restart anything.

use crate::exec::{self, Ctx, Line};
use crate::node::NodeKind;
use crate::status::AbortType;

pub(crate) struct ReevalRecord {
    pub node: usize,
    /// Condition result at the last poll (or entry).
    pub last: bool,
    /// Governing composite and branch index, from the topology table.
    pub governing: Option<(usize, usize)>,
    pub abort: AbortType,
}

/// Observer records, oldest first.
#[derive(Default)]
pub(crate) struct ReevalTable {
    records: Vec<ReevalRecord>,
}

impl ReevalTable {
    /// Adds a record for `node`, or refreshes it in place so the table keeps
    /// its original position in the polling order.
    pub fn register(
        &mut self,
        node: usize,
        last: bool,
        governing: Option<(usize, usize)>,
        abort: AbortType,
    ) {
        match self.records.iter_mut().find(|r| r.node == node) {
            Some(record) => {
                record.last = last;
                record.governing = governing;
                record.abort = abort;
            }
            None => {
                self.records.push(ReevalRecord { node, last, governing, abort });
            }
        }
    }

    pub fn remove(&mut self, node: usize) {
        self.records.retain(|r| r.node != node);
    }

    /// Retires every record governed by the given composite.
    pub fn remove_governed(&mut self, composite: usize) {
        self.records
            .retain(|r| r.governing.is_none_or(|(gov, _)| gov != composite));
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Re-polls every observer and applies at most one restart per flipped
/// record. Runs once per tick, before queued interrupts and advancement.
pub(crate) fn run_reevaluation(ctx: &mut Ctx<'_>) {
    if ctx.reeval.records.is_empty() {
        return;
    }

    // Snapshot: a restart may retire later records mid-pass.
    let candidates: Vec<usize> = ctx.reeval.records.iter().map(|r| r.node).collect();
    for node in candidates {
        let Some(pos) = ctx.reeval.records.iter().position(|r| r.node == node) else {
            continue;
        };

        let (fresh, abort) = {
            let NodeKind::Conditional(c) = &mut ctx.nodes[node].kind else {
                continue;
            };
            (c.condition.check(ctx.bb), c.abort)
        };

        if fresh == ctx.reeval.records[pos].last {
            continue;
        }
        ctx.reeval.records[pos].last = fresh;

        let active = exec::is_active(ctx.lines, node);
        if active && !fresh && abort.aborts_self() {
            self_abort(ctx, node);
        } else if !active && fresh && abort.aborts_lower_priority() {
            lower_priority_abort(ctx, node);
        }
    }
}

/// The conditional's own branch is running and its condition dropped:
/// unwind back to the parent and re-enter at the conditional.
fn self_abort(ctx: &mut Ctx<'_>, node: usize) {
    let Some(parent) = ctx.topo.parent[node] else {
        return;
    };
    let Some(line_id) = exec::find_line_containing(ctx.lines, node) else {
        return;
    };
    let scope = ctx.topo.governing[node].map(|(gov, _)| gov).unwrap_or(parent);
    if !validate_restart(ctx, node, line_id, scope) {
        return;
    }

    let branch = ctx.topo.child_order[node];
    tracing::debug!(node, "conditional self abort");
    exec::abort_branch(ctx, line_id, parent, branch);
    sweep_stale(ctx);
}

/// The conditional is inactive, its condition rose, and traversal has moved
/// past its branch: abort the lower-priority branch and re-enter at the
/// conditional's branch under the governing composite.
fn lower_priority_abort(ctx: &mut Ctx<'_>, node: usize) {
    let Some((gov, branch)) = ctx.topo.governing[node] else {
        return;
    };
    let past = {
        let NodeKind::Composite(c) = &ctx.nodes[gov].kind else {
            return;
        };
        // Parallel branches have no priority order to preempt.
        !c.is_parallel() && c.cursor.is_some_and(|cursor| cursor > branch)
    };
    if !past {
        return;
    }
    let Some(line_id) = exec::find_line_containing(ctx.lines, gov) else {
        return;
    };
    if !validate_restart(ctx, node, line_id, gov) {
        return;
    }

    tracing::debug!(node, composite = gov, branch, "conditional lower priority abort");
    exec::abort_branch(ctx, line_id, gov, branch);
    sweep_stale(ctx);
}

/// A restart applies only when the LCA of the conditional and the line's
/// running top lies within the governing scope's subtree; the LCA itself is
/// total on a built tree, so failure to find one panics inside `lca`.
fn validate_restart(ctx: &Ctx<'_>, node: usize, line_id: usize, scope: usize) -> bool {
    let Some(line) = ctx.lines[line_id].as_ref() else {
        return false;
    };
    let Some(&top) = line.stack.last() else {
        return false;
    };
    let lca = ctx.topo.lca(node, top);
    ctx.topo.is_within(lca, scope)
}

/// Drops records orphaned by a restart: their governing composite (or, for
/// ungoverned records, the conditional itself) no longer sits on any line.
fn sweep_stale(ctx: &mut Ctx<'_>) {
    let lines: &[Option<Line>] = ctx.lines;
    ctx.reeval.records.retain(|record| match record.governing {
        Some((gov, _)) => exec::is_active(lines, gov) || exec::is_active(lines, record.node),
        None => exec::is_active(lines, record.node),
    });
}
