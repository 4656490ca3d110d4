//! Authoring traits for leaf tasks and conditions.
//!
//! Leaves are the only user-supplied logic in a tree. Everything else
//! (composites, decorators, conditionals) is a closed set of engine-owned
//! variants; see [`crate::node`].

use crate::blackboard::Blackboard;
use crate::status::Status;

/// Per-tick execution context handed to a leaf task's [`Task::run`].
pub struct TickContext<'a> {
    /// The owning instance's shared store.
    pub blackboard: &'a mut Blackboard,
    /// Seconds since the previous tick, as supplied by the host.
    pub delta: f32,
}

/// A leaf behavior authored by the user.
///
/// Lifecycle: [`on_enter`](Task::on_enter) when the node is pushed onto an
/// execution stack, [`run`](Task::run) once per tick while it is the stack
/// top, [`on_exit`](Task::on_exit) when it is popped. A pop forced by a
/// conditional abort or an interrupt additionally calls
/// [`on_abort`](Task::on_abort) before `on_exit`.
///
/// Tasks are opaque to the engine: they communicate only through the
/// returned [`Status`] and the blackboard.
pub trait Task: Send {
    /// Called when the node is pushed onto an execution stack.
    fn on_enter(&mut self, _blackboard: &mut Blackboard) {}

    /// Runs one tick of the task.
    fn run(&mut self, ctx: &mut TickContext<'_>) -> Status;

    /// Called when the node is popped off its execution stack.
    fn on_exit(&mut self, _blackboard: &mut Blackboard) {}

    /// Called before `on_exit` when the branch is forcibly unwound.
    fn on_abort(&mut self, _blackboard: &mut Blackboard) {}

    /// Branch desirability for utility composites. Higher wins.
    fn utility(&self, _blackboard: &Blackboard) -> f32 {
        0.0
    }

    /// Instant tasks may complete within the same tick as their siblings.
    ///
    /// A non-instant task that returns a terminal status stays on the stack
    /// until the next tick, where the cached status pops it without running
    /// it again. This guarantees the task's effect is observable for exactly
    /// one tick and never skipped over by same-tick sibling traversal.
    fn is_instant(&self) -> bool {
        true
    }
}

/// A boolean predicate guarding a conditional decorator.
///
/// Checked on entry and, depending on [`AbortType`](crate::AbortType),
/// re-polled once per tick while the conditional is observing.
pub trait Condition: Send {
    fn check(&mut self, blackboard: &Blackboard) -> bool;
}

impl<F> Condition for F
where
    F: FnMut(&Blackboard) -> bool + Send,
{
    fn check(&mut self, blackboard: &Blackboard) -> bool {
        self(blackboard)
    }
}

/// A [`Task`] implemented by a closure; handy for tests and simple actions.
pub struct FnTask<F>(pub F);

impl<F> Task for FnTask<F>
where
    F: FnMut(&mut TickContext<'_>) -> Status + Send,
{
    fn run(&mut self, ctx: &mut TickContext<'_>) -> Status {
        (self.0)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_condition_reads_blackboard() {
        let mut bb = Blackboard::new();
        bb.set("armed", true);

        let mut cond = |bb: &Blackboard| bb.get::<bool>("armed").unwrap_or(false);
        assert!(Condition::check(&mut cond, &bb));

        bb.set("armed", false);
        assert!(!Condition::check(&mut cond, &bb));
    }

    #[test]
    fn fn_task_runs_closure() {
        let mut bb = Blackboard::new();
        let mut task = FnTask(|_ctx: &mut TickContext<'_>| Status::Success);
        let mut ctx = TickContext { blackboard: &mut bb, delta: 0.0 };
        assert_eq!(task.run(&mut ctx), Status::Success);
    }
}
