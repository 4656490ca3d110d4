//! The closed node-variant set and per-node runtime state.
//!
//! Structure is fixed at build time; only the small runtime fields (composite
//! cursor, cached child status, conditional gate) mutate while ticking.
//!
//! # Classification
//!
//! Variants are classified by how many children they may hold:
//! - Leaf: 0 children, wraps an authored [`Task`]
//! - Decorator / Conditional: exactly 1 child
//! - Composite: 2 or more children

use crate::status::{AbortType, Status};
use crate::task::{Condition, Task};

/// How a decorator transforms its child's exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoratorPolicy {
    /// Success becomes Failure and vice versa.
    Inverter,
    /// Always reports Success once the child exits.
    Succeeder,
    /// Always reports Failure once the child exits.
    Failer,
    /// Re-runs the child the given number of times (`None` = forever),
    /// reporting the last child status.
    Repeat(Option<u32>),
    /// Re-runs the child until it succeeds.
    UntilSuccess,
    /// Re-runs the child until it fails.
    UntilFailure,
}

/// Success requirement for a parallel composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParallelPolicy {
    /// Succeeds when every branch succeeds; fails on the first failure.
    RequireAll,
    /// Succeeds on the first success; fails when every branch fails.
    RequireOne,
}

/// Child-traversal policy of a composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositePolicy {
    /// Runs children in order; fails on the first failure.
    Sequence,
    /// Runs children in order; succeeds on the first success.
    Selector,
    /// Runs the single child whose subtree reports the highest utility.
    Utility,
    /// Runs all children at once, each on its own execution line.
    Parallel(ParallelPolicy),
}

pub(crate) struct LeafNode {
    pub task: Box<dyn Task>,
}

pub(crate) struct DecoratorNode {
    pub policy: DecoratorPolicy,
    /// Completed child runs in the current activation (Repeat bookkeeping).
    pub iterations: u32,
    pub child_status: Option<Status>,
}

pub(crate) struct ConditionalNode {
    pub condition: Box<dyn Condition>,
    pub abort: AbortType,
    /// Condition result sampled on entry; false keeps the child closed.
    pub gate_open: bool,
    pub child_status: Option<Status>,
}

/// Parallel bookkeeping: which execution line a child branch runs on and the
/// terminal status it reported, if any.
pub(crate) struct BranchSlot {
    pub line: usize,
    pub status: Option<Status>,
}

pub(crate) struct CompositeNode {
    pub policy: CompositePolicy,
    /// Index of the child currently being traversed; `None` means the
    /// composite has not started this activation.
    pub cursor: Option<usize>,
    pub last_child_exit: Option<Status>,
    /// Populated only while a parallel composite is active.
    pub branches: Vec<BranchSlot>,
}

impl CompositeNode {
    pub fn is_parallel(&self) -> bool {
        matches!(self.policy, CompositePolicy::Parallel(_))
    }
}

pub(crate) enum NodeKind {
    Leaf(LeafNode),
    Decorator(DecoratorNode),
    Conditional(ConditionalNode),
    Composite(CompositeNode),
}

/// One node of a built tree, addressed by its pre-order index.
pub struct Node {
    pub(crate) name: String,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Structural contract: 0 for leaves, 1 for decorators and conditionals,
    /// `usize::MAX` for composites.
    pub fn max_children(&self) -> usize {
        match self.kind {
            NodeKind::Leaf(_) => 0,
            NodeKind::Decorator(_) | NodeKind::Conditional(_) => 1,
            NodeKind::Composite(_) => usize::MAX,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub fn is_decorator(&self) -> bool {
        matches!(self.kind, NodeKind::Decorator(_))
    }

    pub fn is_conditional(&self) -> bool {
        matches!(self.kind, NodeKind::Conditional(_))
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.kind, NodeKind::Composite(_))
    }

    /// Current child index of a composite; `None` for other variants or for
    /// a composite that has not started this activation.
    pub fn current_child(&self) -> Option<usize> {
        match &self.kind {
            NodeKind::Composite(c) => c.cursor,
            _ => None,
        }
    }

    /// False only for a leaf whose task reports itself non-instant; such a
    /// leaf holds its terminal status for one tick instead of popping.
    pub(crate) fn is_instant_leaf(&self) -> bool {
        match &self.kind {
            NodeKind::Leaf(leaf) => leaf.task.is_instant(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::FnTask;
    use crate::TickContext;

    #[test]
    fn max_children_classifies_variants() {
        let leaf = Node {
            name: "leaf".into(),
            kind: NodeKind::Leaf(LeafNode {
                task: Box::new(FnTask(|_: &mut TickContext<'_>| Status::Success)),
            }),
        };
        assert_eq!(leaf.max_children(), 0);
        assert!(leaf.is_leaf());

        let deco = Node {
            name: "inv".into(),
            kind: NodeKind::Decorator(DecoratorNode {
                policy: DecoratorPolicy::Inverter,
                iterations: 0,
                child_status: None,
            }),
        };
        assert_eq!(deco.max_children(), 1);

        let comp = Node {
            name: "seq".into(),
            kind: NodeKind::Composite(CompositeNode {
                policy: CompositePolicy::Sequence,
                cursor: None,
                last_child_exit: None,
                branches: Vec::new(),
            }),
        };
        assert_eq!(comp.max_children(), usize::MAX);
        assert_eq!(comp.current_child(), None);
    }
}
