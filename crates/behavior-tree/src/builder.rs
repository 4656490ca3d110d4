//! Ergonomic construction of node graphs and the build pass.
//!
//! A [`NodeDef`] graph owns its children outright, so a dangling or null
//! child reference cannot be expressed; the structural errors that remain
//! (no root, childless composite, bad subtree references) are caught by
//! [`TreeBuilder::build`] before a tree ever ticks.
//!
//! # Example
//!
//! ```ignore
//! let tree = TreeBuilder::new()
//!     .root(selector(vec![
//!         conditional(in_danger, AbortType::LowerPriority, task(Flee::new())),
//!         sequence(vec![task(Patrol::new()), task(Rest::new())]),
//!     ]))
//!     .variable("home", Position::default())
//!     .build()?;
//! ```

use std::any::Any;
use std::collections::HashMap;

use crate::blackboard::{Blackboard, Value};
use crate::error::{BuildError, Result};
use crate::exec::TickPolicy;
use crate::node::{
    CompositeNode, CompositePolicy, ConditionalNode, DecoratorNode, DecoratorPolicy, LeafNode,
    Node, NodeKind, ParallelPolicy,
};
use crate::status::AbortType;
use crate::task::{Condition, Task};
use crate::tree::{BehaviorTree, Topology};

type BoundGetter = Box<dyn Fn() -> Value + Send>;
type BoundSetter = Box<dyn FnMut(Value) + Send>;

/// The build-time shape of one tree node.
pub struct NodeDef {
    name: Option<String>,
    kind: DefKind,
}

enum DefKind {
    Leaf(Box<dyn Task>),
    Decorator(DecoratorPolicy, Box<NodeDef>),
    Conditional {
        condition: Box<dyn Condition>,
        abort: AbortType,
        child: Box<NodeDef>,
    },
    Composite(CompositePolicy, Vec<NodeDef>),
    Subtree(String),
}

impl NodeDef {
    /// Overrides the derived display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Creates a leaf node from an authored task.
pub fn task(task: impl Task + 'static) -> NodeDef {
    NodeDef { name: None, kind: DefKind::Leaf(Box::new(task)) }
}

/// Runs children in order, failing on the first failure.
pub fn sequence(children: Vec<NodeDef>) -> NodeDef {
    composite(CompositePolicy::Sequence, children)
}

/// Runs children in order, succeeding on the first success.
pub fn selector(children: Vec<NodeDef>) -> NodeDef {
    composite(CompositePolicy::Selector, children)
}

/// Runs the single child whose subtree reports the highest utility.
pub fn utility_selector(children: Vec<NodeDef>) -> NodeDef {
    composite(CompositePolicy::Utility, children)
}

/// Runs all children at once, each on its own execution line.
pub fn parallel(policy: ParallelPolicy, children: Vec<NodeDef>) -> NodeDef {
    composite(CompositePolicy::Parallel(policy), children)
}

fn composite(policy: CompositePolicy, children: Vec<NodeDef>) -> NodeDef {
    NodeDef { name: None, kind: DefKind::Composite(policy, children) }
}

/// Inverts the child's terminal status.
pub fn inverter(child: NodeDef) -> NodeDef {
    decorator(DecoratorPolicy::Inverter, child)
}

/// Reports Success regardless of the child's status.
pub fn succeeder(child: NodeDef) -> NodeDef {
    decorator(DecoratorPolicy::Succeeder, child)
}

/// Reports Failure regardless of the child's status.
pub fn failer(child: NodeDef) -> NodeDef {
    decorator(DecoratorPolicy::Failer, child)
}

/// Re-runs the child `times` times, reporting the last status.
pub fn repeat(times: u32, child: NodeDef) -> NodeDef {
    decorator(DecoratorPolicy::Repeat(Some(times)), child)
}

/// Re-runs the child forever; pair with an execution ceiling or a
/// non-instant child.
pub fn repeat_forever(child: NodeDef) -> NodeDef {
    decorator(DecoratorPolicy::Repeat(None), child)
}

/// Re-runs the child until it succeeds.
pub fn until_success(child: NodeDef) -> NodeDef {
    decorator(DecoratorPolicy::UntilSuccess, child)
}

/// Re-runs the child until it fails.
pub fn until_failure(child: NodeDef) -> NodeDef {
    decorator(DecoratorPolicy::UntilFailure, child)
}

fn decorator(policy: DecoratorPolicy, child: NodeDef) -> NodeDef {
    NodeDef { name: None, kind: DefKind::Decorator(policy, Box::new(child)) }
}

/// Gates the child behind a condition, with the given abort observation.
pub fn conditional(
    condition: impl Condition + 'static,
    abort: AbortType,
    child: NodeDef,
) -> NodeDef {
    NodeDef {
        name: None,
        kind: DefKind::Conditional {
            condition: Box::new(condition),
            abort,
            child: Box::new(child),
        },
    }
}

/// References an external subtree registered on the builder by name.
pub fn subtree_ref(name: impl Into<String>) -> NodeDef {
    NodeDef { name: None, kind: DefKind::Subtree(name.into()) }
}

/// Assembles node definitions, shared variables, and external subtrees into
/// a validated [`BehaviorTree`].
#[derive(Default)]
pub struct TreeBuilder {
    root: Option<NodeDef>,
    subtrees: Vec<(String, NodeDef)>,
    variables: Vec<(String, Value)>,
    overrides: Vec<(String, Value)>,
    globals: Vec<String>,
    bindings: Vec<(String, BoundGetter, BoundSetter)>,
    policy: TickPolicy,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root(mut self, def: NodeDef) -> Self {
        self.root = Some(def);
        self
    }

    /// Registers a subtree that [`subtree_ref`] splices in at build time.
    /// Each registration can be attached exactly once.
    pub fn register_subtree(mut self, name: impl Into<String>, def: NodeDef) -> Self {
        self.subtrees.push((name.into(), def));
        self
    }

    /// Declares a shared variable with its initial value.
    pub fn variable<T: Any + Send>(mut self, name: impl Into<String>, value: T) -> Self {
        self.variables.push((name.into(), Box::new(value)));
        self
    }

    /// Records an external override applied after all declarations; the
    /// host-supplied value wins over the tree's own initial value.
    pub fn override_variable<T: Any + Send>(mut self, name: impl Into<String>, value: T) -> Self {
        self.overrides.push((name.into(), Box::new(value)));
        self
    }

    /// Declares a variable resolving against the process-wide global store.
    pub fn global(mut self, name: impl Into<String>) -> Self {
        self.globals.push(name.into());
        self
    }

    /// Declares a variable bound to host accessors.
    pub fn bind(
        mut self,
        name: impl Into<String>,
        get: impl Fn() -> Value + Send + 'static,
        set: impl FnMut(Value) + Send + 'static,
    ) -> Self {
        self.bindings.push((name.into(), Box::new(get), Box::new(set)));
        self
    }

    pub fn tick_policy(mut self, policy: TickPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Flattens the definition graph into the pre-order node array and its
    /// derived tables, then wires up the blackboard.
    pub fn build(self) -> Result<BehaviorTree> {
        let root = self.root.ok_or(BuildError::EmptyTree)?;

        let mut registry: HashMap<String, Option<NodeDef>> = HashMap::new();
        for (name, def) in self.subtrees {
            if registry.insert(name.clone(), Some(def)).is_some() {
                return Err(BuildError::SubtreeConflict(name));
            }
        }

        let mut flat = Flattener {
            nodes: Vec::new(),
            parent: Vec::new(),
            children: Vec::new(),
            registry,
        };
        flat.flatten(root, None)?;

        let is_composite: Vec<bool> = flat.nodes.iter().map(Node::is_composite).collect();
        let topo = Topology::new(flat.parent, flat.children, &is_composite);

        let mut blackboard = Blackboard::new();
        for (name, value) in self.variables {
            blackboard.set_value(&name, value);
        }
        for (name, get, set) in self.bindings {
            blackboard.bind(&name, get, set);
        }
        for name in self.globals {
            blackboard.declare_global(&name);
        }
        // Overrides go last so the host-supplied value wins.
        for (name, value) in self.overrides {
            blackboard.set_value(&name, value);
        }

        tracing::debug!(nodes = flat.nodes.len(), height = topo.height, "tree built");
        Ok(BehaviorTree::new(flat.nodes, topo, blackboard, self.policy))
    }
}

struct Flattener {
    nodes: Vec<Node>,
    parent: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    registry: HashMap<String, Option<NodeDef>>,
}

impl Flattener {
    /// Pre-order: a node is pushed before any of its children, so
    /// `parent[i] < i` holds by construction.
    fn flatten(&mut self, def: NodeDef, parent: Option<usize>) -> Result<usize> {
        let NodeDef { name, kind } = def;
        match kind {
            DefKind::Subtree(reference) => {
                let slot = self
                    .registry
                    .get_mut(&reference)
                    .ok_or_else(|| BuildError::UnknownSubtree(reference.clone()))?;
                let sub = slot.take().ok_or(BuildError::SubtreeConflict(reference))?;
                self.flatten(sub, parent)
            }
            DefKind::Leaf(task) => Ok(self.push(
                name.unwrap_or_else(|| "task".into()),
                NodeKind::Leaf(LeafNode { task }),
                parent,
            )),
            DefKind::Decorator(policy, child) => {
                let idx = self.push(
                    name.unwrap_or_else(|| decorator_name(policy).into()),
                    NodeKind::Decorator(DecoratorNode {
                        policy,
                        iterations: 0,
                        child_status: None,
                    }),
                    parent,
                );
                let child_idx = self.flatten(*child, Some(idx))?;
                self.children[idx].push(child_idx);
                Ok(idx)
            }
            DefKind::Conditional { condition, abort, child } => {
                let idx = self.push(
                    name.unwrap_or_else(|| "conditional".into()),
                    NodeKind::Conditional(ConditionalNode {
                        condition,
                        abort,
                        gate_open: false,
                        child_status: None,
                    }),
                    parent,
                );
                let child_idx = self.flatten(*child, Some(idx))?;
                self.children[idx].push(child_idx);
                Ok(idx)
            }
            DefKind::Composite(policy, kids) => {
                let display = name.unwrap_or_else(|| composite_name(policy).into());
                if kids.is_empty() {
                    return Err(BuildError::NoChildren { name: display });
                }
                let idx = self.push(
                    display,
                    NodeKind::Composite(CompositeNode {
                        policy,
                        cursor: None,
                        last_child_exit: None,
                        branches: Vec::new(),
                    }),
                    parent,
                );
                for kid in kids {
                    let child_idx = self.flatten(kid, Some(idx))?;
                    self.children[idx].push(child_idx);
                }
                Ok(idx)
            }
        }
    }

    fn push(&mut self, name: String, kind: NodeKind, parent: Option<usize>) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(Node { name, kind });
        self.parent.push(parent);
        self.children.push(Vec::new());
        idx
    }
}

fn decorator_name(policy: DecoratorPolicy) -> &'static str {
    match policy {
        DecoratorPolicy::Inverter => "inverter",
        DecoratorPolicy::Succeeder => "succeeder",
        DecoratorPolicy::Failer => "failer",
        DecoratorPolicy::Repeat(_) => "repeat",
        DecoratorPolicy::UntilSuccess => "until-success",
        DecoratorPolicy::UntilFailure => "until-failure",
    }
}

fn composite_name(policy: CompositePolicy) -> &'static str {
    match policy {
        CompositePolicy::Sequence => "sequence",
        CompositePolicy::Selector => "selector",
        CompositePolicy::Utility => "utility-selector",
        CompositePolicy::Parallel(_) => "parallel",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;
    use crate::task::{FnTask, TickContext};

    fn ok() -> NodeDef {
        task(FnTask(|_: &mut TickContext<'_>| Status::Success))
    }

    #[test]
    fn missing_root_is_rejected() {
        let err = TreeBuilder::new().build().unwrap_err();
        assert!(matches!(err, BuildError::EmptyTree));
    }

    #[test]
    fn childless_composite_is_rejected() {
        let err = TreeBuilder::new()
            .root(sequence(vec![]).named("patrol"))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::NoChildren { name } if name == "patrol"));
    }

    #[test]
    fn unknown_subtree_is_rejected() {
        let err = TreeBuilder::new()
            .root(sequence(vec![ok(), subtree_ref("combat")]))
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::UnknownSubtree(name) if name == "combat"));
    }

    #[test]
    fn duplicate_subtree_registration_is_rejected() {
        let err = TreeBuilder::new()
            .root(subtree_ref("combat"))
            .register_subtree("combat", ok())
            .register_subtree("combat", ok())
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::SubtreeConflict(name) if name == "combat"));
    }

    #[test]
    fn double_attachment_is_rejected() {
        let err = TreeBuilder::new()
            .root(sequence(vec![subtree_ref("combat"), subtree_ref("combat")]))
            .register_subtree("combat", ok())
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::SubtreeConflict(name) if name == "combat"));
    }

    #[test]
    fn subtree_is_spliced_in_place() {
        let tree = TreeBuilder::new()
            .root(sequence(vec![ok(), subtree_ref("combat")]))
            .register_subtree("combat", selector(vec![ok(), ok()]).named("combat"))
            .build()
            .unwrap();

        // 0: sequence, 1: task, 2: combat selector, 3..=4: its tasks
        assert_eq!(tree.len(), 5);
        assert_eq!(tree.node(2).name(), "combat");
        assert_eq!(tree.parent(2), Some(0));
        assert_eq!(tree.children(2), &[3, 4]);
    }

    #[test]
    fn flattening_is_pre_order() {
        let tree = TreeBuilder::new()
            .root(selector(vec![inverter(ok()), sequence(vec![ok(), ok()])]))
            .build()
            .unwrap();

        assert_eq!(tree.len(), 6);
        for i in 1..tree.len() {
            let parent = tree.parent(i).unwrap();
            assert!(parent < i, "parent {parent} must precede child {i}");
        }
        assert_eq!(tree.node(0).name(), "selector");
        assert_eq!(tree.node(1).name(), "inverter");
        assert_eq!(tree.node(3).name(), "sequence");
        assert_eq!(tree.child_order(3), 1);
        assert_eq!(tree.height(), 2);
    }

    #[test]
    fn overrides_win_over_declared_variables() {
        let tree = TreeBuilder::new()
            .root(ok())
            .variable("speed", 1.0f32)
            .variable("name", "scout".to_string())
            .override_variable("speed", 4.0f32)
            .build()
            .unwrap();

        assert_eq!(tree.blackboard().get::<f32>("speed"), Some(4.0));
        assert_eq!(
            tree.blackboard().get::<String>("name").as_deref(),
            Some("scout")
        );
    }
}
