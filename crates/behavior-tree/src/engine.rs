//! Frame driver owning a collection of tree instances.
//!
//! The host calls [`Engine::tick`] once per frame. Each active instance
//! runs its reevaluation pass, services a queued interrupt if one arrived,
//! then advances until a Running leaf or an empty stack. A failed
//! background build disables only its own instance; the rest keep ticking.

use crate::error::BuildError;
use crate::loader::TreeLoad;
use crate::status::Status;
use crate::tree::BehaviorTree;

/// Handle to an instance owned by an [`Engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(usize);

/// Per-instance engine settings.
#[derive(Debug, Clone, Default)]
pub struct InstanceConfig {
    /// Re-enter the root when a traversal completes on its own.
    /// Interrupts never restart.
    pub restart_on_complete: bool,
}

/// Host-visible state of an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Background build still in flight.
    Loading,
    /// Ticking, or idle awaiting a traversal.
    Active,
    /// Host-paused; kept but not ticked.
    Paused,
    /// Traversal completed or was interrupted with this status.
    Finished(Status),
    /// Build failed; permanently disabled.
    Failed,
}

enum Slot {
    Loading { load: TreeLoad, config: InstanceConfig },
    Ready(Instance),
    Failed(BuildError),
}

struct Instance {
    tree: BehaviorTree,
    config: InstanceConfig,
    paused: bool,
}

/// Owns tree instances and drives them once per host frame.
#[derive(Default)]
pub struct Engine {
    slots: Vec<Option<Slot>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a built tree; it is started and begins traversing on the next
    /// tick.
    pub fn insert(&mut self, mut tree: BehaviorTree, config: InstanceConfig) -> InstanceId {
        tree.start();
        tree.begin_traversal();
        self.push(Slot::Ready(Instance { tree, config, paused: false }))
    }

    /// Adds an instance whose tree is still building in the background.
    /// It begins traversing on the first tick after the build is published.
    pub fn insert_loading(&mut self, load: TreeLoad, config: InstanceConfig) -> InstanceId {
        self.push(Slot::Loading { load, config })
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<BehaviorTree> {
        match self.slots.get_mut(id.0)?.take() {
            Some(Slot::Ready(instance)) => Some(instance.tree),
            _ => None,
        }
    }

    /// Advances every active instance by one frame.
    pub fn tick(&mut self, delta: f32) {
        for idx in 0..self.slots.len() {
            let Some(slot) = self.slots[idx].as_mut() else {
                continue;
            };

            // Drain finished background builds before running anyone.
            if let Slot::Loading { load, config } = slot {
                match load.try_take() {
                    None => continue,
                    Some(Ok(mut tree)) => {
                        tree.start();
                        tree.begin_traversal();
                        tracing::debug!(instance = idx, "background build ready");
                        *slot = Slot::Ready(Instance {
                            tree,
                            config: config.clone(),
                            paused: false,
                        });
                    }
                    Some(Err(error)) => {
                        tracing::warn!(
                            instance = idx,
                            %error,
                            "instance disabled: build failed"
                        );
                        *slot = Slot::Failed(error);
                        continue;
                    }
                }
            }

            let Slot::Ready(instance) = slot else {
                continue;
            };
            if instance.paused {
                continue;
            }

            let interrupting = instance.tree.has_pending_interrupt();
            instance.tree.update(delta);

            if !instance.tree.is_running()
                && !interrupting
                && instance.config.restart_on_complete
            {
                instance.tree.begin_traversal();
            }
        }
    }

    /// Queues an interrupt serviced at the start of the instance's next
    /// tick. The instance does not restart afterwards, even with
    /// restart-on-complete set.
    pub fn interrupt(&mut self, id: InstanceId, status: Status) {
        if let Some(instance) = self.instance_mut(id) {
            instance.tree.request_interrupt(status);
        }
    }

    /// Unwinds the instance immediately (reporting Failure for any branch
    /// cut short) and re-enters the root.
    pub fn restart(&mut self, id: InstanceId) {
        if let Some(instance) = self.instance_mut(id) {
            if instance.tree.is_running() {
                instance.tree.interrupt(Status::Failure);
            }
            instance.tree.begin_traversal();
        }
    }

    pub fn set_paused(&mut self, id: InstanceId, paused: bool) {
        if let Some(instance) = self.instance_mut(id) {
            instance.paused = paused;
        }
    }

    pub fn state(&self, id: InstanceId) -> Option<InstanceState> {
        Some(match self.slots.get(id.0)?.as_ref()? {
            Slot::Loading { .. } => InstanceState::Loading,
            Slot::Failed(_) => InstanceState::Failed,
            Slot::Ready(instance) => {
                if instance.paused {
                    InstanceState::Paused
                } else if instance.tree.is_running() {
                    InstanceState::Active
                } else {
                    match instance.tree.last_status() {
                        Some(status) => InstanceState::Finished(status),
                        None => InstanceState::Active,
                    }
                }
            }
        })
    }

    /// The build error that disabled the instance, if any.
    pub fn build_error(&self, id: InstanceId) -> Option<&BuildError> {
        match self.slots.get(id.0)?.as_ref()? {
            Slot::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn tree(&self, id: InstanceId) -> Option<&BehaviorTree> {
        match self.slots.get(id.0)?.as_ref()? {
            Slot::Ready(instance) => Some(&instance.tree),
            _ => None,
        }
    }

    pub fn tree_mut(&mut self, id: InstanceId) -> Option<&mut BehaviorTree> {
        self.instance_mut(id).map(|instance| &mut instance.tree)
    }

    /// Number of live instances, loading and failed ones included.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, slot: Slot) -> InstanceId {
        for (idx, existing) in self.slots.iter_mut().enumerate() {
            if existing.is_none() {
                *existing = Some(slot);
                return InstanceId(idx);
            }
        }
        self.slots.push(Some(slot));
        InstanceId(self.slots.len() - 1)
    }

    fn instance_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        match self.slots.get_mut(id.0)?.as_mut()? {
            Slot::Ready(instance) => Some(instance),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{sequence, task, TreeBuilder};
    use crate::loader::spawn_build;
    use crate::status::Status;
    use crate::testing::{entries, event_log, Probe};
    use std::time::Duration;

    #[test]
    fn instance_runs_to_completion() {
        let log = event_log();
        let tree = TreeBuilder::new()
            .root(sequence(vec![
                task(Probe::new("a", &log, &[Status::Running, Status::Success])),
                task(Probe::new("b", &log, &[Status::Success])),
            ]))
            .build()
            .unwrap();

        let mut engine = Engine::new();
        let id = engine.insert(tree, InstanceConfig::default());

        engine.tick(0.1);
        assert_eq!(engine.state(id), Some(InstanceState::Active));
        engine.tick(0.1);
        assert_eq!(engine.state(id), Some(InstanceState::Finished(Status::Success)));

        // Without restart-on-complete the instance stays finished.
        engine.tick(0.1);
        assert_eq!(engine.state(id), Some(InstanceState::Finished(Status::Success)));
    }

    #[test]
    fn restart_on_complete_re_enters_root() {
        let log = event_log();
        let tree = TreeBuilder::new()
            .root(task(Probe::new("a", &log, &[Status::Success])))
            .build()
            .unwrap();

        let mut engine = Engine::new();
        let id = engine.insert(tree, InstanceConfig { restart_on_complete: true });

        engine.tick(0.1);
        engine.tick(0.1);
        engine.tick(0.1);
        assert_eq!(engine.state(id), Some(InstanceState::Finished(Status::Success)));

        let runs = entries(&log).iter().filter(|e| *e == "run a").count();
        assert_eq!(runs, 3);
    }

    #[test]
    fn queued_interrupt_stops_without_restart() {
        let log = event_log();
        let tree = TreeBuilder::new()
            .root(task(Probe::new("a", &log, &[Status::Running])))
            .build()
            .unwrap();

        let mut engine = Engine::new();
        let id = engine.insert(tree, InstanceConfig { restart_on_complete: true });

        engine.tick(0.1);
        assert_eq!(engine.state(id), Some(InstanceState::Active));

        engine.interrupt(id, Status::Failure);
        engine.tick(0.1);
        assert_eq!(engine.state(id), Some(InstanceState::Finished(Status::Failure)));
        assert!(entries(&log).contains(&"abort a".to_string()));

        // The interrupt suppressed restart-on-complete.
        engine.tick(0.1);
        assert_eq!(engine.state(id), Some(InstanceState::Finished(Status::Failure)));
    }

    #[test]
    fn paused_instance_is_not_ticked() {
        let log = event_log();
        let tree = TreeBuilder::new()
            .root(task(Probe::new("a", &log, &[Status::Running])))
            .build()
            .unwrap();

        let mut engine = Engine::new();
        let id = engine.insert(tree, InstanceConfig::default());
        engine.set_paused(id, true);
        engine.tick(0.1);
        assert_eq!(engine.state(id), Some(InstanceState::Paused));
        assert!(entries(&log).is_empty());

        engine.set_paused(id, false);
        engine.tick(0.1);
        assert_eq!(entries(&log), vec!["enter a", "run a"]);
    }

    #[tokio::test]
    async fn failed_build_disables_only_its_instance() {
        let log = event_log();
        let good = TreeBuilder::new()
            .root(task(Probe::new("a", &log, &[Status::Success])))
            .build()
            .unwrap();

        let mut engine = Engine::new();
        let good_id = engine.insert(good, InstanceConfig::default());
        let bad_id = engine.insert_loading(spawn_build(TreeBuilder::new()), InstanceConfig::default());

        loop {
            engine.tick(0.1);
            if engine.state(bad_id) != Some(InstanceState::Loading) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert_eq!(engine.state(bad_id), Some(InstanceState::Failed));
        assert!(matches!(engine.build_error(bad_id), Some(BuildError::EmptyTree)));
        assert_eq!(engine.state(good_id), Some(InstanceState::Finished(Status::Success)));
    }

    #[tokio::test]
    async fn background_build_promotes_and_ticks() {
        let log = event_log();
        let builder = TreeBuilder::new()
            .root(task(Probe::new("a", &log, &[Status::Success])));

        let mut engine = Engine::new();
        let id = engine.insert_loading(spawn_build(builder), InstanceConfig::default());

        loop {
            engine.tick(0.1);
            match engine.state(id) {
                Some(InstanceState::Finished(status)) => {
                    assert_eq!(status, Status::Success);
                    break;
                }
                _ => tokio::time::sleep(Duration::from_millis(1)).await,
            }
        }
        assert_eq!(entries(&log), vec!["enter a", "run a", "exit a"]);
    }
}
