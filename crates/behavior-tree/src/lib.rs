//! Reactive behavior tree engine with conditional aborts and parallel
//! branches.
//!
//! Trees tick once per host frame: each update advances the active branch
//! until a leaf reports [`Status::Running`] or the traversal completes, so
//! any number of instantaneous decisions collapse into a single frame while
//! long actions span many. Conditional decorators with an [`AbortType`]
//! re-poll their condition every tick and can preempt running branches,
//! letting higher-priority behavior react within one frame of the world
//! changing.
//!
//! # Architecture
//!
//! - [`Task`] / [`Condition`]: authored leaf logic, the only user code
//! - [`builder`]: node definition graph, [`TreeBuilder`], structural checks
//! - [`BehaviorTree`]: flattened, immutable-after-build tree instance
//! - [`Blackboard`]: shared store with host bindings and global entries
//! - [`Engine`]: frame driver owning many instances, with background builds
//!   via [`spawn_build`]
//!
//! Ticking is single-threaded and synchronous; only construction may run on
//! a background worker.

pub mod blackboard;
pub mod builder;
pub mod engine;
pub mod error;
mod exec;
pub mod loader;
pub mod node;
mod reevaluate;
pub mod status;
pub mod task;
pub mod tree;

// Re-export core types for ergonomic API
pub use blackboard::{Blackboard, GlobalStore, KeyEvent, KeyEventKind, Value};
pub use builder::{NodeDef, TreeBuilder};
pub use engine::{Engine, InstanceConfig, InstanceId, InstanceState};
pub use error::{BuildError, Result};
pub use exec::TickPolicy;
pub use loader::{spawn_build, TreeLoad};
pub use node::{CompositePolicy, DecoratorPolicy, Node, ParallelPolicy};
pub use status::{AbortType, Status};
pub use task::{Condition, FnTask, Task, TickContext};
pub use tree::{BehaviorTree, TreeDebug};

#[cfg(test)]
pub(crate) mod testing {
    //! Instrumented tasks shared by the module test suites.

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use crate::blackboard::Blackboard;
    use crate::status::Status;
    use crate::task::{Task, TickContext};

    pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

    pub(crate) fn event_log() -> EventLog {
        Arc::default()
    }

    /// Installs a fmt subscriber honoring `RUST_LOG` for test debugging.
    /// Safe to call from every test; only the first install wins.
    pub(crate) fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    pub(crate) fn entries(log: &EventLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    /// Scripted leaf recording its lifecycle into a shared log. The script
    /// is consumed run by run; the final entry repeats forever.
    pub(crate) struct Probe {
        name: &'static str,
        log: EventLog,
        script: VecDeque<Status>,
        instant: bool,
        utility: f32,
    }

    impl Probe {
        pub fn new(name: &'static str, log: &EventLog, script: &[Status]) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                script: script.iter().copied().collect(),
                instant: true,
                utility: 0.0,
            }
        }

        pub fn non_instant(mut self) -> Self {
            self.instant = false;
            self
        }

        pub fn with_utility(mut self, utility: f32) -> Self {
            self.utility = utility;
            self
        }

        fn record(&self, what: &str) {
            self.log.lock().unwrap().push(format!("{what} {}", self.name));
        }
    }

    impl Task for Probe {
        fn on_enter(&mut self, _blackboard: &mut Blackboard) {
            self.record("enter");
        }

        fn run(&mut self, _ctx: &mut TickContext<'_>) -> Status {
            self.record("run");
            if self.script.len() > 1 {
                self.script.pop_front().unwrap_or(Status::Success)
            } else {
                self.script.front().copied().unwrap_or(Status::Success)
            }
        }

        fn on_exit(&mut self, _blackboard: &mut Blackboard) {
            self.record("exit");
        }

        fn on_abort(&mut self, _blackboard: &mut Blackboard) {
            self.record("abort");
        }

        fn utility(&self, _blackboard: &Blackboard) -> f32 {
            self.utility
        }

        fn is_instant(&self) -> bool {
            self.instant
        }
    }

    /// Condition reading a boolean blackboard flag, false when unset.
    pub(crate) fn flag(name: &'static str) -> impl FnMut(&Blackboard) -> bool + Send {
        move |bb: &Blackboard| bb.get::<bool>(name).unwrap_or(false)
    }
}
